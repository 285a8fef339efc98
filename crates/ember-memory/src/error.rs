//! Memory manager error codes.

use std::fmt;

use ember_common::error::EmberError;
use thiserror::Error;

/// Result type for memory manager operations.
pub type MemoryResult<T> = std::result::Result<T, MemoryErrorCode>;

/// Closed set of memory manager error codes.
///
/// Hot-path operations return these codes rather than rich errors so callers
/// can branch on cause, distinguishing configuration bugs (alignment, range)
/// from transient exhaustion (`InsufficientMemorySize`,
/// `AllocationCountTooLarge`). The numeric values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[repr(i32)]
pub enum MemoryErrorCode {
    /// The manager has not been initialized.
    #[error("memory manager is not initialized")]
    NotInitialized = 1,
    /// The manager was already initialized.
    #[error("memory manager is already initialized")]
    AlreadyInitialized = 2,
    /// A memory address is not aligned to the slot granularity.
    #[error("memory address is not aligned")]
    MemoryAddressNotAligned = 3,
    /// A region offset is not aligned to the slot granularity.
    #[error("memory offset is not aligned")]
    MemoryOffsetNotAligned = 4,
    /// A region size is not a multiple of the slot granularity.
    #[error("memory size is not aligned")]
    MemorySizeNotAligned = 5,
    /// A size of zero was requested.
    #[error("memory size cannot be zero")]
    MemorySizeCannotBeZero = 6,
    /// A size exceeds what the region can ever hold.
    #[error("memory size is too large")]
    MemorySizeTooLarge = 7,
    /// A memory address lies outside the region.
    #[error("memory address is out of range")]
    MemoryAddressOutOfRange = 8,
    /// A region offset lies outside the region.
    #[error("memory offset is out of range")]
    MemoryOffsetOutOfRange = 9,
    /// The offset does not designate storage (zero or released).
    #[error("invalid memory offset")]
    InvalidMemoryOffset = 10,
    /// The region has no room left for the request.
    #[error("insufficient memory size")]
    InsufficientMemorySize = 11,
    /// The locator table or an allocation stack is exhausted.
    #[error("allocation count too large")]
    AllocationCountTooLarge = 12,
    /// An argument has an invalid value.
    #[error("invalid argument value")]
    InvalidArgumentValue = 13,
    /// A subordinate manager attempted a master-only operation.
    #[error("operation available only to master manager")]
    OperationAvailableOnlyToMasterManager = 14,
}

impl MemoryErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Returns the snake-case name of the code.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::NotInitialized => "not_initialized",
            Self::AlreadyInitialized => "already_initialized",
            Self::MemoryAddressNotAligned => "memory_address_not_aligned",
            Self::MemoryOffsetNotAligned => "memory_offset_not_aligned",
            Self::MemorySizeNotAligned => "memory_size_not_aligned",
            Self::MemorySizeCannotBeZero => "memory_size_cannot_be_zero",
            Self::MemorySizeTooLarge => "memory_size_too_large",
            Self::MemoryAddressOutOfRange => "memory_address_out_of_range",
            Self::MemoryOffsetOutOfRange => "memory_offset_out_of_range",
            Self::InvalidMemoryOffset => "invalid_memory_offset",
            Self::InsufficientMemorySize => "insufficient_memory_size",
            Self::AllocationCountTooLarge => "allocation_count_too_large",
            Self::InvalidArgumentValue => "invalid_argument_value",
            Self::OperationAvailableOnlyToMasterManager => {
                "operation_available_only_to_master_manager"
            }
        }
    }

    /// Returns true for exhaustion codes, which may clear once storage is
    /// reclaimed.
    #[must_use]
    pub const fn is_exhaustion(self) -> bool {
        matches!(
            self,
            Self::InsufficientMemorySize | Self::AllocationCountTooLarge
        )
    }
}

impl From<MemoryErrorCode> for EmberError {
    fn from(code: MemoryErrorCode) -> Self {
        EmberError::Memory {
            code: code.as_i32(),
            name: code.name(),
        }
    }
}

/// Formats as `name (code)`.
pub(crate) struct CodeDisplay(pub MemoryErrorCode);

impl fmt::Display for CodeDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0.name(), self.0.as_i32())
    }
}
