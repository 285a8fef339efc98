//! Region offsets and address arithmetic.
//!
//! Every helper reports a dedicated [`MemoryErrorCode`] so callers can tell
//! configuration bugs (misalignment, out of range) from exhaustion.

use std::fmt;

use ember_common::constants::MEMORY_ALIGNMENT;

use crate::error::{MemoryErrorCode, MemoryResult};

/// Rounds `size` up to the slot granularity.
///
/// Returns `MemorySizeTooLarge` if rounding overflows.
pub fn align_up(size: u64) -> MemoryResult<u64> {
    size.checked_add(MEMORY_ALIGNMENT - 1)
        .map(|s| s & !(MEMORY_ALIGNMENT - 1))
        .ok_or(MemoryErrorCode::MemorySizeTooLarge)
}

/// Validates an allocation size against the region size.
pub fn validate_size(size: u64, region_size: u64) -> MemoryResult<()> {
    if size == 0 {
        return Err(MemoryErrorCode::MemorySizeCannotBeZero);
    }
    if size > region_size {
        return Err(MemoryErrorCode::MemorySizeTooLarge);
    }
    Ok(())
}

/// Validates a whole-region size.
pub(crate) fn validate_region_size(size: u64) -> MemoryResult<()> {
    if size == 0 {
        return Err(MemoryErrorCode::MemorySizeCannotBeZero);
    }
    if size % MEMORY_ALIGNMENT != 0 {
        return Err(MemoryErrorCode::MemorySizeNotAligned);
    }
    if usize::try_from(size).map_or(true, |s| s > isize::MAX as usize) {
        return Err(MemoryErrorCode::MemorySizeTooLarge);
    }
    Ok(())
}

/// A byte offset into the backing region.
///
/// Valid offsets are non-zero, aligned to the slot granularity and lie within
/// the region.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct AddressOffset(u64);

impl AddressOffset {
    /// Offset zero: "no storage".
    pub const INVALID: Self = Self(0);

    /// Wraps a raw offset without validation.
    #[inline]
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// Returns the raw offset.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true unless this is the invalid offset.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Checks that this offset designates storage in a region of
    /// `region_size` bytes.
    pub fn validate(self, region_size: u64) -> MemoryResult<()> {
        if !self.is_valid() {
            return Err(MemoryErrorCode::InvalidMemoryOffset);
        }
        if self.0 % MEMORY_ALIGNMENT != 0 {
            return Err(MemoryErrorCode::MemoryOffsetNotAligned);
        }
        if self.0 >= region_size {
            return Err(MemoryErrorCode::MemoryOffsetOutOfRange);
        }
        Ok(())
    }

    /// Checks that `len` bytes starting at this offset fit the region.
    pub fn validate_span(self, len: u64, region_size: u64) -> MemoryResult<()> {
        self.validate(region_size)?;
        match self.0.checked_add(len) {
            Some(end) if end <= region_size => Ok(()),
            _ => Err(MemoryErrorCode::MemoryOffsetOutOfRange),
        }
    }

    /// Converts an absolute address inside a region starting at `base` into
    /// an offset.
    pub fn from_address(base: usize, address: usize, region_size: u64) -> MemoryResult<Self> {
        if address as u64 % MEMORY_ALIGNMENT != 0 {
            return Err(MemoryErrorCode::MemoryAddressNotAligned);
        }
        let offset = address
            .checked_sub(base)
            .ok_or(MemoryErrorCode::MemoryAddressOutOfRange)? as u64;
        if offset >= region_size {
            return Err(MemoryErrorCode::MemoryAddressOutOfRange);
        }
        let offset = Self(offset);
        offset.validate(region_size)?;
        Ok(offset)
    }

    /// Converts this offset into an absolute address inside a region
    /// starting at `base`.
    pub fn to_address(self, base: usize, region_size: u64) -> MemoryResult<usize> {
        if base as u64 % MEMORY_ALIGNMENT != 0 {
            return Err(MemoryErrorCode::MemoryAddressNotAligned);
        }
        self.validate(region_size)?;
        base.checked_add(self.0 as usize)
            .ok_or(MemoryErrorCode::MemoryAddressOutOfRange)
    }

    #[inline]
    pub(crate) fn range(self, len: u64) -> std::ops::Range<usize> {
        let start = self.0 as usize;
        start..start + len as usize
    }
}

impl fmt::Debug for AddressOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "AddressOffset({:#x})", self.0)
        } else {
            write!(f, "AddressOffset(INVALID)")
        }
    }
}

impl fmt::Display for AddressOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGION: u64 = 4096;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(1).unwrap(), 8);
        assert_eq!(align_up(8).unwrap(), 8);
        assert_eq!(align_up(9).unwrap(), 16);
        assert_eq!(align_up(u64::MAX), Err(MemoryErrorCode::MemorySizeTooLarge));
    }

    #[test]
    fn test_validate_size() {
        assert_eq!(validate_size(0, REGION), Err(MemoryErrorCode::MemorySizeCannotBeZero));
        assert_eq!(validate_size(REGION + 1, REGION), Err(MemoryErrorCode::MemorySizeTooLarge));
        assert!(validate_size(64, REGION).is_ok());
    }

    #[test]
    fn test_validate_region_size() {
        assert_eq!(validate_region_size(0), Err(MemoryErrorCode::MemorySizeCannotBeZero));
        assert_eq!(validate_region_size(4097), Err(MemoryErrorCode::MemorySizeNotAligned));
        assert!(validate_region_size(REGION).is_ok());
    }

    #[test]
    fn test_offset_validation() {
        assert_eq!(
            AddressOffset::INVALID.validate(REGION),
            Err(MemoryErrorCode::InvalidMemoryOffset)
        );
        assert_eq!(
            AddressOffset::new(12).validate(REGION),
            Err(MemoryErrorCode::MemoryOffsetNotAligned)
        );
        assert_eq!(
            AddressOffset::new(REGION).validate(REGION),
            Err(MemoryErrorCode::MemoryOffsetOutOfRange)
        );
        assert_eq!(
            AddressOffset::new(REGION - 8).validate_span(16, REGION),
            Err(MemoryErrorCode::MemoryOffsetOutOfRange)
        );
        assert!(AddressOffset::new(64).validate_span(64, REGION).is_ok());
    }

    #[test]
    fn test_address_conversion() {
        let base = 0x1000;
        let offset = AddressOffset::from_address(base, base + 0x40, REGION).unwrap();
        assert_eq!(offset.as_u64(), 0x40);
        assert_eq!(offset.to_address(base, REGION).unwrap(), base + 0x40);

        assert_eq!(
            AddressOffset::from_address(base, base + 3, REGION),
            Err(MemoryErrorCode::MemoryAddressNotAligned)
        );
        assert_eq!(
            AddressOffset::from_address(base, base - 8, REGION),
            Err(MemoryErrorCode::MemoryAddressOutOfRange)
        );
        assert_eq!(
            AddressOffset::from_address(base, base + REGION as usize, REGION),
            Err(MemoryErrorCode::MemoryAddressOutOfRange)
        );
        assert_eq!(
            AddressOffset::new(8).to_address(0x1003, REGION),
            Err(MemoryErrorCode::MemoryAddressNotAligned)
        );
    }
}
