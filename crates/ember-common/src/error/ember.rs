//! Engine error types.

use std::fmt;
use thiserror::Error;

use crate::types::{FieldPosition, ObjectId, ObjectType, TxnTimestamp};

/// Error codes for categorizing errors.
///
/// The high byte is the category. Codes are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Internal error (bug).
    Internal = 0x0001,
    /// Operation not supported.
    NotSupported = 0x0002,
    /// Invalid argument provided.
    InvalidArgument = 0x0003,
    /// A fatal invariant was violated.
    InvariantViolation = 0x0004,
    /// Invalid configuration value.
    InvalidConfig = 0x0005,
    /// Component failed to initialize.
    InitializationFailed = 0x0006,

    // Memory errors (0x0100 - 0x01FF)
    /// Memory manager reported an error code.
    Memory = 0x0100,

    // Catalog errors (0x0200 - 0x02FF)
    /// Type has no catalog entry.
    TypeNotFound = 0x0200,
    /// Table not found.
    TableNotFound = 0x0201,
    /// Table already exists.
    TableExists = 0x0202,
    /// Field not found.
    FieldNotFound = 0x0203,
    /// Field already exists.
    FieldExists = 0x0204,

    // Transaction errors (0x0300 - 0x03FF)
    /// No transaction is active.
    NoActiveTransaction = 0x0300,
    /// A transaction is already active.
    TransactionInProgress = 0x0301,
    /// Transaction conflict detected.
    TransactionConflict = 0x0302,
    /// Transaction not found.
    TransactionNotFound = 0x0303,
    /// Transaction is not in a state allowing the operation.
    TransactionNotActive = 0x0304,

    // Object errors (0x0400 - 0x04FF)
    /// Object not found.
    ObjectNotFound = 0x0400,
    /// Object already exists.
    ObjectExists = 0x0401,

    // Rule errors (0x0500 - 0x05FF)
    /// Rule binding is malformed.
    InvalidRuleBinding = 0x0500,
    /// Rule already subscribed with a different handler.
    DuplicateRule = 0x0501,
    /// Subscription is invalid.
    InvalidSubscription = 0x0502,
    /// A rule handler failed.
    RuleFailed = 0x0503,
    /// Rule engine is shut down.
    RuleEngineShutdown = 0x0504,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Memory",
            0x02 => "Catalog",
            0x03 => "Transaction",
            0x04 => "Object",
            0x05 => "Rules",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for Ember.
///
/// Two tiers share this enum. Recoverable API errors are expected to be
/// handled by direct callers. [`EmberError::InvariantViolation`] is fatal:
/// it signals a programming or data-corruption bug and callers propagate it
/// straight up instead of continuing (see [`EmberError::is_fatal`]).
///
/// # Example
///
/// ```rust
/// use ember_common::error::{EmberError, EmberResult};
/// use ember_common::types::ObjectType;
///
/// fn lookup(object_type: ObjectType) -> EmberResult<u64> {
///     Err(EmberError::TypeNotFound { object_type })
/// }
///
/// assert!(!lookup(ObjectType::new(3)).unwrap_err().is_fatal());
/// ```
#[derive(Debug, Error)]
pub enum EmberError {
    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Operation not supported.
    #[error("operation not supported: {operation}")]
    NotSupported {
        /// The unsupported operation.
        operation: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// A fatal invariant was violated.
    #[error("invariant violation: {description} (`{condition}` failed at {file}:{line} in {function})")]
    InvariantViolation {
        /// What the invariant protects.
        description: String,
        /// Text of the failed condition.
        condition: String,
        /// Source file of the check.
        file: &'static str,
        /// Source line of the check.
        line: u32,
        /// Enclosing function or module path.
        function: &'static str,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// A component failed to initialize.
    #[error("initialization failed: {message}")]
    InitializationFailed {
        /// Error message.
        message: String,
    },

    // ==========================================================================
    // Memory Errors
    // ==========================================================================
    /// The memory manager returned an error code.
    #[error("memory manager error {code} ({name})")]
    Memory {
        /// Numeric memory error code.
        code: i32,
        /// Symbolic name of the code.
        name: &'static str,
    },

    // ==========================================================================
    // Catalog Errors
    // ==========================================================================
    /// Type has no catalog entry.
    #[error("type {object_type} has no catalog entry")]
    TypeNotFound {
        /// The unknown type.
        object_type: ObjectType,
    },

    /// Table not found.
    #[error("table '{table}' not found")]
    TableNotFound {
        /// The missing table.
        table: String,
    },

    /// Table already exists.
    #[error("table '{table}' already exists")]
    TableExists {
        /// The duplicate table.
        table: String,
    },

    /// Field not found.
    #[error("field {position} not found in table '{table}'")]
    FieldNotFound {
        /// The table name.
        table: String,
        /// The missing field position.
        position: FieldPosition,
    },

    /// Field already exists.
    #[error("field '{field}' already exists in table '{table}'")]
    FieldExists {
        /// The table name.
        table: String,
        /// The duplicate field.
        field: String,
    },

    // ==========================================================================
    // Transaction Errors
    // ==========================================================================
    /// No transaction is active.
    #[error("no transaction is active")]
    NoActiveTransaction,

    /// A transaction is already active.
    #[error("transaction {txn} is already active")]
    TransactionInProgress {
        /// The active transaction.
        txn: TxnTimestamp,
    },

    /// First-committer-wins conflict.
    #[error("transaction {txn} conflicts with {committed_by} on object {object}")]
    TransactionConflict {
        /// The transaction that lost.
        txn: TxnTimestamp,
        /// Commit timestamp of the transaction that won.
        committed_by: TxnTimestamp,
        /// The object both wrote.
        object: ObjectId,
    },

    /// Transaction not found.
    #[error("transaction {txn} not found")]
    TransactionNotFound {
        /// The missing transaction.
        txn: TxnTimestamp,
    },

    /// Transaction is not active.
    #[error("transaction {txn} is not active (state: {state})")]
    TransactionNotActive {
        /// The transaction.
        txn: TxnTimestamp,
        /// Its current state.
        state: String,
    },

    // ==========================================================================
    // Object Errors
    // ==========================================================================
    /// Object not found.
    #[error("object {id} not found")]
    ObjectNotFound {
        /// The missing object.
        id: ObjectId,
    },

    /// Object already exists.
    #[error("object {id} already exists")]
    ObjectExists {
        /// The duplicate object.
        id: ObjectId,
    },

    // ==========================================================================
    // Rule Errors
    // ==========================================================================
    /// Rule binding is malformed.
    #[error("invalid rule binding: {message}")]
    InvalidRuleBinding {
        /// Error message.
        message: String,
    },

    /// Rule already subscribed with a different handler.
    #[error("rule '{ruleset}::{rule}' is already subscribed with a different handler")]
    DuplicateRule {
        /// Ruleset name.
        ruleset: String,
        /// Rule name.
        rule: String,
    },

    /// Subscription is invalid.
    #[error("invalid subscription: {message}")]
    InvalidSubscription {
        /// Error message.
        message: String,
    },

    /// A rule handler failed.
    #[error("rule '{ruleset}::{rule}' failed: {message}")]
    RuleFailed {
        /// Ruleset name.
        ruleset: String,
        /// Rule name.
        rule: String,
        /// Failure message.
        message: String,
    },

    /// Rule engine is shut down.
    #[error("rule engine is shut down")]
    RuleEngineShutdown,
}

impl EmberError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::NotSupported { .. } => ErrorCode::NotSupported,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::InvariantViolation { .. } => ErrorCode::InvariantViolation,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::InitializationFailed { .. } => ErrorCode::InitializationFailed,
            Self::Memory { .. } => ErrorCode::Memory,
            Self::TypeNotFound { .. } => ErrorCode::TypeNotFound,
            Self::TableNotFound { .. } => ErrorCode::TableNotFound,
            Self::TableExists { .. } => ErrorCode::TableExists,
            Self::FieldNotFound { .. } => ErrorCode::FieldNotFound,
            Self::FieldExists { .. } => ErrorCode::FieldExists,
            Self::NoActiveTransaction => ErrorCode::NoActiveTransaction,
            Self::TransactionInProgress { .. } => ErrorCode::TransactionInProgress,
            Self::TransactionConflict { .. } => ErrorCode::TransactionConflict,
            Self::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
            Self::TransactionNotActive { .. } => ErrorCode::TransactionNotActive,
            Self::ObjectNotFound { .. } => ErrorCode::ObjectNotFound,
            Self::ObjectExists { .. } => ErrorCode::ObjectExists,
            Self::InvalidRuleBinding { .. } => ErrorCode::InvalidRuleBinding,
            Self::DuplicateRule { .. } => ErrorCode::DuplicateRule,
            Self::InvalidSubscription { .. } => ErrorCode::InvalidSubscription,
            Self::RuleFailed { .. } => ErrorCode::RuleFailed,
            Self::RuleEngineShutdown => ErrorCode::RuleEngineShutdown,
        }
    }

    /// Returns true for fatal invariant violations.
    ///
    /// Fatal errors must not be caught and continued from.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. })
    }

    /// Returns true if this error represents a transaction conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::TransactionConflict { .. })
    }

    /// Returns true if retrying the operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransactionConflict { .. } | Self::Memory { .. })
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid subscription error.
    #[must_use]
    pub fn invalid_subscription(message: impl Into<String>) -> Self {
        Self::InvalidSubscription {
            message: message.into(),
        }
    }

    /// Creates a fatal invariant violation.
    #[must_use]
    pub fn invariant_violation(
        description: impl Into<String>,
        condition: impl Into<String>,
        file: &'static str,
        line: u32,
        function: &'static str,
    ) -> Self {
        Self::InvariantViolation {
            description: description.into(),
            condition: condition.into(),
            file,
            line,
            function,
        }
    }
}
