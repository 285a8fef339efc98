//! Transaction timestamps.
//!
//! A transaction timestamp doubles as the transaction identifier. The most
//! significant bit is the *frozen* marker: it is set once a timestamp is known
//! to precede the begin timestamp of every active transaction, which makes it
//! irrelevant for visibility decisions and its versions eligible for
//! reclamation. The remaining 63 bits carry the chronological value.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{FROZEN_BIT_MASK, TIMESTAMP_VALUE_MASK};

/// Transaction timestamp with an embedded frozen marker bit.
///
/// Ordering compares the raw word, so callers comparing chronology should
/// compare [`TxnTimestamp::value`] instead when either side may be frozen.
///
/// # Example
///
/// ```rust
/// use ember_common::types::TxnTimestamp;
///
/// let ts = TxnTimestamp::new(100);
/// let frozen = ts.set_frozen();
/// assert!(frozen.is_frozen());
/// assert_eq!(frozen.clear_frozen(), ts);
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TxnTimestamp(u64);

impl TxnTimestamp {
    /// Invalid timestamp, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// Largest representable chronological value.
    pub const MAX_VALUE: u64 = TIMESTAMP_VALUE_MASK;

    /// Creates a timestamp from a raw word, frozen bit included.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw word, frozen bit included.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the chronological value with the frozen bit stripped.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0 & TIMESTAMP_VALUE_MASK
    }

    /// Returns a copy with the frozen bit set.
    #[inline]
    #[must_use]
    pub const fn set_frozen(self) -> Self {
        Self(self.0 | FROZEN_BIT_MASK)
    }

    /// Returns a copy with the frozen bit cleared.
    #[inline]
    #[must_use]
    pub const fn clear_frozen(self) -> Self {
        Self(self.0 & TIMESTAMP_VALUE_MASK)
    }

    /// Checks whether the frozen bit is set.
    #[inline]
    #[must_use]
    pub const fn is_frozen(self) -> bool {
        self.0 & FROZEN_BIT_MASK != 0
    }

    /// Returns the chronologically next (unfrozen) timestamp.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.value().saturating_add(1) & TIMESTAMP_VALUE_MASK)
    }

    /// Checks if this is a valid timestamp.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.value() != 0
    }
}

impl fmt::Debug for TxnTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            write!(f, "TxnTimestamp(INVALID)")
        } else if self.is_frozen() {
            write!(f, "TxnTimestamp({}, frozen)", self.value())
        } else {
            write!(f, "TxnTimestamp({})", self.value())
        }
    }
}

impl fmt::Display for TxnTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl From<u64> for TxnTimestamp {
    #[inline]
    fn from(raw: u64) -> Self {
        Self::new(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frozen_round_trip() {
        for raw in [1u64, 2, 1000, TxnTimestamp::MAX_VALUE] {
            let ts = TxnTimestamp::new(raw);
            assert!(!ts.is_frozen());
            assert!(ts.set_frozen().is_frozen());
            assert_eq!(ts.set_frozen().clear_frozen(), ts);
        }
    }

    #[test]
    fn test_value_ignores_frozen_bit() {
        let ts = TxnTimestamp::new(55);
        assert_eq!(ts.set_frozen().value(), 55);
        assert_eq!(ts.set_frozen().to_string(), "55");
        assert_ne!(ts.set_frozen().as_u64(), ts.as_u64());
    }

    #[test]
    fn test_next_is_unfrozen() {
        let ts = TxnTimestamp::new(9).set_frozen();
        assert_eq!(ts.next(), TxnTimestamp::new(10));
    }

    #[test]
    fn test_invalid() {
        assert!(!TxnTimestamp::INVALID.is_valid());
        assert!(!TxnTimestamp::INVALID.set_frozen().is_valid());
        assert_eq!(format!("{:?}", TxnTimestamp::new(3).set_frozen()), "TxnTimestamp(3, frozen)");
    }
}
