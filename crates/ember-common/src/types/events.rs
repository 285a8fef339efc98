//! Event kinds and event masks.
//!
//! Row-level events (`RowUpdate`, `RowInsert`, `RowDelete`) are produced for
//! each committed mutation; transaction-level events (`Begin`, `Commit`,
//! `Rollback`) are produced for transaction lifecycle changes. Every kind is
//! an independent bit so subscriptions can declare a disjunction of kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// A single event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventType {
    /// An existing row was updated.
    RowUpdate = 1 << 0,
    /// A row was inserted.
    RowInsert = 1 << 1,
    /// A row was deleted.
    RowDelete = 1 << 2,
    /// A transaction began.
    Begin = 1 << 3,
    /// A transaction committed.
    Commit = 1 << 4,
    /// A transaction rolled back.
    Rollback = 1 << 5,
}

impl EventType {
    /// Every event kind, row-level first.
    pub const ALL: [EventType; 6] = [
        EventType::RowUpdate,
        EventType::RowInsert,
        EventType::RowDelete,
        EventType::Begin,
        EventType::Commit,
        EventType::Rollback,
    ];

    /// Returns the bit representing this kind.
    #[inline]
    #[must_use]
    pub const fn bit(self) -> u8 {
        self as u8
    }

    /// Returns true for row-level events.
    #[inline]
    #[must_use]
    pub const fn is_row_event(self) -> bool {
        matches!(self, Self::RowUpdate | Self::RowInsert | Self::RowDelete)
    }

    /// Returns true for transaction-level events.
    #[inline]
    #[must_use]
    pub const fn is_transaction_event(self) -> bool {
        !self.is_row_event()
    }

    /// Returns the lowercase name of the event kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RowUpdate => "row_update",
            Self::RowInsert => "row_insert",
            Self::RowDelete => "row_delete",
            Self::Begin => "begin",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of event kinds.
///
/// # Example
///
/// ```rust
/// use ember_common::types::{EventMask, EventType};
///
/// let mask = EventMask::from(EventType::RowInsert) | EventType::RowDelete;
/// assert!(mask.contains(EventType::RowDelete));
/// assert!(!mask.contains(EventType::RowUpdate));
/// assert!(mask.is_row_only());
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EventMask(u8);

impl EventMask {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// All row-level events.
    pub const ROW_EVENTS: Self = Self(
        EventType::RowUpdate.bit() | EventType::RowInsert.bit() | EventType::RowDelete.bit(),
    );

    /// All transaction-level events.
    pub const TRANSACTION_EVENTS: Self =
        Self(EventType::Begin.bit() | EventType::Commit.bit() | EventType::Rollback.bit());

    /// Creates a mask from raw bits, discarding unknown bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & (Self::ROW_EVENTS.0 | Self::TRANSACTION_EVENTS.0))
    }

    /// Returns the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns true if no event kind is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if `event` is in the set.
    #[inline]
    #[must_use]
    pub const fn contains(self, event: EventType) -> bool {
        self.0 & event.bit() != 0
    }

    /// Returns a copy with `event` added.
    #[inline]
    #[must_use]
    pub const fn with(self, event: EventType) -> Self {
        Self(self.0 | event.bit())
    }

    /// Returns true if every kind in the set is row-level.
    #[inline]
    #[must_use]
    pub const fn is_row_only(self) -> bool {
        self.0 & Self::TRANSACTION_EVENTS.0 == 0
    }

    /// Returns true if every kind in the set is transaction-level.
    #[inline]
    #[must_use]
    pub const fn is_transaction_only(self) -> bool {
        self.0 & Self::ROW_EVENTS.0 == 0
    }

    /// Iterates over the event kinds in the set.
    pub fn iter(self) -> impl Iterator<Item = EventType> {
        EventType::ALL.into_iter().filter(move |e| self.contains(*e))
    }
}

impl From<EventType> for EventMask {
    #[inline]
    fn from(event: EventType) -> Self {
        Self(event.bit())
    }
}

impl FromIterator<EventType> for EventMask {
    fn from_iter<I: IntoIterator<Item = EventType>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

impl BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOr<EventType> for EventMask {
    type Output = Self;

    fn bitor(self, rhs: EventType) -> Self {
        self.with(rhs)
    }
}

impl BitOr for EventType {
    type Output = EventMask;

    fn bitor(self, rhs: Self) -> EventMask {
        EventMask::from(self).with(rhs)
    }
}

impl BitOrAssign<EventType> for EventMask {
    fn bitor_assign(&mut self, rhs: EventType) {
        self.0 |= rhs.bit();
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
