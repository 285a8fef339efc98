//! Transaction timestamp metadata.
//!
//! Every timestamp handed out by the transaction manager has an entry in an
//! arena indexed by the timestamp value, offset by the lowest retained
//! timestamp. A begin timestamp entry carries the
//! transaction status and, once committed, its commit timestamp; a commit
//! timestamp entry links back to its begin timestamp.

use std::fmt;

use ember_common::constants::FIRST_TIMESTAMP;
use ember_common::types::TxnTimestamp;

/// Status of a transaction, keyed by its begin timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    /// Began and may read and write.
    Active,
    /// Commit validation in progress.
    Validating,
    /// Committed.
    Committed,
    /// Rolled back, by request or after failing validation.
    Aborted,
    /// Committed and frozen; no longer relevant to visibility decisions.
    Terminated,
}

impl TxnStatus {
    /// Returns true if the transaction can perform operations.
    pub fn is_active(&self) -> bool {
        *self == TxnStatus::Active
    }

    /// Returns true if the transaction has ended.
    pub fn is_ended(&self) -> bool {
        matches!(
            self,
            TxnStatus::Committed | TxnStatus::Aborted | TxnStatus::Terminated
        )
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnStatus::Active => write!(f, "Active"),
            TxnStatus::Validating => write!(f, "Validating"),
            TxnStatus::Committed => write!(f, "Committed"),
            TxnStatus::Aborted => write!(f, "Aborted"),
            TxnStatus::Terminated => write!(f, "Terminated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    /// Any gap.
    Unused,
    Begin {
        status: TxnStatus,
        commit_ts: TxnTimestamp,
    },
    Commit {
        begin_ts: TxnTimestamp,
    },
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    kind: EntryKind,
    frozen: bool,
}

impl Entry {
    const UNUSED: Entry = Entry {
        kind: EntryKind::Unused,
        frozen: false,
    };

    /// True once nothing can change or consult the entry again.
    fn is_settled(&self) -> bool {
        match self.kind {
            EntryKind::Unused | EntryKind::Commit { .. } => true,
            EntryKind::Begin { status, .. } => {
                status == TxnStatus::Terminated || (status == TxnStatus::Aborted && self.frozen)
            }
        }
    }
}

/// Arena of timestamp entries.
///
/// `entries[0]` holds the entry for timestamp `base`. Timestamps below
/// `base` were settled and discarded; they read as frozen and terminated.
#[derive(Debug)]
pub struct TxnMetadata {
    base: u64,
    entries: Vec<Entry>,
}

impl TxnMetadata {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self {
            base: FIRST_TIMESTAMP,
            entries: Vec::new(),
        }
    }

    fn index(&self, ts: TxnTimestamp) -> Option<usize> {
        ts.value().checked_sub(self.base).map(|i| i as usize)
    }

    fn is_discarded(&self, ts: TxnTimestamp) -> bool {
        ts.value() < self.base
    }

    fn slot(&mut self, ts: TxnTimestamp) -> Option<&mut Entry> {
        let index = self.index(ts)?;
        if index >= self.entries.len() {
            self.entries.resize(index + 1, Entry::UNUSED);
        }
        self.entries.get_mut(index)
    }

    fn get(&self, ts: TxnTimestamp) -> Option<&Entry> {
        self.entries.get(self.index(ts)?)
    }

    /// Registers `begin_ts` as an active transaction.
    pub fn register_begin(&mut self, begin_ts: TxnTimestamp) {
        if let Some(entry) = self.slot(begin_ts) {
            *entry = Entry {
                kind: EntryKind::Begin {
                    status: TxnStatus::Active,
                    commit_ts: TxnTimestamp::INVALID,
                },
                frozen: false,
            };
        }
    }

    /// Links `commit_ts` to `begin_ts` and marks the transaction committed.
    pub fn register_commit(&mut self, begin_ts: TxnTimestamp, commit_ts: TxnTimestamp) {
        if let Some(entry) = self.slot(commit_ts) {
            *entry = Entry {
                kind: EntryKind::Commit { begin_ts },
                frozen: false,
            };
        }
        if let Some(entry) = self.slot(begin_ts) {
            entry.kind = EntryKind::Begin {
                status: TxnStatus::Committed,
                commit_ts,
            };
        }
    }

    /// Sets the status of a begin timestamp. Returns false if `begin_ts` is
    /// not a retained begin timestamp.
    pub fn set_status(&mut self, begin_ts: TxnTimestamp, status: TxnStatus) -> bool {
        let Some(index) = self.index(begin_ts) else {
            return false;
        };
        match self.entries.get_mut(index) {
            Some(Entry {
                kind: EntryKind::Begin { status: s, .. },
                ..
            }) => {
                *s = status;
                true
            }
            _ => false,
        }
    }

    /// Returns the status of the transaction that began at `begin_ts`.
    ///
    /// Discarded timestamps report `Terminated`.
    pub fn status(&self, begin_ts: TxnTimestamp) -> Option<TxnStatus> {
        if self.is_discarded(begin_ts) {
            return Some(TxnStatus::Terminated);
        }
        match self.get(begin_ts)?.kind {
            EntryKind::Begin { status, .. } => Some(status),
            _ => None,
        }
    }

    /// Returns the commit timestamp of a committed transaction, or `None`
    /// once its entry has been discarded.
    pub fn commit_ts(&self, begin_ts: TxnTimestamp) -> Option<TxnTimestamp> {
        match self.get(begin_ts)?.kind {
            EntryKind::Begin { commit_ts, .. } if commit_ts.is_valid() => Some(commit_ts),
            _ => None,
        }
    }

    /// Returns the begin timestamp linked to a commit timestamp.
    pub fn begin_ts(&self, commit_ts: TxnTimestamp) -> Option<TxnTimestamp> {
        match self.get(commit_ts)?.kind {
            EntryKind::Commit { begin_ts } => Some(begin_ts),
            _ => None,
        }
    }

    /// Returns the timestamp word with the frozen bit applied if the entry
    /// is frozen.
    pub fn resolve(&self, ts: TxnTimestamp) -> TxnTimestamp {
        if self.is_frozen(ts) {
            ts.clear_frozen().set_frozen()
        } else {
            ts.clear_frozen()
        }
    }

    /// Returns true if the entry for `ts` is frozen or discarded.
    pub fn is_frozen(&self, ts: TxnTimestamp) -> bool {
        let ts = ts.clear_frozen();
        self.is_discarded(ts) || self.get(ts).map_or(false, |e| e.frozen)
    }

    /// Freezes committed transactions whose commit timestamp precedes
    /// `watermark`, starting at `from`. At most `limit` transactions are
    /// frozen. Returns the frozen `(begin, commit)` pairs and the position to
    /// resume from.
    pub fn freeze_committed(
        &mut self,
        from: u64,
        watermark: TxnTimestamp,
        limit: usize,
    ) -> (Vec<(TxnTimestamp, TxnTimestamp)>, u64) {
        let end = watermark
            .value()
            .min(self.base + self.entries.len() as u64);
        let mut frozen = Vec::new();
        let mut cursor = from.max(self.base);

        while cursor < end && frozen.len() < limit {
            let index = (cursor - self.base) as usize;
            let entry = self.entries[index];
            match entry.kind {
                EntryKind::Begin {
                    status: TxnStatus::Committed,
                    commit_ts,
                } if commit_ts.value() < watermark.value() => {
                    let begin_ts = TxnTimestamp::new(cursor);
                    self.entries[index] = Entry {
                        kind: EntryKind::Begin {
                            status: TxnStatus::Terminated,
                            commit_ts,
                        },
                        frozen: true,
                    };
                    if let Some(commit) = self.slot(commit_ts) {
                        commit.frozen = true;
                    }
                    frozen.push((begin_ts, commit_ts.set_frozen()));
                }
                // The commit lies at or beyond the watermark; stop so the
                // resume position never skips it.
                EntryKind::Begin {
                    status: TxnStatus::Committed | TxnStatus::Active | TxnStatus::Validating,
                    ..
                } => break,
                EntryKind::Begin {
                    status: TxnStatus::Aborted,
                    ..
                } => self.entries[index].frozen = true,
                _ => {}
            }
            cursor += 1;
        }
        (frozen, cursor)
    }

    /// Discards the settled entries below `cursor` and advances the base.
    /// Stops at the first entry that is still unsettled. Returns the number
    /// of entries discarded.
    pub fn discard_below(&mut self, cursor: u64) -> usize {
        let span = cursor.saturating_sub(self.base).min(self.entries.len() as u64) as usize;
        let count = self.entries[..span]
            .iter()
            .position(|e| !e.is_settled())
            .unwrap_or(span);
        self.entries.drain(..count);
        self.base += count as u64;
        count
    }

    /// Returns the lowest retained timestamp value.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Returns the number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entry is retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TxnMetadata {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(v: u64) -> TxnTimestamp {
        TxnTimestamp::new(v)
    }

    #[test]
    fn test_begin_commit_links() {
        let mut meta = TxnMetadata::new();
        meta.register_begin(ts(1));
        assert_eq!(meta.status(ts(1)), Some(TxnStatus::Active));
        assert_eq!(meta.commit_ts(ts(1)), None);

        meta.register_commit(ts(1), ts(2));
        assert_eq!(meta.status(ts(1)), Some(TxnStatus::Committed));
        assert_eq!(meta.commit_ts(ts(1)), Some(ts(2)));
        assert_eq!(meta.begin_ts(ts(2)), Some(ts(1)));
        assert_eq!(meta.status(ts(2)), None);
    }

    #[test]
    fn test_freeze_committed_below_watermark() {
        let mut meta = TxnMetadata::new();
        meta.register_begin(ts(1));
        meta.register_commit(ts(1), ts(2));
        meta.register_begin(ts(3));
        meta.set_status(ts(3), TxnStatus::Aborted);
        meta.register_begin(ts(4));
        meta.register_commit(ts(4), ts(6));
        meta.register_begin(ts(5));

        let (frozen, resume) = meta.freeze_committed(0, ts(5), 100);
        assert_eq!(frozen, vec![(ts(1), ts(2).set_frozen())]);
        // Stops at 4 since its commit (6) is beyond the watermark.
        assert_eq!(resume, 4);
        assert!(meta.is_frozen(ts(1)));
        assert!(meta.is_frozen(ts(2)));
        assert!(meta.resolve(ts(2)).is_frozen());
        assert!(!meta.resolve(ts(4)).is_frozen());
        assert_eq!(meta.status(ts(1)), Some(TxnStatus::Terminated));
        assert_eq!(meta.status(ts(3)), Some(TxnStatus::Aborted));
    }

    #[test]
    fn test_freeze_respects_limit() {
        let mut meta = TxnMetadata::new();
        for begin in [1u64, 3, 5] {
            meta.register_begin(ts(begin));
            meta.register_commit(ts(begin), ts(begin + 1));
        }
        let (frozen, resume) = meta.freeze_committed(0, ts(10), 2);
        assert_eq!(frozen.len(), 2);
        let (frozen, _) = meta.freeze_committed(resume, ts(10), 2);
        assert_eq!(frozen, vec![(ts(5), ts(6).set_frozen())]);
    }

    #[test]
    fn test_discard_settled_prefix() {
        let mut meta = TxnMetadata::new();
        meta.register_begin(ts(1));
        meta.register_commit(ts(1), ts(2));
        meta.register_begin(ts(3));
        meta.set_status(ts(3), TxnStatus::Aborted);
        meta.register_begin(ts(4));
        meta.register_commit(ts(4), ts(5));
        meta.register_begin(ts(6));

        let (_, resume) = meta.freeze_committed(0, ts(6), 100);
        assert_eq!(resume, 6);
        assert_eq!(meta.discard_below(resume), 5);
        assert_eq!(meta.base(), 6);
        assert_eq!(meta.len(), 1);

        assert!(meta.is_frozen(ts(2)));
        assert!(meta.resolve(ts(5)).is_frozen());
        assert_eq!(meta.status(ts(3)), Some(TxnStatus::Terminated));
        assert_eq!(meta.commit_ts(ts(4)), None);
        assert!(!meta.set_status(ts(4), TxnStatus::Active));
        assert_eq!(meta.status(ts(6)), Some(TxnStatus::Active));

        meta.register_commit(ts(6), ts(7));
        assert_eq!(meta.commit_ts(ts(6)), Some(ts(7)));
        assert_eq!(meta.begin_ts(ts(7)), Some(ts(6)));
    }

    #[test]
    fn test_discard_stops_at_unsettled_entry() {
        let mut meta = TxnMetadata::new();
        meta.register_begin(ts(1));
        meta.register_commit(ts(1), ts(2));
        meta.register_begin(ts(3));

        // 3 is still active, so only 1 and 2 may go.
        assert_eq!(meta.discard_below(10), 0);
        meta.freeze_committed(0, ts(3), 100);
        assert_eq!(meta.discard_below(10), 2);
        assert_eq!(meta.base(), 3);
        assert!(meta.status(ts(3)).unwrap().is_active());
    }

    #[test]
    fn test_arena_stays_bounded() {
        let mut meta = TxnMetadata::new();
        let mut cursor = 0;
        for round in 0..100u64 {
            let begin = ts(round * 2 + 1);
            meta.register_begin(begin);
            meta.register_commit(begin, begin.next());
            let watermark = begin.next().next();
            let (_, resume) = meta.freeze_committed(cursor, watermark, 16);
            cursor = resume;
            meta.discard_below(cursor);
            assert!(meta.len() <= 2);
        }
        assert_eq!(meta.base(), 201);
        assert!(meta.is_empty());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(TxnStatus::Validating.to_string(), "Validating");
        assert!(TxnStatus::Terminated.is_ended());
        assert!(!TxnStatus::Validating.is_ended());
    }
}
