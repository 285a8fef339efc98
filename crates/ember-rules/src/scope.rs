//! Private transaction scope for engine bookkeeping.

use std::ops::Deref;

use ember_common::EmberResult;
use ember_txn::Session;
use tracing::warn;

/// Runs engine-internal writes inside a transaction.
///
/// Begins a transaction only if the session has none, and commits only the
/// transaction it began. Its own transaction never reaches the commit
/// trigger, so bookkeeping writes cannot fire rules.
pub struct TxnScope<'a> {
    session: &'a mut Session,
    owns: bool,
    finished: bool,
}

impl<'a> TxnScope<'a> {
    /// Opens a scope on `session`.
    pub fn begin(session: &'a mut Session) -> EmberResult<Self> {
        let owns = !session.is_transaction_active();
        if owns {
            session.begin_without_triggers()?;
        }
        Ok(Self {
            session,
            owns,
            finished: false,
        })
    }

    /// Returns true if the scope began the transaction.
    pub fn owns_transaction(&self) -> bool {
        self.owns
    }

    /// Commits the transaction if the scope began it.
    pub fn commit(mut self) -> EmberResult<()> {
        self.finished = true;
        if self.owns {
            self.session.commit_without_triggers()?;
        }
        Ok(())
    }
}

impl Deref for TxnScope<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session
    }
}

impl Drop for TxnScope<'_> {
    fn drop(&mut self) {
        if self.owns && !self.finished && self.session.is_transaction_active() {
            if let Err(e) = self.session.rollback_transaction() {
                warn!(error = %e, "bookkeeping scope rollback failed");
            }
        }
    }
}
