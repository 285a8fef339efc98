//! Resettable one-time initialization.
//!
//! [`InitGuard`] runs an initializer at most once per generation. Concurrent
//! callers arriving while the initializer runs block until it finishes.
//! [`InitGuard::reset`] returns the guard to `Uninitialized` so the next
//! caller runs the initializer again.

use parking_lot::{Condvar, Mutex};

/// State of an [`InitGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// The initializer has not run (or the guard was reset).
    Uninitialized,
    /// A thread is running the initializer.
    Initializing,
    /// The initializer completed successfully.
    Ready,
}

/// At-most-once initialization guard with reset support.
///
/// # Example
///
/// ```rust
/// use ember_common::sync::InitGuard;
///
/// let guard = InitGuard::new();
/// let mut runs = 0;
/// assert_eq!(guard.call_once(|| -> Result<(), ()> { runs += 1; Ok(()) }), Ok(true));
/// assert_eq!(guard.call_once(|| -> Result<(), ()> { runs += 1; Ok(()) }), Ok(false));
/// assert_eq!(runs, 1);
///
/// guard.reset();
/// assert_eq!(guard.call_once(|| -> Result<(), ()> { runs += 1; Ok(()) }), Ok(true));
/// assert_eq!(runs, 2);
/// ```
#[derive(Debug)]
pub struct InitGuard {
    state: Mutex<InitState>,
    changed: Condvar,
}

/// Restores `Uninitialized` if the initializer unwinds or fails.
struct Rollback<'a> {
    guard: &'a InitGuard,
    armed: bool,
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.guard.state.lock() = InitState::Uninitialized;
            self.guard.changed.notify_all();
        }
    }
}

impl InitGuard {
    /// Creates a guard in the `Uninitialized` state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: parking_lot::const_mutex(InitState::Uninitialized),
            changed: Condvar::new(),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> InitState {
        *self.state.lock()
    }

    /// Returns true if initialization has completed.
    pub fn is_ready(&self) -> bool {
        self.state() == InitState::Ready
    }

    /// Runs `init` unless initialization already completed.
    ///
    /// Returns `Ok(true)` if this call ran the initializer, `Ok(false)` if
    /// the guard was already ready. Callers that find another thread
    /// initializing block until it finishes. If the initializer fails, the
    /// guard returns to `Uninitialized`, the error is returned to this caller
    /// and one of the waiting callers retries.
    pub fn call_once<E, F>(&self, init: F) -> Result<bool, E>
    where
        F: FnOnce() -> Result<(), E>,
    {
        {
            let mut state = self.state.lock();
            loop {
                match *state {
                    InitState::Ready => return Ok(false),
                    InitState::Initializing => self.changed.wait(&mut state),
                    InitState::Uninitialized => {
                        *state = InitState::Initializing;
                        break;
                    }
                }
            }
        }

        let mut rollback = Rollback {
            guard: self,
            armed: true,
        };
        init()?;
        rollback.armed = false;

        *self.state.lock() = InitState::Ready;
        self.changed.notify_all();
        Ok(true)
    }

    /// Returns the guard to `Uninitialized`.
    ///
    /// Waits for an in-flight initializer to finish first.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        while *state == InitState::Initializing {
            self.changed.wait(&mut state);
        }
        *state = InitState::Uninitialized;
    }
}

impl Default for InitGuard {
    fn default() -> Self {
        Self::new()
    }
}
