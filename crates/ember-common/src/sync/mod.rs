//! Synchronization primitives.
//!
//! - [`BlockingQueue`]: an unbounded FIFO queue whose consumers block until an
//!   item is pushed, used to hand committed events to dispatch workers.
//! - [`InitGuard`]: a resettable one-time initialization state machine.
//!
//! Reader-writer locking uses `parking_lot::RwLock` directly.

mod once;
mod queue;

pub use once::{InitGuard, InitState};
pub use queue::BlockingQueue;
