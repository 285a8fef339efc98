//! Blocking FIFO queue.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Queue contents plus the closed flag.
#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// An unbounded multi-producer, multi-consumer FIFO queue.
///
/// [`pop`](Self::pop) suspends the calling thread until an item is available
/// or the queue is closed. Items pushed before [`close`](Self::close) are
/// still delivered.
///
/// # Example
///
/// ```rust
/// use ember_common::sync::BlockingQueue;
///
/// let queue = BlockingQueue::new();
/// queue.push(1).unwrap();
/// queue.push(2).unwrap();
/// assert_eq!(queue.pop(), Some(1));
/// assert_eq!(queue.try_pop(), Some(2));
/// assert_eq!(queue.try_pop(), None);
/// ```
#[derive(Debug)]
pub struct BlockingQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
}

impl<T> BlockingQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Appends an item and wakes one waiting consumer.
    ///
    /// Returns the item back if the queue has been closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the oldest item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Removes the oldest item, blocking for at most `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                return state.items.pop_front();
            }
        }
    }

    /// Removes the oldest item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Closes the queue and wakes every waiting consumer.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Returns the number of queued items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns true if no items are queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_interleaving() {
        let queue = BlockingQueue::new();
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        assert_eq!(queue.pop(), Some(1));
        queue.push(3).unwrap();
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert!(queue.is_empty());
        assert_eq!(queue.pop_timeout(Duration::from_millis(20)), None);
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue = Arc::new(BlockingQueue::new());
        let received = Arc::new(AtomicBool::new(false));

        let consumer = {
            let queue = Arc::clone(&queue);
            let received = Arc::clone(&received);
            thread::spawn(move || {
                let item = queue.pop();
                received.store(true, Ordering::SeqCst);
                item
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!received.load(Ordering::SeqCst));

        queue.push(42).unwrap();
        assert_eq!(consumer.join().unwrap(), Some(42));
        assert!(received.load(Ordering::SeqCst));
    }

    #[test]
    fn test_close_wakes_consumers() {
        let queue: Arc<BlockingQueue<u32>> = Arc::new(BlockingQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(consumer.join().unwrap(), None);
        assert_eq!(queue.push(1), Err(1));
        assert!(queue.is_closed());
    }

    #[test]
    fn test_close_drains_remaining() {
        let queue = BlockingQueue::new();
        queue.push("a").unwrap();
        queue.close();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop(), Some("a"));
        assert_eq!(queue.pop(), None);
    }
}
