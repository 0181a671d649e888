//! Bounded, notification-driven inbox.
//!
//! Producers call [`Mailbox::deliver`] from any thread and never block. A
//! single consumer waits on a [`Notify`] handle and drains with
//! [`Mailbox::retrieve`].
//!
//! # Consumer contract
//!
//! A notification is raised once per empty→non-empty transition and does
//! not accumulate. After every wake the consumer must call `retrieve()` in a
//! loop until it returns `None`; waiting again while items remain queued can
//! block until the next delivery into an empty mailbox.
//!
//! ```
//! use amp_host::Mailbox;
//!
//! let mailbox = Mailbox::new(4);
//! let notify = mailbox.notify();
//! mailbox.deliver(1);
//! mailbox.deliver(2);
//!
//! notify.wait();
//! let mut drained = Vec::new();
//! while let Some(item) = mailbox.retrieve() {
//!     drained.push(item);
//! }
//! assert_eq!(drained, vec![1, 2]);
//! ```
//!
//! # Overflow
//!
//! Delivering into a full mailbox evicts the oldest queued item. Survivors
//! keep FIFO order and evictions are counted by [`Mailbox::dropped`].

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct State<T> {
    queue: VecDeque<T>,
    notified: bool,
    closed: bool,
    dropped: u64,
}

struct Shared<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    ready: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // A poisoned queue is still structurally valid.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Bounded multi-producer, single-consumer inbox with drop-oldest overflow.
///
/// Cloning yields another handle to the same mailbox.
pub struct Mailbox<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Mailbox<T> {
    /// Create a mailbox holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                capacity,
                state: Mutex::new(State {
                    queue: VecDeque::with_capacity(capacity.min(1024)),
                    notified: false,
                    closed: false,
                    dropped: 0,
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// Enqueue an item without blocking.
    ///
    /// Returns `false` when the mailbox is closed and the item was discarded.
    pub fn deliver(&self, item: T) -> bool {
        let mut state = self.shared.lock();
        if state.closed {
            return false;
        }

        if state.queue.len() >= self.shared.capacity {
            state.queue.pop_front();
            state.dropped += 1;
            tracing::warn!(
                capacity = self.shared.capacity,
                dropped = state.dropped,
                "mailbox full, dropped oldest item"
            );
        }

        let was_empty = state.queue.is_empty();
        state.queue.push_back(item);
        if was_empty {
            state.notified = true;
            self.shared.ready.notify_all();
        }
        true
    }

    /// Dequeue the oldest item, or `None` when empty.
    pub fn retrieve(&self) -> Option<T> {
        self.shared.lock().queue.pop_front()
    }

    /// Wait handle that becomes ready after each empty→non-empty transition
    /// and when the mailbox is closed.
    pub fn notify(&self) -> Notify<T> {
        Notify {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop accepting deliveries and wake any waiter. Queued items remain
    /// retrievable. Idempotent.
    pub fn close(&self) {
        let mut state = self.shared.lock();
        if !state.closed {
            state.closed = true;
            self.shared.ready.notify_all();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of items evicted by overflow so far.
    pub fn dropped(&self) -> u64 {
        self.shared.lock().dropped
    }
}

impl<T> std::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Mailbox")
            .field("capacity", &self.shared.capacity)
            .field("len", &state.queue.len())
            .field("dropped", &state.dropped)
            .field("closed", &state.closed)
            .finish()
    }
}

/// Consumer-side wait handle for a [`Mailbox`].
pub struct Notify<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Notify<T> {
    /// Block until a notification is pending or the mailbox is closed.
    ///
    /// Returns `false` only when woken by close with no pending notification.
    pub fn wait(&self) -> bool {
        let mut state = self.shared.lock();
        while !state.notified && !state.closed {
            state = self
                .shared
                .ready
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        std::mem::take(&mut state.notified)
    }

    /// Like [`Notify::wait`] with a deadline. Returns `false` on timeout or
    /// on close without a pending notification.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        while !state.notified && !state.closed {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .shared
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = next;
        }
        std::mem::take(&mut state.notified)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn drain(mailbox: &Mailbox<i32>) -> Vec<i32> {
        let mut out = Vec::new();
        while let Some(item) = mailbox.retrieve() {
            out.push(item);
        }
        out
    }

    #[test]
    fn overflow_drops_oldest() {
        let mailbox = Mailbox::new(10);
        for i in 0..12 {
            assert!(mailbox.deliver(i));
        }

        let notify = mailbox.notify();
        assert!(notify.wait_timeout(Duration::from_secs(3)));
        assert_eq!(drain(&mailbox), (2..12).collect::<Vec<_>>());
        assert_eq!(mailbox.dropped(), 2);
    }

    #[test]
    fn retrieve_on_empty_is_none() {
        let mailbox: Mailbox<i32> = Mailbox::new(4);
        assert_eq!(mailbox.retrieve(), None);
        assert!(mailbox.is_empty());
    }

    #[test]
    fn notification_does_not_accumulate() {
        let mailbox = Mailbox::new(8);
        let notify = mailbox.notify();
        mailbox.deliver(1);
        mailbox.deliver(2);
        mailbox.deliver(3);

        assert!(notify.wait_timeout(Duration::from_millis(10)));
        // Only one transition happened, so only one notification is pending.
        assert!(!notify.wait_timeout(Duration::from_millis(10)));
        assert_eq!(drain(&mailbox), vec![1, 2, 3]);

        mailbox.deliver(4);
        assert!(notify.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn waiter_wakes_on_delivery_from_other_thread() {
        let mailbox = Mailbox::new(4);
        let notify = mailbox.notify();

        let producer = {
            let mailbox = mailbox.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                mailbox.deliver(7);
            })
        };

        assert!(notify.wait_timeout(Duration::from_secs(3)));
        assert_eq!(mailbox.retrieve(), Some(7));
        producer.join().unwrap();
    }

    #[test]
    fn close_wakes_waiter_and_keeps_queue() {
        let mailbox = Mailbox::new(4);
        mailbox.deliver(1);
        let notify = mailbox.notify();
        assert!(notify.wait());

        let closer = {
            let mailbox = mailbox.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                mailbox.close();
                mailbox.close();
            })
        };

        assert!(!notify.wait());
        closer.join().unwrap();

        assert!(mailbox.is_closed());
        assert!(!mailbox.deliver(2));
        assert_eq!(drain(&mailbox), vec![1]);
    }

    #[test]
    fn multi_producer_preserves_per_producer_order() {
        const PRODUCERS: i32 = 4;
        const PER_PRODUCER: i32 = 500;

        let mailbox = Mailbox::new((PRODUCERS * PER_PRODUCER) as usize);
        let notify = mailbox.notify();

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let mailbox = mailbox.clone();
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        mailbox.deliver(p * PER_PRODUCER + i);
                    }
                })
            })
            .collect();

        let mut received = Vec::new();
        while received.len() < (PRODUCERS * PER_PRODUCER) as usize {
            notify.wait_timeout(Duration::from_millis(50));
            received.extend(drain(&mailbox));
        }
        for producer in producers {
            producer.join().unwrap();
        }

        for p in 0..PRODUCERS {
            let mine: Vec<i32> = received
                .iter()
                .copied()
                .filter(|v| v / PER_PRODUCER == p)
                .collect();
            let expected: Vec<i32> = (p * PER_PRODUCER..(p + 1) * PER_PRODUCER).collect();
            assert_eq!(mine, expected);
        }
        assert_eq!(mailbox.dropped(), 0);
    }
}
