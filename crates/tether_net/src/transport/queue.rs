//! # Drop-On-Full Queue
//!
//! Bounded multi-producer queue between network tasks and the simulation
//! tick. Producers never block: a full queue drops the new item and counts
//! it. A network task blocked on a slow consumer would stall its whole
//! connection's read loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Bounded, non-blocking, lossy queue.
///
/// Cloning yields another handle to the same queue.
#[derive(Debug)]
pub struct DropQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for DropQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<T> DropQueue<T> {
    /// Creates a queue holding at most `capacity` items (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueues `item`, or drops it if the queue is full.
    ///
    /// Returns `true` if the item was enqueued.
    pub fn try_push(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Dequeues the oldest item, if any.
    #[must_use]
    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Dequeues everything currently queued.
    #[must_use]
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    /// Items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Maximum number of queued items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }

    /// Items dropped since creation.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drops_when_full() {
        let queue = DropQueue::new(2);
        assert!(queue.try_push(1));
        assert!(queue.try_push(2));
        assert!(!queue.try_push(3));
        assert_eq!(queue.dropped(), 1);

        // FIFO, and the dropped item is the newest.
        assert_eq!(queue.drain(), vec![1, 2]);
        assert!(queue.is_empty());
        assert!(queue.try_push(4));
        assert_eq!(queue.try_pop(), Some(4));
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let queue = DropQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.try_push("a"));
    }

    #[test]
    fn test_clones_share_state() {
        let producer = DropQueue::new(1);
        let consumer = producer.clone();
        assert!(producer.try_push(10));
        assert!(!producer.try_push(11));
        assert_eq!(consumer.dropped(), 1);
        assert_eq!(consumer.try_pop(), Some(10));
    }

    #[test]
    fn test_concurrent_producers_never_block() {
        let queue = DropQueue::new(100);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let q = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        q.try_push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.len(), 100);
        assert_eq!(queue.dropped(), 300);
    }
}
