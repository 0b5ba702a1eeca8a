//! Bounded producer/consumer queue: non-blocking enqueue, blocking dequeue, mutex + condvar.
//!
//! Grounded on the free-list/backpressure pattern in `neutronium::net::endpoint::Endpoint`
//! (bounded by a fixed channel table, rejecting new work once full) generalized into a
//! standalone FIFO since the teacher never actually factored this out as its own type.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub struct BoundedQueue<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedQueue capacity must be greater than zero");
        BoundedQueue {
            capacity,
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Pushes `item` unless the queue is full or closed. Never blocks.
    pub fn try_enqueue(&self, item: T) -> bool {
        let mut guard = self.inner.lock().unwrap();
        if guard.closed || guard.items.len() >= self.capacity {
            return false;
        }
        guard.items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Blocks until an item is available and returns it. Only a `Poison` sentinel item (or
    /// equivalent) should ever cause a consumer to stop calling this.
    pub fn dequeue(&self) -> T {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if let Some(item) = guard.items.pop_front() {
                return item;
            }
            guard = self.not_empty.wait(guard).unwrap();
        }
    }

    /// Like [`dequeue`](Self::dequeue), but also returns `None` once [`close`](Self::close) has
    /// been called and the queue has drained -- the design-notes alternative to a poison value.
    pub fn dequeue_closing(&self) -> Option<T> {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if let Some(item) = guard.items.pop_front() {
                return Some(item);
            }
            if guard.closed {
                return None;
            }
            guard = self.not_empty.wait(guard).unwrap();
        }
    }

    pub fn close(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.closed = true;
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order_is_preserved() {
        let queue = BoundedQueue::new(4);
        queue.try_enqueue(1);
        queue.try_enqueue(2);
        queue.try_enqueue(3);
        assert_eq!(queue.dequeue(), 1);
        assert_eq!(queue.dequeue(), 2);
        assert_eq!(queue.dequeue(), 3);
    }

    #[test]
    fn try_enqueue_fails_without_blocking_once_full() {
        let queue = BoundedQueue::new(2);
        assert!(queue.try_enqueue("a"));
        assert!(queue.try_enqueue("b"));
        assert!(!queue.try_enqueue("c"));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn dequeue_blocks_until_an_item_arrives() {
        let queue = Arc::new(BoundedQueue::new(1));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue())
        };
        // give the consumer a chance to start blocking before we produce.
        thread::sleep(std::time::Duration::from_millis(20));
        queue.try_enqueue(42);
        assert_eq!(consumer.join().unwrap(), 42);
    }

    #[test]
    fn close_unblocks_dequeue_closing_with_none() {
        let queue = Arc::new(BoundedQueue::<i32>::new(1));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue_closing())
        };
        thread::sleep(std::time::Duration::from_millis(20));
        queue.close();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn closed_queue_still_drains_pending_items_first() {
        let queue = BoundedQueue::new(2);
        queue.try_enqueue(1);
        queue.close();
        assert_eq!(queue.dequeue_closing(), Some(1));
        assert_eq!(queue.dequeue_closing(), None);
    }
}
