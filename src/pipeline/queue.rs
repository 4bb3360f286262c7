//! Awaitable unbounded FIFO used between pipeline loops.
//!
//! Unlike an mpsc channel, the backlog can be cleared from the producer
//! side on interrupt while a consumer is parked in [`AsyncQueue::dequeue`];
//! the parked consumer simply keeps waiting for the next item.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;

struct QueueInner<T> {
    items: VecDeque<T>,
    waiters: VecDeque<oneshot::Sender<T>>,
}

/// Unbounded awaitable FIFO queue.
pub struct AsyncQueue<T> {
    inner: Mutex<QueueInner<T>>,
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                waiters: VecDeque::new(),
            }),
        }
    }
}

impl<T> AsyncQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an item. Hands it straight to the oldest live waiter if one exists.
    pub fn enqueue(&self, item: T) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut item = item;
        while let Some(waiter) = inner.waiters.pop_front() {
            match waiter.send(item) {
                Ok(()) => return,
                // Waiter future was dropped; try the next one.
                Err(returned) => item = returned,
            }
        }
        inner.items.push_back(item);
    }

    /// Wait for the next item in arrival order.
    pub async fn dequeue(&self) -> T {
        let rx = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(item) = inner.items.pop_front() {
                return item;
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back(tx);
            rx
        };
        match rx.await {
            Ok(item) => item,
            // Senders live in `waiters` until an item arrives, and the queue
            // itself is borrowed for the duration of this call.
            Err(_) => std::future::pending().await,
        }
    }

    /// Drop the backlog. Parked `dequeue` calls stay parked.
    pub fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .clear();
    }

    /// Backlog length (excludes parked consumers).
    pub fn size(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}
