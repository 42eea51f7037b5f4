//! Queue factories and handles.
//!
//! Both queues carry a [`DrainTracker`]: every item holds a ticket from the
//! moment it is offered until it is fully handled, so shutdown can wait for
//! "everything enqueued has been consumed" rather than just "the buffer is
//! empty".

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify, mpsc};

use super::types::{ProcessingSummary, WorkItem};

/// Sender handle for the bounded work queue.
pub type WorkSender = BoundedSender<WorkItem>;
/// Receiver handle for the bounded work queue, shared by all workers.
pub type WorkReceiver = SharedReceiver<WorkItem>;
/// Sender handle for the unbounded log queue.
pub type LogSender = UnboundedSender<ProcessingSummary>;
/// Receiver handle for the unbounded log queue.
pub type LogReceiver = UnboundedReceiver<ProcessingSummary>;

/// Create the bounded work queue. `send` waits while `capacity` items are
/// queued.
pub fn work_queue(capacity: usize) -> (WorkSender, WorkReceiver) {
    bounded_queue(capacity)
}

fn bounded_queue<T>(capacity: usize) -> (BoundedSender<T>, SharedReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    let tracker = DrainTracker::default();
    (
        BoundedSender {
            tx,
            tracker: tracker.clone(),
        },
        SharedReceiver {
            rx: Arc::new(Mutex::new(rx)),
            tracker,
        },
    )
}

/// Create the unbounded log queue.
pub fn log_queue() -> (LogSender, LogReceiver) {
    unbounded_queue()
}

fn unbounded_queue<T>() -> (UnboundedSender<T>, UnboundedReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let tracker = DrainTracker::default();
    (
        UnboundedSender {
            tx,
            tracker: tracker.clone(),
        },
        UnboundedReceiver { rx, tracker },
    )
}

/// The queue's receiving side is gone. Carries the rejected item back.
#[derive(Debug)]
pub struct QueueClosed<T>(pub T);

#[derive(Debug, Default)]
struct Pending {
    count: AtomicUsize,
    notify: Notify,
}

/// Counts items that were offered to a queue but not yet fully handled.
#[derive(Debug, Clone, Default)]
pub struct DrainTracker {
    inner: Arc<Pending>,
}

impl DrainTracker {
    fn ticket(&self) -> DrainTicket {
        self.inner.count.fetch_add(1, Ordering::AcqRel);
        DrainTicket {
            tracker: self.clone(),
        }
    }

    fn release(&self) {
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.notify.notify_waiters();
        }
    }

    /// Items enqueued or in progress.
    pub fn pending(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Resolve once every ticket has been released.
    pub async fn drained(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Marks one item as done when dropped.
#[derive(Debug)]
pub struct DrainTicket {
    tracker: DrainTracker,
}

impl Drop for DrainTicket {
    fn drop(&mut self) {
        self.tracker.release();
    }
}

/// An item together with its drain ticket.
#[derive(Debug)]
pub struct Ticketed<T> {
    item: T,
    ticket: DrainTicket,
}

impl<T> Ticketed<T> {
    pub fn item(&self) -> &T {
        &self.item
    }

    /// Split off the ticket. Hold it until the item is fully handled.
    pub fn into_parts(self) -> (T, DrainTicket) {
        (self.item, self.ticket)
    }
}

#[derive(Debug)]
pub struct BoundedSender<T> {
    tx: mpsc::Sender<Ticketed<T>>,
    tracker: DrainTracker,
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            tracker: self.tracker.clone(),
        }
    }
}

impl<T> BoundedSender<T> {
    /// Enqueue `item`, waiting for space. Dropping the returned future
    /// before it completes releases the item's ticket.
    pub async fn send(&self, item: T) -> Result<(), QueueClosed<T>> {
        let ticketed = Ticketed {
            item,
            ticket: self.tracker.ticket(),
        };
        self.tx
            .send(ticketed)
            .await
            .map_err(|mpsc::error::SendError(rejected)| {
                let (item, _ticket) = rejected.into_parts();
                QueueClosed(item)
            })
    }

    pub fn tracker(&self) -> DrainTracker {
        self.tracker.clone()
    }
}

/// Receiving side of the work queue. Cloned into every worker.
#[derive(Debug)]
pub struct SharedReceiver<T> {
    rx: Arc<Mutex<mpsc::Receiver<Ticketed<T>>>>,
    tracker: DrainTracker,
}

impl<T> Clone for SharedReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
            tracker: self.tracker.clone(),
        }
    }
}

impl<T> SharedReceiver<T> {
    /// Wait for the next item. Also returns how many items were buffered,
    /// this one included, at the moment it was taken. `None` once the queue
    /// is closed and empty.
    pub async fn recv(&self) -> Option<(Ticketed<T>, usize)> {
        let mut rx = self.rx.lock().await;
        let item = rx.recv().await?;
        Some((item, rx.len() + 1))
    }

    /// Close the queue and take every item still buffered.
    pub async fn close_and_drain(&self) -> Vec<Ticketed<T>> {
        let mut rx = self.rx.lock().await;
        rx.close();
        let mut remaining = Vec::new();
        while let Ok(item) = rx.try_recv() {
            remaining.push(item);
        }
        remaining
    }

    pub fn tracker(&self) -> DrainTracker {
        self.tracker.clone()
    }
}

#[derive(Debug)]
pub struct UnboundedSender<T> {
    tx: mpsc::UnboundedSender<Ticketed<T>>,
    tracker: DrainTracker,
}

impl<T> Clone for UnboundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            tracker: self.tracker.clone(),
        }
    }
}

impl<T> UnboundedSender<T> {
    pub fn send(&self, item: T) -> Result<(), QueueClosed<T>> {
        let ticketed = Ticketed {
            item,
            ticket: self.tracker.ticket(),
        };
        self.tx.send(ticketed).map_err(|mpsc::error::SendError(rejected)| {
            let (item, _ticket) = rejected.into_parts();
            QueueClosed(item)
        })
    }

    pub fn tracker(&self) -> DrainTracker {
        self.tracker.clone()
    }
}

#[derive(Debug)]
pub struct UnboundedReceiver<T> {
    rx: mpsc::UnboundedReceiver<Ticketed<T>>,
    tracker: DrainTracker,
}

impl<T> UnboundedReceiver<T> {
    pub async fn recv(&mut self) -> Option<Ticketed<T>> {
        self.rx.recv().await
    }

    pub fn tracker(&self) -> DrainTracker {
        self.tracker.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_tracker_counts_until_ticket_dropped() {
        let (tx, rx) = bounded_queue::<u32>(2);
        let tracker = tx.tracker();
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        assert_eq!(tracker.pending(), 2);

        let (first, depth) = rx.recv().await.unwrap();
        assert_eq!(*first.item(), 1);
        assert_eq!(depth, 2);
        // Taken off the buffer but not yet handled.
        assert_eq!(tracker.pending(), 2);
        drop(first);
        assert_eq!(tracker.pending(), 1);

        let (second, depth) = rx.recv().await.unwrap();
        assert_eq!(depth, 1);
        let (item, ticket) = second.into_parts();
        assert_eq!(item, 2);
        drop(ticket);
        tokio::time::timeout(Duration::from_millis(50), tracker.drained())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_waits_for_capacity() {
        let (tx, rx) = bounded_queue::<u32>(1);
        tx.send(1).await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(20), tx.send(2)).await;
        assert!(blocked.is_err());
        // The abandoned send released its ticket.
        assert_eq!(tx.tracker().pending(), 1);
        let (_, depth) = rx.recv().await.unwrap();
        assert_eq!(depth, 1);
    }

    #[tokio::test]
    async fn test_send_after_close_returns_item() {
        let (tx, rx) = bounded_queue::<u32>(4);
        tx.send(7).await.unwrap();
        let leftover = rx.close_and_drain().await;
        assert_eq!(leftover.len(), 1);
        drop(leftover);

        let QueueClosed(item) = tx.send(8).await.unwrap_err();
        assert_eq!(item, 8);
        assert_eq!(tx.tracker().pending(), 0);
    }

    #[tokio::test]
    async fn test_log_queue_roundtrip_releases_ticket() {
        let (tx, mut rx) = unbounded_queue::<&str>();
        tx.send("summary").unwrap();
        assert_eq!(rx.tracker().pending(), 1);
        let received = rx.recv().await.unwrap();
        assert_eq!(*received.item(), "summary");
        drop(received);
        assert_eq!(rx.tracker().pending(), 0);
    }
}
