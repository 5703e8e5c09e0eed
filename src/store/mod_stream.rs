//! Modification stream fan-out (§4.2, §9 "Modification streams vs.
//! back-pressure").
//!
//! Subscribing yields a channel that first delivers an empty batch (the
//! "connected" marker) and then one batch per committed write. Delivery
//! is per-subscriber and best-effort: a subscriber whose inbox is full
//! is dropped rather than allowed to block the writer, on the theory
//! that the DB itself is the replayable ground truth on gaps.
//!
//! Grounded on the registry shape of the teacher's `Waitlist`
//! (`DashMap<key, Vec<..>>` fan-out to pending readers).

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Bound on a subscriber's inbox. Chosen generously since a gap just
/// means the subscriber falls back to a DB read; see module docs.
const SUBSCRIBER_CAPACITY: usize = 64;

pub struct ModStream<T: Clone + Send + 'static> {
    subscribers: DashMap<Uuid, mpsc::Sender<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Default for ModStream<T> {
    fn default() -> Self {
        Self { subscribers: DashMap::new() }
    }
}

impl<T: Clone + Send + 'static> ModStream<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. The returned receiver's first message
    /// is always an empty batch, signaling "connected".
    pub fn subscribe(&self) -> mpsc::Receiver<Vec<T>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let _ = tx.try_send(Vec::new());
        self.subscribers.insert(Uuid::now_v7(), tx);
        rx
    }

    /// Explicitly drop a subscriber, e.g. on cancellation (§5
    /// Cancellation: pending subscribers observe a closed stream).
    pub fn unsubscribe(&self, id: Uuid) {
        self.subscribers.remove(&id);
    }

    /// Fan a batch of written rows out to every live subscriber.
    /// Subscribers whose inbox is full or whose receiver has been
    /// dropped are pruned; the writer never blocks on a slow reader.
    pub fn publish(&self, rows: Vec<T>) {
        if rows.is_empty() {
            return;
        }
        self.subscribers.retain(|_, tx| match tx.try_send(rows.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("modification-stream subscriber inbox full, dropping subscriber");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
