use tokio::sync::broadcast;

/// Event bus backed by a tokio broadcast channel.
///
/// Every subscriber receives every event published after it subscribed. A
/// subscriber that falls behind by more than `capacity` events observes
/// `RecvError::Lagged` on its own receiver; publishers and other subscribers
/// are unaffected.
pub struct EventBus<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event, returning how many subscribers it reached.
    pub fn publish(&self, event: E) -> usize {
        // No receivers is not an error for a bus.
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(256)
    }
}
