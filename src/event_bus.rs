// =============================================================================
// Event Bus — in-process publish / subscribe
// =============================================================================
//
// Thin wrapper over `tokio::sync::broadcast`. Publishers never block and
// never learn who is listening; a subscriber that falls behind loses the
// oldest events (logged) and carries on with the rest.
// =============================================================================

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{trace, warn};

/// Cloneable handle to a broadcast channel of `T`.
#[derive(Debug)]
pub struct EventBus<T> {
    tx: broadcast::Sender<T>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// `capacity` is the number of events retained for slow subscribers.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver `event` to every current subscriber. Returns how many
    /// subscribers it reached.
    pub fn publish(&self, event: T) -> usize {
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                trace!("event published with no subscribers");
                0
            }
        }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving end handed out by [`EventBus::subscribe`].
#[derive(Debug)]
pub struct Subscription<T> {
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// Next event, or `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, dropping oldest events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-queued event without waiting.
    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<T> {
        use broadcast::error::TryRecvError;

        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, dropping oldest events");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}
