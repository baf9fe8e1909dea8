// pixpack/src/progress/mod.rs
use crate::core::ProgressEvent;
use futures::Stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<ProgressEvent>>>,
}

impl Registry {
    fn remove(&self, id: u64) -> bool {
        self.subscribers.lock().remove(&id).is_some()
    }
}

/// Fan-out of progress events to whoever is listening right now.
///
/// There is no history: a subscriber only sees events published while it is
/// registered. Publishing holds the registry lock for the whole fan-out, so
/// every subscriber observes events in publish order and membership changes
/// wait until the current event has been handed to everyone.
#[derive(Clone, Default)]
pub struct ProgressBroadcaster {
    registry: Arc<Registry>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscriber {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.subscribers.lock().insert(id, tx);

        log::debug!("Progress subscriber {} connected", id);

        Subscriber {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Removes `subscriber`. Calling it again, or after the subscriber has been
    /// pruned, is a no-op.
    pub fn unsubscribe(&self, subscriber: &mut Subscriber) {
        subscriber.detach();
    }

    /// Hands `event` to every registered subscriber and returns how many got it.
    /// Subscribers whose receiving side is gone are pruned on the way.
    pub fn publish(&self, event: ProgressEvent) -> usize {
        let mut subscribers = self.registry.subscribers.lock();
        subscribers.retain(|id, tx| {
            let delivered = tx.send(event.clone()).is_ok();
            if !delivered {
                log::debug!("Pruning disconnected progress subscriber {}", id);
            }
            delivered
        });
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.subscribers.lock().len()
    }

    /// Drops every subscriber; their streams end once drained.
    pub fn close(&self) {
        let mut subscribers = self.registry.subscribers.lock();
        if !subscribers.is_empty() {
            log::info!("Closing {} progress subscribers", subscribers.len());
        }
        subscribers.clear();
    }
}

/// Receiving end of a [`ProgressBroadcaster`]. Unsubscribes itself on drop.
pub struct Subscriber {
    id: u64,
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
    registry: Weak<Registry>,
}

impl Subscriber {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the broadcaster still delivers to this subscriber.
    pub fn is_active(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.subscribers.lock().contains_key(&self.id),
            None => false,
        }
    }

    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }

    fn detach(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if registry.remove(self.id) {
                log::debug!("Progress subscriber {} disconnected", self.id);
            }
        }
        self.rx.close();
    }
}

impl Stream for Subscriber {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.detach();
    }
}
