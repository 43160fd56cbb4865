/// Event feed subscriber: turns a push subscription into merges and health transitions
use crate::error::Result;
use crate::feed::{EventFeed, FeedSignal, Subscription, SubscriptionKey};
use crate::messenger_types::{FeedHealth, Message, ViewEvent};
use crate::reconciler::SyncEvent;
use crate::shared::SharedReconciler;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Writes feed health transitions to the view's observers
pub struct HealthPublisher {
    tx: watch::Sender<FeedHealth>,
    events_tx: broadcast::Sender<ViewEvent>,
}

impl HealthPublisher {
    pub fn new(tx: watch::Sender<FeedHealth>, events_tx: broadcast::Sender<ViewEvent>) -> Self {
        Self { tx, events_tx }
    }

    /// Returns whether the health actually changed
    pub fn set(&self, health: FeedHealth) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == health {
                return false;
            }
            *current = health;
            true
        });
        if changed {
            match health {
                FeedHealth::Subscribed => info!("Feed subscribed"),
                other => warn!("Feed {}, relying on polling", other),
            }
            let _ = self.events_tx.send(ViewEvent::HealthChanged { health });
        }
        changed
    }
}

pub struct FeedSubscriber {
    key: SubscriptionKey,
    feed: Arc<dyn EventFeed>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl FeedSubscriber {
    /// Subscribe to `conversation_id` under a fresh handle and start listening
    pub fn start(
        feed: Arc<dyn EventFeed>,
        conversation_id: &str,
        shared: SharedReconciler,
        health: HealthPublisher,
    ) -> Result<Self> {
        let key = SubscriptionKey::new(conversation_id);
        let signals = feed.subscribe(&key)?;
        let listener = tokio::spawn(run_listener(key.clone(), signals, shared, health));

        Ok(Self {
            key,
            feed,
            listener: Mutex::new(Some(listener)),
        })
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Stop the listener, then detach it from the transport. Idempotent.
    pub fn stop(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = listener {
            handle.abort();
            self.feed.unsubscribe(&self.key);
            debug!("Subscriber {} stopped", self.key.name());
        }
    }
}

impl Drop for FeedSubscriber {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_listener(
    key: SubscriptionKey,
    mut signals: Subscription,
    shared: SharedReconciler,
    health: HealthPublisher,
) {
    while let Some(signal) = signals.recv().await {
        match signal {
            FeedSignal::Inserted(row) => match Message::from_row(&row) {
                Some(msg) if msg.conversation_id == key.conversation_id() => {
                    let applied = shared
                        .apply(SyncEvent::ConfirmedSnapshot {
                            messages: vec![msg],
                            complete: false,
                        })
                        .await;
                    if applied.changed {
                        debug!("Feed delivered a new row on {}", key.name());
                    }
                }
                Some(msg) => debug!(
                    "Ignoring row for conversation {} on {}",
                    msg.conversation_id,
                    key.name()
                ),
                None => warn!("Ignoring malformed row on {}", key.name()),
            },
            FeedSignal::Status(status) => {
                debug!("Subscription {} status {:?}", key.name(), status);
                health.set(status.health());
            }
        }
    }

    // transport dropped us
    health.set(FeedHealth::Lost);
}
