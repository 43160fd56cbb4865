/// Push event feed: transport interface and an in-process implementation
use crate::error::{Result, SyncError};
use crate::messenger_types::FeedHealth;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Transport-level subscription states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Subscribed,
    TimedOut,
    ChannelError,
    Closed,
}

impl TransportStatus {
    pub fn health(self) -> FeedHealth {
        match self {
            TransportStatus::Subscribed => FeedHealth::Subscribed,
            TransportStatus::TimedOut => FeedHealth::Degraded,
            TransportStatus::ChannelError | TransportStatus::Closed => FeedHealth::Lost,
        }
    }
}

/// What a subscription delivers
#[derive(Debug, Clone, PartialEq)]
pub enum FeedSignal {
    /// A row inserted into the conversation, undecoded
    Inserted(serde_json::Value),
    Status(TransportStatus),
}

/// Handle name for one subscription. Unique per open, so a quick close and
/// reopen of the same conversation never reuses a handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    conversation_id: String,
    name: String,
}

impl SubscriptionKey {
    pub fn new(conversation_id: &str) -> Self {
        let name = format!(
            "chat-{}-{}-{}",
            conversation_id,
            chrono::Utc::now().timestamp_millis(),
            Uuid::new_v4().simple()
        );
        Self {
            conversation_id: conversation_id.to_string(),
            name,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

pub type Subscription = mpsc::UnboundedReceiver<FeedSignal>;

/// Push subscription transport, scoped to one conversation per key
pub trait EventFeed: Send + Sync {
    fn subscribe(&self, key: &SubscriptionKey) -> Result<Subscription>;

    /// Detach every listener of `key`. Unknown keys are ignored.
    fn unsubscribe(&self, key: &SubscriptionKey);
}

struct Registration {
    conversation_id: String,
    tx: mpsc::UnboundedSender<FeedSignal>,
}

struct LocalFeedState {
    registrations: HashMap<String, Registration>,
    connected: bool,
    delivering: bool,
}

/// In-process feed hub. `SledStore` publishes inserts here; status changes
/// can be injected to exercise the degraded paths.
#[derive(Clone)]
pub struct LocalFeed {
    state: Arc<Mutex<LocalFeedState>>,
}

impl Default for LocalFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFeed {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LocalFeedState {
                registrations: HashMap::new(),
                connected: true,
                delivering: true,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LocalFeedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Route an inserted row to every subscription of its conversation
    pub fn publish_insert(&self, conversation_id: &str, row: serde_json::Value) {
        let mut state = self.lock();
        if !state.connected || !state.delivering {
            debug!("Feed not delivering, dropping insert for {}", conversation_id);
            return;
        }
        state.registrations.retain(|_, reg| {
            if reg.conversation_id != conversation_id {
                return true;
            }
            reg.tx.send(FeedSignal::Inserted(row.clone())).is_ok()
        });
    }

    /// Simulate the transport going down (`ChannelError`) or recovering (`Subscribed`)
    pub fn set_connected(&self, connected: bool) {
        let status = if connected {
            TransportStatus::Subscribed
        } else {
            TransportStatus::ChannelError
        };
        let mut state = self.lock();
        state.connected = connected;
        Self::broadcast_status(&mut state, status);
    }

    /// Keep reporting healthy while silently dropping inserts
    pub fn set_delivering(&self, delivering: bool) {
        self.lock().delivering = delivering;
    }

    /// Push a status to every live subscription
    pub fn emit_status(&self, status: TransportStatus) {
        let mut state = self.lock();
        Self::broadcast_status(&mut state, status);
    }

    pub fn registration_count(&self) -> usize {
        self.lock().registrations.len()
    }

    pub fn is_registered(&self, key: &SubscriptionKey) -> bool {
        self.lock().registrations.contains_key(key.name())
    }

    fn broadcast_status(state: &mut LocalFeedState, status: TransportStatus) {
        state
            .registrations
            .retain(|_, reg| reg.tx.send(FeedSignal::Status(status)).is_ok());
    }
}

impl EventFeed for LocalFeed {
    fn subscribe(&self, key: &SubscriptionKey) -> Result<Subscription> {
        let mut state = self.lock();
        if state.registrations.contains_key(key.name()) {
            return Err(SyncError::Feed(format!(
                "subscription handle {} already in use",
                key.name()
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let initial = if state.connected {
            TransportStatus::Subscribed
        } else {
            TransportStatus::ChannelError
        };
        // receiver is alive, cannot fail
        let _ = tx.send(FeedSignal::Status(initial));
        state.registrations.insert(
            key.name().to_string(),
            Registration {
                conversation_id: key.conversation_id().to_string(),
                tx,
            },
        );
        info!("Feed subscription {} opened", key.name());
        Ok(rx)
    }

    fn unsubscribe(&self, key: &SubscriptionKey) {
        if self.lock().registrations.remove(key.name()).is_some() {
            info!("Feed subscription {} closed", key.name());
        }
    }
}
