/// Conversation view: one open conversation and every resource scoped to it
use crate::config::Config;
use crate::conversation::get_or_create_conversation;
use crate::error::{Result, SendError};
use crate::feed::{EventFeed, SubscriptionKey};
use crate::gate::MessagingGate;
use crate::message_store::MessageStore;
use crate::messenger_types::{
    Conversation, ConversationRequest, FeedHealth, Message, Participant, ViewEvent,
};
use crate::poller::Poller;
use crate::reconciler::{Reconciler, SyncEvent};
use crate::shared::SharedReconciler;
use crate::subscriber::{FeedSubscriber, HealthPublisher};
use crate::writer::OptimisticWriter;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// External collaborators, shared by every view of the process
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn MessageStore>,
    pub feed: Arc<dyn EventFeed>,
    pub gate: Arc<dyn MessagingGate>,
}

pub struct ConversationView {
    conversation: Conversation,
    participant: Participant,
    shared: SharedReconciler,
    health: watch::Receiver<FeedHealth>,
    subscriber: FeedSubscriber,
    poller: Poller,
    /// Absent when the gate kept messaging locked
    writer: Option<OptimisticWriter>,
}

impl ConversationView {
    /// Open a conversation: bootstrap it, load history, then start the feed and both timers
    pub async fn open(
        backend: &Backend,
        request: &ConversationRequest,
        participant: Participant,
        config: &Config,
    ) -> Result<Self> {
        config.validate()?;

        let conversation = get_or_create_conversation(backend.store.as_ref(), request).await?;

        let unlocked = match backend.gate.is_unlocked(&conversation).await {
            Ok(unlocked) => unlocked,
            Err(e) => {
                warn!("Gate check for {} failed, keeping it locked: {}", conversation.id, e);
                false
            }
        };

        let shared = SharedReconciler::new(
            Reconciler::new(conversation.id.clone(), config.optimistic_match_window),
            config.event_buffer,
        );

        // before the initial load so it already sees the read flags
        match backend
            .store
            .mark_read(&conversation.id, &participant.user_id, Utc::now())
            .await
        {
            Ok(0) => {}
            Ok(n) => debug!("Marked {} messages read in {}", n, conversation.id),
            Err(e) => warn!("Marking {} read failed: {}", conversation.id, e),
        }

        match backend.store.list_messages(&conversation.id).await {
            Ok(messages) => {
                shared
                    .apply(SyncEvent::ConfirmedSnapshot {
                        messages,
                        complete: true,
                    })
                    .await;
            }
            Err(e) => warn!(
                "Initial load of {} failed, waiting for the poller: {}",
                conversation.id, e
            ),
        }

        let (health_tx, health_rx) = watch::channel(FeedHealth::Lost);
        let subscriber = FeedSubscriber::start(
            backend.feed.clone(),
            &conversation.id,
            shared.clone(),
            HealthPublisher::new(health_tx, shared.event_sender()),
        )?;
        let poller = Poller::start(
            backend.store.clone(),
            conversation.id.clone(),
            shared.clone(),
            health_rx.clone(),
            config,
        );

        let writer = unlocked.then(|| {
            OptimisticWriter::new(
                conversation.id.clone(),
                participant.clone(),
                backend.store.clone(),
                shared.clone(),
            )
        });

        info!(
            "Opened conversation {} as {} {} ({})",
            conversation.id,
            participant.role,
            participant.user_id,
            if unlocked { "unlocked" } else { "locked" }
        );

        Ok(Self {
            conversation,
            participant,
            shared,
            health: health_rx,
            subscriber,
            poller,
            writer,
        })
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub fn is_unlocked(&self) -> bool {
        self.writer.is_some()
    }

    /// Current ordered, deduplicated list
    pub async fn messages(&self) -> Vec<Message> {
        self.shared.snapshot().await
    }

    pub async fn pending_count(&self) -> usize {
        self.shared.pending_count().await
    }

    pub fn watch_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.shared.watch()
    }

    pub fn connection_health(&self) -> watch::Receiver<FeedHealth> {
        self.health.clone()
    }

    pub fn health(&self) -> FeedHealth {
        *self.health.borrow()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ViewEvent> {
        self.shared.event_sender().subscribe()
    }

    /// Resolves to `true` once the view is closed
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.shared.closed_signal()
    }

    pub fn subscription_key(&self) -> &SubscriptionKey {
        self.subscriber.key()
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    pub async fn send_message(&self, text: &str) -> std::result::Result<Message, SendError> {
        if self.shared.is_closed() {
            return Err(SendError::Closed);
        }
        match &self.writer {
            Some(writer) => writer.send_message(text).await,
            None => Err(SendError::Locked),
        }
    }

    /// Release the timers and the subscription. Sends still in flight finish
    /// against the store but no longer touch the list. Idempotent.
    pub fn close(&self) {
        if self.shared.is_closed() {
            return;
        }
        self.poller.stop();
        self.subscriber.stop();
        self.shared.close();
        info!("Closed conversation {}", self.conversation.id);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl Drop for ConversationView {
    fn drop(&mut self) {
        self.close();
    }
}
