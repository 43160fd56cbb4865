/// Optimistic writer: immediate local echo, then reconcile with the store's answer
use crate::error::{SendError, SyncError};
use crate::message_store::MessageStore;
use crate::messenger_types::{Message, NewMessage, Participant, PROVISIONAL_PREFIX};
use crate::reconciler::{Resolution, SendOutcome, SyncEvent};
use crate::shared::SharedReconciler;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct OptimisticWriter {
    conversation_id: String,
    author: Participant,
    store: Arc<dyn MessageStore>,
    shared: SharedReconciler,
}

impl OptimisticWriter {
    pub fn new(
        conversation_id: String,
        author: Participant,
        store: Arc<dyn MessageStore>,
        shared: SharedReconciler,
    ) -> Self {
        Self {
            conversation_id,
            author,
            store,
            shared,
        }
    }

    /// Send `text`. On failure the original text comes back in `SendError::Rejected`.
    pub async fn send_message(&self, text: &str) -> std::result::Result<Message, SendError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(SendError::Empty);
        }

        let provisional = Message {
            id: format!("{}{}", PROVISIONAL_PREFIX, Uuid::new_v4().simple()),
            conversation_id: self.conversation_id.clone(),
            sender_id: self.author.user_id.clone(),
            sender_role: self.author.role,
            content: content.to_string(),
            created_at: Utc::now(),
            read: false,
            read_at: None,
        };
        let provisional_id = provisional.id.clone();
        self.shared.apply(SyncEvent::OptimisticAdd(provisional)).await;

        let new_message = NewMessage {
            conversation_id: self.conversation_id.clone(),
            sender_id: self.author.user_id.clone(),
            sender_role: self.author.role,
            content: content.to_string(),
        };
        // detached: dropping this future must not strand the provisional
        let task = tokio::spawn(deliver(
            self.store.clone(),
            self.shared.clone(),
            new_message,
            provisional_id.clone(),
        ));

        let delivery = match task.await {
            Ok(delivery) => delivery,
            Err(e) => {
                self.shared
                    .apply(SyncEvent::OptimisticResolve {
                        provisional_id,
                        outcome: SendOutcome::Failed,
                    })
                    .await;
                Delivery::Failed(SyncError::Storage(format!("send task failed: {}", e)))
            }
        };

        match delivery {
            Delivery::Sent(message) => Ok(message),
            Delivery::Failed(source) => Err(SendError::Rejected {
                content: text.to_string(),
                source,
            }),
        }
    }
}

enum Delivery {
    Sent(Message),
    Failed(SyncError),
}

async fn deliver(
    store: Arc<dyn MessageStore>,
    shared: SharedReconciler,
    new_message: NewMessage,
    provisional_id: String,
) -> Delivery {
    let conversation_id = new_message.conversation_id.clone();
    match store.insert_message(new_message).await {
        Ok(confirmed) => {
            shared
                .apply(SyncEvent::OptimisticResolve {
                    provisional_id,
                    outcome: SendOutcome::Confirmed(confirmed.clone()),
                })
                .await;
            info!("Message {} sent to {}", confirmed.id, conversation_id);
            Delivery::Sent(confirmed)
        }
        Err(e) => {
            warn!("Send to {} failed: {}", conversation_id, e);
            let applied = shared
                .apply(SyncEvent::OptimisticResolve {
                    provisional_id,
                    outcome: SendOutcome::Failed,
                })
                .await;
            match applied.resolution {
                // the row reached the store after all; nothing to retry
                Some(Resolution::AlreadyConfirmed { message }) => {
                    debug!("Failed send already observed as {}", message.id);
                    Delivery::Sent(message)
                }
                _ => Delivery::Failed(e),
            }
        }
    }
}
