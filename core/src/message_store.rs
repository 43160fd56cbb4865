/// Message store client: the remote store interface plus a sled-backed implementation
use crate::error::{Result, SyncError};
use crate::feed::LocalFeed;
use crate::messenger_types::{
    Conversation, ConversationRequest, ConversationStatus, Message, NewMessage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

/// Store operations the sync engine consumes. Holds no per-conversation state,
/// so one instance is shared by every open view.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// All messages of a conversation, oldest first
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Persist a message; the store assigns `id` and `created_at`
    async fn insert_message(&self, new: NewMessage) -> Result<Message>;

    async fn find_conversation(
        &self,
        quote_request_id: &str,
        mover_id: &str,
    ) -> Result<Option<Conversation>>;

    /// Fails with `SyncError::Conflict` when the (request, mover) pair already exists
    async fn create_conversation(&self, request: &ConversationRequest) -> Result<Conversation>;

    /// Mark messages not sent by `reader_id` as read; returns how many changed
    async fn mark_read(
        &self,
        conversation_id: &str,
        reader_id: &str,
        at: DateTime<Utc>,
    ) -> Result<usize>;
}

/// Chat storage in sled. Inserts are announced on an attached `LocalFeed`.
pub struct SledStore {
    db: sled::Db,
    conversations: sled::Tree,
    messages: sled::Tree,
    feed: Option<LocalFeed>,
}

impl SledStore {
    /// Open (or create) the store under `data_dir`
    pub fn open(data_dir: &Path) -> Result<Self> {
        let db = sled::open(data_dir.join("chat.db"))
            .map_err(|e| SyncError::Storage(format!("Failed to open chat DB: {}", e)))?;
        let conversations = db.open_tree("conversations")?;
        let messages = db.open_tree("messages")?;

        Ok(Self {
            db,
            conversations,
            messages,
            feed: None,
        })
    }

    /// Publish every confirmed insert to `feed`
    pub fn with_feed(mut self, feed: LocalFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Write a raw row as-is (rows written by other clients may not match our schema)
    pub fn put_raw_row(&self, conversation_id: &str, row: &serde_json::Value) -> Result<()> {
        let seq = self.db.generate_id()?;
        let value = serde_json::to_vec(row)?;
        self.messages
            .insert(message_key(conversation_id, seq), value)?;
        Ok(())
    }

    /// Total messages across all conversations
    pub fn count(&self) -> usize {
        self.messages.len()
    }
}

impl Clone for SledStore {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            conversations: self.conversations.clone(),
            messages: self.messages.clone(),
            feed: self.feed.clone(),
        }
    }
}

fn conversation_key(quote_request_id: &str, mover_id: &str) -> String {
    format!("conv:{}:{}", quote_request_id, mover_id)
}

fn message_prefix(conversation_id: &str) -> String {
    format!("msg:{}:", conversation_id)
}

fn message_key(conversation_id: &str, seq: u64) -> String {
    format!("{}{:020}", message_prefix(conversation_id), seq)
}

#[async_trait]
impl MessageStore for SledStore {
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let mut messages = Vec::new();

        for entry in self.messages.scan_prefix(message_prefix(conversation_id)) {
            let (key, value) = entry?;
            match serde_json::from_slice::<Message>(&value) {
                Ok(msg) => messages.push(msg),
                Err(e) => warn!(
                    "Skipping malformed message row {}: {}",
                    String::from_utf8_lossy(&key),
                    e
                ),
            }
        }

        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message> {
        let seq = self.db.generate_id()?;
        let msg = Message {
            id: seq.to_string(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            sender_role: new.sender_role,
            content: new.content,
            created_at: Utc::now(),
            read: false,
            read_at: None,
        };

        let value = serde_json::to_vec(&msg)?;
        self.messages
            .insert(message_key(&msg.conversation_id, seq), value)?;
        debug!("Stored message {} in {}", msg.id, msg.conversation_id);

        if let Some(feed) = &self.feed {
            feed.publish_insert(&msg.conversation_id, serde_json::to_value(&msg)?);
        }

        Ok(msg)
    }

    async fn find_conversation(
        &self,
        quote_request_id: &str,
        mover_id: &str,
    ) -> Result<Option<Conversation>> {
        match self
            .conversations
            .get(conversation_key(quote_request_id, mover_id))?
        {
            Some(value) => Ok(Some(serde_json::from_slice::<Conversation>(&value)?)),
            None => Ok(None),
        }
    }

    async fn create_conversation(&self, request: &ConversationRequest) -> Result<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            quote_request_id: request.quote_request_id.clone(),
            client_id: request.client_id.clone(),
            mover_id: request.mover_id.clone(),
            status: ConversationStatus::Active,
            created_at: now,
            updated_at: now,
        };

        let key = conversation_key(&request.quote_request_id, &request.mover_id);
        let value = serde_json::to_vec(&conversation)?;
        match self
            .conversations
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(value))?
        {
            Ok(()) => Ok(conversation),
            Err(_) => Err(SyncError::Conflict(format!(
                "conversation already exists for {}",
                key
            ))),
        }
    }

    async fn mark_read(
        &self,
        conversation_id: &str,
        reader_id: &str,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut updated = 0;

        for entry in self.messages.scan_prefix(message_prefix(conversation_id)) {
            let (key, value) = entry?;
            let Ok(mut msg) = serde_json::from_slice::<Message>(&value) else {
                continue;
            };
            if msg.sender_id == reader_id || msg.read {
                continue;
            }
            msg.read = true;
            msg.read_at = Some(at);
            self.messages.insert(key, serde_json::to_vec(&msg)?)?;
            updated += 1;
        }

        Ok(updated)
    }
}
