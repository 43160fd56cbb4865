#![allow(dead_code)]
/// Shared fixtures for integration tests: an in-memory store with failure injection
use async_trait::async_trait;
use chatsync_core::config::Config;
use chatsync_core::error::{Result, SyncError};
use chatsync_core::feed::LocalFeed;
use chatsync_core::gate::{MessagingGate, StaticGate};
use chatsync_core::message_store::MessageStore;
use chatsync_core::messenger_types::{
    Conversation, ConversationRequest, ConversationStatus, Message, NewMessage, Participant,
    SenderRole,
};
use chatsync_core::view::Backend;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CLIENT: &str = "client-1";
pub const MOVER: &str = "mover-1";

#[derive(Default)]
struct MockState {
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    next_id: u64,
    fail_inserts: bool,
    fail_lists: bool,
    fail_creates: bool,
    hidden_finds: usize,
    insert_delay: Option<Duration>,
    list_calls: usize,
    insert_calls: usize,
}

/// In-memory `MessageStore`. Inserts are announced on the attached feed.
pub struct MockStore {
    state: Mutex<MockState>,
    feed: Option<LocalFeed>,
}

impl MockStore {
    pub fn new(feed: Option<LocalFeed>) -> Self {
        Self {
            state: Mutex::new(MockState {
                next_id: 42,
                ..Default::default()
            }),
            feed,
        }
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.state.lock().unwrap().fail_inserts = fail;
    }

    pub fn fail_lists(&self, fail: bool) {
        self.state.lock().unwrap().fail_lists = fail;
    }

    pub fn fail_creates(&self, fail: bool) {
        self.state.lock().unwrap().fail_creates = fail;
    }

    /// The next `n` lookups miss, as if another client had not committed yet
    pub fn hide_next_finds(&self, n: usize) {
        self.state.lock().unwrap().hidden_finds = n;
    }

    pub fn set_insert_delay(&self, delay: Duration) {
        self.state.lock().unwrap().insert_delay = Some(delay);
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn insert_calls(&self) -> usize {
        self.state.lock().unwrap().insert_calls
    }

    pub fn seed_conversation(&self, conversation: Conversation) {
        self.state.lock().unwrap().conversations.push(conversation);
    }

    /// Write a row as another client would, bypassing the feed
    pub fn push_remote(&self, message: Message) {
        self.state.lock().unwrap().messages.push(message);
    }

    pub fn stored(&self, conversation_id: &str) -> Vec<Message> {
        self.state
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageStore for MockStore {
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        if state.fail_lists {
            return Err(SyncError::Storage("list unavailable".to_string()));
        }
        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.insert_calls += 1;
            state.insert_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let msg = {
            let mut state = self.state.lock().unwrap();
            if state.fail_inserts {
                return Err(SyncError::Storage("network error".to_string()));
            }
            let id = state.next_id;
            state.next_id += 1;
            let msg = Message {
                id: id.to_string(),
                conversation_id: new.conversation_id,
                sender_id: new.sender_id,
                sender_role: new.sender_role,
                content: new.content,
                created_at: Utc::now(),
                read: false,
                read_at: None,
            };
            state.messages.push(msg.clone());
            msg
        };

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
        let mut state = self.state.lock().unwrap();
        if state.hidden_finds > 0 {
            state.hidden_finds -= 1;
            return Ok(None);
        }
        Ok(state
            .conversations
            .iter()
            .find(|c| c.quote_request_id == quote_request_id && c.mover_id == mover_id)
            .cloned())
    }

    async fn create_conversation(&self, request: &ConversationRequest) -> Result<Conversation> {
        let mut state = self.state.lock().unwrap();
        if state.fail_creates {
            return Err(SyncError::Storage("permission denied".to_string()));
        }
        if state.conversations.iter().any(|c| {
            c.quote_request_id == request.quote_request_id && c.mover_id == request.mover_id
        }) {
            return Err(SyncError::Conflict("duplicate key".to_string()));
        }
        let conversation = conversation_for(request, &format!("conv-{}", state.conversations.len() + 1));
        state.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn mark_read(
        &self,
        conversation_id: &str,
        reader_id: &str,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let mut updated = 0;
        for msg in state.messages.iter_mut() {
            if msg.conversation_id == conversation_id && msg.sender_id != reader_id && !msg.read {
                msg.read = true;
                msg.read_at = Some(at);
                updated += 1;
            }
        }
        Ok(updated)
    }
}

pub fn request() -> ConversationRequest {
    ConversationRequest {
        quote_request_id: "qr-1".to_string(),
        client_id: CLIENT.to_string(),
        mover_id: MOVER.to_string(),
    }
}

pub fn conversation_for(request: &ConversationRequest, id: &str) -> Conversation {
    let now = Utc::now();
    Conversation {
        id: id.to_string(),
        quote_request_id: request.quote_request_id.clone(),
        client_id: request.client_id.clone(),
        mover_id: request.mover_id.clone(),
        status: ConversationStatus::Active,
        created_at: now,
        updated_at: now,
    }
}

pub fn client() -> Participant {
    Participant {
        user_id: CLIENT.to_string(),
        role: SenderRole::Client,
    }
}

pub fn mover() -> Participant {
    Participant {
        user_id: MOVER.to_string(),
        role: SenderRole::Mover,
    }
}

/// A confirmed row from the mover, `secs_ago` seconds in the past
pub fn remote_message(conversation_id: &str, id: &str, content: &str, secs_ago: i64) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: MOVER.to_string(),
        sender_role: SenderRole::Mover,
        content: content.to_string(),
        created_at: Utc::now() - ChronoDuration::seconds(secs_ago),
        read: false,
        read_at: None,
    }
}

pub fn config() -> Config {
    Config::default()
}

pub fn backend(store: Arc<MockStore>, feed: LocalFeed) -> Backend {
    backend_with_gate(store, feed, Arc::new(StaticGate::unlocked()))
}

pub fn backend_with_gate(
    store: Arc<MockStore>,
    feed: LocalFeed,
    gate: Arc<dyn MessagingGate>,
) -> Backend {
    Backend {
        store,
        feed: Arc::new(feed),
        gate,
    }
}

pub fn ids(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.id.clone()).collect()
}

/// Let spawned tasks run without moving the clock
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
