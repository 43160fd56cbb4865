/// Shared types for the messaging layer
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Marks a locally generated, not yet confirmed message id
pub const PROVISIONAL_PREFIX: &str = "temp-";

/// Participant kind of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Client,
    Mover,
}

impl fmt::Display for SenderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenderRole::Client => write!(f, "client"),
            SenderRole::Mover => write!(f, "mover"),
        }
    }
}

/// The local user of a conversation view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub role: SenderRole,
}

/// One chat message, either server-confirmed or provisional
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(rename = "sender_type")]
    pub sender_role: SenderRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Decode a raw store/feed row. Rows that do not decode or carry no id are dropped.
    pub fn from_row(row: &serde_json::Value) -> Option<Message> {
        let msg: Message = serde_json::from_value(row.clone()).ok()?;
        if msg.id.is_empty() || msg.conversation_id.is_empty() {
            return None;
        }
        Some(msg)
    }

    /// True for entries that exist only locally
    pub fn is_provisional(&self) -> bool {
        self.id.starts_with(PROVISIONAL_PREFIX)
    }
}

/// Fields the writer hands to the store on insert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(rename = "sender_type")]
    pub sender_role: SenderRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Closed,
    Archived,
}

/// A thread between a client and a mover about one quote request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub quote_request_id: String,
    pub client_id: String,
    pub mover_id: String,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Identifies the conversation to open: one per (quote request, mover) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRequest {
    pub quote_request_id: String,
    pub client_id: String,
    pub mover_id: String,
}

/// Health of the push subscription for the open conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedHealth {
    Subscribed,
    Degraded,
    /// No live subscription (also the state before the first confirmation)
    #[default]
    Lost,
}

impl fmt::Display for FeedHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedHealth::Subscribed => write!(f, "subscribed"),
            FeedHealth::Degraded => write!(f, "degraded"),
            FeedHealth::Lost => write!(f, "lost"),
        }
    }
}

/// Change notifications streamed to UI clients (SSE /events)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewEvent {
    /// The rendered message list changed
    MessagesChanged { messages: Vec<Message> },
    /// Feed health transitioned
    HealthChanged { health: FeedHealth },
}
