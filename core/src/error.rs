/// Error types for the conversation sync engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Uniqueness violation on create (the row already exists)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<sled::Error> for SyncError {
    fn from(e: sled::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Outcome of a failed `send_message`
#[derive(Error, Debug)]
pub enum SendError {
    #[error("Message is empty")]
    Empty,

    #[error("Messaging is locked for this conversation")]
    Locked,

    #[error("Conversation view is closed")]
    Closed,

    /// The store rejected the insert; `content` is the text to offer for retry
    #[error("Send failed: {source}")]
    Rejected {
        content: String,
        #[source]
        source: SyncError,
    },
}

impl SendError {
    /// Text the caller should put back into the composer, if any
    pub fn retry_content(&self) -> Option<&str> {
        match self {
            SendError::Rejected { content, .. } => Some(content),
            _ => None,
        }
    }
}
