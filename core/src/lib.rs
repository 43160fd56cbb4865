/// Chatsync - realtime conversation synchronization
///
/// Keeps one client's view of a conversation consistent across optimistic
/// sends, a push event feed, and periodic full-list polling.

pub mod error;
pub mod config;
pub mod messenger_types;
pub mod reconciler;
pub mod shared;
pub mod feed;
pub mod subscriber;
pub mod poller;
pub mod writer;
pub mod gate;
pub mod conversation;
pub mod message_store;
pub mod view;
pub mod messenger_api;

pub use error::{Result, SendError, SyncError};
pub use config::Config;
pub use messenger_types::{FeedHealth, Message, SenderRole};
pub use view::{Backend, ConversationView};
