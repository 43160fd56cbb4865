/// Messaging gate: decides once per open whether the local user may write
use crate::error::Result;
use crate::messenger_types::Conversation;
use async_trait::async_trait;

#[async_trait]
pub trait MessagingGate: Send + Sync {
    async fn is_unlocked(&self, conversation: &Conversation) -> Result<bool>;
}

/// Gate with a fixed answer
#[derive(Debug, Clone, Copy)]
pub struct StaticGate(pub bool);

impl StaticGate {
    pub fn unlocked() -> Self {
        StaticGate(true)
    }

    pub fn locked() -> Self {
        StaticGate(false)
    }
}

#[async_trait]
impl MessagingGate for StaticGate {
    async fn is_unlocked(&self, _conversation: &Conversation) -> Result<bool> {
        Ok(self.0)
    }
}
