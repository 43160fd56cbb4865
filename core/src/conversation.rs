/// Lazy, idempotent conversation creation
use crate::error::{Result, SyncError};
use crate::message_store::MessageStore;
use crate::messenger_types::{Conversation, ConversationRequest};
use tracing::{debug, info};

/// Find the conversation for (quote request, mover), creating it if missing.
/// Losing a creation race to the other participant resolves to their row.
pub async fn get_or_create_conversation(
    store: &dyn MessageStore,
    request: &ConversationRequest,
) -> Result<Conversation> {
    if let Some(existing) = store
        .find_conversation(&request.quote_request_id, &request.mover_id)
        .await?
    {
        return Ok(existing);
    }

    match store.create_conversation(request).await {
        Ok(created) => {
            info!(
                "Created conversation {} for request {}",
                created.id, request.quote_request_id
            );
            Ok(created)
        }
        Err(SyncError::Conflict(reason)) => {
            debug!("Creation conflict ({}), refetching", reason);
            store
                .find_conversation(&request.quote_request_id, &request.mover_id)
                .await?
                .ok_or_else(|| {
                    SyncError::NotFound(format!(
                        "conversation for request {} and mover {}",
                        request.quote_request_id, request.mover_id
                    ))
                })
        }
        Err(e) => Err(e),
    }
}
