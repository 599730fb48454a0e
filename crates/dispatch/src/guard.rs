//! Winner hand-off guard
//!
//! The status stream is at-least-once: the same `started` notification can
//! arrive more than once. The guard makes the hand-off (one opening message,
//! one connected transition) idempotent per dispatch attempt. A guard lives
//! exactly as long as its attempt; a new attempt always gets a fresh one.

use std::collections::HashSet;
use std::sync::Arc;

use supportchat_shared::{Chat, ChatId, DispatchRequest, NewMessage};
use tracing::{debug, info, warn};

use crate::backend::ChatBackend;

/// Idempotent winner hand-off for one dispatch attempt
pub struct OutcomeGuard {
    backend: Arc<dyn ChatBackend>,
    request: DispatchRequest,
    processed: HashSet<ChatId>,
    winner: Option<Chat>,
}

impl OutcomeGuard {
    pub fn new(backend: Arc<dyn ChatBackend>, request: DispatchRequest) -> Self {
        Self {
            backend,
            request,
            processed: HashSet::new(),
            winner: None,
        }
    }

    /// Commit `chat` as the winner.
    ///
    /// Returns `true` only for the call that performed the hand-off. Repeated
    /// calls for the same chat, and calls for any other chat once a winner is
    /// recorded, are no-ops.
    pub async fn on_winner(&mut self, chat: &Chat) -> bool {
        if !self.processed.insert(chat.id.clone()) {
            debug!(chat_id = %chat.id, "Duplicate winner notification ignored");
            return false;
        }

        if let Some(winner) = &self.winner {
            debug!(
                chat_id = %chat.id,
                winner = %winner.id,
                "Winner already committed - ignoring late acceptance"
            );
            return false;
        }

        self.winner = Some(chat.clone());

        let message = NewMessage {
            text: self.request.headline.clone(),
            author: self.request.customer_name.clone(),
            chat_id: chat.id.clone(),
        };

        // The customer is connected even if the opening message is lost
        if let Err(e) = self.backend.create_message(&message).await {
            warn!(chat_id = %chat.id, error = %e, "Failed to create opening message");
        }

        info!(
            chat_id = %chat.id,
            contract_id = %chat.contract_id,
            key = %self.request.idempotency_key,
            "Chat connected"
        );
        true
    }

    #[cfg(test)]
    fn winner(&self) -> Option<&Chat> {
        self.winner.as_ref()
    }
}
