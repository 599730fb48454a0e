//! Chat backend collaborators
//!
//! The dispatch engine talks to the support backend through the
//! [`ChatBackend`] trait. Two implementations ship with the crate:
//!
//! - **GraphQL**: `graphql::GraphqlBackend` issues queries and mutations over
//!   HTTP and opens one `graphql-transport-ws` socket per status subscription
//! - **Memory**: `memory::InMemoryBackend` is scriptable and records every
//!   call, for tests and local development

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use supportchat_shared::{Chat, ChatId, ChatStatusUpdate, ContractRecord, NewChat, NewMessage};

use crate::error::BackendResult;

pub mod graphql;
pub mod memory;
pub mod protocol;
pub mod subscription;

pub use graphql::GraphqlBackend;
pub use memory::InMemoryBackend;

/// Live stream of status notifications for one chat. Dropping it closes the subscription.
pub type StatusStream = Pin<Box<dyn Stream<Item = BackendResult<ChatStatusUpdate>> + Send>>;

/// Remote operations consumed by the dispatch engine
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    /// Fetch the full contract fleet (validated by the selector, not here)
    async fn fetch_contracts(&self) -> BackendResult<Vec<ContractRecord>>;

    /// Create one chat for one contract
    async fn create_chat(&self, new_chat: &NewChat) -> BackendResult<Chat>;

    /// Open a status subscription for one chat
    async fn subscribe_chat_status(&self, chat_id: &ChatId) -> BackendResult<StatusStream>;

    /// Flag a chat whose contract did not answer in time
    async fn mark_chat_missed(&self, chat_id: &ChatId) -> BackendResult<()>;

    /// Post a message into a chat
    async fn create_message(&self, message: &NewMessage) -> BackendResult<()>;
}
