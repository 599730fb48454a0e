//! GraphQL envelopes and `graphql-transport-ws` message types
//!
//! Defines the request/response shapes and socket events with type-safe serde
//! serialization. Payloads are decoded once here; nothing past this module
//! sees untyped JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use supportchat_shared::{Chat, ChatStatusUpdate, ContractRecord};

use crate::error::{has_auth_marker, BackendError};

// =============================================================================
// Operations
// =============================================================================

pub const CONTRACTS_QUERY: &str = r#"
    query Contracts {
        contracts {
            id
            session
            status
            chatMissTime
        }
    }
"#;

pub const CREATE_CHAT_MUTATION: &str = r#"
    mutation CreateChat($customerName: String!, $headline: String!, $contractId: ID!, $ipAddress: String, $key: String!) {
        createChat(customerName: $customerName, headline: $headline, contractId: $contractId, ipAddress: $ipAddress, key: $key) {
            id
            key
            customerName
            headline
            ipAddress
            status
            contractId
        }
    }
"#;

pub const MARK_CHAT_MISSED_MUTATION: &str = r#"
    mutation MarkChatMissed($chatId: ID!) {
        markChatMissed(chatId: $chatId) {
            id
        }
    }
"#;

pub const CREATE_MESSAGE_MUTATION: &str = r#"
    mutation CreateMessage($text: String!, $author: String!, $chatId: ID!) {
        createMessage(text: $text, author: $author, chatId: $chatId) {
            id
        }
    }
"#;

pub const CHAT_STATUS_SUBSCRIPTION: &str = r#"
    subscription ChatStatus($chatId: ID!) {
        chatStatus(chatId: $chatId) {
            id
            status
        }
    }
"#;

// =============================================================================
// GraphQL Envelopes
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct GraphQlRequest<V: Serialize> {
    pub query: &'static str,
    pub variables: V,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    pub errors: Option<Vec<GraphQlErrorPayload>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraphQlErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQlErrorPayload {
    fn is_auth(&self) -> bool {
        if has_auth_marker(&self.message) {
            return true;
        }
        self.extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .and_then(Value::as_str)
            .is_some_and(has_auth_marker)
    }
}

/// Collapse a list of GraphQL errors into one backend error
pub fn errors_to_backend(errors: &[GraphQlErrorPayload]) -> BackendError {
    let messages: Vec<String> = errors.iter().map(|e| e.message.clone()).collect();
    if errors.iter().any(GraphQlErrorPayload::is_auth) {
        BackendError::Unauthorized(messages.join("; "))
    } else {
        BackendError::GraphQl(messages)
    }
}

impl<T> GraphQlResponse<T> {
    /// Unwrap `data`, turning any `errors` entry into a backend error
    pub fn into_data(self) -> Result<T, BackendError> {
        if let Some(errors) = self.errors.filter(|errors| !errors.is_empty()) {
            return Err(errors_to_backend(&errors));
        }
        self.data
            .ok_or_else(|| BackendError::Decode("response carried neither data nor errors".into()))
    }
}

#[derive(Debug, Deserialize)]
pub struct ContractsData {
    pub contracts: Vec<ContractRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatData {
    pub create_chat: Chat,
}

#[derive(Debug, Deserialize)]
pub struct ChatStatusData {
    #[serde(rename = "chatStatus")]
    pub chat_status: ChatStatusUpdate,
}

// =============================================================================
// graphql-transport-ws Events
// =============================================================================

/// Messages sent from client to server
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First message on every socket, carries credentials
    ConnectionInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },

    /// Start an operation
    Subscribe { id: String, payload: Value },

    /// Stop an operation
    Complete { id: String },

    /// Heartbeat response
    Pong,
}

/// Messages sent from server to client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection accepted
    ConnectionAck,

    /// One result of a running operation
    Next { id: String, payload: Value },

    /// Operation failed
    Error {
        id: String,
        payload: Vec<GraphQlErrorPayload>,
    },

    /// Operation finished on the server side
    Complete { id: String },

    /// Heartbeat request
    Ping,

    /// Heartbeat response
    Pong,
}

/// Decode the payload of a `next` message into a status update
pub fn decode_status_payload(payload: Value) -> Result<ChatStatusUpdate, BackendError> {
    let response: GraphQlResponse<ChatStatusData> = serde_json::from_value(payload)?;
    Ok(response.into_data()?.chat_status)
}
