//! Dispatch engine error types

use supportchat_shared::ChatId;

/// Error type for backend operations (GraphQL over HTTP and WebSocket)
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("GraphQL error: {}", .0.join("; "))]
    GraphQl(Vec<String>),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Subscription closed by server")]
    Closed,
}

impl BackendError {
    /// Returns true if this error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            // Retry network-related errors and timeouts
            BackendError::Network(_) => true,
            BackendError::Timeout => true,
            BackendError::Closed => true,
            BackendError::Http { status, .. } => *status >= 500,

            // Don't retry permanent errors
            BackendError::GraphQl(_) => false,
            BackendError::Unauthorized(_) => false,
            BackendError::Decode(_) => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        match self {
            BackendError::Unauthorized(_) => true,
            BackendError::Http { status, .. } => *status == 401 || *status == 403,
            BackendError::GraphQl(messages) => messages.iter().any(|m| has_auth_marker(m)),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            BackendError::Http {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            BackendError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Decode(err.to_string())
    }
}

/// Case-insensitive check for an authorization marker in an error payload
pub(crate) fn has_auth_marker(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("unauthorized")
        || lower.contains("unauthorised")
        || lower.contains("not authorized")
        || lower.contains("authorization")
        || lower.contains("unauthenticated")
}

/// Failures that end a dispatch attempt
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("No eligible contracts for the current session")]
    NoEligibleContracts,

    #[error("Every chat creation call failed ({attempted} attempted)")]
    AllCreationsFailed { attempted: usize },

    #[error("Status subscription for chat {chat_id} lost: {source}")]
    SubscriptionLost {
        chat_id: ChatId,
        #[source]
        source: BackendError,
    },
}

/// Result type alias for backend calls
pub type BackendResult<T> = Result<T, BackendError>;
