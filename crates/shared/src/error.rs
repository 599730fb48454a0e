//! Error taxonomy surfaced to the chat widget UI

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal failure kinds of a dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    #[error("No agents available")]
    NoAgents,
    #[error("Failed to start chat")]
    FailedToStart,
    #[error("Connection error")]
    ConnectionError,
    #[error("Authentication error")]
    AuthError,
    #[error("Timed out waiting for an agent")]
    Timeout,
    #[error("Unexpected error")]
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoAgents => "NO_AGENTS",
            Self::FailedToStart => "FAILED_TO_START",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::AuthError => "AUTH_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Unexpected => "UNEXPECTED",
        }
    }

    /// The single message shown above the form when an attempt fails
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NoAgents => {
                "No agents are available right now. Please try again in a few minutes."
            }
            Self::FailedToStart => "We couldn't start your chat. Please try again.",
            Self::ConnectionError => {
                "The connection was interrupted. Check your network and try again."
            }
            Self::AuthError => "Your session has expired. Please reload the page to continue.",
            Self::Timeout => "No agent picked up your chat in time. Please try again.",
            Self::Unexpected => "Something went wrong. Please try again.",
        }
    }

    /// Whether a manual retry from the form can succeed without re-authenticating
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::AuthError)
    }
}
