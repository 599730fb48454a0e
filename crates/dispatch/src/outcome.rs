//! Terminal states of a dispatch attempt

use std::fmt;

use serde::Serialize;
use supportchat_shared::{Chat, Contract, ErrorKind};

/// The chat handed to the rest of the application after a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveChat {
    pub chat: Chat,
    pub contract: Contract,
}

/// How a dispatch attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// An agent accepted; the chat is now the active chat
    Connected(ActiveChat),
    /// No contract is on duty
    Unavailable,
    /// Every chat was missed, or nobody accepted before the global ceiling
    TimedOut,
    /// Cancelled by the visitor, or superseded by a newer attempt
    Aborted,
    Error(ErrorKind),
}

impl Outcome {
    /// The failure category shown to the visitor, if any
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Connected(_) | Outcome::Aborted => None,
            Outcome::Unavailable => Some(ErrorKind::NoAgents),
            Outcome::TimedOut => Some(ErrorKind::Timeout),
            Outcome::Error(kind) => Some(*kind),
        }
    }

    pub fn user_message(&self) -> Option<&'static str> {
        self.error_kind().map(|kind| kind.user_message())
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Outcome::Connected(_))
    }

    pub fn active_chat(&self) -> Option<&ActiveChat> {
        match self {
            Outcome::Connected(active) => Some(active),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Connected(active) => write!(
                f,
                "connected to chat {} (contract {})",
                active.chat.id, active.contract.id
            ),
            Outcome::Unavailable => f.write_str("unavailable"),
            Outcome::TimedOut => f.write_str("timed out"),
            Outcome::Aborted => f.write_str("aborted"),
            Outcome::Error(kind) => write!(f, "error {}", kind.as_str()),
        }
    }
}
