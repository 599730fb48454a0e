//! Common types used across the support chat widget

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Contract ID wrapper (backend-assigned, opaque)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(pub String);

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContractId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Chat ID wrapper (backend-assigned, opaque)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub String);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Idempotency key shared by every chat born from one dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(pub Uuid);

impl IdempotencyKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IdempotencyKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Sessions
// =============================================================================

/// One of the three fixed 8-hour UTC shift buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Session {
    /// 00:00 - 07:59 UTC
    First,
    /// 08:00 - 15:59 UTC
    Second,
    /// 16:00 - 23:59 UTC
    Third,
}

impl Session {
    /// Map a UTC hour to its shift bucket. Out-of-range hours map to the first session.
    pub fn from_utc_hour(hour: u8) -> Self {
        match hour {
            0..=7 => Session::First,
            8..=15 => Session::Second,
            16..=23 => Session::Third,
            _ => Session::First,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Session::First => 1,
            Session::Second => 2,
            Session::Third => 3,
        }
    }
}

impl From<Session> for u8 {
    fn from(session: Session) -> Self {
        session.number()
    }
}

impl TryFrom<u8> for Session {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Session::First),
            2 => Ok(Session::Second),
            3 => Ok(Session::Third),
            other => Err(format!("invalid session number: {}", other)),
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

// =============================================================================
// Contracts
// =============================================================================

/// Contract record as delivered by the backend, before validation.
///
/// Every field is optional because the contract list is maintained outside
/// the widget and malformed entries must be dropped rather than rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub session: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub chat_miss_time: Option<Value>,
}

/// A validated, active agent/shift contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: ContractId,
    pub session: i64,
    /// Seconds before an unanswered chat is marked missed; 0 disables the timer
    pub chat_miss_time: u64,
}

impl Contract {
    pub fn new(id: impl Into<String>, session: i64, chat_miss_time: u64) -> Self {
        Self {
            id: ContractId(id.into()),
            session,
            chat_miss_time,
        }
    }

    /// Per-chat miss timeout, or `None` when the timer is disabled
    pub fn miss_timeout(&self) -> Option<Duration> {
        if self.chat_miss_time == 0 {
            None
        } else {
            Some(Duration::from_secs(self.chat_miss_time))
        }
    }

    pub fn is_scheduled_for(&self, session: Session) -> bool {
        self.session == i64::from(session.number())
    }
}

// =============================================================================
// Chats
// =============================================================================

/// Lifecycle status of a chat, decoded once at the network boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum ChatStatus {
    Pending,
    Started,
    Finished,
    Ended,
}

impl ChatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatStatus::Pending => "pending",
            ChatStatus::Started => "started",
            ChatStatus::Finished => "finished",
            ChatStatus::Ended => "ended",
        }
    }

    /// Finished and ended chats can no longer be accepted by an agent
    pub fn is_closed(&self) -> bool {
        matches!(self, ChatStatus::Finished | ChatStatus::Ended)
    }
}

impl FromStr for ChatStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ChatStatus::Pending),
            "started" => Ok(ChatStatus::Started),
            "finished" => Ok(ChatStatus::Finished),
            "ended" => Ok(ChatStatus::Ended),
            other => Err(format!("unknown chat status: {}", other)),
        }
    }
}

impl TryFrom<String> for ChatStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ChatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A created conversation attempt owned by one contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    pub key: IdempotencyKey,
    pub customer_name: String,
    pub headline: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub status: ChatStatus,
    pub contract_id: ContractId,
}

/// One notification from a chat status subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatStatusUpdate {
    pub id: ChatId,
    pub status: ChatStatus,
}

// =============================================================================
// Dispatch Requests
// =============================================================================

/// What the visitor typed into the chat form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorForm {
    pub customer_name: String,
    pub headline: String,
}

impl VisitorForm {
    pub fn new(customer_name: impl Into<String>, headline: impl Into<String>) -> Self {
        Self {
            customer_name: customer_name.into(),
            headline: headline.into(),
        }
    }
}

/// The visitor's intent for one dispatch attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub customer_name: String,
    pub headline: String,
    pub idempotency_key: IdempotencyKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl DispatchRequest {
    /// Build a request with a fresh idempotency key
    pub fn new(form: &VisitorForm, ip_address: Option<String>) -> Self {
        Self {
            customer_name: form.customer_name.clone(),
            headline: form.headline.clone(),
            idempotency_key: IdempotencyKey::new(),
            ip_address,
        }
    }
}

/// Arguments of one remote chat creation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChat {
    pub customer_name: String,
    pub headline: String,
    pub contract_id: ContractId,
    pub ip_address: Option<String>,
    pub key: IdempotencyKey,
}

impl NewChat {
    pub fn for_contract(request: &DispatchRequest, contract: &Contract) -> Self {
        Self {
            customer_name: request.customer_name.clone(),
            headline: request.headline.clone(),
            contract_id: contract.id.clone(),
            ip_address: request.ip_address.clone(),
            key: request.idempotency_key,
        }
    }
}

/// Arguments of one remote message creation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMessage {
    pub text: String,
    pub author: String,
    #[serde(rename = "chatId")]
    pub chat_id: ChatId,
}
