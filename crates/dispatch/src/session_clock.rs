//! Shift session clock
//!
//! Maps the current UTC time to one of the three 8-hour sessions. The hour
//! comes from an authoritative network time source when reachable and from
//! the local clock otherwise; a lookup failure is never propagated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use supportchat_shared::Session;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::{BackendError, BackendResult};

/// Source of the current UTC time
#[async_trait]
pub trait TimeSource: Send + Sync {
    async fn utc_now(&self) -> BackendResult<OffsetDateTime>;
}

/// The device clock
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTimeSource;

#[async_trait]
impl TimeSource for LocalTimeSource {
    async fn utc_now(&self) -> BackendResult<OffsetDateTime> {
        Ok(OffsetDateTime::now_utc())
    }
}

/// worldtimeapi-compatible HTTP time source
#[derive(Clone)]
pub struct HttpTimeSource {
    client: Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct TimeResponse {
    #[serde(default)]
    utc_datetime: Option<String>,
    #[serde(default)]
    unixtime: Option<i64>,
}

impl HttpTimeSource {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl TimeSource for HttpTimeSource {
    async fn utc_now(&self) -> BackendResult<OffsetDateTime> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Http {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: TimeResponse = response.json().await?;
        if let Some(raw) = body.utc_datetime {
            return OffsetDateTime::parse(&raw, &Rfc3339)
                .map_err(|e| BackendError::Decode(format!("invalid utc_datetime {}: {}", raw, e)));
        }
        if let Some(unix) = body.unixtime {
            return OffsetDateTime::from_unix_timestamp(unix)
                .map_err(|e| BackendError::Decode(format!("invalid unixtime {}: {}", unix, e)));
        }
        Err(BackendError::Decode(
            "time response carried neither utc_datetime nor unixtime".to_string(),
        ))
    }
}

/// Computes the current shift session
#[derive(Clone)]
pub struct SessionClock {
    source: Arc<dyn TimeSource>,
    timeout: Duration,
}

impl SessionClock {
    pub fn new(source: Arc<dyn TimeSource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    /// A clock that only consults the device clock
    pub fn local() -> Self {
        Self::new(Arc::new(LocalTimeSource), Duration::from_secs(1))
    }

    /// Current session. Falls back to the local clock on any lookup failure.
    pub async fn current_session(&self) -> Session {
        let now = match tokio::time::timeout(self.timeout, self.source.utc_now()).await {
            Ok(Ok(now)) => now,
            Ok(Err(e)) => {
                warn!(error = %e, "Time lookup failed - falling back to local clock");
                OffsetDateTime::now_utc()
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Time lookup timed out - falling back to local clock"
                );
                OffsetDateTime::now_utc()
            }
        };

        let session = session_at(now);
        debug!(hour = now.to_offset(time::UtcOffset::UTC).hour(), session = %session, "Resolved current session");
        session
    }
}

/// Session for an instant, evaluated in UTC
pub fn session_at(instant: OffsetDateTime) -> Session {
    Session::from_utc_hour(instant.to_offset(time::UtcOffset::UTC).hour())
}
