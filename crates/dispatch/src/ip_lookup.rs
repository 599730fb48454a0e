//! Best-effort visitor IP lookup

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{BackendError, BackendResult};

/// Resolves the visitor's public IP address
#[async_trait]
pub trait IpLookup: Send + Sync {
    async fn public_ip(&self) -> BackendResult<String>;
}

/// Never resolves an address
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIpLookup;

#[async_trait]
impl IpLookup for NoIpLookup {
    async fn public_ip(&self) -> BackendResult<String> {
        Err(BackendError::Network("ip lookup disabled".to_string()))
    }
}

/// ipify-compatible HTTP lookup (`{"ip": "..."}`)
#[derive(Clone)]
pub struct HttpIpLookup {
    client: Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct IpResponse {
    ip: String,
}

impl HttpIpLookup {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl IpLookup for HttpIpLookup {
    async fn public_ip(&self) -> BackendResult<String> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Http {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: IpResponse = response.json().await?;
        let ip = body.ip.trim();
        if ip.is_empty() {
            return Err(BackendError::Decode("empty ip in lookup response".to_string()));
        }
        Ok(ip.to_string())
    }
}

/// Look up the visitor IP within `timeout`. Any failure yields `None`.
pub async fn lookup_ip(lookup: &Arc<dyn IpLookup>, timeout: Duration) -> Option<String> {
    match tokio::time::timeout(timeout, lookup.public_ip()).await {
        Ok(Ok(ip)) => Some(ip),
        Ok(Err(e)) => {
            debug!(error = %e, "IP lookup failed - continuing without address");
            None
        }
        Err(_) => {
            debug!(
                timeout_ms = timeout.as_millis() as u64,
                "IP lookup timed out - continuing without address"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowLookup;

    #[async_trait]
    impl IpLookup for SlowLookup {
        async fn public_ip(&self) -> BackendResult<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("198.51.100.1".to_string())
        }
    }

    #[tokio::test]
    async fn test_http_lookup_returns_ip() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/")
            .match_query(mockito::Matcher::UrlEncoded("format".into(), "json".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ip":"203.0.113.7"}"#)
            .create_async()
            .await;

        let lookup: Arc<dyn IpLookup> = Arc::new(HttpIpLookup::new(
            Client::new(),
            format!("{}/?format=json", server.url()),
        ));

        assert_eq!(
            lookup_ip(&lookup, Duration::from_secs(5)).await.as_deref(),
            Some("203.0.113.7")
        );
    }

    #[tokio::test]
    async fn test_http_failure_yields_none() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/")
            .with_status(503)
            .create_async()
            .await;

        let lookup: Arc<dyn IpLookup> = Arc::new(HttpIpLookup::new(Client::new(), server.url()));
        assert_eq!(lookup_ip(&lookup, Duration::from_secs(5)).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_lookup_times_out() {
        let lookup: Arc<dyn IpLookup> = Arc::new(SlowLookup);
        assert_eq!(lookup_ip(&lookup, Duration::from_millis(100)).await, None);
    }
}
