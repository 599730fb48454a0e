//! Dispatch engine configuration

use std::env;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

/// Default authoritative time endpoint (worldtimeapi-compatible JSON)
const DEFAULT_TIME_URL: &str = "https://worldtimeapi.org/api/timezone/Etc/UTC";

/// Default visitor IP lookup endpoint (ipify-compatible JSON)
const DEFAULT_IP_URL: &str = "https://api.ipify.org?format=json";

/// What to do when no active contract is scheduled for the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFallback {
    /// Use every active contract regardless of shift (availability first)
    AllActive,
    /// Only contracts of the current session are eligible
    Strict,
}

impl FromStr for SessionFallback {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all_active" | "all-active" => Ok(SessionFallback::AllActive),
            "strict" => Ok(SessionFallback::Strict),
            _ => Err(ConfigError::Invalid(
                "SUPPORTCHAT_SESSION_FALLBACK",
                "expected `all_active` or `strict`",
            )),
        }
    }
}

/// Dispatch configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    // Backend
    pub graphql_url: Url,
    pub graphql_ws_url: Url,
    pub api_token: Option<String>,
    pub request_timeout: Duration,

    // Best-effort lookups
    pub time_url: String,
    pub time_timeout: Duration,
    pub ip_url: String,
    pub ip_timeout: Duration,

    // Race
    pub global_timeout: Duration,
    pub connection_grace: Duration,
    pub resubscribe_base_delay: Duration,
    pub resubscribe_max_delay: Duration,

    // Creation
    pub create_retries: usize,

    // Policy
    pub session_fallback: SessionFallback,
    pub auto_retry: bool,
    pub auto_retry_delay: Duration,
}

impl DispatchConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let graphql_url = env::var("SUPPORTCHAT_GRAPHQL_URL")
            .map_err(|_| ConfigError::Missing("SUPPORTCHAT_GRAPHQL_URL"))?;
        let graphql_url = Url::parse(&graphql_url)
            .map_err(|_| ConfigError::Invalid("SUPPORTCHAT_GRAPHQL_URL", "not a valid URL"))?;

        let graphql_ws_url = match env::var("SUPPORTCHAT_GRAPHQL_WS_URL") {
            Ok(raw) => Url::parse(&raw).map_err(|_| {
                ConfigError::Invalid("SUPPORTCHAT_GRAPHQL_WS_URL", "not a valid URL")
            })?,
            Err(_) => derive_ws_url(&graphql_url)?,
        };

        let session_fallback = match env::var("SUPPORTCHAT_SESSION_FALLBACK") {
            Ok(raw) => raw.parse()?,
            Err(_) => SessionFallback::AllActive,
        };

        Ok(Self {
            graphql_url,
            graphql_ws_url,
            api_token: env::var("SUPPORTCHAT_API_TOKEN")
                .ok()
                .filter(|token| !token.is_empty()),
            request_timeout: Duration::from_millis(env_u64("SUPPORTCHAT_REQUEST_TIMEOUT_MS", 15_000)),

            time_url: env::var("SUPPORTCHAT_TIME_URL")
                .unwrap_or_else(|_| DEFAULT_TIME_URL.to_string()),
            time_timeout: Duration::from_millis(env_u64("SUPPORTCHAT_TIME_TIMEOUT_MS", 3_000)),
            ip_url: env::var("SUPPORTCHAT_IP_URL").unwrap_or_else(|_| DEFAULT_IP_URL.to_string()),
            ip_timeout: Duration::from_millis(env_u64("SUPPORTCHAT_IP_TIMEOUT_MS", 2_000)),

            global_timeout: Duration::from_secs(env_u64("SUPPORTCHAT_GLOBAL_TIMEOUT_SECS", 180)),
            connection_grace: Duration::from_secs(env_u64("SUPPORTCHAT_CONNECTION_GRACE_SECS", 10)),
            resubscribe_base_delay: Duration::from_millis(env_u64(
                "SUPPORTCHAT_RESUBSCRIBE_BASE_MS",
                250,
            )),
            resubscribe_max_delay: Duration::from_millis(env_u64(
                "SUPPORTCHAT_RESUBSCRIBE_MAX_MS",
                5_000,
            )),

            create_retries: env_u64("SUPPORTCHAT_CREATE_RETRIES", 2) as usize,

            session_fallback,
            auto_retry: env::var("SUPPORTCHAT_AUTO_RETRY")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            auto_retry_delay: Duration::from_millis(env_u64(
                "SUPPORTCHAT_AUTO_RETRY_DELAY_MS",
                2_000,
            )),
        })
    }
}

impl Default for DispatchConfig {
    #[allow(clippy::expect_used)] // Static URLs are known to parse
    fn default() -> Self {
        Self {
            graphql_url: Url::parse("http://localhost:4000/graphql").expect("static URL"),
            graphql_ws_url: Url::parse("ws://localhost:4000/graphql").expect("static URL"),
            api_token: None,
            request_timeout: Duration::from_secs(15),
            time_url: DEFAULT_TIME_URL.to_string(),
            time_timeout: Duration::from_secs(3),
            ip_url: DEFAULT_IP_URL.to_string(),
            ip_timeout: Duration::from_secs(2),
            global_timeout: Duration::from_secs(180),
            connection_grace: Duration::from_secs(10),
            resubscribe_base_delay: Duration::from_millis(250),
            resubscribe_max_delay: Duration::from_secs(5),
            create_retries: 2,
            session_fallback: SessionFallback::AllActive,
            auto_retry: true,
            auto_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Parse a numeric variable, falling back to the default when unset or invalid
fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

/// `http(s)://host/graphql` -> `ws(s)://host/graphql`
fn derive_ws_url(http_url: &Url) -> Result<Url, ConfigError> {
    let scheme = match http_url.scheme() {
        "https" => "wss",
        "http" => "ws",
        "ws" | "wss" => return Ok(http_url.clone()),
        _ => {
            return Err(ConfigError::Invalid(
                "SUPPORTCHAT_GRAPHQL_URL",
                "scheme must be http or https",
            ))
        }
    };

    let mut ws_url = http_url.clone();
    ws_url.set_scheme(scheme).map_err(|_| {
        ConfigError::Invalid("SUPPORTCHAT_GRAPHQL_URL", "cannot derive websocket URL")
    })?;
    Ok(ws_url)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "SUPPORTCHAT_GRAPHQL_URL",
        "SUPPORTCHAT_GRAPHQL_WS_URL",
        "SUPPORTCHAT_API_TOKEN",
        "SUPPORTCHAT_GLOBAL_TIMEOUT_SECS",
        "SUPPORTCHAT_SESSION_FALLBACK",
        "SUPPORTCHAT_AUTO_RETRY",
    ];

    fn cleanup_config() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_missing_graphql_url() {
        cleanup_config();
        match DispatchConfig::from_env() {
            Err(ConfigError::Missing("SUPPORTCHAT_GRAPHQL_URL")) => {}
            other => panic!("Expected Missing error, got: {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_defaults_and_derived_ws_url() {
        cleanup_config();
        env::set_var("SUPPORTCHAT_GRAPHQL_URL", "https://chat.example.com/graphql");

        let config = DispatchConfig::from_env().unwrap();
        assert_eq!(config.graphql_ws_url.as_str(), "wss://chat.example.com/graphql");
        assert_eq!(config.global_timeout, Duration::from_secs(180));
        assert_eq!(config.session_fallback, SessionFallback::AllActive);
        assert!(config.auto_retry);
        assert!(config.api_token.is_none());

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_overrides_and_invalid_numbers() {
        cleanup_config();
        env::set_var("SUPPORTCHAT_GRAPHQL_URL", "http://localhost:4000/graphql");
        env::set_var("SUPPORTCHAT_GLOBAL_TIMEOUT_SECS", "not-a-number");
        env::set_var("SUPPORTCHAT_SESSION_FALLBACK", "strict");
        env::set_var("SUPPORTCHAT_AUTO_RETRY", "false");
        env::set_var("SUPPORTCHAT_API_TOKEN", "secret-token");

        let config = DispatchConfig::from_env().unwrap();
        assert_eq!(config.graphql_ws_url.as_str(), "ws://localhost:4000/graphql");
        assert_eq!(config.global_timeout, Duration::from_secs(180));
        assert_eq!(config.session_fallback, SessionFallback::Strict);
        assert!(!config.auto_retry);
        assert_eq!(config.api_token.as_deref(), Some("secret-token"));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_unknown_fallback_policy_rejected() {
        cleanup_config();
        env::set_var("SUPPORTCHAT_GRAPHQL_URL", "http://localhost:4000/graphql");
        env::set_var("SUPPORTCHAT_SESSION_FALLBACK", "sometimes");

        assert!(matches!(
            DispatchConfig::from_env(),
            Err(ConfigError::Invalid("SUPPORTCHAT_SESSION_FALLBACK", _))
        ));

        cleanup_config();
    }
}
