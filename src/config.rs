//! Environment-driven configuration.

use std::time::Duration;

use crate::socket;

const DEFAULT_WS_URL: &str = "ws://localhost:8001/ws";
const DEFAULT_ANALYSIS_URL: &str = "http://localhost:8000";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime configuration for the client.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// WebSocket endpoint of the debate backend.
    pub ws_url: String,
    /// Base URL of the thumbnail analyzer service.
    pub analysis_url: String,
    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Timeout for analyzer HTTP calls.
    pub http_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            analysis_url: DEFAULT_ANALYSIS_URL.to_string(),
            reconnect_delay: socket::RECONNECT_DELAY,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to the
    /// development defaults for anything unset or blank.
    pub fn from_env() -> Self {
        let ws_url = trimmed_var("MAGI_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_string());

        let analysis_url =
            trimmed_var("MAGI_ANALYSIS_URL").unwrap_or_else(|| DEFAULT_ANALYSIS_URL.to_string());

        let reconnect_delay = trimmed_var("MAGI_RECONNECT_SECS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(socket::RECONNECT_DELAY);

        let http_timeout = trimmed_var("MAGI_HTTP_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT);

        Self {
            ws_url,
            analysis_url,
            reconnect_delay,
            http_timeout,
        }
    }
}

fn trimmed_var(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for name in [
            "MAGI_WS_URL",
            "MAGI_ANALYSIS_URL",
            "MAGI_RECONNECT_SECS",
            "MAGI_HTTP_TIMEOUT_SECS",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        clear_env();
        let config = AppConfig::from_env();
        assert_eq!(config.ws_url, DEFAULT_WS_URL);
        assert_eq!(config.analysis_url, DEFAULT_ANALYSIS_URL);
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.http_timeout, DEFAULT_HTTP_TIMEOUT);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("MAGI_WS_URL", "ws://example.com/ws");
        std::env::set_var("MAGI_RECONNECT_SECS", "7");
        let config = AppConfig::from_env();
        assert_eq!(config.ws_url, "ws://example.com/ws");
        assert_eq!(config.reconnect_delay, Duration::from_secs(7));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_blank_and_invalid_values_fall_back() {
        clear_env();
        std::env::set_var("MAGI_WS_URL", "   ");
        std::env::set_var("MAGI_RECONNECT_SECS", "not-a-number");
        let config = AppConfig::from_env();
        assert_eq!(config.ws_url, DEFAULT_WS_URL);
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        clear_env();
    }
}
