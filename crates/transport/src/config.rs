use crate::session::Mode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

/// Channel used once the socket's reconnect budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    /// Server-sent event stream
    Push,
    /// Periodic GET of pending batches
    Polling,
}

impl FallbackMode {
    pub fn mode(self) -> Mode {
        match self {
            Self::Push => Mode::Push,
            Self::Polling => Mode::Polling,
        }
    }
}

impl std::str::FromStr for FallbackMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "push" | "sse" => Ok(Self::Push),
            "poll" | "polling" => Ok(Self::Polling),
            other => Err(format!("unknown fallback mode {other:?}")),
        }
    }
}

/// Endpoints and timing of the client's connection to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Origin every endpoint is resolved against
    pub base_url: String,

    pub socket_path: String,
    pub push_path: String,
    pub poll_path: String,
    pub set_path: String,
    pub call_prefix: String,

    /// Open the socket at all; when false the session starts on the fallback
    pub socket_enabled: bool,

    /// Socket reconnect attempts before degrading to the fallback
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,

    pub fallback: FallbackMode,
    pub poll_interval_ms: u64,

    /// How often a degraded session retries the socket in the background
    pub probe_interval_ms: u64,

    pub request_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            socket_path: "/ws".to_string(),
            push_path: "/jrx/sse".to_string(),
            poll_path: "/jrx/poll".to_string(),
            set_path: "/jrx/set".to_string(),
            call_prefix: "/call/".to_string(),
            socket_enabled: true,
            max_retries: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 10_000,
            fallback: FallbackMode::Push,
            poll_interval_ms: 1_500,
            probe_interval_ms: 15_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl TransportConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Defaults overridden by `JRX_SERVER`, `JRX_SOCKET` (`0` disables),
    /// `JRX_MAX_RETRIES`, `JRX_FALLBACK` (`push`/`polling`), `JRX_POLL_MS`
    /// and `JRX_PROBE_MS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(server) = string_from_env("JRX_SERVER") {
            config.base_url = server;
        }
        if let Some(flag) = string_from_env("JRX_SOCKET") {
            config.socket_enabled = !matches!(flag.as_str(), "0" | "false" | "off" | "no");
        }
        if let Some(retries) = string_from_env("JRX_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            config.max_retries = retries;
        }
        if let Some(fallback) = string_from_env("JRX_FALLBACK") {
            match fallback.parse() {
                Ok(mode) => config.fallback = mode,
                Err(e) => log::warn!("Ignoring JRX_FALLBACK: {e}"),
            }
        }
        if let Some(ms) = ms_from_env("JRX_POLL_MS") {
            config.poll_interval_ms = ms;
        }
        if let Some(ms) = ms_from_env("JRX_PROBE_MS") {
            config.probe_interval_ms = ms;
        }
        config
    }

    pub fn validate(&self) -> Result<(), String> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| format!("base_url ({:?}) is not a URL: {e}", self.base_url))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(format!("base_url must be http or https, got {}", base.scheme()));
        }
        for (name, path) in [
            ("socket_path", &self.socket_path),
            ("push_path", &self.push_path),
            ("poll_path", &self.poll_path),
            ("set_path", &self.set_path),
            ("call_prefix", &self.call_prefix),
        ] {
            if !path.starts_with('/') {
                return Err(format!("{name} ({path:?}) must start with '/'"));
            }
        }
        if self.backoff_base_ms == 0 || self.backoff_base_ms > self.backoff_max_ms {
            return Err(format!(
                "backoff_base_ms ({}) must be positive and at most backoff_max_ms ({})",
                self.backoff_base_ms, self.backoff_max_ms
            ));
        }
        if self.poll_interval_ms < 100 {
            return Err(format!(
                "poll_interval_ms ({}) must be at least 100",
                self.poll_interval_ms
            ));
        }
        if self.probe_interval_ms == 0 {
            return Err("probe_interval_ms must be positive".to_string());
        }
        Ok(())
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn base(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.base_url)
    }

    /// `ws(s)://host/ws?path=<route>`
    pub fn socket_url(&self, route: &str) -> Result<Url, url::ParseError> {
        let mut url = self.base()?.join(&self.socket_path)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http(s) -> ws(s) stays within the special schemes, so this cannot fail.
        let _ = url.set_scheme(scheme);
        url.query_pairs_mut().append_pair("path", route);
        Ok(url)
    }

    pub fn push_url(&self, route: &str, since: u64) -> Result<Url, url::ParseError> {
        self.cursor_url(&self.push_path, route, since)
    }

    pub fn poll_url(&self, route: &str, since: u64) -> Result<Url, url::ParseError> {
        self.cursor_url(&self.poll_path, route, since)
    }

    fn cursor_url(&self, endpoint: &str, route: &str, since: u64) -> Result<Url, url::ParseError> {
        let mut url = self.base()?.join(endpoint)?;
        url.query_pairs_mut()
            .append_pair("path", route)
            .append_pair("since", &since.to_string());
        Ok(url)
    }

    pub fn set_url(&self, route: &str) -> Result<Url, url::ParseError> {
        let mut url = self.base()?.join(&self.set_path)?;
        url.query_pairs_mut().append_pair("path", route);
        Ok(url)
    }

    /// `POST /call/<qualified>` with the qualified name percent-encoded.
    pub fn call_url(&self, qualified: &str) -> Result<Url, url::ParseError> {
        let mut url = self.base()?.join(&self.call_prefix)?;
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(qualified);
        }
        Ok(url)
    }

    pub fn partial_url(&self, route: &str) -> Result<Url, url::ParseError> {
        self.base()?.join(route)
    }
}

fn string_from_env(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn ms_from_env(var: &str) -> Option<u64> {
    string_from_env(var).and_then(|v| v.parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config_is_valid() {
        assert!(TransportConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        let config = TransportConfig::with_base_url("ftp://example.com");
        assert!(config.validate().is_err());

        let config = TransportConfig {
            backoff_base_ms: 20_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TransportConfig {
            set_path: "jrx/set".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn endpoint_urls() {
        let config = TransportConfig::with_base_url("https://shop.test");
        assert_eq!(
            config.socket_url("/cart").unwrap().as_str(),
            "wss://shop.test/ws?path=%2Fcart"
        );
        assert_eq!(
            config.poll_url("/cart", 7).unwrap().as_str(),
            "https://shop.test/jrx/poll?path=%2Fcart&since=7"
        );
        assert_eq!(
            config.call_url("Cart#1.add").unwrap().as_str(),
            "https://shop.test/call/Cart%231.add"
        );
        assert_eq!(
            config.partial_url("/orders?page=2").unwrap().as_str(),
            "https://shop.test/orders?page=2"
        );
    }

    #[test]
    fn fallback_names() {
        assert_eq!("SSE".parse::<FallbackMode>(), Ok(FallbackMode::Push));
        assert_eq!("polling".parse::<FallbackMode>(), Ok(FallbackMode::Polling));
        assert!("carrier-pigeon".parse::<FallbackMode>().is_err());
    }

    #[test]
    fn partial_input_keeps_defaults() {
        let config: TransportConfig =
            serde_json::from_str(r#"{"fallback": "polling", "max_retries": 2}"#).unwrap();
        assert_eq!(config.fallback, FallbackMode::Polling);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.socket_path, "/ws");
    }
}
