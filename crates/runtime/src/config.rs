use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_APP_ROOT: &str = "app";
const DEFAULT_INPUT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_STALENESS_WINDOW_MS: u64 = 1_500;

/// Knobs of the reactive core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// `id` of the element route partials are injected into
    pub app_root: String,

    /// Delay coalescing `@input` calls while the realtime channel is down
    pub input_debounce_ms: u64,

    /// How long a user edit protects its field from being blanked by the server
    pub staleness_window_ms: u64,

    /// Queue a toast notification when an RPC fails
    pub toast_on_error: bool,

    /// Class added to controls that failed server-side validation
    pub invalid_class: String,

    /// Class of the inline message element inserted after an invalid control
    pub error_class: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            app_root: DEFAULT_APP_ROOT.to_string(),
            input_debounce_ms: DEFAULT_INPUT_DEBOUNCE_MS,
            staleness_window_ms: DEFAULT_STALENESS_WINDOW_MS,
            toast_on_error: true,
            invalid_class: "jrx-invalid".to_string(),
            error_class: "jrx-error".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Config for headless rendering: no debounce, no toasts.
    pub fn for_headless() -> Self {
        Self {
            input_debounce_ms: 0,
            toast_on_error: false,
            ..Default::default()
        }
    }

    /// Defaults overridden by `JRX_APP_ROOT`, `JRX_DEBOUNCE_MS`, `JRX_STALENESS_MS`
    /// and `JRX_TOAST` (`0`/`false` disables).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(root) = string_from_env("JRX_APP_ROOT") {
            config.app_root = root;
        }
        if let Some(ms) = ms_from_env("JRX_DEBOUNCE_MS") {
            config.input_debounce_ms = ms;
        }
        if let Some(ms) = ms_from_env("JRX_STALENESS_MS") {
            config.staleness_window_ms = ms;
        }
        if let Some(flag) = string_from_env("JRX_TOAST") {
            config.toast_on_error = !matches!(flag.as_str(), "0" | "false" | "off" | "no");
        }
        config
    }

    pub fn input_debounce(&self) -> Duration {
        Duration::from_millis(self.input_debounce_ms)
    }

    pub fn staleness_window(&self) -> Duration {
        Duration::from_millis(self.staleness_window_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.app_root.trim().is_empty() {
            return Err("app_root must not be empty".to_string());
        }
        if self.app_root.chars().any(char::is_whitespace) {
            return Err(format!("app_root ({:?}) must be a single id", self.app_root));
        }
        if self.input_debounce_ms > 10_000 {
            return Err(format!(
                "input_debounce_ms ({}) cannot exceed 10000",
                self.input_debounce_ms
            ));
        }
        if self.invalid_class.trim().is_empty() || self.error_class.trim().is_empty() {
            return Err("validation classes must not be empty".to_string());
        }
        Ok(())
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

    #[test]
    fn default_config_is_valid() {
        assert!(RuntimeConfig::default().validate().is_ok());
        assert!(RuntimeConfig::for_headless().validate().is_ok());
    }

    #[test]
    fn rejects_blank_app_root() {
        let config = RuntimeConfig {
            app_root: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_input_keeps_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"input_debounce_ms": 50}"#).unwrap();
        assert_eq!(config.input_debounce_ms, 50);
        assert_eq!(config.app_root, DEFAULT_APP_ROOT);
    }
}
