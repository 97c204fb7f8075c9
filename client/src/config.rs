use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::live::connection::{LiveSettings, MAX_OUTBOUND_QUEUE};

/// Top-level client configuration, loaded from refractor.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    pub api: ApiSection,
    pub live: LiveSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: String,
    /// Bearer token for the REST API. Empty means unauthenticated.
    pub token: String,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api/v1".into(),
            token: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LiveSection {
    pub url: String,
    pub heartbeat_interval_secs: u64,
    /// 0 disables liveness detection.
    pub liveness_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
    pub outbound_queue: usize,
}

impl Default for LiveSection {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3000/ws".into(),
            heartbeat_interval_secs: 40,
            liveness_timeout_secs: 120,
            reconnect_delay_secs: 5,
            outbound_queue: MAX_OUTBOUND_QUEUE,
        }
    }
}

impl ClientConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            Self::parse(&contents).with_context(|| format!("failed to parse config file {path}"))?
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("REFRACTOR_API_URL") {
            self.api.base_url = v;
        }
        if let Ok(v) = std::env::var("REFRACTOR_API_TOKEN") {
            self.api.token = v;
        }
        if let Ok(v) = std::env::var("REFRACTOR_WS_URL") {
            self.live.url = v;
        }
        if let Ok(v) = std::env::var("REFRACTOR_HEARTBEAT_SECS")
            && let Ok(secs) = v.parse()
        {
            self.live.heartbeat_interval_secs = secs;
        }
        if let Ok(v) = std::env::var("REFRACTOR_LIVENESS_SECS")
            && let Ok(secs) = v.parse()
        {
            self.live.liveness_timeout_secs = secs;
        }
        if let Ok(v) = std::env::var("REFRACTOR_RECONNECT_SECS")
            && let Ok(secs) = v.parse()
        {
            self.live.reconnect_delay_secs = secs;
        }
    }

    pub fn api_token(&self) -> Option<String> {
        Some(self.api.token.clone()).filter(|t| !t.is_empty())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.live.reconnect_delay_secs)
    }

    /// Convert into the settings the live connection runs with.
    pub fn to_live_settings(&self) -> LiveSettings {
        LiveSettings {
            url: self.live.url.clone(),
            // A zero period would make tokio's interval panic
            heartbeat_interval: Duration::from_secs(self.live.heartbeat_interval_secs.max(1)),
            liveness_timeout: match self.live.liveness_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            outbound_queue: self.live.outbound_queue.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests that modify environment variables must be serialized to avoid races.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const KEYS: [&str; 6] = [
        "REFRACTOR_API_URL",
        "REFRACTOR_API_TOKEN",
        "REFRACTOR_WS_URL",
        "REFRACTOR_HEARTBEAT_SECS",
        "REFRACTOR_LIVENESS_SECS",
        "REFRACTOR_RECONNECT_SECS",
    ];

    /// Helper: clear all client env vars, set specific ones, run `f`, restore.
    fn with_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _lock = ENV_LOCK.lock().unwrap();

        let originals: Vec<_> = KEYS.iter().map(|k| (*k, std::env::var(k).ok())).collect();

        for key in &KEYS {
            // SAFETY: tests touching env are serialized by ENV_LOCK
            unsafe {
                std::env::remove_var(key);
            }
        }
        for (k, v) in vars {
            // SAFETY: tests touching env are serialized by ENV_LOCK
            unsafe {
                std::env::set_var(k, v);
            }
        }

        f();

        for (k, v) in originals {
            match v {
                // SAFETY: tests touching env are serialized by ENV_LOCK
                Some(val) => unsafe { std::env::set_var(k, val) },
                None => unsafe { std::env::remove_var(k) },
            }
        }
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.api.base_url, "http://localhost:3000/api/v1");
        assert_eq!(config.live.url, "ws://localhost:3000/ws");
        assert_eq!(config.live.heartbeat_interval_secs, 40);
        assert!(config.api_token().is_none());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        with_env(&[], || {
            let config = ClientConfig::load("/nonexistent/refractor.toml").unwrap();
            assert_eq!(config.live.liveness_timeout_secs, 120);
            assert_eq!(config.live.reconnect_delay_secs, 5);
        });
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = ClientConfig::parse(
            r#"
            [live]
            url = "wss://refractor.example.com/ws"
            liveness_timeout_secs = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.live.url, "wss://refractor.example.com/ws");
        assert_eq!(config.live.heartbeat_interval_secs, 40);
        assert_eq!(config.api.base_url, "http://localhost:3000/api/v1");

        let settings = config.to_live_settings();
        assert_eq!(settings.liveness_timeout, None);
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(40));
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(ClientConfig::parse("[live\nurl = 3").is_err());
        assert!(ClientConfig::parse("[live]\nheartbeat_interval_secs = \"soon\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        with_env(
            &[
                ("REFRACTOR_API_URL", "https://refractor.example.com/api/v1"),
                ("REFRACTOR_API_TOKEN", "secret"),
                ("REFRACTOR_WS_URL", "wss://refractor.example.com/ws"),
                ("REFRACTOR_HEARTBEAT_SECS", "10"),
                ("REFRACTOR_LIVENESS_SECS", "30"),
                ("REFRACTOR_RECONNECT_SECS", "2"),
            ],
            || {
                let mut config = ClientConfig::default();
                config.apply_env_overrides();
                assert_eq!(config.api.base_url, "https://refractor.example.com/api/v1");
                assert_eq!(config.api_token().as_deref(), Some("secret"));

                let settings = config.to_live_settings();
                assert_eq!(settings.url, "wss://refractor.example.com/ws");
                assert_eq!(settings.heartbeat_interval, Duration::from_secs(10));
                assert_eq!(settings.liveness_timeout, Some(Duration::from_secs(30)));
                assert_eq!(config.reconnect_delay(), Duration::from_secs(2));
            },
        );
    }

    #[test]
    fn test_unparsable_env_numbers_are_ignored() {
        with_env(&[("REFRACTOR_HEARTBEAT_SECS", "forty")], || {
            let mut config = ClientConfig::default();
            config.apply_env_overrides();
            assert_eq!(config.live.heartbeat_interval_secs, 40);
        });
    }

    #[test]
    fn test_zero_heartbeat_is_clamped() {
        let mut config = ClientConfig::default();
        config.live.heartbeat_interval_secs = 0;
        assert_eq!(
            config.to_live_settings().heartbeat_interval,
            Duration::from_secs(1)
        );
    }
}
