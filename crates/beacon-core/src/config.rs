use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(
        default,
        rename = "server-url",
        alias = "server_url",
        skip_serializing_if = "Option::is_none"
    )]
    pub server_url: Option<String>,

    #[serde(default, rename = "log_level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    #[serde(
        default,
        rename = "request-timeout-secs",
        alias = "request_timeout_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub request_timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling: Option<PollingConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<UiConfig>,

    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, toml::Value>,
}

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8600";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Configuration for the background run poller.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PollingConfig {
    /// Run poll interval in milliseconds (default: 3000)
    #[serde(
        default = "PollingConfig::default_interval_ms",
        rename = "interval-ms",
        alias = "interval_ms"
    )]
    pub interval_ms: u64,
}

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;

impl PollingConfig {
    fn default_interval_ms() -> u64 {
        DEFAULT_POLL_INTERVAL_MS
    }

    pub fn effective_interval_ms(&self) -> u64 {
        if self.interval_ms == 0 {
            DEFAULT_POLL_INTERVAL_MS
        } else {
            self.interval_ms
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UiConfig {
    #[serde(
        default,
        rename = "models-page-size",
        alias = "models_page_size",
        skip_serializing_if = "Option::is_none"
    )]
    pub models_page_size: Option<usize>,

    #[serde(
        default,
        rename = "confirm-timeout-ms",
        alias = "confirm_timeout_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub confirm_timeout_ms: Option<u64>,
}

pub const DEFAULT_MODELS_PAGE_SIZE: usize = 15;
pub const DEFAULT_CONFIRM_TIMEOUT_MS: u64 = 3_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("server-url must start with http:// or https://: {value}")]
    InvalidServerUrl { value: String },
    #[error("{key} must be > 0")]
    NotPositive { key: &'static str },
}

impl ConfigFile {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Missing file is not an error; defaults apply.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::parse(&raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = self.server_url.as_deref() {
            let url = url.trim();
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidServerUrl {
                    value: url.to_owned(),
                });
            }
        }
        if self.request_timeout_secs == Some(0) {
            return Err(ConfigError::NotPositive {
                key: "request-timeout-secs",
            });
        }
        if let Some(ui) = &self.ui {
            if ui.models_page_size == Some(0) {
                return Err(ConfigError::NotPositive {
                    key: "ui.models-page-size",
                });
            }
        }
        Ok(())
    }

    pub fn effective_server_url(&self) -> &str {
        self.server_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SERVER_URL)
    }

    pub fn effective_request_timeout_secs(&self) -> u64 {
        self.request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
    }

    /// Returns the effective polling config, using defaults if not specified.
    pub fn effective_polling(&self) -> PollingConfig {
        self.polling.clone().unwrap_or(PollingConfig {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
        })
    }

    pub fn effective_models_page_size(&self) -> usize {
        self.ui
            .as_ref()
            .and_then(|ui| ui.models_page_size)
            .unwrap_or(DEFAULT_MODELS_PAGE_SIZE)
    }

    pub fn effective_confirm_timeout_ms(&self) -> u64 {
        self.ui
            .as_ref()
            .and_then(|ui| ui.confirm_timeout_ms)
            .unwrap_or(DEFAULT_CONFIRM_TIMEOUT_MS)
    }
}
