// ABOUTME: Gateway configuration: the on-disk JSON document and its defaults
// ABOUTME: Supports per-kind outbound sections plus the legacy flat layout

use crate::device::EventKind;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_RETRY_CEILING: u32 = 2;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 100;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 5_000;

/// Env var naming the config file. Missing file falls back to defaults.
pub const CONFIG_PATH_ENV: &str = "GATECAST_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "gatecast.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// How a pipeline picks destinations for each event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// Every destination receives every event.
    #[default]
    FanOut,
    /// Destinations take turns, one event each, in configuration order.
    RoundRobin,
}

impl SelectionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FanOut => "fan-out",
            Self::RoundRobin => "round-robin",
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery settings for one pipeline.
///
/// Every field has a default, so a section as small as
/// `{"destinations": ["http://sink:9000/events"]}` is complete.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliveryConfig {
    /// Outbound destination URLs, in configuration order.
    pub destinations: Vec<String>,
    pub policy: SelectionPolicy,
    /// Retries after the first attempt. Total attempts = retryCeiling + 1.
    pub retry_ceiling: u32,
    /// Queued events per delivery worker before submissions are shed.
    pub queue_capacity: usize,
    pub workers: usize,
    pub request_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            destinations: Vec::new(),
            policy: SelectionPolicy::default(),
            retry_ceiling: DEFAULT_RETRY_CEILING,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: DEFAULT_WORKERS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

/// The `outbound` section of the gateway config.
///
/// Two layouts are accepted. The current layout names one sub-section per
/// event kind, and only the named kinds get a pipeline. The legacy layout
/// puts a single set of delivery fields at the top level of the section,
/// which binds one pipeline to messageReceived and drops everything else.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutboundConfig {
    pub connect: Option<DeliveryConfig>,
    pub disconnect: Option<DeliveryConfig>,
    pub message_received: Option<DeliveryConfig>,
    /// Legacy flat fields, consulted only when no per-kind section is present.
    #[serde(flatten)]
    pub legacy: DeliveryConfig,
}

impl OutboundConfig {
    /// True when at least one per-kind section is present.
    pub fn has_kind_sections(&self) -> bool {
        self.connect.is_some() || self.disconnect.is_some() || self.message_received.is_some()
    }

    pub fn section(&self, kind: EventKind) -> Option<&DeliveryConfig> {
        match kind {
            EventKind::Connect => self.connect.as_ref(),
            EventKind::Disconnect => self.disconnect.as_ref(),
            EventKind::MessageReceived => self.message_received.as_ref(),
        }
    }
}

/// The whole on-disk gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub outbound: OutboundConfig,
}

impl GatewayConfig {
    /// Load from a JSON file. A missing file yields the default configuration,
    /// which behaves like the legacy layout with no destinations.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };

        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(path)
    }
}
