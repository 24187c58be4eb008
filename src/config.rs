//! Service configuration
//!
//! Two layers:
//! - `config/{env}.yaml`: logging and tuning knobs ([`AppConfig`])
//! - process environment: endpoints and secrets ([`ServiceEnv`])
//!
//! Missing mandatory variables abort startup before any connection is made.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config value {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        reason: &'static str,
    },

    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },
}

// ============================================================================
// File configuration
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub rate_limit_per_minute: u32,
    /// Seconds between sweeps of expired rate-limit windows
    pub rate_limit_sweep_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 100,
            rate_limit_sweep_secs: 60,
        }
    }
}

/// Outbox relay tuning
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutboxConfig {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            batch_size: 100,
        }
    }
}

/// Settlement consumer tuning
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SettlementConfig {
    /// Idle poll interval for the PostgreSQL event log
    pub poll_interval_ms: u64,
    /// Pause after a failed fetch
    pub error_backoff_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            error_backoff_ms: 1000,
        }
    }
}

impl SettlementConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// KV cache housekeeping
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    /// Seconds between purges of expired entries
    pub sweep_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { sweep_secs: 300 }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "paysettle.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            gateway: GatewayConfig::default(),
            outbox: OutboxConfig::default(),
            settlement: SettlementConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_yaml(&content).map_err(|source| ConfigError::Parse { path, source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Reject knobs that would stall or spin a worker.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("gateway.rate_limit_per_minute", self.gateway.rate_limit_per_minute as u64),
            ("gateway.rate_limit_sweep_secs", self.gateway.rate_limit_sweep_secs),
            ("outbox.poll_interval_ms", self.outbox.poll_interval_ms),
            ("outbox.batch_size", self.outbox.batch_size as u64),
            ("settlement.poll_interval_ms", self.settlement.poll_interval_ms),
            ("settlement.error_backoff_ms", self.settlement.error_backoff_ms),
            ("cache.sweep_secs", self.cache.sweep_secs),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    reason: "must be greater than 0",
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Environment configuration
// ============================================================================

/// How a new payment's event leaves the payment service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Event row written with the payment row; a relay publishes it.
    Outbox,
    /// Publish inline after the payment row commits.
    Direct,
}

impl DispatchMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "outbox" => Some(DispatchMode::Outbox),
            "direct" => Some(DispatchMode::Direct),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceEnv {
    pub database_url: String,
    /// Payments database as seen by the ledger role, for status updates
    pub payments_database_url: Option<String>,
    pub event_bus_brokers: Vec<String>,
    pub event_bus_topic: String,
    pub event_bus_group: String,
    pub event_bus_partitions: i32,
    pub cache_url: String,
    pub cache_password: Option<String>,
    pub listen_addr: SocketAddr,
    pub dispatch_mode: DispatchMode,
    pub rate_limit_per_minute: Option<u32>,
}

pub const DEFAULT_PARTITIONS: i32 = 8;
pub const DEFAULT_CONSUMER_GROUP: &str = "ledger-settlement";

impl ServiceEnv {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::MissingEnv(key));

        let database_url = required("DATABASE_URL")?;
        let brokers_raw = required("EVENT_BUS_BROKERS")?;
        let event_bus_topic = required("EVENT_BUS_TOPIC")?;
        let cache_url = required("CACHE_URL")?;
        let listen_raw = required("LISTEN_ADDR")?;

        let event_bus_brokers: Vec<String> = brokers_raw
            .split(',')
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();
        if event_bus_brokers.is_empty() {
            return Err(ConfigError::InvalidEnv {
                key: "EVENT_BUS_BROKERS",
                value: brokers_raw,
                reason: "no broker listed".into(),
            });
        }

        let listen_addr = listen_raw
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidEnv {
                key: "LISTEN_ADDR",
                value: listen_raw.clone(),
                reason: e.to_string(),
            })?;

        let event_bus_partitions = match get("EVENT_BUS_PARTITIONS") {
            None => DEFAULT_PARTITIONS,
            Some(raw) => match raw.trim().parse::<i32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: "EVENT_BUS_PARTITIONS",
                        value: raw,
                        reason: "must be a positive integer".into(),
                    });
                }
            },
        };

        let dispatch_mode = match get("DISPATCH_MODE") {
            None => DispatchMode::Outbox,
            Some(raw) => DispatchMode::parse(&raw).ok_or_else(|| ConfigError::InvalidEnv {
                key: "DISPATCH_MODE",
                value: raw.clone(),
                reason: "expected outbox or direct".into(),
            })?,
        };

        let rate_limit_per_minute = match get("RATE_LIMIT_PER_MINUTE") {
            None => None,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => Some(n),
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: "RATE_LIMIT_PER_MINUTE",
                        value: raw,
                        reason: "must be a positive integer".into(),
                    });
                }
            },
        };

        Ok(Self {
            database_url,
            payments_database_url: get("PAYMENTS_DATABASE_URL"),
            event_bus_brokers,
            event_bus_topic,
            event_bus_group: get("EVENT_BUS_GROUP")
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            event_bus_partitions,
            cache_url,
            cache_password: get("CACHE_PASSWORD"),
            listen_addr,
            dispatch_mode,
            rate_limit_per_minute,
        })
    }
}
