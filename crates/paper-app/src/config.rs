//! Application configuration.

use crate::error::{AppError, AppResult};
use paper_core::InstrumentId;
use paper_ws::FeedConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Caller-driven reconnect policy.
///
/// The feed client never retries on its own; the application supervisor
/// checks the connection on a fixed cadence and reconnects with backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Supervisor check cadence (ms). Default: 1,000.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// First retry delay (ms). Default: 1,000.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff ceiling (ms). Default: 30,000.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound of the random jitter added to each delay (ms). Default: 1,000.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    /// Consecutive failed attempts before giving up (0 = infinite).
    #[serde(default)]
    pub max_attempts: u32,
}

fn default_true() -> bool {
    true
}

fn default_check_interval_ms() -> u64 {
    1_000
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    1_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_ms: default_check_interval_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }

    /// Exponential backoff without jitter: base * 2^(attempt-1), capped.
    ///
    /// attempt=1 -> base, attempt=2 -> 2*base, attempt=3 -> 4*base
    pub fn base_backoff_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(10);
        self.base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms)
    }

    /// Delay before retry number `attempt`, jitter included.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_backoff_ms(attempt) + jitter(self.jitter_ms))
    }

    /// Whether `failed` consecutive failures exhaust the retry budget.
    pub fn exhausted(&self, failed: u32) -> bool {
        self.max_attempts > 0 && failed >= self.max_attempts
    }
}

/// Random jitter in `[0, bound)` ms.
fn jitter(bound: u64) -> u64 {
    if bound == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos) % bound
}

/// Paper position opened at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSeed {
    pub instrument_id: InstrumentId,
    pub shares: Decimal,
    pub avg_price: Decimal,
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Instruments to stream in addition to held positions.
    #[serde(default)]
    pub instruments: Vec<InstrumentId>,
    #[serde(default)]
    pub positions: Vec<PositionSeed>,
    /// Feed stats to metrics mirror cadence (ms). Default: 15,000.
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
    /// Portfolio valuation log cadence (ms). Default: 60,000.
    #[serde(default = "default_valuation_log_interval_ms")]
    pub valuation_log_interval_ms: u64,
}

fn default_stats_interval_ms() -> u64 {
    15_000
}

fn default_valuation_log_interval_ms() -> u64 {
    60_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            reconnect: ReconnectConfig::default(),
            instruments: Vec::new(),
            positions: Vec::new(),
            stats_interval_ms: default_stats_interval_ms(),
            valuation_log_interval_ms: default_valuation_log_interval_ms(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, falling back to defaults when the file is missing.
    pub fn load(path: &str) -> AppResult<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            tracing::warn!(path = %path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.feed.url.trim().is_empty() {
            return Err(AppError::Config("feed.url must not be empty".to_string()));
        }
        if self.feed.keepalive_interval_ms == 0 {
            return Err(AppError::Config(
                "feed.keepalive_interval_ms must be positive".to_string(),
            ));
        }
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(AppError::Config(format!(
                "reconnect.base_delay_ms ({}) exceeds reconnect.max_delay_ms ({})",
                self.reconnect.base_delay_ms, self.reconnect.max_delay_ms
            )));
        }
        if self.stats_interval_ms == 0 || self.valuation_log_interval_ms == 0 {
            return Err(AppError::Config(
                "reporting intervals must be positive".to_string(),
            ));
        }
        for id in self
            .instruments
            .iter()
            .chain(self.positions.iter().map(|p| &p.instrument_id))
        {
            InstrumentId::parse(id.as_str()).map_err(|e| AppError::Config(e.to_string()))?;
        }
        Ok(())
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn valuation_log_interval(&self) -> Duration {
        Duration::from_millis(self.valuation_log_interval_ms)
    }
}
