//! Pipeline configuration, loaded from TOML.
//!
//! One [`PipelineConfig`] is built at startup and passed to the pipeline;
//! components never read ambient settings on their own.

use marketlake_core::fetch::RetryPolicy;
use marketlake_core::Symbol;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which market-data provider to pull from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Polygon,
    Yahoo,
}

impl ProviderKind {
    pub fn requires_api_key(self) -> bool {
        matches!(self, ProviderKind::Polygon)
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: Option<String>,
    /// Override of the provider's public endpoint (test servers, proxies).
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
    /// Minimum spacing between consecutive requests across all workers.
    pub min_request_interval_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Polygon,
            api_key: None,
            base_url: None,
            request_timeout_secs: 30,
            min_request_interval_ms: 0,
        }
    }
}

// Hand-written so the API key never reaches logs.
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("min_request_interval_ms", &self.min_request_interval_ms)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
    pub default_cooldown_secs: u64,
    pub max_cooldown_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let p = RetryPolicy::default();
        Self {
            max_attempts: p.max_attempts,
            base_delay_ms: p.base_delay.as_millis() as u64,
            max_delay_ms: p.max_delay.as_millis() as u64,
            multiplier: p.multiplier,
            jitter: p.jitter,
            default_cooldown_secs: p.default_cooldown.as_secs(),
            max_cooldown_secs: p.max_cooldown.as_secs(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            jitter: self.jitter,
            default_cooldown: Duration::from_secs(self.default_cooldown_secs),
            max_cooldown: Duration::from_secs(self.max_cooldown_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveConfig {
    pub root: PathBuf,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/raw"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/marketlake.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HistoryConfig {
    /// JSONL file receiving one summary per run. Unset disables history.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `pretty`, `compact` or `json`.
    pub format: String,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "pretty".into(),
            level: "info".into(),
        }
    }
}

/// About a century of daily history; anything longer is a typo.
pub const MAX_LOOKBACK_DAYS: u32 = 36_600;

/// Everything a pipeline run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Default symbol set when a run request names none.
    pub symbols: Vec<String>,
    /// Extra days before the run date to (re)fetch. 0 fetches the run date only.
    pub lookback_days: u32,
    /// Worker threads for per-symbol units.
    pub concurrency: usize,
    /// Treat any normalization rejection as a degraded unit.
    pub strict_validation: bool,
    pub provider: ProviderConfig,
    pub retry: RetryConfig,
    pub archive: ArchiveConfig,
    pub store: StoreConfig,
    pub history: HistoryConfig,
    pub logging: LoggingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            symbols: ["AAPL", "GOOGL", "MSFT", "TSLA", "NVDA"]
                .into_iter()
                .map(String::from)
                .collect(),
            lookback_days: 0,
            concurrency: 2,
            strict_validation: false,
            provider: ProviderConfig::default(),
            retry: RetryConfig::default(),
            archive: ArchiveConfig::default(),
            store: StoreConfig::default(),
            history: HistoryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.symbols.is_empty() {
            return invalid("symbols must not be empty".into());
        }
        if let Some(bad) = self
            .symbols
            .iter()
            .find_map(|s| Symbol::parse(s).err().map(|e| (s, e)))
        {
            return invalid(format!("symbol '{}': {}", bad.0, bad.1));
        }
        if self.concurrency == 0 {
            return invalid("concurrency must be at least 1".into());
        }
        if self.lookback_days > MAX_LOOKBACK_DAYS {
            return invalid(format!(
                "lookback_days must be at most {MAX_LOOKBACK_DAYS}, got {}",
                self.lookback_days
            ));
        }
        let r = &self.retry;
        if r.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".into());
        }
        if !(r.multiplier >= 1.0) {
            return invalid(format!("retry.multiplier must be >= 1, got {}", r.multiplier));
        }
        if !(0.0..1.0).contains(&r.jitter) {
            return invalid(format!("retry.jitter must be in [0, 1), got {}", r.jitter));
        }
        if r.max_delay_ms < r.base_delay_ms {
            return invalid("retry.max_delay_ms must be >= retry.base_delay_ms".into());
        }
        if self.provider.request_timeout_secs == 0 {
            return invalid("provider.request_timeout_secs must be at least 1".into());
        }
        if self.provider.kind.requires_api_key()
            && self
                .provider
                .api_key
                .as_deref()
                .map_or(true, |k| k.trim().is_empty())
        {
            return invalid(format!(
                "provider '{:?}' requires an api_key",
                self.provider.kind
            ));
        }
        Ok(())
    }

    /// Configured symbols, parsed. Call after [`validate`](Self::validate).
    pub fn parsed_symbols(&self) -> Result<Vec<Symbol>, ConfigError> {
        self.symbols
            .iter()
            .map(|s| Symbol::parse(s).map_err(|e| ConfigError::Invalid(e.to_string())))
            .collect()
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.store.busy_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.provider.request_timeout_secs)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.provider.min_request_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
symbols = ["aapl", "MSFT"]
lookback_days = 5
concurrency = 4
strict_validation = true

[provider]
kind = "polygon"
api_key = "secret-key"
request_timeout_secs = 10
min_request_interval_ms = 250

[retry]
max_attempts = 3
base_delay_ms = 100
max_delay_ms = 1000
multiplier = 2.0
jitter = 0.1
default_cooldown_secs = 30
max_cooldown_secs = 60

[archive]
root = "/tmp/raw"

[store]
path = "/tmp/prices.db"
busy_timeout_ms = 2000

[history]
path = "/tmp/history.jsonl"

[logging]
format = "json"
level = "debug"
"#;

    #[test]
    fn parses_full_file() {
        let cfg = PipelineConfig::from_toml(FULL).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.lookback_days, 5);
        assert!(cfg.strict_validation);
        assert_eq!(cfg.retry.policy().max_attempts, 3);
        assert_eq!(cfg.min_request_interval(), Duration::from_millis(250));
        assert_eq!(cfg.history.path, Some(PathBuf::from("/tmp/history.jsonl")));
        assert_eq!(
            cfg.parsed_symbols().unwrap(),
            vec![Symbol::parse("AAPL").unwrap(), Symbol::parse("MSFT").unwrap()]
        );
    }

    #[test]
    fn missing_sections_take_defaults() {
        let cfg = PipelineConfig::from_toml("symbols = [\"AAPL\"]\n[provider]\nkind = \"yahoo\"\n")
            .unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.lookback_days, 0);
        assert_eq!(cfg.retry, RetryConfig::default());
        assert_eq!(cfg.store.busy_timeout_ms, 5_000);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            PipelineConfig::from_toml("symbolz = [\"AAPL\"]"),
            Err(ConfigError::Parse(_))
        ));
    }

    fn rejected(mutate: impl FnOnce(&mut PipelineConfig)) -> bool {
        let mut cfg = PipelineConfig::from_toml(FULL).unwrap();
        mutate(&mut cfg);
        matches!(cfg.validate(), Err(ConfigError::Invalid(_)))
    }

    #[test]
    fn validation_failures() {
        assert!(rejected(|c| c.symbols.clear()), "empty symbols");
        assert!(rejected(|c| c.symbols.push("BAD SYM".into())), "bad symbol");
        assert!(rejected(|c| c.concurrency = 0), "zero concurrency");
        assert!(rejected(|c| c.lookback_days = u32::MAX), "absurd lookback");
        assert!(!rejected(|c| c.lookback_days = 730), "two-year backfill");
        assert!(rejected(|c| c.retry.max_attempts = 0), "zero attempts");
        assert!(rejected(|c| c.retry.multiplier = 0.5), "shrinking backoff");
        assert!(rejected(|c| c.retry.jitter = 1.0), "jitter of one");
        assert!(rejected(|c| c.provider.api_key = None), "missing key");
        assert!(!rejected(|c| c.provider.kind = ProviderKind::Yahoo));
    }

    #[test]
    fn debug_output_hides_api_key() {
        let cfg = PipelineConfig::from_toml(FULL).unwrap();
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("secret-key"));
        assert!(dbg.contains("<redacted>"));
    }
}
