

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{Result, UndoError};


pub const DEFAULT_TTL_SECS: u64 = 300;

pub const DEFAULT_AUTO_HIDE_AFTER_MS: u64 = 60_000;

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

pub const DEFAULT_SWEEP_BATCH_SIZE: usize = 500;

/// Longest undo window `validate` accepts: one year.
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

const ENV_PREFIX: &str = "DELETION_UNDO";


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    /// How long an undo token stays redeemable after the delete.
    pub ttl_secs: u64,
    /// Hint for the presentation layer: how long to keep the undo toast visible.
    pub auto_hide_after_ms: u64,

    pub sweep_interval_secs: u64,
    pub sweep_batch_size: usize,
}

impl UndoConfig {

    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl_secs,
            auto_hide_after_ms: DEFAULT_AUTO_HIDE_AFTER_MS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            sweep_batch_size: DEFAULT_SWEEP_BATCH_SIZE,
        }
    }

    pub fn ttl(&self) -> Result<chrono::Duration> {
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| UndoError::Config(format!("ttl_secs {} is out of range", self.ttl_secs)))
    }

    /// Never zero, whatever was configured.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Defaults overridden by any `DELETION_UNDO_*` variable that parses.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |suffix: &str| lookup(&format!("{ENV_PREFIX}_{suffix}"));
        let mut config = Self::default();

        if let Some(ttl) = parse(number("TTL_SECS")) {
            config.ttl_secs = ttl;
        }
        if let Some(hide) = parse(number("AUTO_HIDE_AFTER_MS")) {
            config.auto_hide_after_ms = hide;
        }
        if let Some(interval) = parse(number("SWEEP_INTERVAL_SECS")) {
            config.sweep_interval_secs = interval;
        }
        if let Some(batch) = parse(number("SWEEP_BATCH_SIZE")) {
            config.sweep_batch_size = batch;
        }

        config
    }

    /// Layers an optional config file (any format the `config` crate knows) under
    /// `DELETION_UNDO_*` environment variables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let loaded: Self = ::config::Config::builder()
            .add_source(::config::File::from(path.as_ref()).required(false))
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| UndoError::Config(e.to_string()))?;

        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ttl_secs == 0 {
            return Err(UndoError::Config("ttl_secs must be greater than zero".to_string()));
        }
        if self.ttl_secs > MAX_TTL_SECS {
            return Err(UndoError::Config(format!(
                "ttl_secs must be at most {MAX_TTL_SECS}, got {}",
                self.ttl_secs
            )));
        }
        if self.sweep_interval_secs == 0 {
            return Err(UndoError::Config(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.sweep_batch_size == 0 {
            return Err(UndoError::Config(
                "sweep_batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECS)
    }
}

fn parse<T: std::str::FromStr>(raw: Option<String>) -> Option<T> {
    raw.and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = UndoConfig::default();
        assert_eq!(config.ttl_secs, DEFAULT_TTL_SECS);
        assert_eq!(config.ttl().unwrap(), chrono::Duration::minutes(5));
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let config = UndoConfig::new(0);
        assert!(matches!(config.validate(), Err(UndoError::Config(_))));
    }

    #[test]
    fn test_validate_bounds() {
        let huge = UndoConfig::new(10_000_000_000_000_000);
        assert!(matches!(huge.validate(), Err(UndoError::Config(_))));
        assert!(matches!(huge.ttl(), Err(UndoError::Config(_))));
        assert!(UndoConfig::new(u64::MAX).ttl().is_err());
        assert!(UndoConfig::new(MAX_TTL_SECS).validate().is_ok());

        let idle = UndoConfig {
            sweep_interval_secs: 0,
            ..UndoConfig::default()
        };
        assert!(idle.validate().is_err());
        assert_eq!(idle.sweep_interval(), Duration::from_secs(1));

        let empty = UndoConfig {
            sweep_batch_size: 0,
            ..UndoConfig::default()
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars = std::collections::HashMap::from([
            ("DELETION_UNDO_TTL_SECS", " 120 "),
            ("DELETION_UNDO_SWEEP_BATCH_SIZE", "50"),
            ("DELETION_UNDO_SWEEP_INTERVAL_SECS", "soon"),
        ]);
        let config = UndoConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.ttl_secs, 120);
        assert_eq!(config.sweep_batch_size, 50);
        assert_eq!(config.sweep_interval_secs, DEFAULT_SWEEP_INTERVAL_SECS);
        assert_eq!(config.auto_hide_after_ms, DEFAULT_AUTO_HIDE_AFTER_MS);
    }

    #[test]
    fn test_from_env_defaults_when_unset() {
        if std::env::vars().all(|(key, _)| !key.starts_with(ENV_PREFIX)) {
            assert_eq!(UndoConfig::from_env(), UndoConfig::default());
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("deletion-undo-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("undo.json");
        std::fs::write(&path, r#"{"ttl_secs": 90, "sweep_batch_size": 25}"#).unwrap();

        let config = UndoConfig::load(&path).unwrap();
        assert_eq!(config.ttl_secs, 90);
        assert_eq!(config.sweep_batch_size, 25);
        assert_eq!(config.auto_hide_after_ms, DEFAULT_AUTO_HIDE_AFTER_MS);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = UndoConfig::load("/nonexistent/deletion-undo.toml").unwrap();
        assert_eq!(config.sweep_interval_secs, DEFAULT_SWEEP_INTERVAL_SECS);
    }
}
