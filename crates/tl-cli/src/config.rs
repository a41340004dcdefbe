//! Configuration loading and management.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use tl_core::CorrelationConfig;
use tl_core::query::DEFAULT_LIMIT;
use tl_store::StoreConfig;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Console records kept per session.
    pub console_capacity: usize,
    /// Requests kept per session.
    pub request_capacity: usize,
    /// Responses kept per session.
    pub response_capacity: usize,
    /// Correlation window in milliseconds.
    pub correlation_window_ms: i64,
    /// Repeated errors faster than this per second are high severity.
    pub repeat_rate_per_sec: f64,
    /// Result limit for queries when none is given.
    pub default_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        let store = StoreConfig::default();
        let correlation = CorrelationConfig::default();
        Self {
            console_capacity: store.console_capacity,
            request_capacity: store.request_capacity,
            response_capacity: store.response_capacity,
            correlation_window_ms: correlation.window_ms,
            repeat_rate_per_sec: correlation.high_rate_per_sec,
            default_limit: DEFAULT_LIMIT,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    ///
    /// Later sources win: defaults, `<config dir>/tl/config.toml`, the given
    /// file, then `TL_*` environment variables.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("TL_"));

        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    fn validate(&self) -> Result<(), figment::Error> {
        if self.correlation_window_ms <= 0 {
            return Err(format!(
                "correlation_window_ms must be positive, got {}",
                self.correlation_window_ms
            )
            .into());
        }
        if !(self.repeat_rate_per_sec.is_finite() && self.repeat_rate_per_sec > 0.0) {
            return Err(format!(
                "repeat_rate_per_sec must be a positive number, got {}",
                self.repeat_rate_per_sec
            )
            .into());
        }
        Ok(())
    }

    pub const fn store_config(&self) -> StoreConfig {
        StoreConfig {
            console_capacity: self.console_capacity,
            request_capacity: self.request_capacity,
            response_capacity: self.response_capacity,
        }
    }

    pub fn correlation_config(&self) -> CorrelationConfig {
        CorrelationConfig {
            window_ms: self.correlation_window_ms,
            high_rate_per_sec: self.repeat_rate_per_sec,
            ..CorrelationConfig::default()
        }
    }
}

/// Returns the platform-specific config directory for tl.
///
/// On Linux: `~/.config/tl`
pub fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("tl"))
}
