//! Service configuration.
//!
//! Loaded from a TOML file merged with `RISKPILOT_`-prefixed environment
//! variables; nested keys use `__`, e.g.
//! `RISKPILOT_SETTINGS__RISK_PERCENT_PER_TRADE=1.5`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use rp_risk::{default_rules, AlertRule, RiskCalculator};
use rp_types::{config_error, AdaptiveSettings, ConfigError};

pub const ENV_PREFIX: &str = "RISKPILOT_";

/// Locations read by [`crate::JsonFileFeed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub positions_path: PathBuf,
    pub account_path: PathBuf,
    pub history_dir: Option<PathBuf>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            positions_path: PathBuf::from("data/positions.json"),
            account_path: PathBuf::from("data/account.json"),
            history_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub tick_interval_secs: u64,
    pub feed_timeout_ms: u64,
    pub history_timeout_ms: u64,
    /// Closes requested per symbol when seeding history.
    pub backfill_bars: usize,
    pub grace_ticks: u32,
    /// Returns kept per symbol.
    pub history_capacity: usize,
    pub equity_curve_capacity: usize,
    /// Closed-trade outcomes kept for win rate and profit factor.
    pub outcome_capacity: usize,
    pub alert_channel_capacity: usize,
    pub snapshot_path: Option<PathBuf>,
    pub feed: FeedConfig,
    pub settings: AdaptiveSettings,
    /// Overrides the rule set derived from `settings`.
    pub rules: Option<Vec<AlertRule>>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 10,
            feed_timeout_ms: 2_000,
            history_timeout_ms: 5_000,
            backfill_bars: 100,
            grace_ticks: 1,
            history_capacity: 200,
            equity_curve_capacity: 2_000,
            outcome_capacity: 200,
            alert_channel_capacity: 256,
            snapshot_path: None,
            feed: FeedConfig::default(),
            settings: AdaptiveSettings::default(),
            rules: None,
        }
    }
}

impl MonitorConfig {
    /// Read `path` (missing file means all defaults), overlay the
    /// environment and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: MonitorConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| config_error!("config", "{}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(5..=30).contains(&self.tick_interval_secs) {
            return Err(ConfigError::OutOfBounds {
                field: "tick_interval_secs",
                value: self.tick_interval_secs as f64,
                min: 5.0,
                max: 30.0,
            });
        }
        if self.feed_timeout_ms == 0 || self.feed_timeout_ms >= self.tick_interval_secs * 1_000 {
            return Err(config_error!(
                "feed_timeout_ms",
                "must be positive and shorter than the tick interval, got {}",
                self.feed_timeout_ms
            ));
        }
        if self.history_timeout_ms == 0 {
            return Err(config_error!("history_timeout_ms", "must be positive"));
        }
        let capacities = [
            ("history_capacity", self.history_capacity),
            ("equity_curve_capacity", self.equity_curve_capacity),
            ("outcome_capacity", self.outcome_capacity),
            ("alert_channel_capacity", self.alert_channel_capacity),
        ];
        for (field, value) in capacities {
            if value == 0 {
                return Err(config_error!(field, "must be positive"));
            }
        }
        self.settings.validate()?;
        check_settings_fit(&self.settings, self.history_capacity, self.tick_interval_secs)?;

        if let Some(rules) = &self.rules {
            for rule in rules {
                if rule.name.trim().is_empty() {
                    return Err(config_error!("rules", "rule with an empty name"));
                }
                if !rule.threshold.is_finite() {
                    return Err(config_error!("rules", "rule {} has a non-finite threshold", rule.name));
                }
            }
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_millis(self.feed_timeout_ms)
    }

    pub fn history_timeout(&self) -> Duration {
        Duration::from_millis(self.history_timeout_ms)
    }

    /// Configured rules, or the defaults derived from the settings.
    pub fn alert_rules(&self) -> Vec<AlertRule> {
        self.rules
            .clone()
            .unwrap_or_else(|| default_rules(&self.settings))
    }
}

/// Checks settings against the fixed runtime shape: return buffers must hold
/// `min_samples`, and a year of ticks must hold enough equity samples for an
/// annualised Sharpe.
pub fn check_settings_fit(
    settings: &AdaptiveSettings,
    history_capacity: usize,
    tick_interval_secs: u64,
) -> Result<(), ConfigError> {
    let min_samples = settings.risk.min_samples;
    if history_capacity < min_samples {
        return Err(config_error!(
            "risk.min_samples",
            "{} does not fit a history capacity of {}",
            min_samples,
            history_capacity
        ));
    }
    match RiskCalculator::periods_per_year(tick_interval_secs as f64, settings) {
        Some(periods) if periods >= min_samples as f64 => Ok(()),
        _ => Err(config_error!(
            "risk.trading_seconds_per_year",
            "{} holds fewer than {} ticks of {}s",
            settings.risk.trading_seconds_per_year,
            min_samples,
            tick_interval_secs
        )),
    }
}
