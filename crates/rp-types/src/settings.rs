//! Strongly typed adaptive settings.
//!
//! A settings value is an immutable snapshot: the monitor validates an update
//! with [`AdaptiveSettings::validate`] and swaps it in between ticks.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < min || value > max {
        return Err(ConfigError::OutOfBounds {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn check_decimal(field: &'static str, value: Decimal, min: f64, max: f64) -> Result<(), ConfigError> {
    check_range(field, value.to_f64().unwrap_or(f64::NAN), min, max)
}

fn check_weights(field: &'static str, weights: &[f64]) -> Result<(), ConfigError> {
    for w in weights {
        check_range(field, *w, 0.0, 1.0)?;
    }
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(crate::config_error!(field, "weights must sum to 1, got {sum}"));
    }
    Ok(())
}

/// Linear range the confidence multiplier is mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MultiplierRange {
    pub min: f64,
    pub max: f64,
}

impl MultiplierRange {
    /// Map a confidence in [0, 1] linearly onto the range.
    pub fn at(&self, confidence: f64) -> f64 {
        let c = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.min + (self.max - self.min) * c
    }
}

/// Weights of the per-position risk score components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskScoreWeights {
    pub stop_distance: f64,
    pub size: f64,
    pub correlation: f64,
}

/// Weights of the composite portfolio risk score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeWeights {
    pub var: f64,
    pub drawdown: f64,
    pub correlation: f64,
    pub concentration: f64,
}

/// Composite-score breakpoints: below `low` is LOW, below `medium` is
/// MEDIUM, below `high` is HIGH, otherwise CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLevelThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

/// Parameters of the risk calculator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskModelParams {
    /// Minimum return samples before volatility/correlation are trusted.
    pub min_samples: usize,
    /// Per-period volatility assumed for symbols with too little history.
    pub fallback_volatility: f64,
    /// Lower bound applied to a measured volatility before dividing by it.
    pub volatility_floor: f64,
    /// Correlation assumed in VaR for pairs without enough common history.
    pub unknown_pair_correlation: f64,
    /// Market time in a year, in seconds. Sharpe is annualised by the number
    /// of equity samples this holds at the sampling interval.
    pub trading_seconds_per_year: f64,
    /// Annual risk-free rate as a fraction.
    pub risk_free_rate: f64,
    /// Stop distance, in volatility units, that scores as maximum risk.
    pub stop_sigma_cap: f64,
    /// Notional/equity ratio that scores as maximum size risk.
    pub size_ratio_cap: f64,
    /// VaR (% of equity) that saturates the composite VaR component.
    pub var_cap_pct: f64,
    /// Drawdown (%) that saturates the composite drawdown component.
    pub drawdown_cap_pct: f64,
    pub profit_factor_cap: f64,
    pub position_weights: RiskScoreWeights,
    pub composite_weights: CompositeWeights,
    pub level_thresholds: RiskLevelThresholds,
}

impl Default for RiskModelParams {
    fn default() -> Self {
        Self {
            min_samples: 10,
            fallback_volatility: 0.02,
            volatility_floor: 1e-6,
            unknown_pair_correlation: 0.5,
            // 252 sessions of 6.5 hours
            trading_seconds_per_year: 5_896_800.0,
            risk_free_rate: 0.0,
            stop_sigma_cap: 5.0,
            size_ratio_cap: 0.5,
            var_cap_pct: 10.0,
            drawdown_cap_pct: 25.0,
            profit_factor_cap: 10.0,
            position_weights: RiskScoreWeights {
                stop_distance: 0.4,
                size: 0.35,
                correlation: 0.25,
            },
            composite_weights: CompositeWeights {
                var: 0.3,
                drawdown: 0.3,
                correlation: 0.2,
                concentration: 0.2,
            },
            level_thresholds: RiskLevelThresholds {
                low: 30.0,
                medium: 60.0,
                high: 85.0,
            },
        }
    }
}

/// Stop-loss trailing policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingParams {
    /// R-multiple at which the stop first moves to breakeven.
    pub breakeven_r: f64,
    /// How many R the trailed stop stays behind the current profit.
    pub trail_gap_r: f64,
    /// Distance, in volatility units, of a protective stop for positions
    /// that have none.
    pub protective_sigma_multiple: f64,
}

impl Default for TrailingParams {
    fn default() -> Self {
        Self {
            breakeven_r: 1.0,
            trail_gap_r: 1.0,
            protective_sigma_multiple: 2.0,
        }
    }
}

/// One rung of the scale-out ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleOutRung {
    pub r_multiple: f64,
    /// Fraction of the current size to close at this rung.
    pub close_fraction: f64,
}

/// Take-profit and scale-out policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TakeProfitParams {
    /// Number of recent returns inspected for directional persistence.
    pub trend_window: usize,
    /// Share of aligned returns above which the trend counts as strong.
    pub trend_threshold: f64,
    /// How far, in R, the target is pushed out on a strong trend.
    pub extension_r: f64,
    pub scale_out: Vec<ScaleOutRung>,
}

impl Default for TakeProfitParams {
    fn default() -> Self {
        Self {
            trend_window: 20,
            trend_threshold: 0.65,
            extension_r: 1.0,
            scale_out: vec![
                ScaleOutRung {
                    r_multiple: 2.0,
                    close_fraction: 0.5,
                },
                ScaleOutRung {
                    r_multiple: 3.0,
                    close_fraction: 0.5,
                },
            ],
        }
    }
}

/// Portfolio rebalancing caps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalanceParams {
    /// Maximum gross exposure of one symbol, in % of equity.
    pub max_symbol_exposure_pct: f64,
    /// Maximum correlated exposure of one symbol: its share of equity times
    /// its mean |correlation| with the other holdings.
    pub max_correlation_contribution: f64,
    /// Reductions smaller than this (in %) are not worth suggesting.
    pub min_reduction_pct: f64,
}

impl Default for RebalanceParams {
    fn default() -> Self {
        Self {
            max_symbol_exposure_pct: 25.0,
            max_correlation_contribution: 0.15,
            min_reduction_pct: 5.0,
        }
    }
}

/// Position sizing suggestion knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingParams {
    /// Relative size difference (%) below which no resize is suggested.
    pub size_tolerance_pct: f64,
    /// Return samples at which history adequacy reaches 1.
    pub full_confidence_samples: usize,
}

impl Default for SizingParams {
    fn default() -> Self {
        Self {
            size_tolerance_pct: 10.0,
            full_confidence_samples: 100,
        }
    }
}

/// Weights of the suggestion priority function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    pub confidence: f64,
    pub improvement: f64,
    pub risk: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            confidence: 0.4,
            improvement: 0.3,
            risk: 0.3,
        }
    }
}

/// Weights of the portfolio health score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerWeights {
    pub sharpe: f64,
    pub drawdown: f64,
    pub win_rate: f64,
    pub diversification: f64,
    /// Sharpe ratio that maps to a full Sharpe component.
    pub sharpe_target: f64,
}

impl Default for AnalyzerWeights {
    fn default() -> Self {
        Self {
            sharpe: 0.3,
            drawdown: 0.3,
            win_rate: 0.2,
            diversification: 0.2,
            sharpe_target: 2.0,
        }
    }
}

/// Everything the engine reads during a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveSettings {
    /// Equity risked per trade, in percent (2.0 = 2%).
    pub risk_percent_per_trade: f64,
    pub max_open_positions: usize,
    pub base_lot: Decimal,
    pub min_lot: Decimal,
    pub max_lot_per_order: Decimal,
    pub lot_step: Decimal,
    pub confidence_multiplier_range: MultiplierRange,
    pub var_confidence_level: f64,
    /// Drawdown (%) at which an alert fires.
    pub drawdown_alert_threshold: f64,
    /// Correlation score (0–1) at which an alert fires.
    pub correlation_alert_threshold: f64,
    pub alert_cooldown_secs: u64,
    pub alert_ttl_secs: u64,
    pub suggestion_ttl_secs: u64,
    /// Consecutive triggering ticks per escalation step.
    pub escalate_after_ticks: u32,
    /// Suggestions at or above this priority also raise an alert.
    pub suggestion_alert_priority: f64,
    pub sizing: SizingParams,
    pub risk: RiskModelParams,
    pub trailing: TrailingParams,
    pub take_profit: TakeProfitParams,
    pub rebalance: RebalanceParams,
    pub ranking: RankingWeights,
    pub analyzer: AnalyzerWeights,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            risk_percent_per_trade: 2.0,
            max_open_positions: 10,
            base_lot: Decimal::new(10, 2),
            min_lot: Decimal::new(1, 2),
            max_lot_per_order: Decimal::from(10),
            lot_step: Decimal::new(1, 2),
            confidence_multiplier_range: MultiplierRange { min: 0.5, max: 2.5 },
            var_confidence_level: 0.95,
            drawdown_alert_threshold: 10.0,
            correlation_alert_threshold: 0.7,
            alert_cooldown_secs: 300,
            alert_ttl_secs: 3600,
            suggestion_ttl_secs: 900,
            escalate_after_ticks: 3,
            suggestion_alert_priority: 75.0,
            sizing: SizingParams::default(),
            risk: RiskModelParams::default(),
            trailing: TrailingParams::default(),
            take_profit: TakeProfitParams::default(),
            rebalance: RebalanceParams::default(),
            ranking: RankingWeights::default(),
            analyzer: AnalyzerWeights::default(),
        }
    }
}

impl AdaptiveSettings {
    pub fn alert_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.alert_cooldown_secs as i64)
    }

    pub fn alert_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.alert_ttl_secs as i64)
    }

    pub fn suggestion_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.suggestion_ttl_secs as i64)
    }

    /// Reject any field outside its allowed bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("risk_percent_per_trade", self.risk_percent_per_trade, 0.01, 10.0)?;
        check_range("max_open_positions", self.max_open_positions as f64, 1.0, 1000.0)?;

        check_decimal("min_lot", self.min_lot, 1e-8, 1e6)?;
        check_decimal("base_lot", self.base_lot, 1e-8, 1e6)?;
        check_decimal("max_lot_per_order", self.max_lot_per_order, 1e-8, 1e6)?;
        check_decimal("lot_step", self.lot_step, 1e-8, 1e6)?;
        if self.min_lot > self.max_lot_per_order {
            return Err(crate::config_error!(
                "min_lot",
                "min_lot {} exceeds max_lot_per_order {}",
                self.min_lot,
                self.max_lot_per_order
            ));
        }
        if self.lot_step > self.min_lot {
            return Err(crate::config_error!(
                "lot_step",
                "lot_step {} exceeds min_lot {}",
                self.lot_step,
                self.min_lot
            ));
        }

        let range = self.confidence_multiplier_range;
        check_range("confidence_multiplier_range.min", range.min, 0.1, 10.0)?;
        check_range("confidence_multiplier_range.max", range.max, range.min, 10.0)?;

        check_range("var_confidence_level", self.var_confidence_level, 0.80, 0.999)?;
        check_range("drawdown_alert_threshold", self.drawdown_alert_threshold, 0.1, 100.0)?;
        check_range("correlation_alert_threshold", self.correlation_alert_threshold, 0.0, 1.0)?;
        check_range("alert_cooldown_secs", self.alert_cooldown_secs as f64, 1.0, 86_400.0)?;
        check_range("alert_ttl_secs", self.alert_ttl_secs as f64, 1.0, 604_800.0)?;
        check_range("suggestion_ttl_secs", self.suggestion_ttl_secs as f64, 1.0, 604_800.0)?;
        check_range("escalate_after_ticks", self.escalate_after_ticks as f64, 1.0, 1000.0)?;
        check_range("suggestion_alert_priority", self.suggestion_alert_priority, 0.0, 100.0)?;

        self.validate_sizing()?;
        self.validate_risk_model()?;
        self.validate_policies()?;

        check_weights(
            "ranking",
            &[self.ranking.confidence, self.ranking.improvement, self.ranking.risk],
        )?;
        let a = &self.analyzer;
        check_weights("analyzer", &[a.sharpe, a.drawdown, a.win_rate, a.diversification])?;
        check_range("analyzer.sharpe_target", a.sharpe_target, 0.1, 10.0)?;

        Ok(())
    }

    fn validate_sizing(&self) -> Result<(), ConfigError> {
        check_range("sizing.size_tolerance_pct", self.sizing.size_tolerance_pct, 0.0, 100.0)?;
        check_range(
            "sizing.full_confidence_samples",
            self.sizing.full_confidence_samples as f64,
            1.0,
            100_000.0,
        )
    }

    fn validate_risk_model(&self) -> Result<(), ConfigError> {
        let r = &self.risk;
        check_range("risk.min_samples", r.min_samples as f64, 2.0, 10_000.0)?;
        check_range("risk.fallback_volatility", r.fallback_volatility, 1e-6, 1.0)?;
        check_range("risk.volatility_floor", r.volatility_floor, 1e-12, 0.1)?;
        check_range("risk.unknown_pair_correlation", r.unknown_pair_correlation, 0.0, 1.0)?;
        check_range("risk.trading_seconds_per_year", r.trading_seconds_per_year, 3_600.0, 31_622_400.0)?;
        check_range("risk.risk_free_rate", r.risk_free_rate, 0.0, 0.5)?;
        check_range("risk.stop_sigma_cap", r.stop_sigma_cap, 0.1, 100.0)?;
        check_range("risk.size_ratio_cap", r.size_ratio_cap, 0.01, 100.0)?;
        check_range("risk.var_cap_pct", r.var_cap_pct, 0.1, 100.0)?;
        check_range("risk.drawdown_cap_pct", r.drawdown_cap_pct, 0.1, 100.0)?;
        check_range("risk.profit_factor_cap", r.profit_factor_cap, 1.0, 1000.0)?;

        let pw = &r.position_weights;
        check_weights("risk.position_weights", &[pw.stop_distance, pw.size, pw.correlation])?;
        let cw = &r.composite_weights;
        check_weights(
            "risk.composite_weights",
            &[cw.var, cw.drawdown, cw.correlation, cw.concentration],
        )?;

        let t = &r.level_thresholds;
        if !(t.low > 0.0 && t.low < t.medium && t.medium < t.high && t.high <= 100.0) {
            return Err(crate::config_error!(
                "risk.level_thresholds",
                "expected 0 < low < medium < high <= 100, got {}/{}/{}",
                t.low,
                t.medium,
                t.high
            ));
        }
        Ok(())
    }

    fn validate_policies(&self) -> Result<(), ConfigError> {
        let tr = &self.trailing;
        check_range("trailing.breakeven_r", tr.breakeven_r, 0.1, 10.0)?;
        check_range("trailing.trail_gap_r", tr.trail_gap_r, 0.0, 10.0)?;
        check_range(
            "trailing.protective_sigma_multiple",
            tr.protective_sigma_multiple,
            0.1,
            20.0,
        )?;

        let tp = &self.take_profit;
        check_range("take_profit.trend_window", tp.trend_window as f64, 2.0, 1000.0)?;
        check_range("take_profit.trend_threshold", tp.trend_threshold, 0.5, 1.0)?;
        check_range("take_profit.extension_r", tp.extension_r, 0.0, 10.0)?;
        let mut previous_r = 0.0;
        for rung in &tp.scale_out {
            check_range("take_profit.scale_out.r_multiple", rung.r_multiple, 0.1, 100.0)?;
            check_range("take_profit.scale_out.close_fraction", rung.close_fraction, 0.01, 0.99)?;
            if rung.r_multiple <= previous_r {
                return Err(crate::config_error!(
                    "take_profit.scale_out",
                    "rungs must have strictly increasing r_multiple"
                ));
            }
            previous_r = rung.r_multiple;
        }

        let rb = &self.rebalance;
        check_range("rebalance.max_symbol_exposure_pct", rb.max_symbol_exposure_pct, 0.1, 100.0)?;
        check_range(
            "rebalance.max_correlation_contribution",
            rb.max_correlation_contribution,
            0.01,
            1.0,
        )?;
        check_range("rebalance.min_reduction_pct", rb.min_reduction_pct, 0.0, 99.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_are_valid() {
        AdaptiveSettings::default().validate().unwrap();
    }

    #[test]
    fn risk_percent_out_of_bounds_is_rejected() {
        let settings = AdaptiveSettings {
            risk_percent_per_trade: 25.0,
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfBounds { field: "risk_percent_per_trade", .. }
        ));
    }

    #[test]
    fn nan_is_rejected() {
        let settings = AdaptiveSettings {
            correlation_alert_threshold: f64::NAN,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn inverted_lot_bounds_are_rejected() {
        let settings = AdaptiveSettings {
            min_lot: dec!(5),
            max_lot_per_order: dec!(1),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn weights_must_sum_to_one() {
        let mut settings = AdaptiveSettings::default();
        settings.risk.position_weights.size = 0.9;
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "risk.position_weights", .. }));
    }

    #[test]
    fn unordered_level_thresholds_are_rejected() {
        let mut settings = AdaptiveSettings::default();
        settings.risk.level_thresholds.medium = 20.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn scale_out_rungs_must_increase() {
        let mut settings = AdaptiveSettings::default();
        settings.take_profit.scale_out = vec![
            ScaleOutRung { r_multiple: 3.0, close_fraction: 0.5 },
            ScaleOutRung { r_multiple: 2.0, close_fraction: 0.5 },
        ];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn multiplier_range_maps_linearly() {
        let range = MultiplierRange { min: 0.5, max: 2.5 };
        assert_eq!(range.at(0.0), 0.5);
        assert_eq!(range.at(1.0), 2.5);
        assert_eq!(range.at(0.5), 1.5);
        assert_eq!(range.at(7.0), 2.5);
        assert_eq!(range.at(f64::NAN), 0.5);
    }

    #[test]
    fn partial_settings_deserialize_with_defaults() {
        let settings: AdaptiveSettings =
            serde_json::from_str(r#"{"risk_percent_per_trade": 1.5}"#).unwrap();
        assert_eq!(settings.risk_percent_per_trade, 1.5);
        assert_eq!(settings.max_open_positions, 10);
    }
}
