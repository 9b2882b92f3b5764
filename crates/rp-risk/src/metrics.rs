//! Risk metrics computation.
//!
//! [`RiskCalculator`] takes a position snapshot, the per-symbol return
//! buffers, the equity curve and the current settings, and produces a
//! [`RiskAssessment`]: portfolio [`RiskMetrics`] plus a [`PositionRiskScore`]
//! for every open position.
//!
//! The calculator is pure. It carries no clock and iterates only ordered
//! collections, so identical inputs give bit-identical outputs.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use rp_data::{EquityCurve, PositionSnapshot};
use rp_types::{AccountInfo, AdaptiveSettings, Position, RiskLevelThresholds, Symbol, TradeOutcome};

use crate::stats::{finite_or, inverse_normal_cdf, mean, pearson, sample_std_dev};

/// z-score used if the configured confidence level cannot be inverted.
const Z_95: f64 = 1.645;

/// Discrete portfolio risk classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Pure function of the composite score.
    pub fn classify(score: f64, thresholds: &RiskLevelThresholds) -> Self {
        if !score.is_finite() || score < thresholds.low {
            RiskLevel::Low
        } else if score < thresholds.medium {
            RiskLevel::Medium
        } else if score < thresholds.high {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        };
        write!(f, "{}", s)
    }
}

/// Degeneracies handled with fallbacks during a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricFlag {
    /// Computed from last-known positions after a failed feed read.
    StaleData,
    /// Fewer than two symbols, or no pair with enough common history.
    InsufficientCorrelationData,
    /// Too few equity samples for a Sharpe ratio.
    InsufficientReturnHistory,
    /// At least one symbol used the fallback volatility.
    VolatilityFallback,
    /// Account equity was missing or non-positive.
    NoEquity,
}

/// Volatility estimate for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolVolatility {
    /// Per-period standard deviation of returns.
    pub value: f64,
    pub samples: usize,
    pub fallback: bool,
}

/// Per-position risk breakdown. Components are within [0, 1]; the score is
/// within [0, 100].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRiskScore {
    pub position_id: String,
    pub symbol: Symbol,
    pub score: f64,
    pub stop_component: f64,
    pub size_component: f64,
    pub correlation_component: f64,
    pub volatility: SymbolVolatility,
    pub r_multiple: Option<f64>,
}

/// Portfolio-level risk metrics. Recomputed wholesale every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    /// Parametric one-period VaR at the configured confidence, % of equity.
    pub portfolio_var_95: f64,
    /// Largest peak-to-trough decline in the equity window, %.
    pub max_drawdown: f64,
    /// Decline of the latest equity sample from the running peak, %.
    pub current_drawdown: f64,
    pub sharpe_ratio: f64,
    /// Share of winning trades (closed and open), %.
    pub win_rate: f64,
    pub profit_factor: f64,
    /// Exposure-weighted mean |pairwise correlation|, within [0, 1].
    pub correlation_score: f64,
    /// Gross notional per symbol as % of equity, clamped to [0, 100].
    pub exposure_by_symbol: BTreeMap<Symbol, f64>,
    /// Gross notional / equity, unclamped.
    pub gross_leverage: f64,
    /// Composite score within [0, 100].
    pub composite_score: f64,
    pub risk_level: RiskLevel,
    pub num_positions: usize,
    pub stale: bool,
    pub flags: BTreeSet<MetricFlag>,
}

impl RiskMetrics {
    /// All metrics zeroed; the result for an empty portfolio.
    pub fn zeroed(stale: bool) -> Self {
        let mut flags = BTreeSet::new();
        if stale {
            flags.insert(MetricFlag::StaleData);
        }
        Self {
            portfolio_var_95: 0.0,
            max_drawdown: 0.0,
            current_drawdown: 0.0,
            sharpe_ratio: 0.0,
            win_rate: 0.0,
            profit_factor: 0.0,
            correlation_score: 0.0,
            exposure_by_symbol: BTreeMap::new(),
            gross_leverage: 0.0,
            composite_score: 0.0,
            risk_level: RiskLevel::Low,
            num_positions: 0,
            stale,
            flags,
        }
    }

    /// Largest single-symbol exposure, % of equity.
    pub fn max_exposure_pct(&self) -> f64 {
        self.exposure_by_symbol.values().copied().fold(0.0, f64::max)
    }
}

/// Full output of one risk computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub metrics: RiskMetrics,
    /// Keyed by position id.
    pub position_scores: BTreeMap<String, PositionRiskScore>,
    pub volatilities: BTreeMap<Symbol, SymbolVolatility>,
    /// Gross exposure per symbol in % of equity, not clamped. Sizing
    /// reductions work from this; `metrics.exposure_by_symbol` is capped at 100.
    pub gross_exposure_pct: BTreeMap<Symbol, f64>,
    /// Exposure-weighted mean |correlation| of each symbol against the other
    /// held symbols.
    pub symbol_correlation: BTreeMap<Symbol, f64>,
    /// Each symbol's share of the portfolio correlation score; the values sum
    /// to `metrics.correlation_score`.
    pub correlation_contribution: BTreeMap<Symbol, f64>,
}

impl RiskAssessment {
    pub fn empty(stale: bool) -> Self {
        Self {
            metrics: RiskMetrics::zeroed(stale),
            position_scores: BTreeMap::new(),
            volatilities: BTreeMap::new(),
            gross_exposure_pct: BTreeMap::new(),
            symbol_correlation: BTreeMap::new(),
            correlation_contribution: BTreeMap::new(),
        }
    }
}

/// Borrowed inputs of a risk computation.
#[derive(Debug, Clone, Copy)]
pub struct RiskInputs<'a> {
    pub snapshot: &'a PositionSnapshot,
    pub returns: &'a BTreeMap<Symbol, Vec<f64>>,
    pub equity_curve: &'a EquityCurve,
    pub account: &'a AccountInfo,
    pub outcomes: &'a [TradeOutcome],
    pub settings: &'a AdaptiveSettings,
    /// Seconds between equity curve samples.
    pub sample_interval_secs: f64,
}

/// Per-symbol aggregates of the open positions.
#[derive(Debug, Clone, Copy, Default)]
struct SymbolExposure {
    gross: f64,
    signed: f64,
}

/// Stateless calculator for risk metrics.
pub struct RiskCalculator;

impl RiskCalculator {
    pub fn compute(inputs: &RiskInputs<'_>) -> RiskAssessment {
        let settings = inputs.settings;
        let params = &settings.risk;
        let snapshot = inputs.snapshot;

        if snapshot.is_empty() {
            return RiskAssessment::empty(snapshot.stale);
        }

        let mut flags = BTreeSet::new();
        if snapshot.stale {
            flags.insert(MetricFlag::StaleData);
        }

        // --- exposure ---
        let mut exposures: BTreeMap<Symbol, SymbolExposure> = BTreeMap::new();
        for pos in &snapshot.positions {
            let notional = pos.notional().to_f64().unwrap_or(0.0);
            let entry = exposures.entry(pos.symbol.clone()).or_default();
            entry.gross += notional.abs();
            entry.signed += pos.direction.sign_f64() * notional.abs();
        }
        let gross_total: f64 = exposures.values().map(|e| e.gross).sum();

        let equity = match inputs.account.equity.to_f64() {
            Some(e) if e.is_finite() && e > 0.0 => e,
            _ => {
                flags.insert(MetricFlag::NoEquity);
                if gross_total > 0.0 {
                    gross_total
                } else {
                    1.0
                }
            }
        };

        // --- volatility ---
        let volatilities: BTreeMap<Symbol, SymbolVolatility> = exposures
            .keys()
            .map(|symbol| {
                let samples = inputs.returns.get(symbol).map(Vec::as_slice).unwrap_or(&[]);
                (symbol.clone(), Self::volatility(samples, settings))
            })
            .collect();
        if volatilities.values().any(|v| v.fallback) {
            flags.insert(MetricFlag::VolatilityFallback);
        }

        // --- correlation ---
        let symbols: Vec<&Symbol> = exposures.keys().collect();
        let pairs: Vec<(usize, usize)> = (0..symbols.len())
            .flat_map(|i| ((i + 1)..symbols.len()).map(move |j| (i, j)))
            .collect();
        let correlations: Vec<Option<f64>> = pairs
            .par_iter()
            .map(|&(i, j)| {
                let a = inputs.returns.get(symbols[i]).map(Vec::as_slice).unwrap_or(&[]);
                let b = inputs.returns.get(symbols[j]).map(Vec::as_slice).unwrap_or(&[]);
                pearson(a, b, params.min_samples)
            })
            .collect();

        let mut weighted_abs = 0.0;
        let mut weight_total = 0.0;
        let mut pair_weights = Vec::with_capacity(pairs.len());
        for (&(i, j), rho) in pairs.iter().zip(&correlations) {
            let w = exposures[symbols[i]].gross * exposures[symbols[j]].gross;
            pair_weights.push(w);
            if let Some(rho) = rho {
                weighted_abs += w * rho.abs();
                weight_total += w;
            }
        }
        let correlation_score = if weight_total > 0.0 {
            finite_or(weighted_abs / weight_total, 0.0).clamp(0.0, 1.0)
        } else {
            flags.insert(MetricFlag::InsufficientCorrelationData);
            0.0
        };

        let mut symbol_correlation: BTreeMap<Symbol, f64> = BTreeMap::new();
        let mut correlation_contribution: BTreeMap<Symbol, f64> = BTreeMap::new();
        {
            let mut num = vec![0.0; symbols.len()];
            let mut den = vec![0.0; symbols.len()];
            let mut contrib = vec![0.0; symbols.len()];
            for ((&(i, j), rho), &w) in pairs.iter().zip(&correlations).zip(&pair_weights) {
                if let Some(rho) = rho {
                    let ei = exposures[symbols[i]].gross;
                    let ej = exposures[symbols[j]].gross;
                    num[i] += ej * rho.abs();
                    den[i] += ej;
                    num[j] += ei * rho.abs();
                    den[j] += ei;
                    if weight_total > 0.0 {
                        let share = 0.5 * w * rho.abs() / weight_total;
                        contrib[i] += share;
                        contrib[j] += share;
                    }
                }
            }
            for (k, symbol) in symbols.iter().enumerate() {
                let avg = if den[k] > 0.0 { num[k] / den[k] } else { 0.0 };
                symbol_correlation.insert((*symbol).clone(), finite_or(avg, 0.0).clamp(0.0, 1.0));
                correlation_contribution
                    .insert((*symbol).clone(), finite_or(contrib[k], 0.0).clamp(0.0, 1.0));
            }
        }

        // --- VaR ---
        let z = inverse_normal_cdf(settings.var_confidence_level).unwrap_or(Z_95);
        let mut variance = 0.0;
        for symbol in &symbols {
            let w = exposures[*symbol].signed / equity;
            let sigma = volatilities[*symbol].value;
            variance += w * w * sigma * sigma;
        }
        for (&(i, j), rho) in pairs.iter().zip(&correlations) {
            let wi = exposures[symbols[i]].signed / equity;
            let wj = exposures[symbols[j]].signed / equity;
            let rho = rho.unwrap_or(params.unknown_pair_correlation);
            variance += 2.0 * wi * wj * volatilities[symbols[i]].value * volatilities[symbols[j]].value * rho;
        }
        let portfolio_sigma = finite_or(variance.max(0.0).sqrt(), 0.0);
        let portfolio_var_95 = finite_or(z * portfolio_sigma * 100.0, 0.0).clamp(0.0, 100.0);

        // --- drawdown ---
        let max_drawdown = finite_or(inputs.equity_curve.max_drawdown_pct(), 0.0).clamp(0.0, 100.0);
        let current_drawdown =
            finite_or(inputs.equity_curve.current_drawdown_pct(), 0.0).clamp(0.0, 100.0);

        // --- Sharpe ---
        let equity_returns = inputs.equity_curve.returns();
        let sharpe_ratio = match Self::sharpe(&equity_returns, inputs.sample_interval_secs, settings) {
            Some(s) => s,
            None => {
                flags.insert(MetricFlag::InsufficientReturnHistory);
                0.0
            }
        };

        // --- trade statistics ---
        let (win_rate, profit_factor) =
            Self::trade_stats(inputs.outcomes, &snapshot.positions, params.profit_factor_cap);

        // --- exposure by symbol ---
        let gross_exposure_pct: BTreeMap<Symbol, f64> = exposures
            .iter()
            .map(|(s, e)| (s.clone(), finite_or(e.gross / equity * 100.0, 0.0).max(0.0)))
            .collect();
        let exposure_by_symbol: BTreeMap<Symbol, f64> = gross_exposure_pct
            .iter()
            .map(|(s, pct)| (s.clone(), pct.clamp(0.0, 100.0)))
            .collect();
        let gross_leverage = finite_or(gross_total / equity, 0.0).max(0.0);

        // --- per-position scores ---
        let position_scores: BTreeMap<String, PositionRiskScore> = snapshot
            .positions
            .iter()
            .map(|pos| {
                let vol = volatilities[&pos.symbol];
                let corr = symbol_correlation.get(&pos.symbol).copied().unwrap_or(0.0);
                let score = Self::position_score(pos, vol, corr, equity, settings);
                (pos.id.clone(), score)
            })
            .collect();

        // --- composite ---
        let cw = &params.composite_weights;
        let max_exposure = exposure_by_symbol.values().copied().fold(0.0, f64::max);
        let var_c = (portfolio_var_95 / params.var_cap_pct).clamp(0.0, 1.0);
        let dd_c = (current_drawdown / params.drawdown_cap_pct).clamp(0.0, 1.0);
        let conc_c = (max_exposure / settings.rebalance.max_symbol_exposure_pct).clamp(0.0, 1.0);
        let composite_score = finite_or(
            100.0
                * (cw.var * var_c
                    + cw.drawdown * dd_c
                    + cw.correlation * correlation_score
                    + cw.concentration * conc_c),
            0.0,
        )
        .clamp(0.0, 100.0);
        let risk_level = RiskLevel::classify(composite_score, &params.level_thresholds);

        RiskAssessment {
            metrics: RiskMetrics {
                portfolio_var_95,
                max_drawdown,
                current_drawdown,
                sharpe_ratio,
                win_rate,
                profit_factor,
                correlation_score,
                exposure_by_symbol,
                gross_leverage,
                composite_score,
                risk_level,
                num_positions: snapshot.positions.len(),
                stale: snapshot.stale,
                flags,
            },
            position_scores,
            volatilities,
            gross_exposure_pct,
            symbol_correlation,
            correlation_contribution,
        }
    }

    /// Sample volatility, or the configured fallback below the minimum sample
    /// size.
    pub fn volatility(samples: &[f64], settings: &AdaptiveSettings) -> SymbolVolatility {
        let params = &settings.risk;
        if samples.len() < params.min_samples {
            return SymbolVolatility {
                value: params.fallback_volatility,
                samples: samples.len(),
                fallback: true,
            };
        }
        match sample_std_dev(samples) {
            Some(sd) => SymbolVolatility {
                value: sd.max(params.volatility_floor),
                samples: samples.len(),
                fallback: false,
            },
            None => SymbolVolatility {
                value: params.fallback_volatility,
                samples: samples.len(),
                fallback: true,
            },
        }
    }

    /// Number of samples in a year of market time at the given interval.
    pub fn periods_per_year(sample_interval_secs: f64, settings: &AdaptiveSettings) -> Option<f64> {
        let periods = settings.risk.trading_seconds_per_year / sample_interval_secs;
        (periods.is_finite() && periods >= 1.0).then_some(periods)
    }

    /// Annualized Sharpe ratio of returns sampled every `sample_interval_secs`.
    pub fn sharpe(returns: &[f64], sample_interval_secs: f64, settings: &AdaptiveSettings) -> Option<f64> {
        let params = &settings.risk;
        if returns.len() < params.min_samples {
            return None;
        }
        let periods_per_year = Self::periods_per_year(sample_interval_secs, settings)?;
        let m = mean(returns)?;
        let sd = sample_std_dev(returns)?;
        if sd <= f64::EPSILON {
            return None;
        }
        let rf = params.risk_free_rate / periods_per_year;
        let s = (m - rf) / sd * periods_per_year.sqrt();
        s.is_finite().then_some(s)
    }

    fn trade_stats(outcomes: &[TradeOutcome], open: &[Position], cap: f64) -> (f64, f64) {
        let pnls: Vec<f64> = outcomes
            .iter()
            .map(|o| o.pnl)
            .chain(open.iter().map(|p| p.unrealized_pnl))
            .filter_map(|d| d.to_f64())
            .filter(|v| v.is_finite())
            .collect();
        if pnls.is_empty() {
            return (0.0, 0.0);
        }

        let wins = pnls.iter().filter(|p| **p > 0.0).count();
        let win_rate = (wins as f64 / pnls.len() as f64 * 100.0).clamp(0.0, 100.0);

        let gross_profit: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
        let gross_loss: f64 = -pnls.iter().filter(|p| **p < 0.0).sum::<f64>();
        let profit_factor = if gross_loss > 0.0 {
            finite_or(gross_profit / gross_loss, cap).min(cap)
        } else if gross_profit > 0.0 {
            cap
        } else {
            0.0
        };
        (win_rate, profit_factor)
    }

    fn position_score(
        pos: &Position,
        vol: SymbolVolatility,
        correlation: f64,
        equity: f64,
        settings: &AdaptiveSettings,
    ) -> PositionRiskScore {
        let params = &settings.risk;
        let sigma = vol.value.max(params.volatility_floor);

        let stop_component = match pos.stop_loss {
            None => 1.0,
            Some(stop) => {
                let current = pos.current_price.to_f64().unwrap_or(0.0);
                let stop = stop.to_f64().unwrap_or(0.0);
                if current <= 0.0 {
                    1.0
                } else {
                    let distance = pos.direction.sign_f64() * (current - stop) / current;
                    if distance <= 0.0 {
                        0.0
                    } else {
                        finite_or(distance / sigma / params.stop_sigma_cap, 1.0).clamp(0.0, 1.0)
                    }
                }
            }
        };

        let notional = pos.notional().to_f64().unwrap_or(0.0);
        let size_component =
            finite_or(notional / equity / params.size_ratio_cap, 1.0).clamp(0.0, 1.0);
        let correlation_component = finite_or(correlation, 0.0).clamp(0.0, 1.0);

        let w = &params.position_weights;
        let score = finite_or(
            100.0
                * (w.stop_distance * stop_component
                    + w.size * size_component
                    + w.correlation * correlation_component),
            100.0,
        )
        .clamp(0.0, 100.0);

        PositionRiskScore {
            position_id: pos.id.clone(),
            symbol: pos.symbol.clone(),
            score,
            stop_component,
            size_component,
            correlation_component,
            volatility: vol,
            r_multiple: pos.r_multiple().filter(|r| r.is_finite()),
        }
    }
}
