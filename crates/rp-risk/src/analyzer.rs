//! Portfolio health score for reporting.

use serde::{Deserialize, Serialize};

use rp_types::AdaptiveSettings;

use crate::metrics::RiskMetrics;
use crate::stats::finite_or;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthGrade {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl HealthGrade {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            HealthGrade::Excellent
        } else if score >= 60.0 {
            HealthGrade::Good
        } else if score >= 40.0 {
            HealthGrade::Fair
        } else {
            HealthGrade::Poor
        }
    }
}

/// Normalized inputs of the health score, each within [0, 1] where 1 is
/// healthiest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthComponents {
    pub sharpe: f64,
    pub drawdown: f64,
    pub win_rate: f64,
    pub diversification: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioAnalysis {
    /// 0-100.
    pub health_score: f64,
    pub grade: HealthGrade,
    pub components: HealthComponents,
}

pub struct PortfolioAnalyzer;

impl PortfolioAnalyzer {
    /// Weighted blend of risk-adjusted return, drawdown headroom, hit rate
    /// and diversification. Pure.
    pub fn analyze(metrics: &RiskMetrics, settings: &AdaptiveSettings) -> PortfolioAnalysis {
        let w = &settings.analyzer;
        let unit = |v: f64| finite_or(v, 0.0).clamp(0.0, 1.0);

        let components = HealthComponents {
            sharpe: if w.sharpe_target > 0.0 {
                unit(metrics.sharpe_ratio / w.sharpe_target)
            } else {
                0.0
            },
            drawdown: unit(1.0 - metrics.current_drawdown / settings.risk.drawdown_cap_pct),
            win_rate: unit(metrics.win_rate / 100.0),
            diversification: unit(1.0 - metrics.correlation_score),
        };

        let total = w.sharpe + w.drawdown + w.win_rate + w.diversification;
        let blended = w.sharpe * components.sharpe
            + w.drawdown * components.drawdown
            + w.win_rate * components.win_rate
            + w.diversification * components.diversification;
        let health_score = if total > 0.0 {
            finite_or(100.0 * blended / total, 0.0).clamp(0.0, 100.0)
        } else {
            0.0
        };

        PortfolioAnalysis {
            health_score,
            grade: HealthGrade::from_score(health_score),
            components,
        }
    }
}
