//! Alert types, severity levels and declarative alert rules.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rp_data::PositionSnapshot;
use rp_types::{AdaptiveSettings, AdjustmentType};

use crate::metrics::{RiskAssessment, RiskMetrics};

/// Severity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Informational, no limit involved.
    Info,
    /// Approaching or at a configured limit.
    Warning,
    /// Limit breached; action required.
    Critical,
    /// A critical condition that has persisted.
    Emergency,
}

impl Severity {
    /// One level up. Info never escalates; Emergency is the ceiling.
    pub fn escalate(self) -> Self {
        match self {
            Severity::Info => Severity::Info,
            Severity::Warning => Severity::Critical,
            Severity::Critical | Severity::Emergency => Severity::Emergency,
        }
    }

    pub fn escalated(self, steps: u32) -> Self {
        (0..steps).fold(self, |s, _| s.escalate())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
            Severity::Emergency => "EMERGENCY",
        };
        write!(f, "{}", s)
    }
}

/// What an alert is about. Together with the position id this is the
/// deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    /// A named rule matched.
    Rule { name: String },
    /// A high-priority optimization suggestion is waiting.
    Suggestion { adjustment: AdjustmentType },
    /// The position feed could not be read.
    StaleData,
}

/// A single alert as exposed to the query surface and the outbound channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub action_required: bool,
    /// First emission of this alert id.
    pub timestamp: DateTime<Utc>,
    pub position_id: Option<String>,
    /// Number of ticks on which the condition was observed under this id.
    pub occurrences: u32,
    pub last_seen: DateTime<Utc>,
}

impl Alert {
    pub fn from_trigger(trigger: &AlertTrigger, severity: Severity, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: trigger.kind.clone(),
            severity,
            message: trigger.message.clone(),
            action_required: trigger.action_required,
            timestamp: now,
            position_id: trigger.position_id.clone(),
            occurrences: 1,
            last_seen: now,
        }
    }
}

/// A condition observed during one tick, before deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertTrigger {
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub action_required: bool,
    pub position_id: Option<String>,
}

impl AlertTrigger {
    pub fn key(&self) -> (AlertKind, Option<String>) {
        (self.kind.clone(), self.position_id.clone())
    }
}

/// Metric a rule is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleMetric {
    VarPct,
    MaxDrawdownPct,
    CurrentDrawdownPct,
    CorrelationScore,
    CompositeScore,
    SharpeRatio,
    WinRatePct,
    OpenPositions,
    GrossLeverage,
    // per position
    PositionRiskScore,
    SymbolExposurePct,
    PositionLossPct,
}

impl RuleMetric {
    pub fn is_per_position(self) -> bool {
        matches!(
            self,
            RuleMetric::PositionRiskScore | RuleMetric::SymbolExposurePct | RuleMetric::PositionLossPct
        )
    }

    fn label(self) -> &'static str {
        match self {
            RuleMetric::VarPct => "VaR",
            RuleMetric::MaxDrawdownPct => "max drawdown",
            RuleMetric::CurrentDrawdownPct => "drawdown",
            RuleMetric::CorrelationScore => "correlation score",
            RuleMetric::CompositeScore => "composite risk score",
            RuleMetric::SharpeRatio => "Sharpe ratio",
            RuleMetric::WinRatePct => "win rate",
            RuleMetric::OpenPositions => "open positions",
            RuleMetric::GrossLeverage => "gross leverage",
            RuleMetric::PositionRiskScore => "risk score",
            RuleMetric::SymbolExposurePct => "symbol exposure",
            RuleMetric::PositionLossPct => "loss",
        }
    }

    fn portfolio_value(self, metrics: &RiskMetrics) -> Option<f64> {
        let v = match self {
            RuleMetric::VarPct => metrics.portfolio_var_95,
            RuleMetric::MaxDrawdownPct => metrics.max_drawdown,
            RuleMetric::CurrentDrawdownPct => metrics.current_drawdown,
            RuleMetric::CorrelationScore => metrics.correlation_score,
            RuleMetric::CompositeScore => metrics.composite_score,
            RuleMetric::SharpeRatio => metrics.sharpe_ratio,
            RuleMetric::WinRatePct => metrics.win_rate,
            RuleMetric::OpenPositions => metrics.num_positions as f64,
            RuleMetric::GrossLeverage => metrics.gross_leverage,
            RuleMetric::PositionRiskScore
            | RuleMetric::SymbolExposurePct
            | RuleMetric::PositionLossPct => return None,
        };
        Some(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparator {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match self {
            Comparator::Gt => value > threshold,
            Comparator::Ge => value >= threshold,
            Comparator::Lt => value < threshold,
            Comparator::Le => value <= threshold,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
        }
    }
}

/// Declarative threshold rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub metric: RuleMetric,
    pub comparator: Comparator,
    pub threshold: f64,
    pub severity: Severity,
    #[serde(default)]
    pub action_required: bool,
}

impl AlertRule {
    pub fn new(
        name: impl Into<String>,
        metric: RuleMetric,
        comparator: Comparator,
        threshold: f64,
        severity: Severity,
    ) -> Self {
        Self {
            name: name.into(),
            metric,
            comparator,
            threshold,
            severity,
            action_required: false,
        }
    }

    pub fn requiring_action(mut self) -> Self {
        self.action_required = true;
        self
    }

    /// Triggers for this rule against one tick's assessment. Portfolio rules
    /// yield at most one trigger; per-position rules one per matching
    /// position. Only the open-positions rule applies to an empty portfolio.
    pub fn evaluate(
        &self,
        assessment: &RiskAssessment,
        snapshot: &PositionSnapshot,
    ) -> Vec<AlertTrigger> {
        let metrics = &assessment.metrics;
        if metrics.num_positions == 0 && self.metric != RuleMetric::OpenPositions {
            return Vec::new();
        }

        if !self.metric.is_per_position() {
            return self
                .metric
                .portfolio_value(metrics)
                .filter(|v| self.comparator.holds(*v, self.threshold))
                .map(|v| vec![self.trigger(v, None, None)])
                .unwrap_or_default();
        }

        snapshot
            .positions
            .iter()
            .filter_map(|pos| {
                let value = match self.metric {
                    RuleMetric::PositionRiskScore => {
                        assessment.position_scores.get(&pos.id)?.score
                    }
                    RuleMetric::SymbolExposurePct => {
                        *metrics.exposure_by_symbol.get(&pos.symbol)?
                    }
                    RuleMetric::PositionLossPct => (-pos.pnl_pct).to_f64()?,
                    _ => return None,
                };
                self.comparator
                    .holds(value, self.threshold)
                    .then(|| self.trigger(value, Some(pos.id.clone()), Some(pos.symbol.as_str())))
            })
            .collect()
    }

    fn trigger(&self, value: f64, position_id: Option<String>, symbol: Option<&str>) -> AlertTrigger {
        let subject = match (&position_id, symbol) {
            (Some(id), Some(sym)) => format!("{} {} ", sym, id),
            _ => String::new(),
        };
        AlertTrigger {
            kind: AlertKind::Rule {
                name: self.name.clone(),
            },
            severity: self.severity,
            message: format!(
                "{}{} {:.2} {} {:.2}",
                subject,
                self.metric.label(),
                value,
                self.comparator.symbol(),
                self.threshold
            ),
            action_required: self.action_required,
            position_id,
        }
    }
}

/// Rule set derived from the adaptive settings; used when the configuration
/// does not supply its own rules.
pub fn default_rules(settings: &AdaptiveSettings) -> Vec<AlertRule> {
    let risk = &settings.risk;
    vec![
        AlertRule::new(
            "drawdown",
            RuleMetric::CurrentDrawdownPct,
            Comparator::Ge,
            settings.drawdown_alert_threshold,
            Severity::Warning,
        )
        .requiring_action(),
        AlertRule::new(
            "correlation",
            RuleMetric::CorrelationScore,
            Comparator::Ge,
            settings.correlation_alert_threshold,
            Severity::Warning,
        ),
        AlertRule::new(
            "open_positions",
            RuleMetric::OpenPositions,
            Comparator::Gt,
            settings.max_open_positions as f64,
            Severity::Warning,
        ),
        AlertRule::new(
            "var",
            RuleMetric::VarPct,
            Comparator::Ge,
            risk.var_cap_pct,
            Severity::Warning,
        ),
        AlertRule::new(
            "composite_risk",
            RuleMetric::CompositeScore,
            Comparator::Ge,
            risk.level_thresholds.high,
            Severity::Critical,
        )
        .requiring_action(),
        AlertRule::new(
            "position_risk",
            RuleMetric::PositionRiskScore,
            Comparator::Ge,
            risk.level_thresholds.high,
            Severity::Warning,
        ),
        AlertRule::new(
            "symbol_exposure",
            RuleMetric::SymbolExposurePct,
            Comparator::Gt,
            settings.rebalance.max_symbol_exposure_pct,
            Severity::Warning,
        ),
    ]
}
