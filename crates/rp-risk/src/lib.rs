//! Risk metrics, alerting and portfolio health scoring for RiskPilot.
//!
//! Provides:
//! - Portfolio-level risk assessment (parametric VaR, drawdown, Sharpe,
//!   correlation, exposure) and per-position risk scores
//! - Declarative alert rules with deduplication, cooldown and escalation
//! - A composite portfolio health score for reporting

pub mod alerts;
pub mod analyzer;
pub mod manager;
pub mod metrics;
pub mod stats;

pub use alerts::{
    default_rules, Alert, AlertKind, AlertRule, AlertTrigger, Comparator, RuleMetric, Severity,
};
pub use analyzer::{HealthComponents, HealthGrade, PortfolioAnalysis, PortfolioAnalyzer};
pub use manager::AlertManager;
pub use metrics::{
    MetricFlag, PositionRiskScore, RiskAssessment, RiskCalculator, RiskInputs, RiskLevel,
    RiskMetrics, SymbolVolatility,
};
