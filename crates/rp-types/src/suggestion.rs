//! Optimization suggestion types shared by the optimizer, the alert layer and
//! the query surface.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::market::Symbol;

/// Kind of adjustment a suggestion proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentType {
    SizeScale,
    StopLossMove,
    TakeProfitMove,
    PartialClose,
    Rebalance,
}

impl AdjustmentType {
    pub const ALL: [AdjustmentType; 5] = [
        AdjustmentType::SizeScale,
        AdjustmentType::StopLossMove,
        AdjustmentType::TakeProfitMove,
        AdjustmentType::PartialClose,
        AdjustmentType::Rebalance,
    ];
}

impl fmt::Display for AdjustmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdjustmentType::SizeScale => "SIZE_SCALE",
            AdjustmentType::StopLossMove => "STOP_LOSS_MOVE",
            AdjustmentType::TakeProfitMove => "TAKE_PROFIT_MOVE",
            AdjustmentType::PartialClose => "PARTIAL_CLOSE",
            AdjustmentType::Rebalance => "REBALANCE",
        };
        write!(f, "{}", s)
    }
}

/// Where a suggestion is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuggestionStatus {
    /// Active and awaiting a decision.
    Pending,
    /// Accepted by an operator; the external actuator is expected to execute it.
    Accepted,
    /// Rejected by an operator.
    Rejected,
}

/// A single recommended adjustment for one position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSuggestion {
    pub id: Uuid,
    pub position_id: String,
    pub symbol: Symbol,
    pub adjustment_type: AdjustmentType,
    pub current_value: Decimal,
    pub recommended_value: Decimal,
    /// Confidence in the recommendation, within [0, 1].
    pub confidence: f64,
    pub reasoning: String,
    /// Expected improvement of the position's risk posture, in percent.
    pub expected_improvement: f64,
    /// Ranking priority within [0, 100]; assigned by the ranker.
    pub priority: f64,
    pub status: SuggestionStatus,
    pub created_at: DateTime<Utc>,
    /// Open time of the related position; used as the ranking tie-breaker.
    pub position_opened_at: DateTime<Utc>,
}

impl OptimizationSuggestion {
    /// Lifecycle key: at most one active suggestion exists per key.
    pub fn key(&self) -> (String, AdjustmentType) {
        (self.position_id.clone(), self.adjustment_type)
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.created_at >= ttl
    }
}
