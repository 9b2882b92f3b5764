//! Optimization engine: candidate generation and suggestion lifecycle.
//!
//! [`OptimizationEngine::candidates`] is pure given the engine's ledger; it
//! reads the same snapshot and assessment the risk calculator produced for
//! this tick. [`OptimizationEngine::update`] offers the candidates to the
//! [`SuggestionBook`] and keeps the [`StopLedger`] in step with what is
//! active.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use rp_data::PositionSnapshot;
use rp_risk::stats::{aligned_share, finite_or};
use rp_risk::{RiskAssessment, SymbolVolatility};
use rp_types::{
    AccountInfo, AdaptiveSettings, AdjustmentType, CommandError, Direction, OptimizationSuggestion,
    SuggestionStatus, Symbol,
};

use crate::book::{OfferOutcome, SuggestionBook};
use crate::policy::{scale_out, take_profit, trailing_stop, StopLedger};
use crate::ranking::{priority, rank};
use crate::rebalance::rebalance;
use crate::sizing::optimal_size;

/// Borrowed inputs of one optimization pass.
#[derive(Debug, Clone, Copy)]
pub struct OptimizationInputs<'a> {
    pub snapshot: &'a PositionSnapshot,
    pub assessment: &'a RiskAssessment,
    pub returns: &'a BTreeMap<Symbol, Vec<f64>>,
    pub account: &'a AccountInfo,
    pub settings: &'a AdaptiveSettings,
}

/// A suggestion before it is given an id and a creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub position_id: String,
    pub symbol: Symbol,
    pub direction: Direction,
    pub adjustment_type: AdjustmentType,
    pub current_value: Decimal,
    pub recommended_value: Decimal,
    pub confidence: f64,
    pub reasoning: String,
    pub expected_improvement: f64,
    pub priority: f64,
    pub position_opened_at: DateTime<Utc>,
    /// Ladder rung, for partial closes.
    pub rung: Option<usize>,
}

impl Candidate {
    pub fn into_suggestion(self, now: DateTime<Utc>) -> OptimizationSuggestion {
        OptimizationSuggestion {
            id: Uuid::new_v4(),
            position_id: self.position_id,
            symbol: self.symbol,
            adjustment_type: self.adjustment_type,
            current_value: self.current_value,
            recommended_value: self.recommended_value,
            confidence: self.confidence,
            reasoning: self.reasoning,
            expected_improvement: self.expected_improvement,
            priority: self.priority,
            status: SuggestionStatus::Pending,
            created_at: now,
            position_opened_at: self.position_opened_at,
        }
    }
}

/// Confidence in a position's statistics, within [0, 1]: history adequacy
/// scaled by how consistently recent returns favour the position, halved
/// when volatility fell back to the default.
pub fn position_confidence(
    samples: usize,
    returns: &[f64],
    direction: Direction,
    volatility_fallback: bool,
    settings: &AdaptiveSettings,
) -> f64 {
    let full = settings.sizing.full_confidence_samples.max(1) as f64;
    let adequacy = (samples as f64 / full).min(1.0);
    let trend = aligned_share(returns, direction.sign_f64(), settings.take_profit.trend_window)
        .unwrap_or(0.0);
    let mut confidence = adequacy * (0.5 + 0.5 * trend);
    if volatility_fallback {
        confidence *= 0.5;
    }
    finite_or(confidence, 0.0).clamp(0.0, 1.0)
}

fn unit_pct(ratio: Option<f64>) -> f64 {
    ratio
        .map(|r| finite_or(r * 100.0, 0.0).clamp(0.0, 100.0))
        .unwrap_or(0.0)
}

fn ratio(num: Decimal, den: Decimal) -> Option<f64> {
    if den.is_zero() {
        return None;
    }
    (num / den).to_f64()
}

#[derive(Debug, Default)]
pub struct OptimizationEngine {
    book: SuggestionBook,
    ledger: StopLedger,
}

impl OptimizationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// All candidates for this tick, in snapshot order. None on a stale
    /// snapshot.
    pub fn candidates(&self, inputs: &OptimizationInputs<'_>) -> Vec<Candidate> {
        let snapshot = inputs.snapshot;
        if snapshot.stale {
            return Vec::new();
        }
        let settings = inputs.settings;

        let mut confidences: BTreeMap<&str, f64> = BTreeMap::new();
        let mut out = Vec::new();

        for pos in &snapshot.positions {
            let vol = inputs
                .assessment
                .volatilities
                .get(&pos.symbol)
                .copied()
                .unwrap_or(SymbolVolatility {
                    value: settings.risk.fallback_volatility,
                    samples: 0,
                    fallback: true,
                });
            let returns = inputs.returns.get(&pos.symbol).map(Vec::as_slice).unwrap_or(&[]);
            let confidence = position_confidence(vol.samples, returns, pos.direction, vol.fallback, settings);
            confidences.insert(pos.id.as_str(), confidence);

            let risk_score = inputs
                .assessment
                .position_scores
                .get(&pos.id)
                .map_or(0.0, |s| s.score);
            let candidate = |kind: AdjustmentType,
                             current: Decimal,
                             recommended: Decimal,
                             improvement: f64,
                             reasoning: String,
                             rung: Option<usize>| Candidate {
                position_id: pos.id.clone(),
                symbol: pos.symbol.clone(),
                direction: pos.direction,
                adjustment_type: kind,
                current_value: current,
                recommended_value: recommended,
                confidence,
                reasoning,
                expected_improvement: improvement,
                priority: priority(confidence, improvement, risk_score, &settings.ranking),
                position_opened_at: pos.opened_at,
                rung,
            };

            // size
            let sizing = optimal_size(inputs.account.equity, pos.stop_distance_per_lot(), confidence, settings);
            let diff = unit_pct(ratio((sizing.size - pos.size).abs(), pos.size));
            if diff > settings.sizing.size_tolerance_pct {
                let basis = if sizing.stop_based {
                    format!("{}% equity risk at stop", settings.risk_percent_per_trade)
                } else {
                    "base lot (no stop)".to_string()
                };
                out.push(candidate(
                    AdjustmentType::SizeScale,
                    pos.size,
                    sizing.size,
                    diff,
                    format!("{} gives {} lots x{:.2} confidence multiplier", basis, sizing.base.round_dp(4), sizing.multiplier),
                    None,
                ));
            }

            // stop
            if let Some(stop) = trailing_stop(pos, vol.value, &self.ledger, &settings.trailing) {
                let improvement = match stop.previous {
                    Some(prev) => unit_pct(ratio(
                        pos.direction.sign() * (stop.stop - prev),
                        pos.direction.sign() * (pos.current_price - prev),
                    )),
                    None => 100.0,
                };
                let reasoning = match stop.locked_r {
                    Some(r) if r == 0.0 => "profit reached breakeven threshold; move stop to entry".to_string(),
                    Some(r) => format!("trail stop to lock in {:.2}R", r),
                    None => format!(
                        "no stop set; protective stop {}σ from price",
                        settings.trailing.protective_sigma_multiple
                    ),
                };
                out.push(candidate(
                    AdjustmentType::StopLossMove,
                    stop.previous.unwrap_or(Decimal::ZERO),
                    stop.stop,
                    improvement,
                    reasoning,
                    None,
                ));
            }

            // target
            if let Some(tp) = take_profit(pos, returns, &settings.take_profit) {
                let improvement = unit_pct(ratio((tp.target - tp.previous).abs(), (tp.previous - pos.entry_price).abs()));
                out.push(candidate(
                    AdjustmentType::TakeProfitMove,
                    tp.previous,
                    tp.target,
                    improvement,
                    format!("{:.0}% of recent returns favour the position; extend target", tp.trend_strength * 100.0),
                    None,
                ));
            }

            // scale-out
            if let Some(sc) = scale_out(pos, &self.ledger, &settings.take_profit, settings.lot_step, settings.min_lot) {
                out.push(candidate(
                    AdjustmentType::PartialClose,
                    pos.size,
                    sc.remaining_size,
                    unit_pct(ratio(sc.close_size, pos.size)),
                    format!("{:.1}R reached; close {} lots", sc.r_multiple, sc.close_size),
                    Some(sc.rung),
                ));
            }
        }

        for proposal in rebalance(snapshot, inputs.assessment, settings) {
            let Some(pos) = snapshot.get(&proposal.position_id) else {
                continue;
            };
            let confidence = confidences.get(pos.id.as_str()).copied().unwrap_or(0.0);
            let risk_score = inputs
                .assessment
                .position_scores
                .get(&pos.id)
                .map_or(0.0, |s| s.score);
            out.push(Candidate {
                position_id: pos.id.clone(),
                symbol: pos.symbol.clone(),
                direction: pos.direction,
                adjustment_type: AdjustmentType::Rebalance,
                current_value: proposal.current_size,
                recommended_value: proposal.target_size,
                confidence,
                reasoning: proposal.reason,
                expected_improvement: proposal.reduction_pct,
                priority: priority(confidence, proposal.reduction_pct, risk_score, &settings.ranking),
                position_opened_at: pos.opened_at,
                rung: None,
            });
        }

        out
    }

    /// Run one tick: expire, forget closed positions, offer fresh candidates.
    /// Returns the ranked active suggestions.
    pub fn update(&mut self, inputs: &OptimizationInputs<'_>, now: DateTime<Utc>) -> Vec<OptimizationSuggestion> {
        let expired = self.book.expire(now, inputs.settings.suggestion_ttl());
        if !expired.is_empty() {
            debug!(count = expired.len(), "suggestions expired");
        }

        let held: BTreeSet<String> = inputs.snapshot.positions.iter().map(|p| p.id.clone()).collect();
        let dropped = self.book.retain_positions(&held);
        if dropped > 0 {
            debug!(count = dropped, "suggestions dropped for closed positions");
        }
        self.ledger.retain(&held);

        if inputs.snapshot.stale {
            info!("stale snapshot; no new suggestions this tick");
            return self.suggestions();
        }

        for candidate in self.candidates(inputs) {
            let position_id = candidate.position_id.clone();
            let direction = candidate.direction;
            let kind = candidate.adjustment_type;
            let value = candidate.recommended_value;
            let rung = candidate.rung;

            let outcome = self.book.offer(candidate.into_suggestion(now));
            if outcome == OfferOutcome::Dropped {
                continue;
            }
            match kind {
                AdjustmentType::StopLossMove => {
                    self.ledger.record_recommended_stop(&position_id, direction, value)
                }
                AdjustmentType::PartialClose => {
                    if let Some(rung) = rung {
                        self.ledger.record_pending_rung(&position_id, rung);
                    }
                }
                AdjustmentType::SizeScale
                | AdjustmentType::TakeProfitMove
                | AdjustmentType::Rebalance => {}
            }
        }

        self.suggestions()
    }

    /// Active suggestions, ranked.
    pub fn suggestions(&self) -> Vec<OptimizationSuggestion> {
        let mut list = self.book.active();
        rank(&mut list);
        list
    }

    /// Accept a suggestion. The ledger remembers accepted stops and taken
    /// rungs; nothing is sent to a broker.
    pub fn apply(&mut self, id: Uuid) -> Result<OptimizationSuggestion, CommandError> {
        let accepted = self.book.apply(id)?;
        match accepted.adjustment_type {
            AdjustmentType::StopLossMove => {
                if let Some(direction) = self.ledger.direction(&accepted.position_id) {
                    self.ledger.record_accepted_stop(&accepted.position_id, direction, accepted.recommended_value);
                }
            }
            AdjustmentType::PartialClose => {
                self.ledger.accept_pending_rung(&accepted.position_id);
            }
            AdjustmentType::SizeScale | AdjustmentType::TakeProfitMove | AdjustmentType::Rebalance => {}
        }
        info!(
            suggestion_id = %id,
            position_id = %accepted.position_id,
            adjustment = %accepted.adjustment_type,
            recommended = %accepted.recommended_value,
            "suggestion accepted"
        );
        Ok(accepted)
    }

    pub fn reject(&mut self, id: Uuid) -> Result<OptimizationSuggestion, CommandError> {
        let rejected = self.book.reject(id)?;
        info!(suggestion_id = %id, position_id = %rejected.position_id, "suggestion rejected");
        Ok(rejected)
    }

    pub fn ledger(&self) -> &StopLedger {
        &self.ledger
    }

    pub fn reset(&mut self) {
        self.book.clear();
        self.ledger.clear();
    }
}
