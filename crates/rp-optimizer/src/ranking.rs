//! Suggestion priority and ordering.

use std::cmp::Ordering;

use rp_types::{OptimizationSuggestion, RankingWeights};

/// `100 × (w_c·confidence + w_i·improvement/100 + w_r·risk/100)`, each
/// input clamped to its unit range.
pub fn priority(confidence: f64, expected_improvement: f64, risk_score: f64, weights: &RankingWeights) -> f64 {
    let unit = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
    let p = 100.0
        * (weights.confidence * unit(confidence)
            + weights.improvement * unit(expected_improvement / 100.0)
            + weights.risk * unit(risk_score / 100.0));
    p.clamp(0.0, 100.0)
}

fn compare(a: &OptimizationSuggestion, b: &OptimizationSuggestion) -> Ordering {
    b.priority
        .total_cmp(&a.priority)
        .then_with(|| a.position_opened_at.cmp(&b.position_opened_at))
        .then_with(|| a.position_id.cmp(&b.position_id))
        .then_with(|| a.adjustment_type.cmp(&b.adjustment_type))
}

/// Sort descending by priority; ties go to the earliest-opened position.
pub fn rank(suggestions: &mut [OptimizationSuggestion]) {
    suggestions.sort_by(compare);
}
