//! Risk-based position sizing.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use rp_types::AdaptiveSettings;

/// Output of [`optimal_size`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeRecommendation {
    /// Size before confidence scaling.
    pub base: Decimal,
    pub multiplier: f64,
    /// Scaled, rounded down to the lot step and clamped to the lot limits.
    pub size: Decimal,
    /// `false` when the base came from `base_lot` because there was no stop.
    pub stop_based: bool,
}

/// `(equity × risk%) / stop distance`. `None` for a non-positive distance or
/// equity.
///
/// # Arguments
/// * `equity` - Account equity in account currency
/// * `risk_percent` - Equity risked per trade, in percent (2.0 = 2%)
/// * `stop_distance` - Loss per lot in account currency if the stop is hit
pub fn base_size(equity: Decimal, risk_percent: f64, stop_distance: Decimal) -> Option<Decimal> {
    if equity <= Decimal::ZERO || stop_distance <= Decimal::ZERO {
        return None;
    }
    let risk = Decimal::from_f64(risk_percent)? / Decimal::ONE_HUNDRED;
    equity.checked_mul(risk)?.checked_div(stop_distance)
}

/// Round down to a multiple of `step`. Values too large to divide by `step`
/// are already coarser than the step and come back unchanged.
pub fn round_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    value
        .checked_div(step)
        .and_then(|steps| steps.floor().checked_mul(step))
        .unwrap_or(value)
}

/// Base size scaled by the confidence multiplier and fitted to the lot
/// limits. Pure.
#[must_use]
pub fn optimal_size(
    equity: Decimal,
    stop_distance: Option<Decimal>,
    confidence: f64,
    settings: &AdaptiveSettings,
) -> SizeRecommendation {
    let multiplier = settings.confidence_multiplier_range.at(confidence);
    let stop_base = stop_distance.and_then(|d| base_size(equity, settings.risk_percent_per_trade, d));
    let stop_based = stop_base.is_some();
    let base = stop_base.unwrap_or(settings.base_lot);

    let scaled = Decimal::from_f64(multiplier)
        .and_then(|m| base.checked_mul(m))
        .unwrap_or(settings.max_lot_per_order);
    let size = round_to_step(scaled, settings.lot_step)
        .max(settings.min_lot)
        .min(settings.max_lot_per_order);

    SizeRecommendation {
        base,
        multiplier,
        size,
        stop_based,
    }
}
