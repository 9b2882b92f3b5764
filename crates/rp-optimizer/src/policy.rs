//! Stop-loss trailing, take-profit widening and scale-out ladder policies.
//!
//! Stop recommendations are monotonic: a candidate is only proposed when it
//! is strictly more protective than the effective stop, which is the most
//! protective of the position's current stop and every stop previously
//! accepted or recommended for it. Confidence never enters this check.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use rp_risk::stats::aligned_share;
use rp_types::{Direction, Position, TakeProfitParams, TrailingParams};

const PRICE_DP: u32 = 8;

/// `true` when `a` protects more than `b` for a position in `direction`.
fn more_protective(direction: Direction, a: Decimal, b: Decimal) -> bool {
    match direction {
        Direction::Long => a > b,
        Direction::Short => a < b,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct LedgerEntry {
    direction: Option<Direction>,
    accepted_stop: Option<Decimal>,
    recommended_stop: Option<Decimal>,
    /// Rung index of the outstanding partial-close suggestion.
    pending_rung: Option<usize>,
    /// Number of ladder rungs already accepted.
    rungs_taken: usize,
}

/// Per-position memory of stop and scale-out decisions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StopLedger {
    entries: BTreeMap<String, LedgerEntry>,
}

impl StopLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most protective of the position's own stop and every stop accepted or
    /// recommended for it.
    pub fn effective_stop(&self, position: &Position) -> Option<Decimal> {
        let entry = self.entries.get(&position.id);
        [
            position.stop_loss,
            entry.and_then(|e| e.accepted_stop),
            entry.and_then(|e| e.recommended_stop),
        ]
        .into_iter()
        .flatten()
        .reduce(|a, b| {
            if more_protective(position.direction, b, a) {
                b
            } else {
                a
            }
        })
    }

    pub fn record_recommended_stop(&mut self, position_id: &str, direction: Direction, stop: Decimal) {
        let entry = self.entries.entry(position_id.to_string()).or_default();
        entry.direction = Some(direction);
        match entry.recommended_stop {
            Some(prev) if !more_protective(direction, stop, prev) => {}
            _ => entry.recommended_stop = Some(stop),
        }
    }

    pub fn record_accepted_stop(&mut self, position_id: &str, direction: Direction, stop: Decimal) {
        let entry = self.entries.entry(position_id.to_string()).or_default();
        entry.direction = Some(direction);
        match entry.accepted_stop {
            Some(prev) if !more_protective(direction, stop, prev) => {}
            _ => entry.accepted_stop = Some(stop),
        }
    }

    pub fn record_pending_rung(&mut self, position_id: &str, rung: usize) {
        self.entries.entry(position_id.to_string()).or_default().pending_rung = Some(rung);
    }

    /// Mark the outstanding partial close as taken. Returns the rung index.
    pub fn accept_pending_rung(&mut self, position_id: &str) -> Option<usize> {
        let entry = self.entries.get_mut(position_id)?;
        let rung = entry.pending_rung.take()?;
        entry.rungs_taken = entry.rungs_taken.max(rung + 1);
        Some(rung)
    }

    pub fn rungs_taken(&self, position_id: &str) -> usize {
        self.entries.get(position_id).map_or(0, |e| e.rungs_taken)
    }

    /// Direction of the position as of its last recorded stop.
    pub fn direction(&self, position_id: &str) -> Option<Direction> {
        self.entries.get(position_id).and_then(|e| e.direction)
    }

    pub fn accepted_stop(&self, position_id: &str) -> Option<Decimal> {
        self.entries.get(position_id).and_then(|e| e.accepted_stop)
    }

    /// Forget positions that are no longer held.
    pub fn retain(&mut self, held: &BTreeSet<String>) {
        self.entries.retain(|id, _| held.contains(id));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopProposal {
    pub stop: Decimal,
    /// Stop currently in force (position or ledger), if any.
    pub previous: Option<Decimal>,
    /// R-multiple of profit the stop locks in; `None` for a protective stop.
    pub locked_r: Option<f64>,
    pub protective: bool,
}

/// Next stop for `position`, or `None` when nothing tighter is warranted.
///
/// Once profit reaches `breakeven_r` the stop trails `trail_gap_r` behind
/// the current R-multiple (breakeven at exactly `breakeven_r` with the
/// default gap of 1R). A position without any stop gets a protective stop
/// `protective_sigma_multiple` volatilities from the current price.
pub fn trailing_stop(
    position: &Position,
    sigma: f64,
    ledger: &StopLedger,
    params: &TrailingParams,
) -> Option<StopProposal> {
    let sign = position.direction.sign();
    let effective = ledger.effective_stop(position);

    let trailed = match (position.initial_risk_distance(), position.r_multiple()) {
        (Some(risk), Some(r)) if r.is_finite() && r >= params.breakeven_r => {
            let locked = (r - params.trail_gap_r).max(0.0);
            let stop = position
                .entry_price
                .checked_add(sign * Decimal::from_f64(locked)?.checked_mul(risk)?)?;
            Some((stop, Some(locked)))
        }
        _ => None,
    };

    let (stop, locked_r, protective) = match trailed {
        Some((stop, locked)) => (stop, locked, false),
        None if effective.is_none() && sigma.is_finite() && sigma > 0.0 => {
            let distance = Decimal::from_f64(params.protective_sigma_multiple * sigma)?
                .checked_mul(position.current_price)?;
            (position.current_price.checked_sub(sign * distance)?, None, true)
        }
        None => return None,
    };
    let stop = stop.round_dp(PRICE_DP);

    if stop <= Decimal::ZERO {
        return None;
    }
    // Never at or through the market.
    if !more_protective(position.direction, position.current_price, stop) {
        return None;
    }
    if let Some(current) = effective {
        if !more_protective(position.direction, stop, current) {
            return None;
        }
    }

    Some(StopProposal {
        stop,
        previous: effective,
        locked_r,
        protective,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitProposal {
    pub target: Decimal,
    pub previous: Decimal,
    /// Share of recent returns aligned with the position.
    pub trend_strength: f64,
}

/// Widen the take-profit of a profitable position riding a persistent trend.
/// Never narrows.
pub fn take_profit(
    position: &Position,
    returns: &[f64],
    params: &TakeProfitParams,
) -> Option<TakeProfitProposal> {
    let current = position.take_profit?;
    let risk = position.initial_risk_distance()?;
    if position.favourable_move() <= Decimal::ZERO || returns.len() < params.trend_window {
        return None;
    }

    let strength = aligned_share(returns, position.direction.sign_f64(), params.trend_window)?;
    if strength < params.trend_threshold {
        return None;
    }

    let extension = Decimal::from_f64(params.extension_r)?.checked_mul(risk)?;
    let target = current
        .checked_add(position.direction.sign() * extension)?
        .round_dp(PRICE_DP);
    more_protective(position.direction, target, current).then_some(TakeProfitProposal {
        target,
        previous: current,
        trend_strength: strength,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleOutProposal {
    pub rung: usize,
    pub r_multiple: f64,
    pub close_size: Decimal,
    pub remaining_size: Decimal,
}

/// Partial close for the highest ladder rung reached and not yet taken.
/// Sizes are rounded down to `lot_step`; closes below `min_lot` are skipped.
pub fn scale_out(
    position: &Position,
    ledger: &StopLedger,
    params: &TakeProfitParams,
    lot_step: Decimal,
    min_lot: Decimal,
) -> Option<ScaleOutProposal> {
    let r = position.r_multiple().filter(|r| r.is_finite())?;
    let taken = ledger.rungs_taken(&position.id);

    let (index, rung) = params
        .scale_out
        .iter()
        .enumerate()
        .rev()
        .find(|(i, rung)| *i >= taken && r >= rung.r_multiple)?;

    let fraction = Decimal::from_f64(rung.close_fraction)?;
    let close_size = crate::sizing::round_to_step(position.size.checked_mul(fraction)?, lot_step);
    if close_size < min_lot || close_size >= position.size {
        return None;
    }

    Some(ScaleOutProposal {
        rung: index,
        r_multiple: rung.r_multiple,
        close_size,
        remaining_size: position.size - close_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rp_types::{PositionRecord, ScaleOutRung, Symbol};
    use rust_decimal_macros::dec;

    fn position(direction: Direction, entry: Decimal, current: Decimal, stop: Option<Decimal>) -> Position {
        let rec = PositionRecord {
            id: "p1".into(),
            symbol: Symbol::new("EURUSD"),
            direction,
            size: Some(dec!(1)),
            entry_price: Some(entry),
            current_price: Some(current),
            stop_loss: stop,
            take_profit: Some(match direction {
                Direction::Long => entry + dec!(20),
                Direction::Short => entry - dec!(20),
            }),
            opened_at: Utc::now(),
            contract_size: None,
        };
        Position::from_record(&rec, None, Utc::now()).unwrap()
    }

    fn reprice(pos: &Position, price: Decimal) -> Position {
        let rec = PositionRecord {
            id: pos.id.clone(),
            symbol: pos.symbol.clone(),
            direction: pos.direction,
            size: Some(pos.size),
            entry_price: Some(pos.entry_price),
            current_price: Some(price),
            stop_loss: pos.stop_loss,
            take_profit: pos.take_profit,
            opened_at: pos.opened_at,
            contract_size: Some(pos.contract_size),
        };
        Position::from_record(&rec, Some(pos), Utc::now()).unwrap()
    }

    #[test]
    fn no_move_below_breakeven_r() {
        let pos = position(Direction::Long, dec!(100), dec!(105), Some(dec!(90)));
        assert_eq!(trailing_stop(&pos, 0.01, &StopLedger::new(), &TrailingParams::default()), None);
    }

    #[test]
    fn breakeven_at_one_r() {
        let pos = position(Direction::Long, dec!(100), dec!(110), Some(dec!(90)));
        let p = trailing_stop(&pos, 0.01, &StopLedger::new(), &TrailingParams::default()).unwrap();
        assert_eq!(p.stop, dec!(100));
        assert_eq!(p.previous, Some(dec!(90)));
        assert_eq!(p.locked_r, Some(0.0));
    }

    #[test]
    fn trails_short_positions_downwards() {
        let pos = position(Direction::Short, dec!(100), dec!(75), Some(dec!(110)));
        // R = 25 / 10 = 2.5 → lock 1.5R → 100 - 15
        let p = trailing_stop(&pos, 0.01, &StopLedger::new(), &TrailingParams::default()).unwrap();
        assert_eq!(p.stop, dec!(85));
    }

    #[test]
    fn protective_stop_for_unprotected_position() {
        let pos = position(Direction::Long, dec!(100), dec!(100), None);
        let p = trailing_stop(&pos, 0.01, &StopLedger::new(), &TrailingParams::default()).unwrap();
        assert!(p.protective);
        assert_eq!(p.stop, dec!(98));
    }

    #[test]
    fn stops_never_loosen_across_ticks() {
        let params = TrailingParams::default();
        let mut ledger = StopLedger::new();
        let mut pos = position(Direction::Long, dec!(100), dec!(100), Some(dec!(90)));
        let mut last: Option<Decimal> = None;

        for price in [dec!(112), dec!(125), dec!(118), dec!(131), dec!(126), dec!(140)] {
            pos = reprice(&pos, price);
            if let Some(p) = trailing_stop(&pos, 0.01, &ledger, &params) {
                if let Some(prev) = last {
                    assert!(p.stop > prev, "{} loosened from {}", p.stop, prev);
                }
                ledger.record_recommended_stop(&pos.id, pos.direction, p.stop);
                last = Some(p.stop);
            }
            assert!(ledger.effective_stop(&pos) >= last);
        }
        assert_eq!(last, Some(dec!(130)));
    }

    #[test]
    fn accepted_stop_is_never_undercut() {
        let params = TrailingParams::default();
        let mut ledger = StopLedger::new();
        ledger.record_accepted_stop("p1", Direction::Long, dec!(105));
        // Broker still reports the original stop; 1.2R would lock 0.2R = 102.
        let pos = position(Direction::Long, dec!(100), dec!(112), Some(dec!(90)));
        assert_eq!(trailing_stop(&pos, 0.01, &ledger, &params), None);
        assert_eq!(ledger.effective_stop(&pos), Some(dec!(105)));
        // A looser acceptance does not move the ledger back.
        ledger.record_accepted_stop("p1", Direction::Long, dec!(101));
        assert_eq!(ledger.accepted_stop("p1"), Some(dec!(105)));
    }

    #[test]
    fn take_profit_widens_on_strong_trend_only() {
        let params = TakeProfitParams::default();
        let pos = position(Direction::Long, dec!(100), dec!(108), Some(dec!(90)));
        let trending = vec![0.01; 20];
        let p = take_profit(&pos, &trending, &params).unwrap();
        assert_eq!(p.previous, dec!(120));
        assert_eq!(p.target, dec!(130));

        let choppy: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 0.01 } else { -0.01 }).collect();
        assert_eq!(take_profit(&pos, &choppy, &params), None);

        let losing = position(Direction::Long, dec!(100), dec!(95), Some(dec!(90)));
        assert_eq!(take_profit(&losing, &trending, &params), None);
    }

    #[test]
    fn scale_out_ladder_takes_each_rung_once() {
        let params = TakeProfitParams::default();
        let mut ledger = StopLedger::new();
        let pos = position(Direction::Long, dec!(100), dec!(121), Some(dec!(90)));

        let first = scale_out(&pos, &ledger, &params, dec!(0.01), dec!(0.01)).unwrap();
        assert_eq!(first.rung, 0);
        assert_eq!(first.close_size, dec!(0.5));
        assert_eq!(first.remaining_size, dec!(0.5));

        ledger.record_pending_rung("p1", first.rung);
        assert_eq!(ledger.accept_pending_rung("p1"), Some(0));
        assert_eq!(scale_out(&pos, &ledger, &params, dec!(0.01), dec!(0.01)), None);

        let further = reprice(&pos, dec!(135));
        let second = scale_out(&further, &ledger, &params, dec!(0.01), dec!(0.01)).unwrap();
        assert_eq!(second.rung, 1);
    }

    #[test]
    fn scale_out_jumps_to_highest_reached_rung() {
        let params = TakeProfitParams {
            scale_out: vec![
                ScaleOutRung {
                    r_multiple: 1.0,
                    close_fraction: 0.25,
                },
                ScaleOutRung {
                    r_multiple: 2.0,
                    close_fraction: 0.5,
                },
            ],
            ..TakeProfitParams::default()
        };
        let pos = position(Direction::Long, dec!(100), dec!(125), Some(dec!(90)));
        let p = scale_out(&pos, &StopLedger::new(), &params, dec!(0.01), dec!(0.01)).unwrap();
        assert_eq!(p.rung, 1);
    }

    #[test]
    fn ledger_forgets_closed_positions() {
        let mut ledger = StopLedger::new();
        ledger.record_recommended_stop("p1", Direction::Long, dec!(100));
        ledger.record_recommended_stop("p2", Direction::Long, dec!(100));
        ledger.retain(&BTreeSet::from(["p2".to_string()]));
        let pos = position(Direction::Long, dec!(100), dec!(100), None);
        assert_eq!(ledger.effective_stop(&pos), None);
    }
}
