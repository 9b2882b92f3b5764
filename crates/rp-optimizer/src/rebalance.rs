//! Exposure and correlation rebalancing heuristic.
//!
//! Not a mean-variance solver: each symbol is checked against two caps and,
//! when over either, every position in that symbol is scaled down by the
//! same factor. The output depends only on the snapshot and the assessment,
//! and only ever reduces, so unchanged inputs never flip direction.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use rp_data::PositionSnapshot;
use rp_risk::RiskAssessment;
use rp_types::{AdaptiveSettings, Symbol};

use crate::sizing::round_to_step;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceProposal {
    pub position_id: String,
    pub symbol: Symbol,
    pub current_size: Decimal,
    pub target_size: Decimal,
    /// Symbol-level reduction, in percent.
    pub reduction_pct: f64,
    pub reason: String,
}

pub fn rebalance(
    snapshot: &PositionSnapshot,
    assessment: &RiskAssessment,
    settings: &AdaptiveSettings,
) -> Vec<RebalanceProposal> {
    let caps = &settings.rebalance;
    let mut proposals = Vec::new();

    for (symbol, &exposure_pct) in &assessment.gross_exposure_pct {
        let mut factor = 1.0_f64;
        let mut reasons = Vec::new();

        if exposure_pct > caps.max_symbol_exposure_pct {
            factor = factor.min(caps.max_symbol_exposure_pct / exposure_pct);
            reasons.push(format!(
                "exposure {:.1}% above {:.1}% cap",
                exposure_pct, caps.max_symbol_exposure_pct
            ));
        }

        let correlation = assessment.symbol_correlation.get(symbol).copied().unwrap_or(0.0);
        let correlated = exposure_pct / 100.0 * correlation;
        if correlated > caps.max_correlation_contribution {
            factor = factor.min(caps.max_correlation_contribution / correlated);
            reasons.push(format!(
                "correlated exposure {:.3} above {:.3} cap",
                correlated, caps.max_correlation_contribution
            ));
        }

        if !factor.is_finite() || factor >= 1.0 {
            continue;
        }
        let factor = factor.max(0.0);
        let reduction_pct = (1.0 - factor) * 100.0;
        if reduction_pct < caps.min_reduction_pct {
            continue;
        }
        let Some(scale) = Decimal::from_f64(factor) else {
            continue;
        };

        for pos in snapshot.positions.iter().filter(|p| &p.symbol == symbol) {
            let target = round_to_step(pos.size * scale, settings.lot_step);
            if target >= pos.size {
                continue;
            }
            proposals.push(RebalanceProposal {
                position_id: pos.id.clone(),
                symbol: symbol.clone(),
                current_size: pos.size,
                target_size: target,
                reduction_pct,
                reason: reasons.join("; "),
            });
        }
    }
    proposals
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rp_risk::RiskMetrics;
    use rp_types::{Direction, Position, PositionRecord};
    use rust_decimal_macros::dec;

    fn position(id: &str, symbol: &str, size: Decimal) -> Position {
        let rec = PositionRecord {
            id: id.into(),
            symbol: Symbol::new(symbol),
            direction: Direction::Long,
            size: Some(size),
            entry_price: Some(dec!(100)),
            current_price: Some(dec!(100)),
            stop_loss: None,
            take_profit: None,
            opened_at: Utc::now(),
            contract_size: None,
        };
        Position::from_record(&rec, None, Utc::now()).unwrap()
    }

    fn setup(exposures: &[(&str, f64, f64)], positions: Vec<Position>) -> (PositionSnapshot, RiskAssessment) {
        let mut assessment = RiskAssessment::empty(false);
        assessment.metrics = RiskMetrics::zeroed(false);
        assessment.metrics.num_positions = positions.len();
        for (sym, exposure, corr) in exposures {
            assessment.metrics.exposure_by_symbol.insert(Symbol::new(*sym), exposure.min(100.0));
            assessment.gross_exposure_pct.insert(Symbol::new(*sym), *exposure);
            assessment.symbol_correlation.insert(Symbol::new(*sym), *corr);
        }
        let snapshot = PositionSnapshot {
            version: 1,
            positions,
            stale: false,
            taken_at: Utc::now(),
        };
        (snapshot, assessment)
    }

    #[test]
    fn over_exposed_symbol_is_reduced_proportionally() {
        let settings = AdaptiveSettings::default();
        let (snap, a) = setup(
            &[("AAA", 50.0, 0.0), ("BBB", 10.0, 0.0)],
            vec![position("p1", "AAA", dec!(2)), position("p2", "AAA", dec!(3)), position("p3", "BBB", dec!(1))],
        );
        let out = rebalance(&snap, &a, &settings);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].target_size, dec!(1));
        assert_eq!(out[1].target_size, dec!(1.5));
        assert!((out[0].reduction_pct - 50.0).abs() < 1e-9);
        assert!(out.iter().all(|p| p.target_size < p.current_size));
    }

    #[test]
    fn correlated_exposure_is_capped() {
        let settings = AdaptiveSettings::default();
        // 20% exposure, 0.9 mean |corr| → 0.18 correlated exposure vs 0.15 cap
        let (snap, a) = setup(&[("AAA", 20.0, 0.9)], vec![position("p1", "AAA", dec!(4))]);
        let out = rebalance(&snap, &a, &settings);
        assert_eq!(out.len(), 1);
        assert!(out[0].reason.contains("correlated"));
        assert_eq!(out[0].target_size, dec!(3.33));
    }

    #[test]
    fn small_reductions_are_not_suggested() {
        let settings = AdaptiveSettings::default();
        let (snap, a) = setup(&[("AAA", 26.0, 0.0)], vec![position("p1", "AAA", dec!(1))]);
        assert!(rebalance(&snap, &a, &settings).is_empty());
    }

    #[test]
    fn leveraged_symbol_is_brought_under_the_cap() {
        let settings = AdaptiveSettings::default();
        // 30 lots at 100 on 1000 equity: 300% of equity in one symbol.
        let (snap, a) = setup(&[("AAA", 300.0, 0.0)], vec![position("p1", "AAA", dec!(30))]);
        let out = rebalance(&snap, &a, &settings);
        assert_eq!(out.len(), 1);
        // 30 * 25 / 300, floored to the lot step
        assert!(out[0].target_size >= dec!(2.49) && out[0].target_size <= dec!(2.5));
        assert!(out[0].reason.contains("300.0%"));
    }

    #[test]
    fn leveraged_exposure_from_the_calculator_is_not_clamped() {
        use rp_data::EquityCurve;
        use rp_risk::{RiskCalculator, RiskInputs};
        use rp_types::AccountInfo;
        use std::collections::BTreeMap;

        let settings = AdaptiveSettings::default();
        let (snap, _) = setup(&[], vec![position("p1", "AAA", dec!(30))]);
        let assessment = RiskCalculator::compute(&RiskInputs {
            snapshot: &snap,
            returns: &BTreeMap::new(),
            equity_curve: &EquityCurve::new(10),
            account: &AccountInfo::new(dec!(1000), "USD"),
            outcomes: &[],
            settings: &settings,
            sample_interval_secs: 10.0,
        });
        assert_eq!(assessment.metrics.exposure_by_symbol[&Symbol::new("AAA")], 100.0);
        let out = rebalance(&snap, &assessment, &settings);
        assert_eq!(out.len(), 1);
        assert!(out[0].target_size >= dec!(2.49) && out[0].target_size <= dec!(2.5));
    }

    #[test]
    fn stable_for_unchanged_inputs() {
        let settings = AdaptiveSettings::default();
        let (snap, a) = setup(&[("AAA", 60.0, 0.5)], vec![position("p1", "AAA", dec!(7))]);
        assert_eq!(rebalance(&snap, &a, &settings), rebalance(&snap, &a, &settings));
    }
}
