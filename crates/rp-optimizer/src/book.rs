//! Active suggestion book.
//!
//! Holds at most one pending suggestion per `(position_id, AdjustmentType)`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use rp_types::{AdjustmentType, CommandError, OptimizationSuggestion, SuggestionStatus};

/// What happened to a candidate offered to the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferOutcome {
    /// No active suggestion of this kind existed.
    Inserted,
    /// Replaced an active suggestion with lower or equal confidence.
    Replaced,
    /// Same recommendation as the active one; priority and reasoning were
    /// refreshed in place, keeping the id.
    Refreshed,
    /// Lower confidence than the active suggestion; discarded.
    Dropped,
}

#[derive(Debug, Clone, Default)]
pub struct SuggestionBook {
    active: BTreeMap<(String, AdjustmentType), OptimizationSuggestion>,
}

impl SuggestionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a candidate. It replaces the active suggestion of the same kind
    /// only when its confidence is at least as high.
    pub fn offer(&mut self, candidate: OptimizationSuggestion) -> OfferOutcome {
        let key = candidate.key();
        match self.active.get_mut(&key) {
            None => {
                self.active.insert(key, candidate);
                OfferOutcome::Inserted
            }
            Some(active) if candidate.confidence < active.confidence => {
                debug!(
                    position_id = %candidate.position_id,
                    adjustment = %candidate.adjustment_type,
                    candidate_confidence = candidate.confidence,
                    active_confidence = active.confidence,
                    "suggestion dropped, lower confidence than active"
                );
                OfferOutcome::Dropped
            }
            Some(active) if candidate.recommended_value == active.recommended_value => {
                active.confidence = candidate.confidence;
                active.priority = candidate.priority;
                active.expected_improvement = candidate.expected_improvement;
                active.reasoning = candidate.reasoning;
                active.current_value = candidate.current_value;
                OfferOutcome::Refreshed
            }
            Some(active) => {
                *active = candidate;
                OfferOutcome::Replaced
            }
        }
    }

    /// Drop suggestions older than `ttl`. Returns the expired ones.
    pub fn expire(&mut self, now: DateTime<Utc>, ttl: Duration) -> Vec<OptimizationSuggestion> {
        let expired: Vec<_> = self
            .active
            .iter()
            .filter(|(_, s)| s.is_expired(now, ttl))
            .map(|(k, _)| k.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|k| self.active.remove(&k))
            .collect()
    }

    /// Drop suggestions for positions no longer held. Returns how many were
    /// removed.
    pub fn retain_positions(&mut self, held: &BTreeSet<String>) -> usize {
        let before = self.active.len();
        self.active.retain(|(id, _), _| held.contains(id));
        before - self.active.len()
    }

    /// Mark a suggestion accepted and remove it from the book. Execution is
    /// left to the external actuator.
    pub fn apply(&mut self, id: Uuid) -> Result<OptimizationSuggestion, CommandError> {
        let mut suggestion = self.take(id).ok_or(CommandError::SuggestionNotFound(id))?;
        suggestion.status = SuggestionStatus::Accepted;
        Ok(suggestion)
    }

    pub fn reject(&mut self, id: Uuid) -> Result<OptimizationSuggestion, CommandError> {
        let mut suggestion = self.take(id).ok_or(CommandError::SuggestionNotFound(id))?;
        suggestion.status = SuggestionStatus::Rejected;
        Ok(suggestion)
    }

    fn take(&mut self, id: Uuid) -> Option<OptimizationSuggestion> {
        let key = self
            .active
            .iter()
            .find(|(_, s)| s.id == id)
            .map(|(k, _)| k.clone())?;
        self.active.remove(&key)
    }

    pub fn get(&self, id: Uuid) -> Option<&OptimizationSuggestion> {
        self.active.values().find(|s| s.id == id)
    }

    pub fn get_by_key(&self, position_id: &str, adjustment: AdjustmentType) -> Option<&OptimizationSuggestion> {
        self.active.get(&(position_id.to_string(), adjustment))
    }

    /// Active suggestions in key order.
    pub fn active(&self) -> Vec<OptimizationSuggestion> {
        self.active.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rp_types::Symbol;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn suggestion(confidence: f64, recommended: Decimal, created_at: DateTime<Utc>) -> OptimizationSuggestion {
        OptimizationSuggestion {
            id: Uuid::new_v4(),
            position_id: "p1".into(),
            symbol: Symbol::new("AAA"),
            adjustment_type: AdjustmentType::StopLossMove,
            current_value: dec!(90),
            recommended_value: recommended,
            confidence,
            reasoning: "test".into(),
            expected_improvement: 50.0,
            priority: 60.0,
            status: SuggestionStatus::Pending,
            created_at,
            position_opened_at: created_at,
        }
    }

    #[test]
    fn lower_confidence_never_replaces_active() {
        let now = Utc::now();
        let mut book = SuggestionBook::new();
        let strong = suggestion(0.8, dec!(100), now);
        let strong_id = strong.id;
        assert_eq!(book.offer(strong), OfferOutcome::Inserted);
        assert_eq!(book.offer(suggestion(0.5, dec!(102), now)), OfferOutcome::Dropped);

        let active = book.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, strong_id);
        assert_eq!(active[0].recommended_value, dec!(100));
    }

    #[test]
    fn equal_or_higher_confidence_replaces() {
        let now = Utc::now();
        let mut book = SuggestionBook::new();
        book.offer(suggestion(0.6, dec!(100), now));
        let newer = suggestion(0.6, dec!(102), now);
        let newer_id = newer.id;
        assert_eq!(book.offer(newer), OfferOutcome::Replaced);
        assert_eq!(book.active()[0].id, newer_id);
    }

    #[test]
    fn same_recommendation_keeps_identity() {
        let now = Utc::now();
        let mut book = SuggestionBook::new();
        let first = suggestion(0.6, dec!(100), now);
        let id = first.id;
        book.offer(first);
        let mut again = suggestion(0.7, dec!(100), now + Duration::seconds(10));
        again.priority = 70.0;
        assert_eq!(book.offer(again), OfferOutcome::Refreshed);
        let active = &book.active()[0];
        assert_eq!(active.id, id);
        assert_eq!(active.created_at, now);
        assert_eq!(active.priority, 70.0);
    }

    #[test]
    fn suggestions_expire_after_ttl() {
        let now = Utc::now();
        let mut book = SuggestionBook::new();
        book.offer(suggestion(0.6, dec!(100), now));
        assert!(book.expire(now + Duration::seconds(899), Duration::seconds(900)).is_empty());
        assert_eq!(book.expire(now + Duration::seconds(900), Duration::seconds(900)).len(), 1);
        assert!(book.is_empty());
    }

    #[test]
    fn apply_and_reject() {
        let now = Utc::now();
        let mut book = SuggestionBook::new();
        let s = suggestion(0.6, dec!(100), now);
        let id = s.id;
        book.offer(s);

        let applied = book.apply(id).unwrap();
        assert_eq!(applied.status, SuggestionStatus::Accepted);
        assert!(book.is_empty());
        assert_eq!(book.apply(id), Err(CommandError::SuggestionNotFound(id)));
        assert_eq!(book.reject(id), Err(CommandError::SuggestionNotFound(id)));
    }

    #[test]
    fn closed_positions_drop_their_suggestions() {
        let now = Utc::now();
        let mut book = SuggestionBook::new();
        book.offer(suggestion(0.6, dec!(100), now));
        assert_eq!(book.retain_positions(&BTreeSet::new()), 1);
    }
}
