//! Alert manager: deduplication, cooldown, escalation and expiry.
//!
//! Every tick the engine collects [`AlertTrigger`]s from the rule set, the
//! staleness state and the ranked suggestions, then hands them to
//! [`AlertManager::process`]. The manager keeps one tracker per
//! `(AlertKind, position_id)` key:
//!
//! - a trigger inside the cooldown window refreshes the existing alert
//!   (`occurrences`, `last_seen`) and is not re-emitted;
//! - a trigger after the cooldown starts a new alert id;
//! - a condition observed on consecutive ticks escalates one severity level
//!   per `escalate_after_ticks`, re-publishing the same id;
//! - alerts without `action_required` expire `alert_ttl` after `last_seen`.
//!
//! Newly emitted and escalated alerts are logged and sent on the optional
//! outbound channel.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use tracing::{debug, info, warn};
use uuid::Uuid;

use rp_data::PositionSnapshot;
use rp_types::{AdaptiveSettings, CommandError, OptimizationSuggestion, SuggestionStatus};

use crate::alerts::{Alert, AlertKind, AlertRule, AlertTrigger, Severity};
use crate::metrics::RiskAssessment;

type AlertKey = (AlertKind, Option<String>);

#[derive(Debug, Clone)]
struct Tracker {
    alert: Alert,
    /// Consecutive ticks on which the condition was observed.
    streak: u32,
}

#[derive(Debug, Default)]
pub struct AlertManager {
    trackers: BTreeMap<AlertKey, Tracker>,
    alert_tx: Option<Sender<Alert>>,
}

impl AlertManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish emitted alerts on `alert_tx` in addition to logging them.
    pub fn with_sender(alert_tx: Sender<Alert>) -> Self {
        Self {
            trackers: BTreeMap::new(),
            alert_tx: Some(alert_tx),
        }
    }

    /// Gather every condition that holds this tick.
    pub fn collect_triggers(
        rules: &[AlertRule],
        assessment: &RiskAssessment,
        snapshot: &PositionSnapshot,
        suggestions: &[OptimizationSuggestion],
        settings: &AdaptiveSettings,
    ) -> Vec<AlertTrigger> {
        let mut triggers: Vec<AlertTrigger> = rules
            .iter()
            .flat_map(|rule| rule.evaluate(assessment, snapshot))
            .collect();

        if snapshot.stale {
            triggers.push(AlertTrigger {
                kind: AlertKind::StaleData,
                severity: Severity::Warning,
                message: format!(
                    "position feed unavailable; using data from {}",
                    snapshot.taken_at.format("%Y-%m-%d %H:%M:%S UTC")
                ),
                action_required: false,
                position_id: None,
            });
        }

        for s in suggestions {
            if s.status != SuggestionStatus::Pending
                || s.priority < settings.suggestion_alert_priority
            {
                continue;
            }
            triggers.push(AlertTrigger {
                kind: AlertKind::Suggestion {
                    adjustment: s.adjustment_type,
                },
                severity: Severity::Info,
                message: format!(
                    "{} {}: {} -> {} ({})",
                    s.symbol, s.adjustment_type, s.current_value, s.recommended_value, s.reasoning
                ),
                action_required: false,
                position_id: Some(s.position_id.clone()),
            });
        }
        triggers
    }

    /// Collect triggers and process them in one step.
    pub fn evaluate(
        &mut self,
        rules: &[AlertRule],
        assessment: &RiskAssessment,
        snapshot: &PositionSnapshot,
        suggestions: &[OptimizationSuggestion],
        settings: &AdaptiveSettings,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        let triggers = Self::collect_triggers(rules, assessment, snapshot, suggestions, settings);
        self.process(triggers, settings, now)
    }

    /// Apply one tick's triggers. Returns the alerts that were newly emitted
    /// or escalated this tick.
    pub fn process(
        &mut self,
        triggers: Vec<AlertTrigger>,
        settings: &AdaptiveSettings,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        let cooldown = settings.alert_cooldown();
        let ttl = settings.alert_ttl();
        let step = settings.escalate_after_ticks.max(1);

        // One trigger per key per tick; the most severe wins.
        let mut current: BTreeMap<AlertKey, AlertTrigger> = BTreeMap::new();
        for trigger in triggers {
            match current.get(&trigger.key()) {
                Some(existing) if existing.severity >= trigger.severity => {}
                _ => {
                    current.insert(trigger.key(), trigger);
                }
            }
        }

        let mut emitted = Vec::new();
        let seen: BTreeSet<AlertKey> = current.keys().cloned().collect();

        for (key, trigger) in current {
            match self.trackers.get_mut(&key) {
                None => {
                    let alert = Alert::from_trigger(&trigger, trigger.severity, now);
                    self.trackers.insert(
                        key,
                        Tracker {
                            alert: alert.clone(),
                            streak: 1,
                        },
                    );
                    emitted.push(alert);
                }
                Some(tracker) => {
                    tracker.streak += 1;
                    let severity = trigger.severity.escalated((tracker.streak - 1) / step);

                    if now - tracker.alert.timestamp < cooldown {
                        tracker.alert.occurrences += 1;
                        tracker.alert.last_seen = now;
                        tracker.alert.message = trigger.message.clone();
                        tracker.alert.action_required |= trigger.action_required;
                        if severity > tracker.alert.severity {
                            tracker.alert.severity = severity;
                            emitted.push(tracker.alert.clone());
                        } else {
                            debug!(alert_id = %tracker.alert.id, occurrences = tracker.alert.occurrences, "alert suppressed within cooldown");
                        }
                    } else {
                        tracker.alert = Alert::from_trigger(&trigger, severity, now);
                        emitted.push(tracker.alert.clone());
                    }
                }
            }
        }

        for (key, tracker) in self.trackers.iter_mut() {
            if !seen.contains(key) {
                tracker.streak = 0;
            }
        }

        self.trackers.retain(|_, t| t.alert.action_required || now - t.alert.last_seen < ttl);

        for alert in &emitted {
            self.emit(alert);
        }
        emitted
    }

    /// Remove an alert from the active set and forget its cooldown, so a
    /// fresh trigger fires immediately.
    pub fn dismiss(&mut self, id: Uuid) -> Result<Alert, CommandError> {
        let key = self
            .trackers
            .iter()
            .find(|(_, t)| t.alert.id == id)
            .map(|(k, _)| k.clone())
            .ok_or(CommandError::AlertNotFound(id))?;
        let tracker = self
            .trackers
            .remove(&key)
            .ok_or(CommandError::AlertNotFound(id))?;
        info!(alert_id = %id, "alert dismissed");
        Ok(tracker.alert)
    }

    /// Active alerts, most severe first, then oldest first.
    pub fn active_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.trackers.values().map(|t| t.alert.clone()).collect();
        alerts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.timestamp.cmp(&b.timestamp))
        });
        alerts
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    pub fn clear(&mut self) {
        self.trackers.clear();
    }

    fn emit(&self, alert: &Alert) {
        match alert.severity {
            Severity::Emergency => warn!(alert_id = %alert.id, %alert.message, "ALERT EMERGENCY"),
            Severity::Critical => warn!(alert_id = %alert.id, %alert.message, "ALERT CRITICAL"),
            Severity::Warning => warn!(alert_id = %alert.id, %alert.message, "ALERT WARNING"),
            Severity::Info => info!(alert_id = %alert.id, %alert.message, "ALERT INFO"),
        }
        if let Some(tx) = &self.alert_tx {
            // Best-effort send; a full or dropped receiver never blocks a tick.
            if tx.try_send(alert.clone()).is_err() {
                debug!(alert_id = %alert.id, "alert channel unavailable");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crossbeam_channel::unbounded;
    use rp_types::{AdjustmentType, Symbol};
    use rust_decimal_macros::dec;

    fn trigger(name: &str, severity: Severity) -> AlertTrigger {
        AlertTrigger {
            kind: AlertKind::Rule { name: name.into() },
            severity,
            message: format!("{name} fired"),
            action_required: false,
            position_id: None,
        }
    }

    fn settings() -> AdaptiveSettings {
        AdaptiveSettings {
            alert_cooldown_secs: 300,
            alert_ttl_secs: 3600,
            escalate_after_ticks: 3,
            ..AdaptiveSettings::default()
        }
    }

    #[test]
    fn same_condition_within_cooldown_is_one_alert() {
        let (tx, rx) = unbounded();
        let mut mgr = AlertManager::with_sender(tx);
        let s = settings();
        let t0 = Utc::now();

        let first = mgr.process(vec![trigger("dd", Severity::Warning)], &s, t0);
        let second = mgr.process(vec![trigger("dd", Severity::Warning)], &s, t0 + Duration::seconds(10));

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        let active = mgr.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, first[0].id);
        assert_eq!(active[0].occurrences, 2);
        assert_eq!(active[0].last_seen, t0 + Duration::seconds(10));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn duplicate_triggers_in_one_tick_collapse() {
        let mut mgr = AlertManager::new();
        let out = mgr.process(
            vec![trigger("dd", Severity::Warning), trigger("dd", Severity::Critical)],
            &settings(),
            Utc::now(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].severity, Severity::Critical);
    }

    #[test]
    fn trigger_after_cooldown_gets_new_id() {
        let mut mgr = AlertManager::new();
        let s = settings();
        let t0 = Utc::now();
        let first = mgr.process(vec![trigger("dd", Severity::Warning)], &s, t0);
        mgr.process(vec![], &s, t0 + Duration::seconds(60));
        let again = mgr.process(vec![trigger("dd", Severity::Warning)], &s, t0 + Duration::seconds(301));
        assert_eq!(again.len(), 1);
        assert_ne!(again[0].id, first[0].id);
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn dismissed_alert_can_fire_again_immediately() {
        let mut mgr = AlertManager::new();
        let s = settings();
        let t0 = Utc::now();
        let first = mgr.process(vec![trigger("dd", Severity::Warning)], &s, t0);
        let dismissed = mgr.dismiss(first[0].id).unwrap();
        assert_eq!(dismissed.id, first[0].id);
        assert!(mgr.is_empty());

        let again = mgr.process(vec![trigger("dd", Severity::Warning)], &s, t0 + Duration::seconds(5));
        assert_eq!(again.len(), 1);
        assert_ne!(again[0].id, first[0].id);
    }

    #[test]
    fn dismiss_unknown_alert_is_an_error() {
        let mut mgr = AlertManager::new();
        let id = Uuid::new_v4();
        assert_eq!(mgr.dismiss(id), Err(CommandError::AlertNotFound(id)));
    }

    #[test]
    fn sustained_condition_escalates() {
        let (tx, rx) = unbounded();
        let mut mgr = AlertManager::with_sender(tx);
        let s = settings();
        let t0 = Utc::now();

        let mut severities = Vec::new();
        for tick in 0..7 {
            mgr.process(
                vec![trigger("dd", Severity::Warning)],
                &s,
                t0 + Duration::seconds(tick * 10),
            );
            severities.push(mgr.active_alerts()[0].severity);
        }
        assert_eq!(
            severities,
            vec![
                Severity::Warning,
                Severity::Warning,
                Severity::Warning,
                Severity::Critical,
                Severity::Critical,
                Severity::Critical,
                Severity::Emergency,
            ]
        );
        let published: Vec<Alert> = rx.try_iter().collect();
        assert_eq!(published.len(), 3);
        assert!(published.iter().all(|a| a.id == published[0].id));
    }

    #[test]
    fn gap_resets_escalation_streak() {
        let mut mgr = AlertManager::new();
        let s = settings();
        let t0 = Utc::now();
        for tick in 0..3 {
            mgr.process(vec![trigger("dd", Severity::Warning)], &s, t0 + Duration::seconds(tick));
        }
        mgr.process(vec![], &s, t0 + Duration::seconds(3));
        let out = mgr.process(vec![trigger("dd", Severity::Warning)], &s, t0 + Duration::seconds(4));
        assert!(out.is_empty());
        assert_eq!(mgr.active_alerts()[0].severity, Severity::Warning);
    }

    #[test]
    fn informational_alerts_expire_after_ttl() {
        let mut mgr = AlertManager::new();
        let s = settings();
        let t0 = Utc::now();
        let mut sticky = trigger("critical", Severity::Critical);
        sticky.action_required = true;
        mgr.process(vec![trigger("dd", Severity::Warning), sticky], &s, t0);
        assert_eq!(mgr.len(), 2);

        mgr.process(vec![], &s, t0 + Duration::seconds(3600));
        let remaining = mgr.active_alerts();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].action_required);
    }

    #[test]
    fn stale_and_suggestion_triggers() {
        let s = settings();
        let snapshot = PositionSnapshot {
            stale: true,
            ..PositionSnapshot::empty()
        };
        let now = Utc::now();
        let suggestion = |priority: f64| OptimizationSuggestion {
            id: Uuid::new_v4(),
            position_id: "p1".into(),
            symbol: Symbol::new("AAA"),
            adjustment_type: AdjustmentType::StopLossMove,
            current_value: dec!(95),
            recommended_value: dec!(100),
            confidence: 0.8,
            reasoning: "lock in breakeven".into(),
            expected_improvement: 40.0,
            priority,
            status: SuggestionStatus::Pending,
            created_at: now,
            position_opened_at: now,
        };

        let triggers = AlertManager::collect_triggers(
            &[],
            &RiskAssessment::empty(true),
            &snapshot,
            &[suggestion(90.0), suggestion(10.0)],
            &s,
        );
        assert_eq!(triggers.len(), 2);
        assert_eq!(triggers[0].kind, AlertKind::StaleData);
        assert_eq!(
            triggers[1].kind,
            AlertKind::Suggestion {
                adjustment: AdjustmentType::StopLossMove
            }
        );
        assert_eq!(triggers[1].position_id.as_deref(), Some("p1"));
        assert_eq!(triggers[1].severity, Severity::Info);
    }
}
