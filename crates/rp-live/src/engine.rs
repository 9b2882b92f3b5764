//! Monitor engine: one explicit instance that owns all monitoring state and
//! runs the per-tick pipeline.
//!
//! A tick fetches the feeds (the only suspension points), ingests, then runs
//! risk, optimization, alerting and analysis synchronously against a single
//! snapshot `Arc`. The result is published as an immutable [`TickReport`];
//! readers clone the `Arc` and never wait for a running tick.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use rp_data::{write_snapshot, EquityCurve, IngestOutcome, PositionSnapshot, PositionStore, ReturnHistoryBook};
use rp_optimizer::{OptimizationEngine, OptimizationInputs};
use rp_risk::{
    default_rules, Alert, AlertManager, AlertRule, PortfolioAnalysis, PortfolioAnalyzer, PositionRiskScore,
    RiskAssessment, RiskCalculator, RiskInputs, RiskMetrics,
};
use rp_types::{
    AccountInfo, AdaptiveSettings, CommandError, ConfigError, OptimizationSuggestion, Position, RpResult,
    StateError, Symbol, TradeOutcome,
};

use crate::config::{check_settings_fit, MonitorConfig};
use crate::feed::{fetch_with_timeout, FeedSet};
use crate::state::{Command, StateMachine, SystemState};

/// Everything one tick produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    /// 0 before the first tick.
    pub tick: u64,
    pub generated_at: DateTime<Utc>,
    pub snapshot: Arc<PositionSnapshot>,
    pub assessment: RiskAssessment,
    pub analysis: PortfolioAnalysis,
    /// Ranked active suggestions at the end of the tick.
    pub suggestions: Vec<OptimizationSuggestion>,
    /// Active alerts at the end of the tick.
    pub alerts: Vec<Alert>,
    /// Alerts newly emitted or escalated by this tick.
    pub emitted: Vec<Alert>,
    pub account: Option<AccountInfo>,
}

impl TickReport {
    fn initial(settings: &AdaptiveSettings) -> Self {
        Self {
            tick: 0,
            generated_at: Utc::now(),
            snapshot: Arc::new(PositionSnapshot::empty()),
            assessment: RiskAssessment::empty(false),
            analysis: PortfolioAnalyzer::analyze(&RiskMetrics::zeroed(false), settings),
            suggestions: Vec::new(),
            alerts: Vec::new(),
            emitted: Vec::new(),
            account: None,
        }
    }
}

/// A position together with its latest risk breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionView {
    pub position: Position,
    pub risk: Option<PositionRiskScore>,
}

/// Mutable state advanced by ticks. Locked only around synchronous work.
#[derive(Debug)]
struct TickState {
    equity_curve: EquityCurve,
    outcomes: VecDeque<TradeOutcome>,
    optimizer: OptimizationEngine,
    alerts: AlertManager,
    last_account: Option<AccountInfo>,
    tick_count: u64,
}

impl TickState {
    fn clear(&mut self) {
        self.equity_curve.clear();
        self.outcomes.clear();
        self.optimizer.reset();
        self.alerts.clear();
        self.last_account = None;
        self.tick_count = 0;
    }
}

#[derive(Debug, Default)]
struct Lifecycle {
    machine: StateMachine,
    /// Set by stop; the next start begins from a clean slate.
    needs_reset: bool,
}

pub struct MonitorEngine {
    store: Arc<PositionStore>,
    history: ReturnHistoryBook,
    feeds: FeedSet,
    custom_rules: Option<Vec<AlertRule>>,
    settings: RwLock<Arc<AdaptiveSettings>>,
    staged: Mutex<Option<AdaptiveSettings>>,
    /// Serializes ticks, resets and lifecycle transitions.
    tick_guard: tokio::sync::Mutex<()>,
    state: Mutex<TickState>,
    lifecycle: Mutex<Lifecycle>,
    report: RwLock<Arc<TickReport>>,
    /// Symbols whose history seeding was already attempted.
    backfilled: Mutex<BTreeSet<Symbol>>,
    feed_timeout: Duration,
    history_timeout: Duration,
    backfill_bars: usize,
    outcome_capacity: usize,
    history_capacity: usize,
    tick_interval_secs: u64,
}

impl std::fmt::Debug for MonitorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorEngine")
            .field("state", &self.state())
            .field("tick", &self.report().tick)
            .finish_non_exhaustive()
    }
}

impl MonitorEngine {
    /// Build an engine from a validated config.
    pub fn new(config: &MonitorConfig, feeds: FeedSet) -> Self {
        let settings = config.settings.clone();
        Self {
            store: Arc::new(PositionStore::new(config.grace_ticks)),
            history: ReturnHistoryBook::new(config.history_capacity),
            feeds,
            custom_rules: config.rules.clone(),
            report: RwLock::new(Arc::new(TickReport::initial(&settings))),
            settings: RwLock::new(Arc::new(settings)),
            staged: Mutex::new(None),
            tick_guard: tokio::sync::Mutex::new(()),
            state: Mutex::new(TickState {
                equity_curve: EquityCurve::new(config.equity_curve_capacity),
                outcomes: VecDeque::with_capacity(config.outcome_capacity),
                optimizer: OptimizationEngine::new(),
                alerts: AlertManager::new(),
                last_account: None,
                tick_count: 0,
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
            backfilled: Mutex::new(BTreeSet::new()),
            feed_timeout: config.feed_timeout(),
            history_timeout: config.history_timeout(),
            backfill_bars: config.backfill_bars,
            outcome_capacity: config.outcome_capacity,
            history_capacity: config.history_capacity,
            tick_interval_secs: config.tick_interval_secs,
        }
    }

    /// Publish emitted alerts on `alert_tx` as well as logging them.
    pub fn with_alert_sender(mut self, alert_tx: Sender<Alert>) -> Self {
        self.state.get_mut().alerts = AlertManager::with_sender(alert_tx);
        self
    }

    /// Shared handle to the position store.
    pub fn store(&self) -> Arc<PositionStore> {
        Arc::clone(&self.store)
    }

    // ---- pipeline ----

    /// Run one tick regardless of lifecycle state. Callers outside the crate
    /// go through [`MonitorEngine::tick_if_active`].
    pub(crate) async fn tick(&self, now: DateTime<Utc>) -> Arc<TickReport> {
        let _guard = self.tick_guard.lock().await;
        self.run_tick(now).await
    }

    /// Run one tick if the monitor is active. Used by the scheduler so a tick
    /// never starts after a pause or stop has been applied.
    pub async fn tick_if_active(&self, now: DateTime<Utc>) -> Option<Arc<TickReport>> {
        let _guard = self.tick_guard.lock().await;
        if self.state() != SystemState::Active {
            return None;
        }
        Some(self.run_tick(now).await)
    }

    async fn run_tick(&self, now: DateTime<Utc>) -> Arc<TickReport> {
        let settings = self.swap_staged_settings();

        let (positions, account) = tokio::join!(
            fetch_with_timeout("positions", self.feed_timeout, self.feeds.positions.fetch_positions()),
            fetch_with_timeout("account", self.feed_timeout, self.feeds.account.fetch_account()),
        );

        let last_account = self.state.lock().last_account.clone();
        let (account, account_ok) = match account {
            Ok(account) => (account, true),
            Err(e) => {
                warn!(error = %e, "account read failed; using last known figures");
                (last_account.unwrap_or_else(|| AccountInfo::new(Decimal::ZERO, "USD")), false)
            }
        };

        let mut closed = Vec::new();
        let mut snapshot = match positions {
            Ok(records) => match self.store.ingest(&records, now) {
                IngestOutcome::Applied(report) => {
                    debug!(
                        upserted = report.upserted,
                        skipped = report.skipped,
                        missing = report.missing,
                        closed = report.closed.len(),
                        "positions ingested"
                    );
                    closed = report.closed;
                    self.store.snapshot()
                }
                IngestOutcome::Stale { .. } => self.store.snapshot(),
            },
            Err(e) => {
                warn!(error = %e, "position read failed; using last known positions");
                self.store.mark_stale(now)
            }
        };
        if !account_ok && !snapshot.stale {
            snapshot = self.store.mark_stale(now);
        }

        if !snapshot.stale {
            self.seed_new_symbols(&snapshot).await;
            self.observe_prices(&snapshot);
        }

        let report = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            for position in &closed {
                if state.outcomes.len() == self.outcome_capacity {
                    state.outcomes.pop_front();
                }
                state.outcomes.push_back(TradeOutcome::from_position(position, now));
            }
            if account_ok {
                if let Some(equity) = account.equity.to_f64().filter(|e| *e > 0.0) {
                    state.equity_curve.push(equity);
                }
                state.last_account = Some(account.clone());
            }

            let returns = self.history.view();
            let assessment = RiskCalculator::compute(&RiskInputs {
                snapshot: &snapshot,
                returns: &returns,
                equity_curve: &state.equity_curve,
                account: &account,
                outcomes: state.outcomes.make_contiguous(),
                settings: &settings,
                sample_interval_secs: self.tick_interval_secs as f64,
            });

            let suggestions = state.optimizer.update(
                &OptimizationInputs {
                    snapshot: &snapshot,
                    assessment: &assessment,
                    returns: &returns,
                    account: &account,
                    settings: &settings,
                },
                now,
            );

            let rules = self.rules_for(&settings);
            let emitted = state
                .alerts
                .evaluate(&rules, &assessment, &snapshot, &suggestions, &settings, now);
            let alerts = state.alerts.active_alerts();
            let analysis = PortfolioAnalyzer::analyze(&assessment.metrics, &settings);

            state.tick_count += 1;
            TickReport {
                tick: state.tick_count,
                generated_at: now,
                snapshot: Arc::clone(&snapshot),
                assessment,
                analysis,
                suggestions,
                alerts,
                emitted,
                account: Some(account),
            }
        };

        let metrics = &report.assessment.metrics;
        info!(
            tick = report.tick,
            positions = metrics.num_positions,
            stale = metrics.stale,
            risk_level = %metrics.risk_level,
            composite = metrics.composite_score,
            health = report.analysis.health_score,
            suggestions = report.suggestions.len(),
            alerts = report.alerts.len(),
            "tick complete"
        );

        let report = Arc::new(report);
        *self.report.write() = Arc::clone(&report);
        report
    }

    fn swap_staged_settings(&self) -> Arc<AdaptiveSettings> {
        if let Some(next) = self.staged.lock().take() {
            info!("applying staged settings");
            *self.settings.write() = Arc::new(next);
        }
        self.settings()
    }

    fn rules_for(&self, settings: &AdaptiveSettings) -> Vec<AlertRule> {
        match &self.custom_rules {
            Some(rules) => rules.clone(),
            None => default_rules(settings),
        }
    }

    /// One price sample per symbol per tick. Positions missing from the last
    /// read carry old prices and are ignored.
    fn observe_prices(&self, snapshot: &PositionSnapshot) {
        let mut prices: BTreeMap<&Symbol, Decimal> = BTreeMap::new();
        for position in snapshot.positions.iter().filter(|p| !p.is_missing()) {
            prices.entry(&position.symbol).or_insert(position.current_price);
        }
        for (symbol, price) in prices {
            self.history.observe_price(symbol, price);
        }
    }

    async fn seed_new_symbols(&self, snapshot: &PositionSnapshot) {
        if self.feeds.history.is_none() || self.backfill_bars == 0 {
            return;
        }
        let fresh: Vec<Symbol> = {
            let mut seen = self.backfilled.lock();
            snapshot
                .symbols()
                .into_iter()
                .filter(|s| seen.insert(s.clone()))
                .collect()
        };
        for symbol in fresh {
            self.backfill_symbol(&symbol).await;
        }
    }

    async fn backfill_symbol(&self, symbol: &Symbol) -> usize {
        let Some(source) = self.feeds.history.as_ref() else {
            return 0;
        };
        match fetch_with_timeout(
            "history",
            self.history_timeout,
            source.fetch_closes(symbol, self.backfill_bars),
        )
        .await
        {
            Ok(closes) => self.history.backfill(symbol, &closes),
            Err(e) => {
                warn!(%symbol, error = %e, "history backfill failed");
                0
            }
        }
    }

    // ---- queries ----

    /// Latest positions with their risk scores, in snapshot order.
    pub fn positions(&self) -> Vec<PositionView> {
        let report = self.report();
        report
            .snapshot
            .positions
            .iter()
            .map(|p| PositionView {
                position: p.clone(),
                risk: report.assessment.position_scores.get(&p.id).cloned(),
            })
            .collect()
    }

    pub fn risk_metrics(&self) -> RiskMetrics {
        self.report().assessment.metrics.clone()
    }

    /// Active suggestions, ranked. Reflects commands issued since the last
    /// tick.
    pub fn suggestions(&self) -> Vec<OptimizationSuggestion> {
        self.state.lock().optimizer.suggestions()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.state.lock().alerts.active_alerts()
    }

    pub fn analysis(&self) -> PortfolioAnalysis {
        self.report().analysis.clone()
    }

    pub fn report(&self) -> Arc<TickReport> {
        Arc::clone(&*self.report.read())
    }

    /// Settings in effect for the current or next tick. A staged update is
    /// not visible until it is swapped in.
    pub fn settings(&self) -> Arc<AdaptiveSettings> {
        Arc::clone(&*self.settings.read())
    }

    pub fn state(&self) -> SystemState {
        self.lifecycle.lock().machine.state()
    }

    // ---- commands ----

    pub fn dismiss_alert(&self, id: Uuid) -> Result<Alert, CommandError> {
        self.state.lock().alerts.dismiss(id)
    }

    pub fn apply_suggestion(&self, id: Uuid) -> Result<OptimizationSuggestion, CommandError> {
        self.state.lock().optimizer.apply(id)
    }

    pub fn reject_suggestion(&self, id: Uuid) -> Result<OptimizationSuggestion, CommandError> {
        self.state.lock().optimizer.reject(id)
    }

    /// Validate `settings` now, including against the history capacity and
    /// tick interval fixed at construction, and stage them for the next tick.
    /// On error nothing is staged.
    pub fn update_settings(&self, settings: AdaptiveSettings) -> Result<(), ConfigError> {
        let checked = settings
            .validate()
            .and_then(|()| check_settings_fit(&settings, self.history_capacity, self.tick_interval_secs));
        if let Err(e) = checked {
            warn!(error = %e, "settings update rejected");
            return Err(e);
        }
        *self.staged.lock() = Some(settings);
        info!("settings update staged");
        Ok(())
    }

    /// Seed return history for every held symbol from the price history
    /// source. Returns the number of samples added.
    pub async fn backfill_history(&self) -> usize {
        let symbols = self.store.snapshot().symbols();
        let mut added = 0;
        for symbol in &symbols {
            self.backfilled.lock().insert(symbol.clone());
            added += self.backfill_symbol(symbol).await;
        }
        info!(symbols = symbols.len(), added, "history backfill complete");
        added
    }

    /// Write the latest report as JSON.
    pub fn save_snapshot(&self, path: &Path) -> RpResult<()> {
        write_snapshot(path, &*self.report())
    }

    /// Drop all positions, history, suggestions and alerts. Waits for an
    /// in-flight tick.
    pub async fn reset(&self) {
        let _guard = self.tick_guard.lock().await;
        self.clear();
    }

    fn clear(&self) {
        self.store.clear();
        self.history.clear();
        self.backfilled.lock().clear();
        self.state.lock().clear();
        let settings = self.settings();
        *self.report.write() = Arc::new(TickReport::initial(&settings));
        info!("monitor state reset");
    }

    /// Apply a lifecycle command between ticks. Starting after a stop resets
    /// all monitoring state; pausing keeps it.
    pub async fn transition(&self, command: Command) -> Result<SystemState, StateError> {
        let _guard = self.tick_guard.lock().await;
        let mut lifecycle = self.lifecycle.lock();
        let next = lifecycle.machine.apply(command)?;
        match command {
            Command::Start if lifecycle.needs_reset => {
                lifecycle.needs_reset = false;
                drop(lifecycle);
                self.clear();
            }
            Command::Stop => lifecycle.needs_reset = true,
            _ => {}
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::MemoryFeed;
    use chrono::Duration as ChronoDuration;
    use rp_risk::{AlertKind, MetricFlag, RiskLevel};
    use rp_types::{AdjustmentType, Direction, PositionRecord};
    use rust_decimal_macros::dec;

    fn record(id: &str, symbol: &str, price: Decimal) -> PositionRecord {
        PositionRecord {
            id: id.into(),
            symbol: Symbol::new(symbol),
            direction: Direction::Long,
            size: Some(dec!(1)),
            entry_price: Some(dec!(100)),
            current_price: Some(price),
            stop_loss: Some(dec!(90)),
            take_profit: Some(dec!(150)),
            opened_at: Utc::now() - ChronoDuration::hours(3),
            contract_size: None,
        }
    }

    fn setup() -> (Arc<MemoryFeed>, MonitorEngine) {
        let feed = Arc::new(MemoryFeed::new());
        feed.set_positions(vec![record("p1", "AAA", dec!(115))]);
        feed.set_account(AccountInfo::new(dec!(100000), "USD"));
        let engine = MonitorEngine::new(&MonitorConfig::default(), FeedSet::uniform(feed.clone()));
        (feed, engine)
    }

    #[tokio::test]
    async fn tick_publishes_a_consistent_report() {
        let (_feed, engine) = setup();
        assert_eq!(engine.report().tick, 0);

        let report = engine.tick(Utc::now()).await;
        assert_eq!(report.tick, 1);
        assert_eq!(report.snapshot.len(), 1);
        assert!(!report.snapshot.stale);
        assert_eq!(report.assessment.metrics.num_positions, 1);
        assert!(report.assessment.position_scores.contains_key("p1"));
        assert!(report
            .suggestions
            .iter()
            .any(|s| s.adjustment_type == AdjustmentType::StopLossMove));

        let views = engine.positions();
        assert_eq!(views.len(), 1);
        assert!(views[0].risk.is_some());
        assert_eq!(engine.risk_metrics(), report.assessment.metrics);
        assert_eq!(engine.suggestions(), report.suggestions);
    }

    #[tokio::test]
    async fn identical_ticks_do_not_duplicate_suggestions() {
        let (_feed, engine) = setup();
        let first = engine.tick(Utc::now()).await;
        let second = engine.tick(Utc::now()).await;

        assert_eq!(first.suggestions.len(), second.suggestions.len());
        let ids: BTreeSet<Uuid> = first.suggestions.iter().map(|s| s.id).collect();
        assert!(second.suggestions.iter().all(|s| ids.contains(&s.id)));
        assert_eq!(first.assessment.metrics.risk_level, second.assessment.metrics.risk_level);
    }

    #[tokio::test(start_paused = true)]
    async fn feed_timeout_degrades_to_stale_metrics_without_new_suggestions() {
        let (feed, engine) = setup();
        let first = engine.tick(Utc::now()).await;
        assert!(!first.suggestions.is_empty());

        feed.set_positions(vec![record("p1", "AAA", dec!(130))]);
        feed.set_delay(Some(Duration::from_secs(10)));
        let second = engine.tick(Utc::now()).await;

        let metrics = &second.assessment.metrics;
        assert!(metrics.stale);
        assert!(metrics.flags.contains(&MetricFlag::StaleData));
        assert_eq!(metrics.num_positions, 1);
        // last known price, not the delayed update
        assert_eq!(second.snapshot.positions[0].current_price, dec!(115));

        let before: BTreeSet<Uuid> = first.suggestions.iter().map(|s| s.id).collect();
        assert!(second.suggestions.iter().all(|s| before.contains(&s.id)));
        assert!(second
            .alerts
            .iter()
            .any(|a| a.kind == AlertKind::StaleData));
    }

    #[tokio::test]
    async fn account_failure_marks_the_tick_stale() {
        let (feed, engine) = setup();
        engine.tick(Utc::now()).await;

        let other = Arc::new(MemoryFeed::new());
        other.set_failing(true);
        let engine2 = MonitorEngine::new(
            &MonitorConfig::default(),
            FeedSet {
                positions: feed.clone(),
                account: other,
                history: None,
            },
        );
        let report = engine2.tick(Utc::now()).await;
        assert!(report.snapshot.stale);
        assert!(report.suggestions.is_empty());
        assert!(report.assessment.metrics.flags.contains(&MetricFlag::NoEquity));
    }

    #[tokio::test]
    async fn settings_update_is_staged_until_the_next_tick() {
        let (_feed, engine) = setup();
        let mut next = (*engine.settings()).clone();
        next.risk_percent_per_trade = 1.0;
        engine.update_settings(next).unwrap();
        assert_eq!(engine.settings().risk_percent_per_trade, 2.0);

        engine.tick(Utc::now()).await;
        assert_eq!(engine.settings().risk_percent_per_trade, 1.0);
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected_and_nothing_is_staged() {
        let (_feed, engine) = setup();
        let mut bad = (*engine.settings()).clone();
        bad.risk_percent_per_trade = 50.0;
        assert!(engine.update_settings(bad).is_err());

        engine.tick(Utc::now()).await;
        assert_eq!(engine.settings().risk_percent_per_trade, 2.0);
    }

    #[tokio::test]
    async fn ticks_only_run_while_active() {
        let (_feed, engine) = setup();
        assert!(engine.tick_if_active(Utc::now()).await.is_none());
        assert_eq!(engine.report().tick, 0);

        engine.transition(Command::Start).await.unwrap();
        assert_eq!(engine.tick_if_active(Utc::now()).await.unwrap().tick, 1);

        engine.transition(Command::Pause).await.unwrap();
        assert!(engine.tick_if_active(Utc::now()).await.is_none());
        engine.transition(Command::Stop).await.unwrap();
        assert!(engine.tick_if_active(Utc::now()).await.is_none());
        assert_eq!(engine.report().tick, 1);
    }

    #[tokio::test]
    async fn min_samples_beyond_the_history_capacity_are_rejected() {
        let (_feed, engine) = setup();
        let mut next = (*engine.settings()).clone();
        // default history capacity is 200 returns per symbol
        next.risk.min_samples = 500;
        next.validate().unwrap();
        assert!(matches!(
            engine.update_settings(next),
            Err(ConfigError::Invalid { field: "risk.min_samples", .. })
        ));

        engine.tick(Utc::now()).await;
        assert_eq!(engine.settings().risk.min_samples, 10);
    }

    #[tokio::test]
    async fn commands_reach_the_optimizer_and_alert_manager() {
        let (_feed, engine) = setup();
        let report = engine.tick(Utc::now()).await;

        let stop = report
            .suggestions
            .iter()
            .find(|s| s.adjustment_type == AdjustmentType::StopLossMove)
            .unwrap()
            .clone();
        let applied = engine.apply_suggestion(stop.id).unwrap();
        assert_eq!(applied.id, stop.id);
        assert!(engine.suggestions().iter().all(|s| s.id != stop.id));
        assert!(matches!(
            engine.apply_suggestion(stop.id),
            Err(CommandError::SuggestionNotFound(_))
        ));
        assert!(matches!(
            engine.reject_suggestion(Uuid::new_v4()),
            Err(CommandError::SuggestionNotFound(_))
        ));
        assert!(matches!(
            engine.dismiss_alert(Uuid::new_v4()),
            Err(CommandError::AlertNotFound(_))
        ));
    }

    #[tokio::test]
    async fn alerts_are_published_on_the_channel() {
        let feed = Arc::new(MemoryFeed::new());
        feed.set_positions(vec![record("p1", "AAA", dec!(115))]);
        feed.set_account(AccountInfo::new(dec!(100000), "USD"));
        let mut config = MonitorConfig::default();
        // only the rule below should alert
        config.settings.suggestion_alert_priority = 100.0;
        let config = MonitorConfig {
            rules: Some(vec![AlertRule::new(
                "open",
                rp_risk::RuleMetric::OpenPositions,
                rp_risk::Comparator::Ge,
                1.0,
                rp_risk::Severity::Warning,
            )]),
            ..config
        };
        let (tx, rx) = crossbeam_channel::unbounded();
        let engine = MonitorEngine::new(&config, FeedSet::uniform(feed)).with_alert_sender(tx);

        let report = engine.tick(Utc::now()).await;
        assert_eq!(report.emitted.len(), 1);
        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.id, report.emitted[0].id);

        let dismissed = engine.dismiss_alert(sent.id).unwrap();
        assert_eq!(dismissed.id, sent.id);
        assert!(engine.alerts().is_empty());
    }

    #[tokio::test]
    async fn closed_positions_become_trade_outcomes() {
        let (feed, engine) = setup();
        feed.set_positions(vec![record("p1", "AAA", dec!(115)), record("p2", "BBB", dec!(95))]);
        engine.tick(Utc::now()).await;

        // p2 leaves the feed; one grace tick, then closed as a loser
        feed.set_positions(vec![record("p1", "AAA", dec!(115))]);
        let grace = engine.tick(Utc::now()).await;
        assert_eq!(grace.snapshot.len(), 2);
        let closed = engine.tick(Utc::now()).await;
        assert_eq!(closed.snapshot.len(), 1);
        // one open winner, one closed loser
        assert!((closed.assessment.metrics.win_rate - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn backfill_seeds_history_once() {
        let (feed, engine) = setup();
        let closes: Vec<Decimal> = (0..40).map(|i| Decimal::from(100 + i % 5)).collect();
        feed.set_closes(Symbol::new("AAA"), closes);

        engine.tick(Utc::now()).await;
        // seeded during the tick; a second backfill finds history present
        assert_eq!(engine.backfill_history().await, 0);
        let report = engine.tick(Utc::now()).await;
        let vol = report.assessment.volatilities[&Symbol::new("AAA")];
        assert!(!vol.fallback);
    }

    #[tokio::test]
    async fn empty_portfolio_is_low_risk() {
        let feed = Arc::new(MemoryFeed::new());
        feed.set_account(AccountInfo::new(dec!(50000), "USD"));
        let engine = MonitorEngine::new(&MonitorConfig::default(), FeedSet::uniform(feed));
        let report = engine.tick(Utc::now()).await;
        assert_eq!(report.assessment.metrics.num_positions, 0);
        assert_eq!(report.assessment.metrics.risk_level, RiskLevel::Low);
        assert!(report.suggestions.is_empty());
    }

    #[tokio::test]
    async fn stop_then_start_resets_but_pause_keeps_state() {
        let (_feed, engine) = setup();
        assert!(engine.transition(Command::Pause).await.is_err());

        engine.transition(Command::Start).await.unwrap();
        engine.tick_if_active(Utc::now()).await.unwrap();
        engine.transition(Command::Pause).await.unwrap();
        assert!(engine.tick_if_active(Utc::now()).await.is_none());
        engine.transition(Command::Resume).await.unwrap();
        assert_eq!(engine.report().tick, 1);
        assert_eq!(engine.tick_if_active(Utc::now()).await.unwrap().tick, 2);

        engine.transition(Command::Stop).await.unwrap();
        assert_eq!(engine.report().tick, 2);
        engine.transition(Command::Start).await.unwrap();
        assert_eq!(engine.report().tick, 0);
        assert!(engine.suggestions().is_empty());
    }

    #[tokio::test]
    async fn snapshot_is_written_as_json() {
        let (_feed, engine) = setup();
        engine.tick(Utc::now()).await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        engine.save_snapshot(&path).unwrap();
        let loaded: TickReport = rp_data::read_snapshot(&path).unwrap();
        assert_eq!(loaded.tick, 1);
        assert_eq!(loaded.snapshot.len(), 1);
    }
}
