//! Periodic driver for the monitor engine.
//!
//! A single spawned task ticks the engine on a fixed interval. Lifecycle
//! commands go through the engine first, so they take effect between ticks,
//! then reach the task over a `watch` channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use rp_types::StateError;

use crate::engine::MonitorEngine;
use crate::state::{Command, SystemState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Run,
    Pause,
    Stop,
}

pub struct Scheduler {
    engine: Arc<MonitorEngine>,
    period: Duration,
    control: watch::Sender<RunMode>,
    task: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(engine: Arc<MonitorEngine>, period: Duration) -> Self {
        let (control, _) = watch::channel(RunMode::Stop);
        Self {
            engine,
            period,
            control,
            task: None,
        }
    }

    pub fn engine(&self) -> &Arc<MonitorEngine> {
        &self.engine
    }

    pub fn state(&self) -> SystemState {
        self.engine.state()
    }

    /// Start ticking. Starting after a stop begins from a clean slate.
    pub async fn start(&mut self) -> Result<SystemState, StateError> {
        let state = self.engine.transition(Command::Start).await?;
        self.control.send_replace(RunMode::Run);
        let rx = self.control.subscribe();
        self.task = Some(tokio::spawn(drive(Arc::clone(&self.engine), self.period, rx)));
        info!(interval_ms = self.period.as_millis() as u64, "scheduler started");
        Ok(state)
    }

    /// Stop ticking but keep every computed value.
    pub async fn pause(&mut self) -> Result<SystemState, StateError> {
        let state = self.engine.transition(Command::Pause).await?;
        self.control.send_replace(RunMode::Pause);
        Ok(state)
    }

    pub async fn resume(&mut self) -> Result<SystemState, StateError> {
        let state = self.engine.transition(Command::Resume).await?;
        self.control.send_replace(RunMode::Run);
        Ok(state)
    }

    /// Let the in-flight tick finish, then shut the driver down.
    pub async fn stop(&mut self) -> Result<SystemState, StateError> {
        let state = self.engine.transition(Command::Stop).await?;
        self.control.send_replace(RunMode::Stop);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "scheduler task ended abnormally");
            }
        }
        info!("scheduler stopped");
        Ok(state)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn drive(engine: Arc<MonitorEngine>, period: Duration, mut control: watch::Receiver<RunMode>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let running = *control.borrow() == RunMode::Run;
                if running {
                    engine.tick_if_active(Utc::now()).await;
                }
            }
            changed = control.changed() => {
                let mode = *control.borrow();
                if changed.is_err() || mode == RunMode::Stop {
                    break;
                }
                debug!(?mode, "scheduler mode changed");
            }
        }
    }
}
