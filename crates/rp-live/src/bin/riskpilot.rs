use std::sync::Arc;
use std::thread;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rp_live::{FeedSet, JsonFileFeed, MonitorConfig, MonitorEngine, Scheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path =
        std::env::var("RISKPILOT_CONFIG").unwrap_or_else(|_| "config/riskpilot.toml".to_string());
    let config = MonitorConfig::load(&config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;

    let mut feed = JsonFileFeed::new(&config.feed.positions_path, &config.feed.account_path);
    if let Some(dir) = &config.feed.history_dir {
        feed = feed.with_history_dir(dir);
    }

    let (alert_tx, alert_rx) = crossbeam_channel::bounded(config.alert_channel_capacity);
    let engine = Arc::new(
        MonitorEngine::new(&config, FeedSet::uniform(Arc::new(feed))).with_alert_sender(alert_tx),
    );

    // Alerts are delivered on a plain thread so a slow consumer never stalls
    // a tick; the channel closes when the engine is dropped.
    let consumer = thread::spawn(move || {
        for alert in alert_rx {
            println!(
                "[{}] {} {}",
                alert.severity,
                alert.timestamp.format("%Y-%m-%d %H:%M:%S"),
                alert.message
            );
        }
    });

    let mut scheduler = Scheduler::new(Arc::clone(&engine), config.tick_interval());
    scheduler.start().await?;
    info!(config = %config_path, "riskpilot running; press ctrl-c to stop");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    scheduler.stop().await?;

    if let Some(path) = &config.snapshot_path {
        match engine.save_snapshot(path) {
            Ok(()) => info!(path = %path.display(), "final report saved"),
            Err(e) => warn!(error = %e, "could not save final report"),
        }
    }

    drop(scheduler);
    drop(engine);
    if consumer.join().is_err() {
        warn!("alert consumer panicked");
    }
    Ok(())
}
