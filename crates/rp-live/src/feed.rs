//! Feed collaborators: where positions, account figures and price history
//! come from.
//!
//! The engine only talks to the traits. [`JsonFileFeed`] is the file-based
//! adapter used by the service binary; [`MemoryFeed`] is an in-memory feed
//! for tests and dry runs.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::warn;

use rp_types::{AccountInfo, PositionRecord, Symbol};

/// Errors surfaced by feed reads. Never fatal: the tick degrades to stale
/// data instead.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("{feed} feed timed out after {after_ms} ms")]
    Timeout { feed: &'static str, after_ms: u64 },
    #[error("feed unavailable: {message}")]
    Unavailable { message: String },
    #[error("feed I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("feed payload could not be parsed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result alias for feed operations.
pub type FeedResult<T> = Result<T, FeedError>;

/// Source of raw open-position records.
#[async_trait]
pub trait PositionFeed: Send + Sync {
    /// Every currently open position. Individual records may be incomplete;
    /// validation happens in the position store.
    async fn fetch_positions(&self) -> FeedResult<Vec<PositionRecord>>;
}

/// Source of account equity and balance.
#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn fetch_account(&self) -> FeedResult<AccountInfo>;
}

/// Source of historical closes, used to seed return history.
#[async_trait]
pub trait PriceHistorySource: Send + Sync {
    /// Up to `limit` most recent closes for `symbol`, oldest first.
    async fn fetch_closes(&self, symbol: &Symbol, limit: usize) -> FeedResult<Vec<Decimal>>;
}

/// Await `fut`, giving up after `limit`.
pub async fn fetch_with_timeout<T, F>(feed: &'static str, limit: Duration, fut: F) -> FeedResult<T>
where
    F: Future<Output = FeedResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(FeedError::Timeout {
            feed,
            after_ms: limit.as_millis() as u64,
        }),
    }
}

/// The collaborators one engine reads from.
#[derive(Clone)]
pub struct FeedSet {
    pub positions: Arc<dyn PositionFeed>,
    pub account: Arc<dyn AccountSource>,
    pub history: Option<Arc<dyn PriceHistorySource>>,
}

impl FeedSet {
    /// Use one object for every role.
    pub fn uniform<F>(feed: Arc<F>) -> Self
    where
        F: PositionFeed + AccountSource + PriceHistorySource + 'static,
    {
        Self {
            positions: feed.clone(),
            account: feed.clone(),
            history: Some(feed),
        }
    }
}

impl std::fmt::Debug for FeedSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSet")
            .field("history", &self.history.is_some())
            .finish_non_exhaustive()
    }
}

/// Reads JSON files written by an external exporter.
///
/// - `positions_path`: array of position records
/// - `account_path`: one account object
/// - `history_dir/<SYMBOL>.json`: array of closes, oldest first
#[derive(Debug, Clone)]
pub struct JsonFileFeed {
    positions_path: PathBuf,
    account_path: PathBuf,
    history_dir: Option<PathBuf>,
}

impl JsonFileFeed {
    pub fn new(positions_path: impl Into<PathBuf>, account_path: impl Into<PathBuf>) -> Self {
        Self {
            positions_path: positions_path.into(),
            account_path: account_path.into(),
            history_dir: None,
        }
    }

    pub fn with_history_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.history_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl PositionFeed for JsonFileFeed {
    async fn fetch_positions(&self) -> FeedResult<Vec<PositionRecord>> {
        let body = tokio::fs::read(&self.positions_path).await?;
        let raw: Vec<serde_json::Value> = serde_json::from_slice(&body)?;

        // A record that does not even have the required shape is skipped
        // here; one with bad values is skipped by the store.
        let mut records = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_value::<PositionRecord>(value) {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "skipping unreadable position record"),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl AccountSource for JsonFileFeed {
    async fn fetch_account(&self) -> FeedResult<AccountInfo> {
        let body = tokio::fs::read(&self.account_path).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl PriceHistorySource for JsonFileFeed {
    async fn fetch_closes(&self, symbol: &Symbol, limit: usize) -> FeedResult<Vec<Decimal>> {
        let dir = self.history_dir.as_ref().ok_or_else(|| FeedError::Unavailable {
            message: "no history directory configured".to_string(),
        })?;
        let body = tokio::fs::read(dir.join(format!("{}.json", symbol))).await?;
        let closes: Vec<Decimal> = serde_json::from_slice(&body)?;
        let skip = closes.len().saturating_sub(limit);
        Ok(closes.into_iter().skip(skip).collect())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    positions: Vec<PositionRecord>,
    account: Option<AccountInfo>,
    closes: HashMap<Symbol, Vec<Decimal>>,
    delay: Option<Duration>,
    failing: bool,
}

/// In-memory feed whose contents are set directly.
#[derive(Debug, Default)]
pub struct MemoryFeed {
    state: Mutex<MemoryState>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_positions(&self, positions: Vec<PositionRecord>) {
        self.state.lock().positions = positions;
    }

    pub fn set_account(&self, account: AccountInfo) {
        self.state.lock().account = Some(account);
    }

    pub fn set_closes(&self, symbol: Symbol, closes: Vec<Decimal>) {
        self.state.lock().closes.insert(symbol, closes);
    }

    /// Delay every response by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().delay = delay;
    }

    /// Make every read fail with [`FeedError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    /// Copy out what a read needs so no lock is held across an await.
    fn read<T>(&self, f: impl FnOnce(&MemoryState) -> FeedResult<T>) -> (Option<Duration>, FeedResult<T>) {
        let state = self.state.lock();
        if state.failing {
            return (
                state.delay,
                Err(FeedError::Unavailable {
                    message: "memory feed set to fail".to_string(),
                }),
            );
        }
        (state.delay, f(&state))
    }

    async fn respond<T>(delay: Option<Duration>, result: FeedResult<T>) -> FeedResult<T> {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

#[async_trait]
impl PositionFeed for MemoryFeed {
    async fn fetch_positions(&self) -> FeedResult<Vec<PositionRecord>> {
        let (delay, result) = self.read(|s| Ok(s.positions.clone()));
        Self::respond(delay, result).await
    }
}

#[async_trait]
impl AccountSource for MemoryFeed {
    async fn fetch_account(&self) -> FeedResult<AccountInfo> {
        let (delay, result) = self.read(|s| {
            s.account.clone().ok_or_else(|| FeedError::Unavailable {
                message: "no account set".to_string(),
            })
        });
        Self::respond(delay, result).await
    }
}

#[async_trait]
impl PriceHistorySource for MemoryFeed {
    async fn fetch_closes(&self, symbol: &Symbol, limit: usize) -> FeedResult<Vec<Decimal>> {
        let (delay, result) = self.read(|s| {
            let closes = s.closes.get(symbol).cloned().unwrap_or_default();
            let skip = closes.len().saturating_sub(limit);
            Ok(closes.into_iter().skip(skip).collect())
        });
        Self::respond(delay, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test(start_paused = true)]
    async fn slow_feed_times_out() {
        let feed = MemoryFeed::new();
        feed.set_delay(Some(Duration::from_secs(5)));

        let result = fetch_with_timeout("positions", Duration::from_millis(500), feed.fetch_positions()).await;
        match result {
            Err(FeedError::Timeout { feed, after_ms }) => {
                assert_eq!(feed, "positions");
                assert_eq!(after_ms, 500);
            }
            other => panic!("expected timeout, got {:?}", other.map(|r| r.len())),
        }
    }

    #[tokio::test]
    async fn failing_feed_reports_unavailable() {
        let feed = MemoryFeed::new();
        feed.set_failing(true);
        assert!(matches!(feed.fetch_account().await, Err(FeedError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn closes_are_truncated_to_the_most_recent() {
        let feed = MemoryFeed::new();
        feed.set_closes(Symbol::new("XAUUSD"), vec![dec!(1), dec!(2), dec!(3), dec!(4)]);
        let closes = feed.fetch_closes(&Symbol::new("XAUUSD"), 2).await.unwrap();
        assert_eq!(closes, vec![dec!(3), dec!(4)]);
    }

    #[tokio::test]
    async fn json_feed_skips_unreadable_records() {
        let dir = tempfile::tempdir().unwrap();
        let positions = dir.path().join("positions.json");
        let account = dir.path().join("account.json");
        std::fs::write(
            &positions,
            r#"[
                {"id": "1", "symbol": "EURUSD", "direction": "LONG", "size": 1.0,
                 "entry_price": 1.1, "current_price": 1.2, "opened_at": "2024-01-01T00:00:00Z"},
                {"symbol": "GBPUSD"}
            ]"#,
        )
        .unwrap();
        std::fs::write(
            &account,
            r#"{"equity": 10000, "balance": 10000, "currency": "USD", "leverage": 1,
                "as_of": "2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let feed = JsonFileFeed::new(&positions, &account);
        let records = feed.fetch_positions().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].symbol, Symbol::new("EURUSD"));

        let info = feed.fetch_account().await.unwrap();
        assert_eq!(info.equity, dec!(10000));
    }

    #[tokio::test]
    async fn json_history_requires_a_directory() {
        let feed = JsonFileFeed::new("p.json", "a.json");
        let result = feed.fetch_closes(&Symbol::new("EURUSD"), 10).await;
        assert!(matches!(result, Err(FeedError::Unavailable { .. })));
    }
}
