//! Single source of truth for currently open positions.
//!
//! Writers are serialized through a mutex. Every successful write publishes a
//! fresh immutable [`PositionSnapshot`] by swapping an `Arc`, so readers only
//! ever hold the read lock for the duration of an `Arc::clone`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rp_types::{Position, PositionRecord, Symbol};

/// Immutable point-in-time view of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Incremented on every publish.
    pub version: u64,
    /// Sorted by open time, then id.
    pub positions: Vec<Position>,
    /// True when the last feed read failed and these are last-known values.
    pub stale: bool,
    pub taken_at: DateTime<Utc>,
}

impl PositionSnapshot {
    pub fn empty() -> Self {
        Self {
            version: 0,
            positions: Vec::new(),
            stale: false,
            taken_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn get(&self, id: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == id)
    }

    pub fn symbols(&self) -> BTreeSet<Symbol> {
        self.positions.iter().map(|p| p.symbol.clone()).collect()
    }
}

/// Counters for an applied feed read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub upserted: usize,
    pub skipped: usize,
    /// Positions absent from this read but still inside their grace period.
    pub missing: usize,
    /// Positions removed after exceeding the grace period, with their last
    /// known state.
    pub closed: Vec<Position>,
}

/// Result of [`PositionStore::ingest`].
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Applied(IngestReport),
    /// The read carried no usable record; the store kept its contents and is
    /// now flagged stale.
    Stale { skipped: usize },
}

#[derive(Debug, Default)]
struct StoreInner {
    positions: HashMap<String, Position>,
    version: u64,
}

/// Holds the latest known state of each open position.
#[derive(Debug)]
pub struct PositionStore {
    grace_ticks: u32,
    writer: Mutex<StoreInner>,
    published: RwLock<Arc<PositionSnapshot>>,
}

impl PositionStore {
    /// `grace_ticks` is how many consecutive reads a position may be absent
    /// from before it is considered closed.
    pub fn new(grace_ticks: u32) -> Self {
        Self {
            grace_ticks,
            writer: Mutex::new(StoreInner::default()),
            published: RwLock::new(Arc::new(PositionSnapshot::empty())),
        }
    }

    /// Current published snapshot. Never blocks on an in-flight ingest.
    pub fn snapshot(&self) -> Arc<PositionSnapshot> {
        Arc::clone(&*self.published.read())
    }

    /// Apply one feed read.
    pub fn ingest(&self, records: &[PositionRecord], now: DateTime<Utc>) -> IngestOutcome {
        let mut inner = self.writer.lock();

        let mut valid = Vec::with_capacity(records.len());
        let mut skipped = 0;
        for record in records {
            let previous = inner.positions.get(&record.id);
            match Position::from_record(record, previous, now) {
                Ok(position) => valid.push(position),
                Err(e) => {
                    skipped += 1;
                    warn!(error = %e, "skipping malformed position record");
                }
            }
        }

        if valid.is_empty() {
            warn!(skipped, "feed read had no usable records; keeping last known positions");
            self.publish(&mut inner, true, now);
            return IngestOutcome::Stale { skipped };
        }

        let mut report = IngestReport {
            skipped,
            ..Default::default()
        };

        let seen: HashSet<String> = valid.iter().map(|p| p.id.clone()).collect();
        for position in valid {
            report.upserted += 1;
            inner.positions.insert(position.id.clone(), position);
        }

        let grace = self.grace_ticks;
        let mut to_close = Vec::new();
        for (id, position) in inner.positions.iter_mut() {
            if seen.contains(id) {
                continue;
            }
            position.missed_ticks += 1;
            if position.missed_ticks > grace {
                to_close.push(id.clone());
            } else {
                report.missing += 1;
                debug!(position_id = %id, missed = position.missed_ticks, "position absent from feed");
            }
        }
        for id in to_close {
            if let Some(position) = inner.positions.remove(&id) {
                info!(position_id = %id, symbol = %position.symbol, "position closed");
                report.closed.push(position);
            }
        }
        report.closed.sort_by(|a, b| a.id.cmp(&b.id));

        self.publish(&mut inner, false, now);
        IngestOutcome::Applied(report)
    }

    /// Record a failed or timed-out feed read.
    pub fn mark_stale(&self, now: DateTime<Utc>) -> Arc<PositionSnapshot> {
        let mut inner = self.writer.lock();
        self.publish(&mut inner, true, now);
        self.snapshot()
    }

    /// Drop every position (used when monitoring restarts from scratch).
    pub fn clear(&self) {
        let mut inner = self.writer.lock();
        inner.positions.clear();
        self.publish(&mut inner, false, Utc::now());
    }

    fn publish(&self, inner: &mut StoreInner, stale: bool, now: DateTime<Utc>) {
        inner.version += 1;
        let mut positions: Vec<Position> = inner.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then_with(|| a.id.cmp(&b.id)));

        let snapshot = Arc::new(PositionSnapshot {
            version: inner.version,
            positions,
            stale,
            taken_at: now,
        });
        *self.published.write() = snapshot;
    }
}
