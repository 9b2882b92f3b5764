//! Rolling buffers feeding the risk calculator.

use std::collections::{BTreeMap, VecDeque};

use dashmap::DashMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use rp_types::Symbol;

/// Fixed-capacity ring buffer of periodic returns for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnHistory {
    capacity: usize,
    samples: VecDeque<f64>,
}

impl ReturnHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a return, evicting the oldest sample when full. Non-finite
    /// values are rejected.
    pub fn push(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples in chronological order.
    pub fn to_vec(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }
}

/// Return histories for every symbol the monitor has seen.
#[derive(Debug)]
pub struct ReturnHistoryBook {
    capacity: usize,
    buffers: DashMap<Symbol, ReturnHistory>,
    last_prices: DashMap<Symbol, Decimal>,
}

impl ReturnHistoryBook {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffers: DashMap::new(),
            last_prices: DashMap::new(),
        }
    }

    /// Record the latest price of `symbol`, appending the return since the
    /// previously observed price. Returns the appended return, if any.
    pub fn observe_price(&self, symbol: &Symbol, price: Decimal) -> Option<f64> {
        if price <= Decimal::ZERO {
            return None;
        }
        let previous = self.last_prices.insert(symbol.clone(), price)?;
        if previous <= Decimal::ZERO {
            return None;
        }
        let ret = (price / previous - Decimal::ONE).to_f64()?;

        let mut buffer = self
            .buffers
            .entry(symbol.clone())
            .or_insert_with(|| ReturnHistory::new(self.capacity));
        buffer.push(ret).then_some(ret)
    }

    /// Seed an empty buffer from historical closes (oldest first). Returns the
    /// number of samples added; a symbol that already has history is left
    /// alone.
    pub fn backfill(&self, symbol: &Symbol, closes: &[Decimal]) -> usize {
        let mut buffer = self
            .buffers
            .entry(symbol.clone())
            .or_insert_with(|| ReturnHistory::new(self.capacity));
        if !buffer.is_empty() {
            return 0;
        }

        let mut added = 0;
        for pair in closes.windows(2) {
            if pair[0] <= Decimal::ZERO || pair[1] <= Decimal::ZERO {
                continue;
            }
            if let Some(ret) = (pair[1] / pair[0] - Decimal::ONE).to_f64() {
                if buffer.push(ret) {
                    added += 1;
                }
            }
        }
        drop(buffer);

        if let Some(last) = closes.last().filter(|c| **c > Decimal::ZERO) {
            self.last_prices.entry(symbol.clone()).or_insert(*last);
        }
        debug!(symbol = %symbol, added, "backfilled return history");
        added
    }

    pub fn len(&self, symbol: &Symbol) -> usize {
        self.buffers.get(symbol).map(|b| b.len()).unwrap_or(0)
    }

    /// Sorted copy of every buffer, for pure computation.
    pub fn view(&self) -> BTreeMap<Symbol, Vec<f64>> {
        self.buffers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().to_vec()))
            .collect()
    }

    pub fn clear(&self) {
        self.buffers.clear();
        self.last_prices.clear();
    }
}

/// Rolling window of account equity samples.
///
/// Running peak and drawdowns are updated incrementally on each push; once
/// the window is full, eviction triggers a rescan of the retained window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityCurve {
    capacity: usize,
    samples: VecDeque<f64>,
    peak: f64,
    current_drawdown: f64,
    max_drawdown: f64,
}

impl EquityCurve {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
            peak: 0.0,
            current_drawdown: 0.0,
            max_drawdown: 0.0,
        }
    }

    /// Append an equity observation. Non-positive or non-finite values are
    /// ignored.
    pub fn push(&mut self, equity: f64) {
        if !equity.is_finite() || equity <= 0.0 {
            return;
        }
        let evicted = if self.samples.len() == self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(equity);

        if evicted.is_some() {
            self.rescan();
            return;
        }

        if equity > self.peak {
            self.peak = equity;
        }
        self.current_drawdown = (self.peak - equity) / self.peak;
        if self.current_drawdown > self.max_drawdown {
            self.max_drawdown = self.current_drawdown;
        }
    }

    fn rescan(&mut self) {
        self.peak = 0.0;
        self.max_drawdown = 0.0;
        self.current_drawdown = 0.0;
        for &value in &self.samples {
            if value > self.peak {
                self.peak = value;
            }
            let dd = (self.peak - value) / self.peak;
            self.current_drawdown = dd;
            if dd > self.max_drawdown {
                self.max_drawdown = dd;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    pub fn peak(&self) -> f64 {
        self.peak
    }

    /// Drawdown of the latest sample from the running peak, in percent.
    pub fn current_drawdown_pct(&self) -> f64 {
        self.current_drawdown * 100.0
    }

    /// Largest peak-to-trough decline inside the window, in percent.
    pub fn max_drawdown_pct(&self) -> f64 {
        self.max_drawdown * 100.0
    }

    /// Periodic returns between consecutive samples.
    pub fn returns(&self) -> Vec<f64> {
        self.samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .map(|(prev, next)| next / prev - 1.0)
            .collect()
    }

    pub fn clear(&mut self) {
        *self = Self::new(self.capacity);
    }
}
