use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DataError;
use crate::market::{Direction, Symbol};

/// Raw position record as delivered by the position feed.
///
/// Numeric fields are optional at this boundary so that incomplete records can
/// be represented, reported and skipped instead of failing deserialization of
/// the whole batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub id: String,
    pub symbol: Symbol,
    pub direction: Direction,
    pub size: Option<Decimal>,
    pub entry_price: Option<Decimal>,
    pub current_price: Option<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
    /// Units per lot. Defaults to 1 when the feed does not report it.
    #[serde(default)]
    pub contract_size: Option<Decimal>,
}

/// A validated open position owned by the position store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: Symbol,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub size: Decimal,
    pub contract_size: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// First stop-loss ever observed for this position; the denominator of
    /// every R-multiple.
    pub initial_stop_loss: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
    pub unrealized_pnl: Decimal,
    /// Signed percentage move from entry in the position's favour.
    pub pnl_pct: Decimal,
    /// Consecutive feed reads that did not contain this position.
    pub missed_ticks: u32,
    pub last_updated: DateTime<Utc>,
}

fn require_positive(
    id: &str,
    field: &'static str,
    value: Option<Decimal>,
) -> Result<Decimal, DataError> {
    match value {
        None => Err(DataError::MissingField {
            id: id.to_string(),
            field,
        }),
        Some(v) if v <= Decimal::ZERO => Err(DataError::InvalidValue {
            id: id.to_string(),
            field,
            value: v.to_string(),
        }),
        Some(v) => Ok(v),
    }
}

/// Brokers commonly report an unset stop or target as 0.
fn optional_level(value: Option<Decimal>) -> Option<Decimal> {
    value.filter(|v| *v > Decimal::ZERO)
}

impl Position {
    /// Validate a feed record and build the position, carrying over state
    /// that must survive updates (the initial stop).
    pub fn from_record(
        record: &PositionRecord,
        previous: Option<&Position>,
        now: DateTime<Utc>,
    ) -> Result<Self, DataError> {
        if record.id.trim().is_empty() {
            return Err(DataError::MissingField {
                id: record.id.clone(),
                field: "id",
            });
        }
        if record.symbol.is_empty() {
            return Err(DataError::MissingField {
                id: record.id.clone(),
                field: "symbol",
            });
        }

        let entry_price = require_positive(&record.id, "entry_price", record.entry_price)?;
        let current_price = require_positive(&record.id, "current_price", record.current_price)?;
        let size = require_positive(&record.id, "size", record.size)?;
        let contract_size = match record.contract_size {
            None => Decimal::ONE,
            some => require_positive(&record.id, "contract_size", some)?,
        };

        let stop_loss = optional_level(record.stop_loss);
        let initial_stop_loss = previous
            .and_then(|p| p.initial_stop_loss)
            .or(stop_loss);

        let mut position = Self {
            id: record.id.clone(),
            symbol: record.symbol.clone(),
            direction: record.direction,
            entry_price,
            current_price,
            size,
            contract_size,
            stop_loss,
            take_profit: optional_level(record.take_profit),
            initial_stop_loss,
            opened_at: record.opened_at,
            unrealized_pnl: Decimal::ZERO,
            pnl_pct: Decimal::ZERO,
            missed_ticks: 0,
            last_updated: now,
        };
        position.refresh_pnl()?;
        Ok(position)
    }

    /// Fails when notional or P&L does not fit a `Decimal`.
    fn refresh_pnl(&mut self) -> Result<(), DataError> {
        let favourable = self.favourable_move();
        let figures = self.checked_notional().and_then(|_| {
            let pnl = favourable
                .checked_mul(self.size)?
                .checked_mul(self.contract_size)?;
            let pct = favourable
                .checked_div(self.entry_price)?
                .checked_mul(Decimal::ONE_HUNDRED)?;
            Some((pnl, pct))
        });
        let Some((pnl, pct)) = figures else {
            return Err(DataError::InvalidValue {
                id: self.id.clone(),
                field: "notional",
                value: format!("{} x {} x {}", self.current_price, self.size, self.contract_size),
            });
        };
        self.unrealized_pnl = pnl;
        self.pnl_pct = pct;
        Ok(())
    }

    /// Price move since entry in the position's favour (negative when losing).
    pub fn favourable_move(&self) -> Decimal {
        self.direction.sign() * (self.current_price - self.entry_price)
    }

    /// Gross notional value in account currency. Saturates at
    /// `Decimal::MAX`; positions built by [`Position::from_record`] always fit.
    pub fn notional(&self) -> Decimal {
        self.checked_notional().unwrap_or(Decimal::MAX)
    }

    pub fn checked_notional(&self) -> Option<Decimal> {
        self.current_price
            .checked_mul(self.size)?
            .checked_mul(self.contract_size)
    }

    /// Distance between entry and the initial stop, if the position ever had
    /// one.
    pub fn initial_risk_distance(&self) -> Option<Decimal> {
        self.initial_stop_loss
            .map(|stop| (self.entry_price - stop).abs())
            .filter(|d| *d > Decimal::ZERO)
    }

    /// Current profit expressed as a multiple of the initial risk.
    pub fn r_multiple(&self) -> Option<f64> {
        let risk = self.initial_risk_distance()?;
        self.favourable_move().checked_div(risk)?.to_f64()
    }

    /// Loss per lot, in account currency, if the stop were hit from the
    /// current price. `None` without a stop or when the stop already sits at
    /// or beyond the current price in the profit direction.
    pub fn stop_distance_per_lot(&self) -> Option<Decimal> {
        let stop = self.stop_loss?;
        let distance = self.direction.sign() * (self.current_price - stop);
        if distance <= Decimal::ZERO {
            return None;
        }
        distance.checked_mul(self.contract_size)
    }

    pub fn is_missing(&self) -> bool {
        self.missed_ticks > 0
    }
}

/// Account-level figures needed for sizing and exposure maths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub equity: Decimal,
    pub balance: Decimal,
    pub currency: String,
    pub leverage: Decimal,
    pub as_of: DateTime<Utc>,
}

impl AccountInfo {
    pub fn new(equity: Decimal, currency: &str) -> Self {
        Self {
            equity,
            balance: equity,
            currency: currency.to_string(),
            leverage: Decimal::ONE,
            as_of: Utc::now(),
        }
    }
}

/// Realized result of a position that left the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub position_id: String,
    pub symbol: Symbol,
    pub pnl: Decimal,
    pub closed_at: DateTime<Utc>,
}

impl TradeOutcome {
    pub fn from_position(position: &Position, closed_at: DateTime<Utc>) -> Self {
        Self {
            position_id: position.id.clone(),
            symbol: position.symbol.clone(),
            pnl: position.unrealized_pnl,
            closed_at,
        }
    }
}
