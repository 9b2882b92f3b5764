//! Market-state storage for RiskPilot.
//!
//! Provides:
//! - The position store: serialized writes, lock-free-for-readers snapshots
//! - Per-symbol return history ring buffers
//! - The rolling equity curve used for drawdown and Sharpe
//! - Optional JSON snapshotting

pub mod history;
pub mod snapshot;
pub mod store;

pub use history::{EquityCurve, ReturnHistory, ReturnHistoryBook};
pub use snapshot::{read_snapshot, write_snapshot};
pub use store::{IngestOutcome, IngestReport, PositionSnapshot, PositionStore};
