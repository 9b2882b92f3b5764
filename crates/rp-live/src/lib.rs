//! # rp-live
//!
//! The running side of RiskPilot: feed collaborators, the per-tick monitor
//! engine with its query and command surface, the lifecycle state machine
//! and the periodic scheduler.

pub mod config;
pub mod engine;
pub mod feed;
pub mod scheduler;
pub mod state;

pub use config::{FeedConfig, MonitorConfig};
pub use engine::{MonitorEngine, PositionView, TickReport};
pub use feed::{
    AccountSource, FeedError, FeedResult, FeedSet, JsonFileFeed, MemoryFeed, PositionFeed,
    PriceHistorySource,
};
pub use scheduler::Scheduler;
pub use state::{Command, StateMachine, SystemState};
