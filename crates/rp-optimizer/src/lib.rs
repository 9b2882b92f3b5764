//! # rp-optimizer
//!
//! Turns a tick's risk assessment into ranked, non-duplicated adjustment
//! suggestions for RiskPilot.
//!
//! Provides risk-based position sizing, the monotonic trailing-stop policy,
//! take-profit widening and scale-out ladders, a correlation/exposure
//! rebalancing heuristic, and the suggestion book that enforces the
//! one-active-suggestion-per-kind lifecycle.

mod book;
mod engine;
mod policy;
mod ranking;
mod rebalance;
mod sizing;

pub use book::{OfferOutcome, SuggestionBook};
pub use engine::{position_confidence, Candidate, OptimizationEngine, OptimizationInputs};
pub use policy::{
    scale_out, take_profit, trailing_stop, ScaleOutProposal, StopLedger, StopProposal,
    TakeProfitProposal,
};
pub use ranking::{priority, rank};
pub use rebalance::{rebalance, RebalanceProposal};
pub use sizing::{base_size, optimal_size, round_to_step, SizeRecommendation};
