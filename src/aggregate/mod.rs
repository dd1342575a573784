//! Gridlog Aggregation Engine
//!
//! Condenses high-frequency readings into coarse summaries, incrementally:
//!
//! - **block**: Time slices with a retry-aware state machine
//! - **algorithm**: Mean and last-minus-first reductions over a block
//! - **strategy**: Grid layout, newest-first ordering and per-pass budgets

pub mod algorithm;
pub mod block;
pub mod strategy;

pub use algorithm::{Algorithm, Diff, Mean};
pub use block::{transition, Block, BlockState, ProcessOutcome};
pub use strategy::BlockStrategy;
