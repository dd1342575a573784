//! Aggregation blocks
//!
//! A block is one time slice of source data awaiting aggregation, tracked
//! through a small state machine. Blocks that keep failing stay retryable;
//! blocks that succeeded once close on the next pass and are never re
//! processed again.

use crate::aggregate::algorithm::Algorithm;
use crate::store::manager::StoreManager;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use tracing::debug;

/// Lifecycle of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Never processed
    Todo,
    /// Last attempt succeeded; one more pass confirms and closes it
    Done,
    /// Last attempt failed; retried on every pass
    Faulty,
    /// Confirmed complete, permanently skipped
    Closed,
}

/// Result of one processing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Success,
    Failure,
}

/// State transition table. Closed absorbs everything; Done ignores the
/// outcome and closes, since a block already aggregated once must not be
/// aggregated again.
pub fn transition(state: BlockState, outcome: ProcessOutcome) -> BlockState {
    match (state, outcome) {
        (BlockState::Todo, ProcessOutcome::Success) => BlockState::Done,
        (BlockState::Todo, ProcessOutcome::Failure) => BlockState::Faulty,
        (BlockState::Faulty, ProcessOutcome::Success) => BlockState::Done,
        (BlockState::Faulty, ProcessOutcome::Failure) => BlockState::Faulty,
        (BlockState::Done, _) => BlockState::Closed,
        (BlockState::Closed, _) => BlockState::Closed,
    }
}

/// Half-open time slice `[start, end)` with processing state
#[derive(Debug, Clone)]
pub struct Block {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    state: BlockState,
}

impl Block {
    /// `end` must lie after `start`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        assert!(end > start, "block end must be after its start");
        Self {
            start,
            end,
            state: BlockState::Todo,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn state(&self) -> BlockState {
        self.state
    }

    /// Timestamp the aggregated record is indexed under
    pub fn midpoint(&self) -> DateTime<Utc> {
        self.start + (self.end - self.start) / 2
    }

    /// Run the algorithm over this block and advance the state machine.
    /// Returns whether this attempt freshly completed the block.
    pub async fn process(
        &mut self,
        source: &mut StoreManager,
        target: &mut StoreManager,
        algorithm: &dyn Algorithm,
    ) -> bool {
        match self.state {
            BlockState::Closed => return false,
            BlockState::Done => {
                self.state = transition(self.state, ProcessOutcome::Success);
                return false;
            }
            BlockState::Todo | BlockState::Faulty => {}
        }

        let outcome = match algorithm.execute(source, target, self).await {
            Ok(()) => ProcessOutcome::Success,
            Err(e) => {
                debug!(
                    algorithm = algorithm.name(),
                    start = %self.start,
                    error = %e,
                    "block processing failed"
                );
                ProcessOutcome::Failure
            }
        };
        self.state = transition(self.state, outcome);
        self.state == BlockState::Done
    }
}

/// Blocks are the same block when they cover the same slice, whatever their
/// state
impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.end == other.end
    }
}

impl Eq for Block {}

impl PartialOrd for Block {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Block {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start.cmp(&other.start)
    }
}
