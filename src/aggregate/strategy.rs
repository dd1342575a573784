//! Block processing strategy
//!
//! Lays a grid of fixed-length blocks over the source store's history,
//! aligned to local midnight, and processes them newest first. Recent data is
//! what readers query, so fresh blocks beat old backfill. An optional budget
//! caps the number of freshly completed blocks per pass, keeping a pass
//! bounded even against a long unprocessed backlog.

use crate::aggregate::algorithm::Algorithm;
use crate::aggregate::block::Block;
use crate::store::error::{StoreError, StoreResult};
use crate::store::manager::StoreManager;
use crate::store::record::Value;
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, Utc};
use tracing::{debug, info};

/// Incremental block aggregation over a source/target store pair
pub struct BlockStrategy {
    algorithm: Box<dyn Algorithm>,
    block_length: Duration,
    blocks_per_pass: Option<usize>,
    offset: FixedOffset,
    blocks: Vec<Block>,
}

impl std::fmt::Debug for BlockStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStrategy")
            .field("algorithm", &self.algorithm.name())
            .field("block_length", &self.block_length)
            .field("blocks_per_pass", &self.blocks_per_pass)
            .field("offset", &self.offset)
            .field("blocks", &self.blocks)
            .finish()
    }
}

impl BlockStrategy {
    /// Strategy with blocks of `minutes` length, aligned to UTC midnight.
    /// Panics unless `minutes` is positive; block edges could never advance
    /// otherwise.
    pub fn new(algorithm: Box<dyn Algorithm>, minutes: i64) -> Self {
        assert!(minutes > 0, "block length must be positive, got {minutes}");
        Self {
            algorithm,
            block_length: Duration::minutes(minutes),
            blocks_per_pass: None,
            offset: Utc.fix(),
            blocks: Vec::new(),
        }
    }

    /// Align block edges to midnight in this timezone instead of UTC
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    /// Cap the freshly completed blocks per pass
    pub fn with_budget(mut self, blocks: usize) -> Self {
        self.blocks_per_pass = Some(blocks);
        self
    }

    /// Blocks currently tracked, any state
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Local midnight of `at`'s local calendar date, as a UTC instant
    fn local_midnight(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let local_date = at.with_timezone(&self.offset).date_naive();
        let naive_utc = local_date.and_time(NaiveTime::MIN)
            - Duration::seconds(self.offset.local_minus_utc() as i64);
        DateTime::from_naive_utc_and_offset(naive_utc, Utc)
    }

    /// Block edges between `earliest` and `now`, walking down from the most
    /// recent completed edge. Every edge is midnight plus a whole number of
    /// block lengths.
    fn edges(&self, earliest: DateTime<Utc>, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let midnight = self.local_midnight(now);
        let mut last = midnight;
        while last + self.block_length <= now {
            last = last + self.block_length;
        }

        let mut edges = Vec::new();
        let mut edge = last;
        while edge > earliest {
            edges.push(edge);
            edge = edge - self.block_length;
        }
        edges.push(edge);
        edges
    }

    /// Extend the tracked grid to cover `[earliest, now]`, keeping the state
    /// of blocks already tracked
    fn update_blocks(&mut self, earliest: DateTime<Utc>, now: DateTime<Utc>) {
        let edges = self.edges(earliest, now);
        // Consecutive descending edges pair into blocks
        for pair in edges.windows(2) {
            let candidate = Block::new(pair[1], pair[0]);
            if !self.blocks.contains(&candidate) {
                self.blocks.push(candidate);
            }
        }
    }

    fn earliest_source_time(first: &[crate::store::record::Record], index: &str) -> StoreResult<DateTime<Utc>> {
        first
            .first()
            .and_then(|record| record.get(index))
            .and_then(Value::as_time)
            .ok_or_else(|| StoreError::BadField(format!("no timestamp under index {index}")))
    }

    /// One aggregation pass at the current time. Returns the number of
    /// blocks freshly completed.
    pub async fn process(
        &mut self,
        source: &mut StoreManager,
        target: &mut StoreManager,
    ) -> StoreResult<usize> {
        self.run_at(source, target, Utc::now()).await
    }

    /// One aggregation pass as of `now`
    pub async fn run_at(
        &mut self,
        source: &mut StoreManager,
        target: &mut StoreManager,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let first = match source.get_first().await {
            Ok(first) => first,
            Err(StoreError::Empty(_)) => {
                debug!("source store empty, nothing to aggregate");
                return Ok(0);
            }
            Err(e) => return Err(e),
        };
        let earliest = Self::earliest_source_time(&first, source.index())?;
        self.update_blocks(earliest, now);

        // Newest first
        self.blocks.sort_by(|a, b| b.cmp(a));

        let mut completed = 0;
        for block in &mut self.blocks {
            if block.process(source, target, self.algorithm.as_ref()).await {
                completed += 1;
                if let Some(budget) = self.blocks_per_pass {
                    if completed >= budget {
                        break;
                    }
                }
            }
        }

        info!(
            algorithm = self.algorithm.name(),
            completed,
            tracked = self.blocks.len(),
            "aggregation pass finished"
        );
        Ok(completed)
    }
}
