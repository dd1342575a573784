//! Aggregation algorithms
//!
//! An algorithm turns the source records of one block into a single
//! aggregated record in the target store. Execution is idempotent at the
//! store level: a block whose slice already holds target data is skipped, so
//! reprocessing never duplicates output.

use crate::aggregate::block::Block;
use crate::store::error::{StoreError, StoreResult};
use crate::store::manager::StoreManager;
use crate::store::record::{Record, Value};
use async_trait::async_trait;

/// One block-level aggregation
#[async_trait]
pub trait Algorithm: Send + Sync {
    fn name(&self) -> &'static str;

    /// Aggregate `block`'s slice of `source` into one `target` record
    async fn execute(
        &self,
        source: &mut StoreManager,
        target: &mut StoreManager,
        block: &Block,
    ) -> StoreResult<()>;
}

/// Source records of a block, honoring the half-open upper bound. Errors
/// when the slice is empty so the block stays retryable until data arrives.
async fn block_input(source: &mut StoreManager, block: &Block) -> StoreResult<Vec<Record>> {
    let index = source.index().to_string();
    let start = Value::Time(block.start());
    let end = Value::Time(block.end());
    let records = source.get(&start, &end).await?;
    // Backends treat both bounds as inclusive; drop the end edge itself
    let records: Vec<Record> = records
        .into_iter()
        .filter(|r| {
            r.get(&index)
                .and_then(Value::as_time)
                .map(|t| t < block.end())
                .unwrap_or(false)
        })
        .collect();
    if records.is_empty() {
        return Err(StoreError::Empty(format!(
            "no source records in block starting {}",
            block.start()
        )));
    }
    Ok(records)
}

/// True when the target already holds a record inside the block's slice
async fn already_aggregated(target: &mut StoreManager, block: &Block) -> bool {
    let start = Value::Time(block.start());
    let end = Value::Time(block.end());
    match target.get(&start, &end).await {
        Ok(records) => !records.is_empty(),
        Err(_) => false,
    }
}

/// Numeric field names of a record batch, optionally restricted to a chosen
/// subset, excluding the index
fn numeric_columns(records: &[Record], index: &str, columns: &Option<Vec<String>>) -> Vec<String> {
    let first = match records.first() {
        Some(record) => record,
        None => return Vec::new(),
    };
    first
        .iter()
        .filter(|&(name, value)| {
            name != index
                && value.as_f64().is_some()
                && columns
                    .as_ref()
                    .map(|chosen| chosen.iter().any(|c| c == name))
                    .unwrap_or(true)
        })
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Arithmetic mean of each numeric column
pub struct Mean {
    columns: Option<Vec<String>>,
}

impl Mean {
    pub fn new() -> Self {
        Self { columns: None }
    }

    /// Restrict aggregation to the named columns
    pub fn over(columns: Vec<String>) -> Self {
        Self {
            columns: Some(columns),
        }
    }
}

impl Default for Mean {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Algorithm for Mean {
    fn name(&self) -> &'static str {
        "mean"
    }

    async fn execute(
        &self,
        source: &mut StoreManager,
        target: &mut StoreManager,
        block: &Block,
    ) -> StoreResult<()> {
        if already_aggregated(target, block).await {
            return Ok(());
        }
        let records = block_input(source, block).await?;
        let index = source.index().to_string();

        let mut output = Record::new().with(
            target.index().to_string(),
            Value::Time(block.midpoint()),
        );
        for column in numeric_columns(&records, &index, &self.columns) {
            let values: Vec<f64> = records
                .iter()
                .filter_map(|r| r.get(&column).and_then(Value::as_f64))
                .collect();
            if values.is_empty() {
                continue;
            }
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            output = output.with(column, Value::Float(mean));
        }
        target.put(vec![output]).await
    }
}

/// Last minus first value of each numeric column, for counter-style sources
pub struct Diff {
    columns: Option<Vec<String>>,
}

impl Diff {
    pub fn new() -> Self {
        Self { columns: None }
    }

    pub fn over(columns: Vec<String>) -> Self {
        Self {
            columns: Some(columns),
        }
    }
}

impl Default for Diff {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Algorithm for Diff {
    fn name(&self) -> &'static str {
        "diff"
    }

    async fn execute(
        &self,
        source: &mut StoreManager,
        target: &mut StoreManager,
        block: &Block,
    ) -> StoreResult<()> {
        if already_aggregated(target, block).await {
            return Ok(());
        }
        let mut records = block_input(source, block).await?;
        let index = source.index().to_string();
        records.sort_by(|a, b| {
            match (a.get(&index), b.get(&index)) {
                (Some(x), Some(y)) => x.compare(y).unwrap_or(std::cmp::Ordering::Equal),
                _ => std::cmp::Ordering::Equal,
            }
        });

        let mut output = Record::new().with(
            target.index().to_string(),
            Value::Time(block.midpoint()),
        );
        for column in numeric_columns(&records, &index, &self.columns) {
            let values: Vec<f64> = records
                .iter()
                .filter_map(|r| r.get(&column).and_then(Value::as_f64))
                .collect();
            if let (Some(first), Some(last)) = (values.first(), values.last()) {
                output = output.with(column, Value::Float(last - first));
            }
        }
        target.put(vec![output]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::factory::StoreOptions;
    use crate::store::factory::build_store;
    use chrono::{TimeZone, Utc};

    fn stores() -> (StoreManager, StoreManager) {
        let source = build_store(&StoreOptions::memory("meter")).unwrap();
        let target = build_store(&StoreOptions::memory("meter_daily")).unwrap();
        (source, target)
    }

    fn day_block() -> Block {
        Block::new(
            Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2023, 5, 2, 0, 0, 0).unwrap(),
        )
    }

    fn reading(hour: u32, power: f64, total: f64) -> Record {
        Record::new()
            .with(
                "time",
                Value::Time(Utc.with_ymd_and_hms(2023, 5, 1, hour, 0, 0).unwrap()),
            )
            .with("power", Value::Float(power))
            .with("total", Value::Float(total))
    }

    #[tokio::test]
    async fn test_mean_aggregates_each_numeric_column() {
        let (mut source, mut target) = stores();
        source
            .put(vec![reading(6, 1.0, 100.0), reading(18, 3.0, 104.0)])
            .await
            .unwrap();

        Mean::new()
            .execute(&mut source, &mut target, &day_block())
            .await
            .unwrap();

        let out = target.get_all().await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].get("time"),
            Some(&Value::Time(
                Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap()
            ))
        );
        assert_eq!(out[0].get("power"), Some(&Value::Float(2.0)));
        assert_eq!(out[0].get("total"), Some(&Value::Float(102.0)));
    }

    #[tokio::test]
    async fn test_diff_subtracts_first_from_last() {
        let (mut source, mut target) = stores();
        // Deliberately out of order; diff must sort by the index first
        source
            .put(vec![reading(18, 3.0, 104.0), reading(6, 1.0, 100.0)])
            .await
            .unwrap();

        Diff::over(vec!["total".to_string()])
            .execute(&mut source, &mut target, &day_block())
            .await
            .unwrap();

        let out = target.get_all().await.unwrap();
        assert_eq!(out[0].get("total"), Some(&Value::Float(4.0)));
        assert_eq!(out[0].get("power"), None);
    }

    #[tokio::test]
    async fn test_block_end_is_exclusive() {
        let (mut source, mut target) = stores();
        let next_midnight = Record::new()
            .with(
                "time",
                Value::Time(Utc.with_ymd_and_hms(2023, 5, 2, 0, 0, 0).unwrap()),
            )
            .with("power", Value::Float(99.0))
            .with("total", Value::Float(999.0));
        source
            .put(vec![reading(6, 1.0, 100.0), reading(18, 3.0, 104.0)])
            .await
            .unwrap();
        source.put(vec![next_midnight]).await.unwrap();

        Mean::new()
            .execute(&mut source, &mut target, &day_block())
            .await
            .unwrap();

        let out = target.get_all().await.unwrap();
        assert_eq!(out[0].get("power"), Some(&Value::Float(2.0)));
    }

    #[tokio::test]
    async fn test_empty_block_is_an_error() {
        let (mut source, mut target) = stores();
        let err = Mean::new()
            .execute(&mut source, &mut target, &day_block())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Empty(_)) || matches!(err, StoreError::ReadStore(_)));
    }

    #[tokio::test]
    async fn test_existing_target_data_skips_the_block() {
        let (mut source, mut target) = stores();
        source.put(vec![reading(6, 1.0, 100.0)]).await.unwrap();

        let block = day_block();
        Mean::new().execute(&mut source, &mut target, &block).await.unwrap();
        Mean::new().execute(&mut source, &mut target, &block).await.unwrap();

        assert_eq!(target.get_all().await.unwrap().len(), 1);
    }
}
