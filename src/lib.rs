//! # Gridlog
//!
//! Sensor data logging with pluggable storage backends and incremental
//! block-based aggregation.
//!
//! ## Features
//!
//! - **Typed records**: Tabular records with timestamps, numbers, dates and
//!   durations, encoded the same way across every backend
//! - **Pluggable backends**: Memory, CSV flat files, SQLite documents and
//!   InfluxDB behind one trait
//! - **Stackable decorators**: Sharding, duplicate suppression and read
//!   caching compose over any backend
//! - **Resilient writes**: Form checking and a retry buffer ride out backend
//!   outages without losing batches
//! - **Incremental aggregation**: Fixed-length blocks, newest first, with
//!   retries for slices whose data arrives late
//!
//! ## Modules
//!
//! - [`store`]: Records, backends, decorators and the store manager
//! - [`aggregate`]: Blocks, algorithms and the processing strategy
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gridlog::store::{build_store, Record, StoreOptions, Value};
//! use gridlog::aggregate::{BlockStrategy, Mean};
//! use chrono::Utc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut source = build_store(&StoreOptions::memory("meter"))?;
//!     let mut daily = build_store(&StoreOptions::memory("meter_daily"))?;
//!
//!     source
//!         .put(vec![Record::new()
//!             .with("time", Value::Time(Utc::now()))
//!             .with("power", Value::Float(1.5))])
//!         .await?;
//!
//!     let mut strategy = BlockStrategy::new(Box::new(Mean::new()), 24 * 60);
//!     strategy.process(&mut source, &mut daily).await?;
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod config;
pub mod store;

pub use aggregate::{Algorithm, Block, BlockState, BlockStrategy, Diff, Mean};
pub use config::Config;
pub use store::{
    build_store, Record, StoreBackend, StoreError, StoreManager, StoreOptions, StoreResult, Value,
};
