//! Gridlog Store Layer
//!
//! Everything between a batch of sensor records and the medium that keeps
//! them:
//!
//! - **record**: Typed records, values and forms
//! - **codec**: Text encoding with timezone-aware timestamp handling
//! - **backend**: The store trait every backend and decorator implements
//! - **memory / flatfile / document / influx**: Concrete backends
//! - **sharded / dedup / lazy**: Stackable decorators
//! - **manager**: Form checking and buffered retries in front of a stack
//! - **factory**: Stack construction from configuration
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   Records → Manager (form check, retry buffer) → Decorators → Backend
//!
//! Read Path:
//!   Query → Decorators (cache, dedup, shard fan-out) → Backend → Records
//! ```

pub mod backend;
pub mod codec;
pub mod dedup;
pub mod document;
pub mod error;
pub mod factory;
pub mod flatfile;
pub mod influx;
pub mod lazy;
pub mod manager;
pub mod memory;
pub mod record;
pub mod sharded;

pub use backend::StoreBackend;
pub use codec::RecordCodec;
pub use dedup::DedupStore;
pub use document::DocumentStore;
pub use error::{StoreError, StoreResult};
pub use factory::{build_store, BackendKind, Distributor, StoreOptions};
pub use flatfile::FlatFileStore;
pub use influx::InfluxStore;
pub use lazy::LazyStore;
pub use manager::StoreManager;
pub use memory::MemoryStore;
pub use record::{Form, Record, Value, ValueKind};
pub use sharded::{ShardScheme, ShardedStore};
