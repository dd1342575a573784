//! Store construction from configuration
//!
//! Turns a declarative [`StoreOptions`] block into a decorated backend stack
//! wrapped in a [`StoreManager`]. Decorators compose at construction time,
//! innermost first: sharding sits directly on the backend, duplicate
//! suppression above it, caching outermost so cached reads skip the whole
//! stack.

use crate::store::backend::StoreBackend;
use crate::store::dedup::DedupStore;
use crate::store::document::DocumentStore;
use crate::store::error::{StoreError, StoreResult};
use crate::store::flatfile::FlatFileStore;
use crate::store::influx::InfluxStore;
use crate::store::lazy::LazyStore;
use crate::store::manager::StoreManager;
use crate::store::memory::MemoryStore;
use crate::store::sharded::{ShardScheme, ShardedStore};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Backend kind selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Flatfile,
    Document,
    Influx,
}

/// Shard scheme selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distributor {
    Date,
    Decimal,
}

impl From<Distributor> for ShardScheme {
    fn from(d: Distributor) -> Self {
        match d {
            Distributor::Date => ShardScheme::Date,
            Distributor::Decimal => ShardScheme::Decimal,
        }
    }
}

/// One store definition as it appears in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreOptions {
    pub backend: BackendKind,
    #[serde(default = "default_index")]
    pub index: String,
    pub location: String,

    /// Flat file backend: directory holding the CSV files
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Document backend: database file, in-memory when omitted
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Influx backend connection
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,

    /// Shard by the index field when set
    #[serde(default)]
    pub distributed: bool,
    #[serde(default = "default_distributor")]
    pub distributor: Distributor,

    /// Collapse near-duplicate values of this field when set
    #[serde(default)]
    pub dedup_field: Option<String>,
    #[serde(default)]
    pub dedup_resolution: f64,

    /// Cache read results when set
    #[serde(default)]
    pub lazy: bool,
    #[serde(default = "default_lazy_seconds")]
    pub lazy_seconds: i64,
}

fn default_lazy_seconds() -> i64 {
    300
}

fn default_index() -> String {
    "time".to_string()
}

fn default_distributor() -> Distributor {
    Distributor::Date
}

impl StoreOptions {
    pub fn memory(location: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::Memory,
            index: default_index(),
            location: location.into(),
            directory: None,
            database: None,
            url: None,
            org: None,
            token: None,
            bucket: None,
            distributed: false,
            distributor: default_distributor(),
            dedup_field: None,
            dedup_resolution: 0.0,
            lazy: false,
            lazy_seconds: default_lazy_seconds(),
        }
    }
}

fn required<'a, T>(value: &'a Option<T>, name: &str) -> StoreResult<&'a T> {
    value
        .as_ref()
        .ok_or_else(|| StoreError::BadField(format!("missing store option: {name}")))
}

/// Build the configured backend stack and wrap it in a manager
pub fn build_store(opts: &StoreOptions) -> StoreResult<StoreManager> {
    let mut backend: Box<dyn StoreBackend> = match opts.backend {
        BackendKind::Memory => Box::new(MemoryStore::new(&opts.index, &opts.location)),
        BackendKind::Flatfile => {
            let directory = required(&opts.directory, "directory")?;
            Box::new(FlatFileStore::new(&opts.index, directory, &opts.location))
        }
        BackendKind::Document => match &opts.database {
            Some(path) => Box::new(DocumentStore::open(path, &opts.index, &opts.location)?),
            None => Box::new(DocumentStore::open_in_memory(&opts.index, &opts.location)?),
        },
        BackendKind::Influx => Box::new(InfluxStore::new(
            required(&opts.url, "url")?,
            required(&opts.org, "org")?,
            required(&opts.token, "token")?,
            required(&opts.bucket, "bucket")?,
            &opts.location,
        )),
    };

    if opts.distributed {
        backend = Box::new(ShardedStore::new(
            backend,
            opts.index.clone(),
            opts.distributor.into(),
        ));
    }
    if let Some(field) = &opts.dedup_field {
        backend = Box::new(DedupStore::new(backend, field.clone(), opts.dedup_resolution));
    }
    if opts.lazy {
        backend = Box::new(LazyStore::new(backend, Duration::seconds(opts.lazy_seconds)));
    }

    info!(
        location = %opts.location,
        backend = ?opts.backend,
        distributed = opts.distributed,
        "store built"
    );
    Ok(StoreManager::new(backend))
}
