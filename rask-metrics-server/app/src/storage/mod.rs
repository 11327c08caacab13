//! Metric storage backends.
//!
//! All backends share one contract: gauges are replaced, counters accumulate,
//! an id holds a single kind for its whole life, and a batch either applies
//! completely or not at all. Appends return the post-update state of every
//! metric they touched.

pub mod file;
pub mod memory;
pub mod postgres;

use crate::config::Settings;
use async_trait::async_trait;
use rask_metrics_core::{Metric, MetricError, MetricKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use file::FileStorage;
pub use memory::MemStorage;
pub use postgres::PgStorage;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Metric {id} is already stored as a {stored}")]
    KindConflict { id: String, stored: MetricKind },
    #[error(transparent)]
    Invalid(#[from] MetricError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Storage operation '{0}' timed out")]
    Timeout(&'static str),
    #[error("Unexpected row in storage: {0}")]
    Corrupt(String),
}

impl StorageError {
    /// Connection-class failures (SQLSTATE 08xxx and socket errors) are
    /// worth retrying; anything else fails the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Database(sqlx::Error::Database(db)) => db
                .code()
                .is_some_and(|code| code.starts_with("08")),
            StorageError::Database(sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Applies one metric and returns its stored state.
    async fn append_metric(&self, metric: Metric) -> Result<Metric, StorageError>;

    /// Applies a batch atomically. The result holds the state after each
    /// entry, in input order.
    async fn append_metrics(&self, metrics: Vec<Metric>) -> Result<Vec<Metric>, StorageError>;

    /// Looks a metric up by id; an id stored under the other kind is absent.
    async fn get_metric(&self, id: &str, kind: MetricKind)
    -> Result<Option<Metric>, StorageError>;

    /// Every stored metric, ordered by id.
    async fn get_all_metrics(&self) -> Result<Vec<Metric>, StorageError>;

    async fn check_connection(&self) -> Result<(), StorageError>;

    /// Flushes and releases the backend. Called once at shutdown.
    async fn close(&self) -> Result<(), StorageError>;

    fn name(&self) -> &'static str;
}

/// In-process metric state used by the memory and file backends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricStore {
    gauges: BTreeMap<String, f64>,
    counters: BTreeMap<String, i64>,
}

impl MetricStore {
    fn stored_kind(&self, id: &str) -> Option<MetricKind> {
        if self.gauges.contains_key(id) {
            Some(MetricKind::Gauge)
        } else if self.counters.contains_key(id) {
            Some(MetricKind::Counter)
        } else {
            None
        }
    }

    fn check(&self, metric: &Metric) -> Result<(), StorageError> {
        metric.validate()?;
        match self.stored_kind(&metric.id) {
            Some(stored) if stored != metric.kind => Err(StorageError::KindConflict {
                id: metric.id.clone(),
                stored,
            }),
            _ => Ok(()),
        }
    }

    /// Applies a metric that already passed `check`.
    fn apply_checked(&mut self, metric: &Metric) -> Metric {
        match metric.kind {
            MetricKind::Gauge => {
                let value = metric.value.unwrap_or_default();
                self.gauges.insert(metric.id.clone(), value);
                Metric::gauge(metric.id.clone(), value)
            }
            MetricKind::Counter => {
                let total = self.counters.entry(metric.id.clone()).or_insert(0);
                *total = total.wrapping_add(metric.delta.unwrap_or_default());
                Metric::counter(metric.id.clone(), *total)
            }
        }
    }

    pub fn apply(&mut self, metric: &Metric) -> Result<Metric, StorageError> {
        self.check(metric)?;
        Ok(self.apply_checked(metric))
    }

    /// Validates the whole batch, including kind clashes inside the batch
    /// itself, before touching any state.
    pub fn apply_batch(&mut self, metrics: &[Metric]) -> Result<Vec<Metric>, StorageError> {
        let mut batch_kinds: HashMap<&str, MetricKind> = HashMap::new();
        for metric in metrics {
            self.check(metric)?;
            let kind = *batch_kinds.entry(&metric.id).or_insert(metric.kind);
            if kind != metric.kind {
                return Err(StorageError::KindConflict {
                    id: metric.id.clone(),
                    stored: kind,
                });
            }
        }
        Ok(metrics.iter().map(|m| self.apply_checked(m)).collect())
    }

    pub fn get(&self, id: &str, kind: MetricKind) -> Option<Metric> {
        match kind {
            MetricKind::Gauge => self.gauges.get(id).map(|v| Metric::gauge(id, *v)),
            MetricKind::Counter => self.counters.get(id).map(|d| Metric::counter(id, *d)),
        }
    }

    pub fn all(&self) -> Vec<Metric> {
        let mut metrics: Vec<Metric> = self
            .gauges
            .iter()
            .map(|(id, v)| Metric::gauge(id.clone(), *v))
            .chain(
                self.counters
                    .iter()
                    .map(|(id, d)| Metric::counter(id.clone(), *d)),
            )
            .collect();
        metrics.sort_by(|a, b| a.id.cmp(&b.id));
        metrics
    }

    /// Rebuilds state from a dump. Entries replace rather than accumulate,
    /// since a dump holds totals.
    pub fn from_dump(metrics: Vec<Metric>) -> Result<Self, StorageError> {
        let mut store = MetricStore::default();
        for metric in metrics {
            store.check(&metric)?;
            match metric.kind {
                MetricKind::Gauge => {
                    store
                        .gauges
                        .insert(metric.id, metric.value.unwrap_or_default());
                }
                MetricKind::Counter => {
                    store
                        .counters
                        .insert(metric.id, metric.delta.unwrap_or_default());
                }
            }
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The selected backend plus the file dumper task, when one runs.
pub struct StorageHandle {
    pub storage: Arc<dyn Storage>,
    pub dumper: Option<JoinHandle<()>>,
}

impl StorageHandle {
    /// Waits for the dumper to observe cancellation, then closes the backend.
    pub async fn shutdown(self) -> Result<(), StorageError> {
        if let Some(dumper) = self.dumper {
            if let Err(e) = dumper.await {
                tracing::warn!(error = %e, "dumper task failed");
            }
        }
        self.storage.close().await?;
        info!(backend = self.storage.name(), "storage closed");
        Ok(())
    }
}

/// Picks the backend: a DSN selects PostgreSQL, a dump path selects the file
/// backend, otherwise metrics live in memory only.
pub async fn build_storage(
    settings: &Settings,
    token: CancellationToken,
) -> Result<StorageHandle, StorageError> {
    if let Some(dsn) = &settings.database_dsn {
        let storage = PgStorage::connect(dsn).await?;
        info!(backend = storage.name(), "storage ready");
        return Ok(StorageHandle {
            storage: Arc::new(storage),
            dumper: None,
        });
    }

    if let Some(path) = &settings.file_storage_path {
        let storage = Arc::new(
            FileStorage::open(path.clone(), settings.store_interval, settings.restore).await,
        );
        let dumper = if settings.store_interval.is_zero() {
            None
        } else {
            Some(storage.spawn_dumper(settings.store_interval, token))
        };
        info!(
            backend = storage.name(),
            path = %path.display(),
            store_interval_secs = settings.store_interval.as_secs(),
            "storage ready"
        );
        return Ok(StorageHandle {
            storage,
            dumper,
        });
    }

    info!(backend = "memory", "storage ready");
    Ok(StorageHandle {
        storage: Arc::new(MemStorage::new()),
        dumper: None,
    })
}
