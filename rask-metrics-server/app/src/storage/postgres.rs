use super::{Storage, StorageError};
use async_trait::async_trait;
use rask_metrics_core::retry::{Backoff, retry};
use rask_metrics_core::{Metric, MetricKind};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Executor, PgPool, Postgres, Row};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const PING_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS metrics (
        id    TEXT PRIMARY KEY,
        kind  TEXT NOT NULL CHECK (kind IN ('gauge', 'counter')),
        value DOUBLE PRECISION,
        delta BIGINT
    )
";

// The WHERE clause leaves rows of the other kind untouched, in which case
// nothing is returned.
const UPSERT: &str = r"
    INSERT INTO metrics (id, kind, value, delta)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (id) DO UPDATE SET
        value = EXCLUDED.value,
        delta = CASE
            WHEN EXCLUDED.kind = 'counter' THEN metrics.delta + EXCLUDED.delta
            ELSE NULL
        END
    WHERE metrics.kind = EXCLUDED.kind
    RETURNING id, kind, value, delta
";

/// PostgreSQL backend. Every operation runs under a timeout and is retried
/// on connection-class errors with the standard backoff.
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
    backoff: Backoff,
}

impl PgStorage {
    /// Builds the pool and creates the schema, retrying while the database
    /// is unreachable.
    pub async fn connect(dsn: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .test_before_acquire(true)
            .connect_lazy(dsn)?;
        let storage = Self::with_pool(pool);
        storage.migrate().await?;
        info!("database schema ready");
        Ok(storage)
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            pool,
            backoff: Backoff::standard(),
        }
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        self.run("migrate", WRITE_TIMEOUT, || async {
            self.pool.execute(SCHEMA).await?;
            Ok(())
        })
        .await
    }

    async fn run<T, F, Fut>(
        &self,
        op: &'static str,
        limit: Duration,
        f: F,
    ) -> Result<T, StorageError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        retry(self.backoff, None, StorageError::is_transient, || async {
            tokio::time::timeout(limit, f())
                .await
                .map_err(|_| StorageError::Timeout(op))?
        })
        .await
    }
}

async fn upsert<'e, E>(executor: E, metric: &Metric) -> Result<Metric, StorageError>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(UPSERT)
        .bind(&metric.id)
        .bind(metric.kind.as_str())
        .bind(match metric.kind {
            MetricKind::Gauge => metric.value,
            MetricKind::Counter => None,
        })
        .bind(match metric.kind {
            MetricKind::Gauge => None,
            MetricKind::Counter => metric.delta,
        })
        .fetch_optional(executor)
        .await?;

    match row {
        Some(row) => from_row(&row),
        None => Err(StorageError::KindConflict {
            id: metric.id.clone(),
            stored: other_kind(metric.kind),
        }),
    }
}

fn other_kind(kind: MetricKind) -> MetricKind {
    match kind {
        MetricKind::Gauge => MetricKind::Counter,
        MetricKind::Counter => MetricKind::Gauge,
    }
}

fn from_row(row: &PgRow) -> Result<Metric, StorageError> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let kind: MetricKind = kind
        .parse()
        .map_err(|_| StorageError::Corrupt(format!("metric {id} has kind '{kind}'")))?;
    Ok(Metric {
        id,
        kind,
        delta: row.try_get("delta")?,
        value: row.try_get("value")?,
    }
    .normalized())
}

#[async_trait]
impl Storage for PgStorage {
    async fn append_metric(&self, metric: Metric) -> Result<Metric, StorageError> {
        metric.validate()?;
        self.run("append_metric", WRITE_TIMEOUT, || upsert(&self.pool, &metric))
            .await
    }

    async fn append_metrics(&self, metrics: Vec<Metric>) -> Result<Vec<Metric>, StorageError> {
        for metric in &metrics {
            metric.validate()?;
        }
        self.run("append_metrics", WRITE_TIMEOUT, || async {
            let mut tx = self.pool.begin().await?;
            let mut stored = Vec::with_capacity(metrics.len());
            for metric in &metrics {
                // Dropping the transaction on error rolls it back.
                stored.push(upsert(&mut *tx, metric).await?);
            }
            tx.commit().await?;
            debug!(count = stored.len(), "batch committed");
            Ok(stored)
        })
        .await
    }

    async fn get_metric(
        &self,
        id: &str,
        kind: MetricKind,
    ) -> Result<Option<Metric>, StorageError> {
        self.run("get_metric", READ_TIMEOUT, || async {
            let row = sqlx::query(
                "SELECT id, kind, value, delta FROM metrics WHERE id = $1 AND kind = $2",
            )
            .bind(id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;
            row.as_ref().map(from_row).transpose()
        })
        .await
    }

    async fn get_all_metrics(&self) -> Result<Vec<Metric>, StorageError> {
        self.run("get_all_metrics", READ_TIMEOUT, || async {
            let rows = sqlx::query("SELECT id, kind, value, delta FROM metrics ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
            rows.iter().map(from_row).collect()
        })
        .await
    }

    async fn check_connection(&self) -> Result<(), StorageError> {
        self.run("ping", PING_TIMEOUT, || async {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
