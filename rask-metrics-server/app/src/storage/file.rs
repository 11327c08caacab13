use super::{MetricStore, Storage, StorageError};
use async_trait::async_trait;
use parking_lot::Mutex;
use rask_metrics_core::{Metric, MetricKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// In-memory state persisted to a JSON dump file.
///
/// With a zero store interval every write is dumped before it is
/// acknowledged; otherwise a background task dumps changed state
/// periodically, and `close` writes the final dump.
#[derive(Debug)]
pub struct FileStorage {
    state: Mutex<MetricStore>,
    path: PathBuf,
    sync_writes: bool,
    dirty: AtomicBool,
    dump_lock: tokio::sync::Mutex<()>,
}

impl FileStorage {
    /// Opens the backend, seeding it from the dump when `restore` is set.
    /// A missing or unreadable dump leaves the storage empty.
    pub async fn open(path: PathBuf, store_interval: Duration, restore: bool) -> Self {
        let state = if restore {
            match Self::restore(&path).await {
                Ok(Some(store)) => {
                    info!(path = %path.display(), count = store.len(), "restored metrics from dump");
                    store
                }
                Ok(None) => {
                    info!(path = %path.display(), "no dump to restore, starting empty");
                    MetricStore::default()
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to restore dump, starting empty");
                    MetricStore::default()
                }
            }
        } else {
            MetricStore::default()
        };

        Self {
            state: Mutex::new(state),
            path,
            sync_writes: store_interval.is_zero(),
            dirty: AtomicBool::new(false),
            dump_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Reads a dump. `Ok(None)` means there is nothing to restore.
    pub async fn restore(path: &Path) -> Result<Option<MetricStore>, StorageError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let metrics: Vec<Metric> = serde_json::from_slice(&bytes)?;
        MetricStore::from_dump(metrics).map(Some)
    }

    /// Writes the current state to a temporary file and renames it over the
    /// dump, so readers never see a partial file. Returns the metric count.
    pub async fn dump(&self) -> Result<usize, StorageError> {
        let _guard = self.dump_lock.lock().await;
        self.dirty.store(false, Ordering::SeqCst);

        let snapshot = self.state.lock().all();
        let result = self.write_dump(&snapshot).await;
        if result.is_err() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn write_dump(&self, metrics: &[Metric]) -> Result<usize, StorageError> {
        let bytes = serde_json::to_vec_pretty(metrics)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = temp_path(&self.path);
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(metrics.len())
    }

    /// Applies a change. In sync mode the change is made on a copy, and the
    /// copy replaces the live state only once its dump is on disk, so a failed
    /// dump leaves the state untouched.
    async fn update<T, F>(&self, change: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut MetricStore) -> Result<T, StorageError>,
    {
        if !self.sync_writes {
            let out = {
                let mut state = self.state.lock();
                change(&mut *state)?
            };
            self.dirty.store(true, Ordering::SeqCst);
            return Ok(out);
        }

        let _guard = self.dump_lock.lock().await;
        let mut next = self.state.lock().clone();
        let out = change(&mut next)?;
        self.write_dump(&next.all()).await?;
        *self.state.lock() = next;
        Ok(out)
    }

    /// Dumps changed state every `interval` until `token` is cancelled.
    pub fn spawn_dumper(self: &Arc<Self>, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let storage = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if !storage.dirty.load(Ordering::SeqCst) {
                    continue;
                }
                match storage.dump().await {
                    Ok(count) => debug!(count, path = %storage.path.display(), "dump written"),
                    Err(e) => error!(error = %e, path = %storage.path.display(), "periodic dump failed"),
                }
            }
            debug!("dumper stopped");
        })
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[async_trait]
impl Storage for FileStorage {
    async fn append_metric(&self, metric: Metric) -> Result<Metric, StorageError> {
        self.update(|state| state.apply(&metric)).await
    }

    async fn append_metrics(&self, metrics: Vec<Metric>) -> Result<Vec<Metric>, StorageError> {
        self.update(|state| state.apply_batch(&metrics)).await
    }

    async fn get_metric(
        &self,
        id: &str,
        kind: MetricKind,
    ) -> Result<Option<Metric>, StorageError> {
        Ok(self.state.lock().get(id, kind))
    }

    async fn get_all_metrics(&self) -> Result<Vec<Metric>, StorageError> {
        Ok(self.state.lock().all())
    }

    async fn check_connection(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        if self.dirty.load(Ordering::SeqCst) {
            let count = self.dump().await?;
            info!(count, path = %self.path.display(), "final dump written");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn read_dump(path: &Path) -> Vec<Metric> {
        serde_json::from_slice(&tokio::fs::read(path).await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_sync_mode_dumps_every_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.json");
        let storage = FileStorage::open(path.clone(), Duration::ZERO, false).await;

        storage.append_metric(Metric::counter("Hits", 3)).await.unwrap();
        assert_eq!(read_dump(&path).await, vec![Metric::counter("Hits", 3)]);

        storage
            .append_metrics(vec![Metric::counter("Hits", 3), Metric::gauge("Load", 0.5)])
            .await
            .unwrap();
        assert_eq!(
            read_dump(&path).await,
            vec![Metric::counter("Hits", 6), Metric::gauge("Load", 0.5)]
        );
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_failed_sync_dump_leaves_state_untouched() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        tokio::fs::write(&blocker, b"a regular file").await.unwrap();
        let storage = FileStorage::open(blocker.join("metrics.json"), Duration::ZERO, false).await;

        assert!(storage.append_metric(Metric::counter("Hits", 5)).await.is_err());
        assert!(storage.append_metric(Metric::counter("Hits", 5)).await.is_err());
        assert!(
            storage
                .append_metrics(vec![Metric::gauge("Load", 1.0), Metric::counter("Hits", 1)])
                .await
                .is_err()
        );

        assert_eq!(storage.get_metric("Hits", MetricKind::Counter).await.unwrap(), None);
        assert!(storage.get_all_metrics().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_writes_final_dump_and_restore_reads_it() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("metrics.json");

        let storage = FileStorage::open(path.clone(), Duration::from_secs(300), false).await;
        storage.append_metric(Metric::gauge("HeapAlloc", 123.456)).await.unwrap();
        storage.append_metric(Metric::counter("PollCount", 5)).await.unwrap();
        assert!(!path.exists());
        storage.close().await.unwrap();

        let restored = FileStorage::open(path.clone(), Duration::from_secs(300), true).await;
        assert_eq!(
            restored.get_metric("HeapAlloc", MetricKind::Gauge).await.unwrap(),
            Some(Metric::gauge("HeapAlloc", 123.456))
        );
        restored.append_metric(Metric::counter("PollCount", 1)).await.unwrap();
        assert_eq!(
            restored.get_metric("PollCount", MetricKind::Counter).await.unwrap(),
            Some(Metric::counter("PollCount", 6))
        );
    }

    #[tokio::test]
    async fn test_restore_disabled_ignores_dump() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.json");
        tokio::fs::write(&path, br#"[{"id":"Hits","type":"counter","delta":9}]"#)
            .await
            .unwrap();

        let storage = FileStorage::open(path, Duration::from_secs(300), false).await;
        assert!(storage.get_all_metrics().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_dump_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        assert!(FileStorage::restore(&path).await.is_err());
        let storage = FileStorage::open(path, Duration::from_secs(300), true).await;
        assert!(storage.get_all_metrics().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_or_blank_dump_is_nothing_to_restore() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.json");
        assert!(FileStorage::restore(&path).await.unwrap().is_none());
        tokio::fs::write(&path, b"\n").await.unwrap();
        assert!(FileStorage::restore(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dumper_persists_changes_periodically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.json");
        let storage = Arc::new(FileStorage::open(path.clone(), Duration::from_millis(50), false).await);
        let token = CancellationToken::new();
        let dumper = storage.spawn_dumper(Duration::from_millis(50), token.clone());

        storage.append_metric(Metric::gauge("Load", 1.0)).await.unwrap();

        let mut persisted = false;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if path.exists() {
                persisted = true;
                break;
            }
        }
        assert!(persisted, "dumper never wrote the file");
        assert_eq!(read_dump(&path).await, vec![Metric::gauge("Load", 1.0)]);

        token.cancel();
        dumper.await.unwrap();
    }
}
