use super::sink::{FailedBatch, OverflowSink, SinkError};
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const BATCH_EXTENSION: &str = "batch";

#[derive(Debug, Clone)]
pub struct DiskConfig {
    pub storage_path: PathBuf,
    /// Upper bound on bytes stored under `storage_path`.
    pub max_disk_usage: u64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            storage_path: std::env::temp_dir().join("victoria-metrics-client").join("overflow"),
            max_disk_usage: 256 * 1024 * 1024,
        }
    }
}

/// Keeps failed batches as bincode files, one `<batch_id>.batch` per batch,
/// so they can be listed, loaded and replayed later.
#[derive(Debug, Clone)]
pub struct DiskOverflowSink {
    inner: Arc<DiskInner>,
}

#[derive(Debug)]
struct DiskInner {
    config: DiskConfig,
    current_usage: AtomicU64,
}

impl DiskOverflowSink {
    pub async fn new(config: DiskConfig) -> Result<Self, SinkError> {
        fs::create_dir_all(&config.storage_path).await?;
        let current_usage = calculate_disk_usage(&config.storage_path).await?;

        Ok(Self {
            inner: Arc::new(DiskInner {
                config,
                current_usage: AtomicU64::new(current_usage),
            }),
        })
    }

    pub fn current_disk_usage(&self) -> u64 {
        self.inner.current_usage.load(Ordering::Relaxed)
    }

    pub fn storage_path(&self) -> &Path {
        &self.inner.config.storage_path
    }

    pub async fn store_batch(&self, batch: &FailedBatch) -> Result<(), SinkError> {
        self.inner.store_batch(batch).await
    }

    pub async fn list(&self) -> Result<Vec<String>, SinkError> {
        let mut batch_ids = Vec::new();
        let mut entries = fs::read_dir(&self.inner.config.storage_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(BATCH_EXTENSION)
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                batch_ids.push(stem.to_string());
            }
        }

        batch_ids.sort();
        Ok(batch_ids)
    }

    pub async fn load(&self, batch_id: &str) -> Result<FailedBatch, SinkError> {
        let path = self.inner.batch_path(batch_id);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SinkError::NotFound(batch_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let (batch, _): (FailedBatch, usize) =
            bincode::serde::decode_from_slice(&data, bincode::config::standard())?;
        Ok(batch)
    }

    pub async fn remove(&self, batch_id: &str) -> Result<(), SinkError> {
        let path = self.inner.batch_path(batch_id);
        let size = match fs::metadata(&path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SinkError::NotFound(batch_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        fs::remove_file(&path).await?;
        self.inner.release(size);
        debug!(batch_id, "removed overflow batch");
        Ok(())
    }
}

impl DiskInner {
    fn batch_path(&self, batch_id: &str) -> PathBuf {
        self.config
            .storage_path
            .join(format!("{batch_id}.{BATCH_EXTENSION}"))
    }

    /// Reserve `bytes` against the cap, failing without side effects when full.
    fn reserve(&self, bytes: u64) -> Result<(), SinkError> {
        let limit = self.config.max_disk_usage;
        self.current_usage
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|total| *total <= limit)
            })
            .map(|_| ())
            .map_err(|used| SinkError::Full { used, limit })
    }

    fn release(&self, bytes: u64) {
        let _ = self
            .current_usage
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    async fn store_batch(&self, batch: &FailedBatch) -> Result<(), SinkError> {
        let data = bincode::serde::encode_to_vec(batch, bincode::config::standard())?;
        let size = data.len() as u64;
        self.reserve(size)?;

        let path = self.batch_path(&batch.batch_id);
        let written = async {
            let mut file = fs::File::create(&path).await?;
            file.write_all(&data).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            self.release(size);
            return Err(e.into());
        }

        debug!(batch_id = %batch.batch_id, bytes = size, "stored failed batch on disk");
        Ok(())
    }
}

impl OverflowSink for DiskOverflowSink {
    fn store(&self, batch: FailedBatch) -> BoxFuture<'static, Result<(), SinkError>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let result = inner.store_batch(&batch).await;
            if let Err(e) = &result {
                warn!(batch_id = %batch.batch_id, error = %e, "could not store failed batch");
            }
            result
        })
    }
}

async fn calculate_disk_usage(path: &Path) -> Result<u64, SinkError> {
    let mut total_size = 0u64;
    let mut entries = fs::read_dir(path).await?;

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            total_size += entry.metadata().await?.len();
        }
    }

    Ok(total_size)
}
