use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::filter::should_upload;
use super::metadata::{self, MetadataError, RunMetadata};
use super::paths::{PathError, partial_path, remote_key_for, sidecar_path};
use super::retry::DEFAULT_MAX_ATTEMPTS;
use super::scheduler::{
    DEFAULT_UPLOAD_CONCURRENCY, UploadError, UploadScheduler, UploadTask,
};
use super::store::ObjectStore;
use super::walker::{FileRecord, WalkError, spawn_walk};

const WALK_CHANNEL_CAPACITY: usize = 1024;
const HISTORY_WARN_DEPTH: usize = 1000;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("walk error: {0}")]
    Walk(#[from] WalkError),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),
    #[error("directory walk stopped unexpectedly: {0}")]
    WalkTask(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub concurrency: usize,
    pub max_attempts: u32,
    /// Skip the metadata commit and the sidecar upload.
    pub print_only: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            print_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub files_scanned: u64,
    pub bytes_scanned: u64,
    /// Data files plus the sidecar.
    pub files_uploaded: u64,
    pub bytes_uploaded: u64,
    pub elapsed: Duration,
    pub watermark: OffsetDateTime,
    pub metadata: RunMetadata,
    pub print_only: bool,
}

/// One incremental backup of `source_root` into `store`.
pub struct BackupEngine<S: ObjectStore> {
    store: Arc<S>,
    source_root: PathBuf,
    options: EngineOptions,
}

impl<S: ObjectStore> BackupEngine<S> {
    pub fn new(store: S, source_root: impl Into<PathBuf>, options: EngineOptions) -> Self {
        Self {
            store: Arc::new(store),
            source_root: source_root.into(),
            options,
        }
    }

    pub fn sidecar_path(&self) -> PathBuf {
        sidecar_path(&self.source_root)
    }

    pub async fn run(&self) -> Result<RunSummary, EngineError> {
        let (walk, records) = spawn_walk(self.source_root.clone(), WALK_CHANNEL_CAPACITY);
        self.run_with(walk, records).await
    }

    /// Runs against an already started walk. The walk's records must belong
    /// to `source_root`.
    async fn run_with(
        &self,
        walk: JoinHandle<()>,
        records: mpsc::Receiver<Result<FileRecord, WalkError>>,
    ) -> Result<RunSummary, EngineError> {
        let started = Instant::now();
        let upload_start_time = OffsetDateTime::now_utc();
        let sidecar = self.sidecar_path();

        let previous = metadata::load(&sidecar).await?;
        let watermark = metadata::watermark(previous.as_ref());
        info!(
            root = %self.source_root.display(),
            %watermark,
            print_only = self.options.print_only,
            "backup started"
        );

        let mut scheduler = UploadScheduler::new(
            Arc::clone(&self.store),
            self.options.concurrency,
            self.options.max_attempts,
        );
        let scanned = self
            .scan_and_dispatch(&mut scheduler, walk, records, &sidecar, watermark)
            .await;
        let (files_scanned, bytes_scanned) = match scanned {
            Ok(totals) => totals,
            Err(err) => {
                // Let uploads already in flight settle before aborting.
                if let Err(upload_err) = scheduler.drain().await {
                    warn!(error = %upload_err, "upload failed while aborting the scan");
                }
                return Err(err);
            }
        };
        scheduler.drain().await?;
        let upload_end_time = OffsetDateTime::now_utc();

        let run = RunMetadata::new(upload_start_time, upload_end_time, previous);
        let history = run.history_len();
        debug!(history, "run history depth");
        if history >= HISTORY_WARN_DEPTH {
            warn!(history, path = %sidecar.display(), "metadata history keeps growing");
        }

        if self.options.print_only {
            info!(path = %sidecar.display(), "print-only: metadata left untouched");
        } else {
            let size = metadata::save(&sidecar, &run).await?;
            scheduler
                .submit(UploadTask {
                    key: remote_key_for(&self.source_root, &sidecar)?,
                    source: sidecar.clone(),
                    size,
                })
                .await?;
            scheduler.drain().await?;
        }

        let counters = scheduler.counters();
        let summary = RunSummary {
            files_scanned,
            bytes_scanned,
            files_uploaded: counters.files(),
            bytes_uploaded: counters.bytes(),
            elapsed: started.elapsed(),
            watermark,
            metadata: run,
            print_only: self.options.print_only,
        };
        info!(
            files_scanned = summary.files_scanned,
            files_uploaded = summary.files_uploaded,
            bytes_uploaded = summary.bytes_uploaded,
            "backup finished"
        );
        Ok(summary)
    }

    async fn scan_and_dispatch(
        &self,
        scheduler: &mut UploadScheduler<S>,
        walk: JoinHandle<()>,
        mut records: mpsc::Receiver<Result<FileRecord, WalkError>>,
        sidecar: &Path,
        watermark: OffsetDateTime,
    ) -> Result<(u64, u64), EngineError> {
        let partial = partial_path(sidecar);
        let mut files = 0u64;
        let mut bytes = 0u64;

        while let Some(record) = records.recv().await {
            let record = record?;
            if record.path == sidecar || record.path == partial {
                continue;
            }
            files += 1;
            bytes += record.size;
            if !should_upload(record.modified, watermark) {
                continue;
            }
            let key = remote_key_for(&self.source_root, &record.path)?;
            scheduler
                .submit(UploadTask {
                    source: record.path,
                    key,
                    size: record.size,
                })
                .await?;
        }
        walk.await?;
        Ok((files, bytes))
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
