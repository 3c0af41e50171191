use std::error::Error as StdError;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, debug, error};

use super::retry::with_retries;
use super::store::{ObjectStore, UploadFailure};

pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 100;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload of {key} failed after {attempts} attempts ({kind}): {source}")]
    Failed {
        key: String,
        attempts: u32,
        kind: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("upload task aborted: {0}")]
    Task(#[from] JoinError),
    #[error("upload scheduler is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub source: PathBuf,
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Default)]
pub struct UploadCounters {
    files: AtomicU64,
    bytes: AtomicU64,
}

impl UploadCounters {
    fn record(&self, size: u64) {
        self.files.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub fn files(&self) -> u64 {
        self.files.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Runs uploads concurrently, never more than `concurrency` at once.
///
/// `submit` waits for a free slot, so a fast producer is slowed down to the
/// pace of the uploads. `drain` waits for everything submitted so far and
/// reports the first permanent failure once all tasks have settled.
pub struct UploadScheduler<S: ObjectStore> {
    store: Arc<S>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<Result<(), UploadError>>,
    counters: Arc<UploadCounters>,
    max_attempts: u32,
    first_error: Option<UploadError>,
}

impl<S: ObjectStore> UploadScheduler<S> {
    pub fn new(store: Arc<S>, concurrency: usize, max_attempts: u32) -> Self {
        Self {
            store,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            tasks: JoinSet::new(),
            counters: Arc::new(UploadCounters::default()),
            max_attempts: max_attempts.max(1),
            first_error: None,
        }
    }

    pub fn counters(&self) -> Arc<UploadCounters> {
        Arc::clone(&self.counters)
    }

    pub async fn submit(&mut self, task: UploadTask) -> Result<(), UploadError> {
        self.reap_finished();
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| UploadError::Closed)?;

        let store = Arc::clone(&self.store);
        let counters = Arc::clone(&self.counters);
        let max_attempts = self.max_attempts;
        let upload = async move {
            let _permit = permit;
            let UploadTask { source, key, size } = task;
            let result =
                with_retries(max_attempts, &key, || store.put(&source, &key)).await;
            match result {
                Ok(()) => {
                    counters.record(size);
                    debug!(%key, size, "upload finished");
                    Ok(())
                }
                Err(err) => {
                    let kind = err.kind();
                    error!(%key, path = %source.display(), kind, error = %err, "upload failed");
                    Err(UploadError::Failed {
                        key,
                        attempts: max_attempts,
                        kind,
                        source: Box::new(err),
                    })
                }
            }
        };
        self.tasks.spawn(upload.in_current_span());
        Ok(())
    }

    pub async fn drain(&mut self) -> Result<(), UploadError> {
        while let Some(joined) = self.tasks.join_next().await {
            self.settle(joined);
        }
        match self.first_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn reap_finished(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            self.settle(joined);
        }
    }

    fn settle(&mut self, joined: Result<Result<(), UploadError>, JoinError>) {
        let outcome = joined.map_err(UploadError::from).and_then(|result| result);
        if let Err(err) = outcome {
            self.first_error.get_or_insert(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tracing_test::traced_test;

    #[derive(Debug, thiserror::Error)]
    #[error("simulated failure for {0}")]
    struct Simulated(String);

    impl UploadFailure for Simulated {
        fn kind(&self) -> &'static str {
            "simulated"
        }
    }

    /// Fails the first `failures` attempts for every key, then succeeds.
    #[derive(Default)]
    struct FlakyStore {
        failures: u32,
        attempts: Mutex<HashMap<String, u32>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl FlakyStore {
        fn attempts_for(&self, key: &str) -> u32 {
            self.attempts
                .lock()
                .unwrap()
                .get(key)
                .copied()
                .unwrap_or_default()
        }
    }

    impl ObjectStore for FlakyStore {
        type Error = Simulated;

        async fn put(&self, _local: &Path, key: &str) -> Result<(), Simulated> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let entry = attempts.entry(key.to_string()).or_default();
                *entry += 1;
                *entry
            };
            if attempt <= self.failures {
                Err(Simulated(key.to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn task(key: &str, size: u64) -> UploadTask {
        UploadTask {
            source: PathBuf::from("/src").join(key),
            key: key.to_string(),
            size,
        }
    }

    #[tokio::test]
    async fn counts_each_successful_upload_once() {
        let store = Arc::new(FlakyStore::default());
        let mut scheduler = UploadScheduler::new(Arc::clone(&store), 4, 3);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            scheduler.submit(task(key, (i as u64 + 1) * 10)).await.unwrap();
        }
        scheduler.drain().await.unwrap();

        let counters = scheduler.counters();
        assert_eq!(counters.files(), 3);
        assert_eq!(counters.bytes(), 60);
        assert_eq!(store.attempts_for("b"), 1);
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let store = Arc::new(FlakyStore {
            failures: 2,
            ..Default::default()
        });
        let mut scheduler = UploadScheduler::new(Arc::clone(&store), 4, 3);
        scheduler.submit(task("a", 1)).await.unwrap();
        scheduler.drain().await.unwrap();

        assert_eq!(store.attempts_for("a"), 3);
        assert_eq!(scheduler.counters().files(), 1);
    }

    #[tokio::test]
    async fn permanent_failure_surfaces_after_all_tasks_settle() {
        let store = Arc::new(FlakyStore {
            failures: 3,
            delay: Duration::from_millis(5),
            ..Default::default()
        });
        let mut scheduler = UploadScheduler::new(Arc::clone(&store), 2, 3);
        for key in ["a", "b", "c", "d"] {
            scheduler.submit(task(key, 1)).await.unwrap();
        }
        let err = scheduler.drain().await.expect_err("expected failure");

        assert!(matches!(
            err,
            UploadError::Failed {
                attempts: 3,
                kind: "simulated",
                ..
            }
        ));
        for key in ["a", "b", "c", "d"] {
            assert_eq!(store.attempts_for(key), 3);
        }
        assert_eq!(scheduler.counters().files(), 0);
    }

    #[tokio::test]
    async fn never_exceeds_worker_budget() {
        let store = Arc::new(FlakyStore {
            delay: Duration::from_millis(10),
            ..Default::default()
        });
        let mut scheduler = UploadScheduler::new(Arc::clone(&store), 3, 1);
        for i in 0..20 {
            scheduler.submit(task(&format!("f{i}"), 1)).await.unwrap();
        }
        scheduler.drain().await.unwrap();

        let peak = store.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak} exceeded budget");
        assert!(peak >= 2, "uploads never overlapped");
        assert_eq!(scheduler.counters().files(), 20);
    }

    #[tokio::test]
    async fn drain_resets_after_reporting_failure() {
        let store = Arc::new(FlakyStore {
            failures: 1,
            ..Default::default()
        });
        let mut scheduler = UploadScheduler::new(Arc::clone(&store), 1, 1);
        scheduler.submit(task("a", 1)).await.unwrap();
        assert!(scheduler.drain().await.is_err());

        scheduler.submit(task("a", 1)).await.unwrap();
        scheduler.drain().await.unwrap();
        assert_eq!(scheduler.counters().files(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn final_failure_is_logged_with_its_kind() {
        let store = Arc::new(FlakyStore {
            failures: 2,
            ..Default::default()
        });
        let mut scheduler = UploadScheduler::new(Arc::clone(&store), 1, 2);
        scheduler.submit(task("a", 1)).await.unwrap();
        assert!(scheduler.drain().await.is_err());

        logs_assert(|lines: &[&str]| {
            let failed: Vec<_> = lines
                .iter()
                .filter(|line| line.contains("upload failed"))
                .collect();
            match failed.as_slice() {
                [line] if line.contains("kind=\"simulated\"") => Ok(()),
                other => Err(format!("unexpected failure lines: {other:?}")),
            }
        });
    }
}
