use std::path::{Path, PathBuf};

use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: walkdir::Error,
    },
    #[error("failed to read modification time of {path}: {source}")]
    Modified {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
    pub modified: OffsetDateTime,
}

/// Depth-first iterator over the regular files below a root.
///
/// Directories are descended into; symlinks and special files are skipped.
/// The first unreadable entry is yielded as an error, callers are expected to
/// stop there.
pub struct Walker {
    inner: walkdir::IntoIter,
}

impl Walker {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: WalkDir::new(root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter(),
        }
    }
}

impl Iterator for Walker {
    type Item = Result<FileRecord, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => return Some(Err(walk_error(err))),
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => return Some(Err(walk_error(err))),
            };
            let modified = match metadata.modified() {
                Ok(modified) => OffsetDateTime::from(modified),
                Err(source) => {
                    return Some(Err(WalkError::Modified {
                        path: entry.into_path(),
                        source,
                    }));
                }
            };
            return Some(Ok(FileRecord {
                path: entry.into_path(),
                size: metadata.len(),
                modified,
            }));
        }
    }
}

/// Runs the walk on a blocking thread, handing records over a bounded channel
/// so uploads can start before discovery finishes.
pub fn spawn_walk(
    root: PathBuf,
    capacity: usize,
) -> (
    JoinHandle<()>,
    mpsc::Receiver<Result<FileRecord, WalkError>>,
) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::task::spawn_blocking(move || {
        debug!(root = %root.display(), "walk started");
        for item in Walker::new(&root) {
            let failed = item.is_err();
            if tx.blocking_send(item).is_err() || failed {
                return;
            }
        }
        debug!(root = %root.display(), "walk finished");
    });
    (handle, rx)
}

fn walk_error(err: walkdir::Error) -> WalkError {
    let path = err
        .path()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<unknown>".to_string());
    WalkError::Io { path, source: err }
}
