use std::io;
use std::path::{Path, PathBuf};

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;

use super::filter::INITIAL_WATERMARK;
use super::paths::partial_path;

// Each nested `previous` costs a few frames on both the encode and decode
// side; grow the stack instead of overflowing on long histories.
const STACK_RED_ZONE: usize = 64 * 1024;
const STACK_GROWTH: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to read metadata file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("metadata file {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write metadata file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode metadata: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Start and end of one completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRecord {
    pub upload_start_time: OffsetDateTime,
    pub upload_end_time: OffsetDateTime,
}

/// The run being committed plus every earlier run, newest first.
///
/// On disk each run nests the one before it under `previous`; in memory the
/// history is kept flat so neither its length nor dropping it recurses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetadata {
    pub upload_start_time: OffsetDateTime,
    pub upload_end_time: OffsetDateTime,
    pub previous: Vec<RunRecord>,
}

impl RunMetadata {
    pub fn new(
        upload_start_time: OffsetDateTime,
        upload_end_time: OffsetDateTime,
        previous: Option<RunMetadata>,
    ) -> Self {
        let previous = match previous {
            Some(run) => {
                let mut history = Vec::with_capacity(run.previous.len() + 1);
                history.push(run.latest());
                history.extend(run.previous);
                history
            }
            None => Vec::new(),
        };
        Self {
            upload_start_time,
            upload_end_time,
            previous,
        }
    }

    pub fn latest(&self) -> RunRecord {
        RunRecord {
            upload_start_time: self.upload_start_time,
            upload_end_time: self.upload_end_time,
        }
    }

    /// Number of runs recorded, this one included.
    pub fn history_len(&self) -> usize {
        self.previous.len() + 1
    }
}

struct Rfc3339(OffsetDateTime);

impl Serialize for Rfc3339 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        time::serde::rfc3339::serialize(&self.0, serializer)
    }
}

/// One level of the on-disk chain: `run` followed by the older runs.
struct Nested<'a> {
    run: RunRecord,
    older: &'a [RunRecord],
}

impl Serialize for Nested<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || {
            let fields = if self.older.is_empty() { 2 } else { 3 };
            let mut state = serializer.serialize_struct("RunMetadata", fields)?;
            state.serialize_field("uploadStartTime", &Rfc3339(self.run.upload_start_time))?;
            state.serialize_field("uploadEndTime", &Rfc3339(self.run.upload_end_time))?;
            if let Some((next, rest)) = self.older.split_first() {
                state.serialize_field(
                    "previous",
                    &Nested {
                        run: *next,
                        older: rest,
                    },
                )?;
            }
            state.end()
        })
    }
}

impl Serialize for RunMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Nested {
            run: self.latest(),
            older: &self.previous,
        }
        .serialize(serializer)
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRun {
    #[serde(with = "time::serde::rfc3339")]
    upload_start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    upload_end_time: OffsetDateTime,
    #[serde(default)]
    previous: Option<Box<WireRun>>,
}

impl Drop for WireRun {
    fn drop(&mut self) {
        let mut next = self.previous.take();
        while let Some(mut run) = next {
            next = run.previous.take();
        }
    }
}

impl<'de> Deserialize<'de> for RunMetadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut top = WireRun::deserialize(deserializer)?;
        let mut previous = Vec::new();
        let mut next = top.previous.take();
        while let Some(mut run) = next {
            next = run.previous.take();
            previous.push(RunRecord {
                upload_start_time: run.upload_start_time,
                upload_end_time: run.upload_end_time,
            });
        }
        Ok(Self {
            upload_start_time: top.upload_start_time,
            upload_end_time: top.upload_end_time,
            previous,
        })
    }
}

pub fn watermark(previous: Option<&RunMetadata>) -> OffsetDateTime {
    previous
        .map(|run| run.upload_start_time)
        .unwrap_or(INITIAL_WATERMARK)
}

fn decode(raw: &[u8]) -> Result<RunMetadata, serde_json::Error> {
    let mut json = serde_json::Deserializer::from_slice(raw);
    json.disable_recursion_limit();
    let run = RunMetadata::deserialize(serde_stacker::Deserializer::new(&mut json))?;
    json.end()?;
    Ok(run)
}

/// Reads the sidecar. A missing file means no run has completed yet.
pub async fn load(path: &Path) -> Result<Option<RunMetadata>, MetadataError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(MetadataError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    decode(&raw)
        .map(Some)
        .map_err(|source| MetadataError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}

/// Replaces the sidecar atomically: the new content is synced to a partial
/// sibling first and then renamed over the old file. Returns the number of
/// bytes written.
pub async fn save(path: &Path, metadata: &RunMetadata) -> Result<u64, MetadataError> {
    let mut encoded = serde_json::to_vec_pretty(metadata)?;
    encoded.push(b'\n');

    let partial = partial_path(path);
    let write_err = |source| MetadataError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut file = tokio::fs::File::create(&partial).await.map_err(write_err)?;
    file.write_all(&encoded).await.map_err(write_err)?;
    file.flush().await.map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;
    drop(file);

    if let Err(err) = tokio::fs::rename(&partial, path).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(write_err(err));
    }
    Ok(encoded.len() as u64)
}
