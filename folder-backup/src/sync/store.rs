use std::convert::Infallible;
use std::error::Error as StdError;
use std::future::Future;
use std::path::Path;

use backup_store::{StoreClient, StoreError};
use tracing::info;

use crate::config::Destination;

/// Log target for the print-only listing, kept visible under `--quiet`.
pub const PLAN_TARGET: &str = "folder_backup::plan";

/// Error side of an [`ObjectStore`]: anything that can explain in one word
/// why an upload failed.
pub trait UploadFailure: StdError + Send + Sync + 'static {
    fn kind(&self) -> &'static str;
}

impl UploadFailure for StoreError {
    fn kind(&self) -> &'static str {
        StoreError::kind(self).as_str()
    }
}

impl UploadFailure for Infallible {
    fn kind(&self) -> &'static str {
        match *self {}
    }
}

/// Where uploads go. `key` is relative to the source root and always uses `/`.
pub trait ObjectStore: Send + Sync + 'static {
    type Error: UploadFailure;

    fn put(
        &self,
        local: &Path,
        key: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Object store bucket plus key prefix, as given by a `store://bucket/prefix`
/// destination.
#[derive(Clone)]
pub struct BucketStore {
    client: StoreClient,
    destination: Destination,
}

impl BucketStore {
    pub fn new(client: StoreClient, destination: Destination) -> Self {
        Self {
            client,
            destination,
        }
    }
}

impl ObjectStore for BucketStore {
    type Error = StoreError;

    async fn put(&self, local: &Path, key: &str) -> Result<(), StoreError> {
        let object_key = self.destination.object_key(key);
        self.client
            .put_object(&self.destination.bucket, &object_key, local)
            .await?;
        info!(bucket = %self.destination.bucket, key = %object_key, "uploaded");
        Ok(())
    }
}

/// Stand-in used by `--print-only`: lists each upload and touches nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrintOnlyStore;

impl ObjectStore for PrintOnlyStore {
    type Error = Infallible;

    async fn put(&self, local: &Path, key: &str) -> Result<(), Infallible> {
        info!(target: PLAN_TARGET, "would upload {} -> {key}", local.display());
        Ok(())
    }
}
