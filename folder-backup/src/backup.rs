use anyhow::Context;
use backup_store::{Credentials, StoreClient};
use tracing::info;

use crate::config::BackupConfig;
use crate::sync::engine::{BackupEngine, EngineOptions, RunSummary};
use crate::sync::store::{BucketStore, PrintOnlyStore};

impl From<&BackupConfig> for EngineOptions {
    fn from(config: &BackupConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            max_attempts: config.max_attempts,
            print_only: config.print_only,
        }
    }
}

/// Runs one backup for an already validated configuration. Print-only runs
/// never resolve credentials or build a network client.
pub async fn run(config: &BackupConfig) -> anyhow::Result<RunSummary> {
    info!(
        source = %config.source.display(),
        bucket = %config.destination.bucket,
        prefix = %config.destination.prefix,
        concurrency = config.concurrency,
        max_attempts = config.max_attempts,
        "starting backup"
    );
    let options = EngineOptions::from(config);

    let summary = if config.print_only {
        BackupEngine::new(PrintOnlyStore, &config.source, options)
            .run()
            .await?
    } else {
        let credentials = Credentials::resolve().context("failed to resolve store credentials")?;
        let client = StoreClient::from_credentials(&credentials)
            .context("failed to build object store client")?;
        info!(endpoint = %client.endpoint(), "object store ready");
        let store = BucketStore::new(client, config.destination.clone());
        BackupEngine::new(store, &config.source, options)
            .run()
            .await?
    };
    Ok(summary)
}

pub fn render_report(summary: &RunSummary) -> String {
    let verb = if summary.print_only {
        "would upload"
    } else {
        "uploaded"
    };
    format!(
        "scanned {} files ({} bytes), {verb} {} files ({} bytes) in {:.2}s",
        summary.files_scanned,
        summary.bytes_scanned,
        summary.files_uploaded,
        summary.bytes_uploaded,
        summary.elapsed.as_secs_f64()
    )
}
