use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use thiserror::Error;
use url::Url;

use crate::sync::retry::DEFAULT_MAX_ATTEMPTS;
use crate::sync::scheduler::DEFAULT_UPLOAD_CONCURRENCY;

pub const DESTINATION_SCHEME: &str = "store";
const CONCURRENCY_ENV: &str = "BACKUP_UPLOAD_CONCURRENCY";
const MAX_ATTEMPTS_ENV: &str = "BACKUP_MAX_ATTEMPTS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("destination {0:?} is not a store://bucket/prefix url")]
    NotAStoreUrl(String),
    #[error("destination {0:?} does not name a bucket")]
    MissingBucket(String),
    #[error("source {0:?} is a bucket url; the source must be a local directory")]
    SourceIsBucket(String),
    #[error("source {path} is not a readable directory: {reason}")]
    SourceNotDirectory { path: PathBuf, reason: String },
}

/// Back up a local folder to an object store, uploading only what changed
/// since the last run.
#[derive(Debug, Clone, Parser)]
#[command(name = "backup", version)]
pub struct Cli {
    /// Local directory to back up.
    pub source: String,
    /// Target in `store://bucket/prefix` form.
    pub destination: String,
    /// List what would be uploaded without writing anything anywhere.
    #[arg(short = 'n', long)]
    pub print_only: bool,
    /// Suppress per-file progress lines.
    #[arg(short, long)]
    pub quiet: bool,
    /// Debug-level logging.
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,
    /// Maximum simultaneous uploads [env: BACKUP_UPLOAD_CONCURRENCY, default: 100].
    #[arg(long)]
    pub concurrency: Option<usize>,
    /// Attempts per file before the run fails [env: BACKUP_MAX_ATTEMPTS, default: 3].
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub bucket: String,
    pub prefix: String,
}

impl Destination {
    /// Full object key for a key relative to the source root.
    pub fn object_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.prefix)
        }
    }
}

impl FromStr for Destination {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(value).map_err(|_| ConfigError::NotAStoreUrl(value.to_string()))?;
        if url.scheme() != DESTINATION_SCHEME {
            return Err(ConfigError::NotAStoreUrl(value.to_string()));
        }
        let bucket = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ConfigError::MissingBucket(value.to_string()))?
            .to_string();
        let prefix = url
            .path()
            .split('/')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Ok(Self { bucket, prefix })
    }
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub source: PathBuf,
    pub destination: Destination,
    pub print_only: bool,
    pub quiet: bool,
    pub verbose: bool,
    pub concurrency: usize,
    pub max_attempts: u32,
}

impl BackupConfig {
    /// Validates the command line before anything touches the network.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        if cli.source.starts_with(&format!("{DESTINATION_SCHEME}://")) {
            return Err(ConfigError::SourceIsBucket(cli.source));
        }
        let destination: Destination = cli.destination.parse()?;
        let source = std::fs::canonicalize(&cli.source)
            .map_err(|err| ConfigError::SourceNotDirectory {
                path: PathBuf::from(&cli.source),
                reason: err.to_string(),
            })?;
        if !source.is_dir() {
            return Err(ConfigError::SourceNotDirectory {
                path: source,
                reason: "not a directory".to_string(),
            });
        }

        Ok(Self {
            source,
            destination,
            print_only: cli.print_only,
            quiet: cli.quiet,
            verbose: cli.verbose,
            concurrency: cli
                .concurrency
                .filter(|v| *v > 0)
                .unwrap_or_else(|| read_limit(CONCURRENCY_ENV, DEFAULT_UPLOAD_CONCURRENCY)),
            max_attempts: cli
                .max_attempts
                .filter(|v| *v > 0)
                .unwrap_or_else(|| read_limit(MAX_ATTEMPTS_ENV, DEFAULT_MAX_ATTEMPTS)),
        })
    }
}

fn read_limit<T>(name: &str, default: T) -> T
where
    T: FromStr + PartialOrd + Default,
{
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .filter(|v| *v > T::default())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("backup").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn parses_bucket_and_prefix() {
        let dest: Destination = "store://photos/2024/summer/".parse().unwrap();
        assert_eq!(dest.bucket, "photos");
        assert_eq!(dest.prefix, "2024/summer");
        assert_eq!(dest.object_key("a/b.jpg"), "2024/summer/a/b.jpg");
    }

    #[test]
    fn prefix_is_optional() {
        let dest: Destination = "store://photos".parse().unwrap();
        assert_eq!(dest.prefix, "");
        assert_eq!(dest.object_key("a.jpg"), "a.jpg");
    }

    #[test]
    fn rejects_non_url_destination() {
        assert!(matches!(
            "not-a-url".parse::<Destination>(),
            Err(ConfigError::NotAStoreUrl(_))
        ));
        assert!(matches!(
            "https://photos/x".parse::<Destination>(),
            Err(ConfigError::NotAStoreUrl(_))
        ));
    }

    #[test]
    fn rejects_destination_without_bucket() {
        assert!(matches!(
            "store:///prefix".parse::<Destination>(),
            Err(ConfigError::MissingBucket(_))
        ));
    }

    #[test]
    fn rejects_bucket_as_source() {
        let err = BackupConfig::from_cli(cli(&["store://a/b", "store://c/d"])).unwrap_err();
        assert!(matches!(err, ConfigError::SourceIsBucket(_)));
    }

    #[test]
    fn rejects_missing_source_directory() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        let err = BackupConfig::from_cli(cli(&[missing.to_str().unwrap(), "store://b"]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::SourceNotDirectory { .. }));
    }

    #[test]
    fn builds_config_from_flags() {
        let dir = tempdir().unwrap();
        let config = BackupConfig::from_cli(cli(&[
            dir.path().to_str().unwrap(),
            "store://bucket/pre",
            "--print-only",
            "-q",
            "--concurrency",
            "8",
            "--max-attempts",
            "5",
        ]))
        .unwrap();

        assert_eq!(config.source, std::fs::canonicalize(dir.path()).unwrap());
        assert_eq!(config.destination.bucket, "bucket");
        assert!(config.print_only);
        assert!(config.quiet);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn quiet_and_verbose_conflict() {
        assert!(
            Cli::try_parse_from(["backup", "/tmp", "store://b", "-q", "-v"]).is_err()
        );
    }

    #[test]
    fn read_limit_falls_back_to_default() {
        assert_eq!(read_limit("NO_SUCH_BACKUP_ENV_FOR_TEST", 42usize), 42);
    }
}
