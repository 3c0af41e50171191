use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const TOKEN_ENV: &str = "BACKUP_STORE_TOKEN";
pub const ENDPOINT_ENV: &str = "BACKUP_STORE_ENDPOINT";
pub const CREDENTIALS_FILE_ENV: &str = "BACKUP_STORE_CREDENTIALS";

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:9000";
const CONFIG_DIR_NAME: &str = "folder-backup";
const CREDENTIALS_FILE_NAME: &str = "credentials.json";

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("failed to read credential file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("credential file {path} is malformed: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no store credentials found; set {TOKEN_ENV} or {CREDENTIALS_FILE_ENV}")]
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    pub token: String,
}

impl Credentials {
    /// Resolves credentials from the process environment, then from the
    /// explicit credential file, then from the per-user default file.
    pub fn resolve() -> Result<Self, CredentialsError> {
        let default_file = dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME).join(CREDENTIALS_FILE_NAME));
        Self::resolve_with(|name| std::env::var(name).ok(), default_file.as_deref())
    }

    pub fn resolve_with<F>(env: F, default_file: Option<&Path>) -> Result<Self, CredentialsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint_override = env(ENDPOINT_ENV).filter(|value| !value.is_empty());
        if let Some(token) = env(TOKEN_ENV).filter(|value| !value.is_empty()) {
            return Ok(Self {
                endpoint: endpoint_override.unwrap_or_else(default_endpoint),
                token,
            });
        }

        let file = match env(CREDENTIALS_FILE_ENV).filter(|value| !value.is_empty()) {
            Some(path) => PathBuf::from(path),
            None => match default_file {
                Some(path) if path.exists() => path.to_path_buf(),
                _ => return Err(CredentialsError::Missing),
            },
        };
        let mut credentials = Self::from_file(&file)?;
        if let Some(endpoint) = endpoint_override {
            credentials.endpoint = endpoint;
        }
        Ok(credentials)
    }

    pub fn from_file(path: &Path) -> Result<Self, CredentialsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CredentialsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| CredentialsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}
