use std::fmt;
use std::io;
use std::path::Path;

use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH};
use reqwest::{Body, Client, StatusCode};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use url::Url;

use crate::credentials::Credentials;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("endpoint {0} cannot carry object paths")]
    InvalidEndpoint(Url),
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("store returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

/// Coarse cause of a failed upload, attached to failure log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Token rejected or not allowed to write the bucket.
    Auth,
    RateLimit,
    /// 5xx or request timeout reported by the store.
    Server,
    /// Any other non-success status.
    Rejected,
    /// The request never got a response.
    Network,
    /// The local file could not be read.
    LocalIo,
    /// Endpoint or object URL could not be built.
    Config,
}

impl FailureKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Auth,
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimit,
            StatusCode::REQUEST_TIMEOUT => Self::Server,
            status if status.is_server_error() => Self::Server,
            _ => Self::Rejected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimit => "rate-limit",
            Self::Server => "server",
            Self::Rejected => "rejected",
            Self::Network => "network",
            Self::LocalIo => "local-io",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client for a path-style HTTP object store: every object lives at
/// `{endpoint}/{bucket}/{key}` and is written with a single `PUT`.
#[derive(Clone)]
pub struct StoreClient {
    http: Client,
    endpoint: Url,
    token: String,
}

impl StoreClient {
    pub fn new(endpoint: &str, token: impl Into<String>) -> Result<Self, StoreError> {
        Ok(Self {
            http: Client::new(),
            endpoint: Url::parse(endpoint)?,
            token: token.into(),
        })
    }

    pub fn from_credentials(credentials: &Credentials) -> Result<Self, StoreError> {
        Self::new(&credentials.endpoint, credentials.token.clone())
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Streams `source` to `bucket/key`, overwriting any existing object.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
    ) -> Result<(), StoreError> {
        let url = self.object_url(bucket, key)?;
        let file = tokio::fs::File::open(source)
            .await
            .map_err(|err| io_error(source, err))?;
        let len = file
            .metadata()
            .await
            .map_err(|err| io_error(source, err))?
            .len();
        let body = Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .http
            .put(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .header(CONTENT_LENGTH, len)
            .body(body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub fn object_url(&self, bucket: &str, key: &str) -> Result<Url, StoreError> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::InvalidEndpoint(self.endpoint.clone()))?;
            segments.pop_if_empty();
            segments.push(bucket);
            segments.extend(key.split('/').filter(|part| !part.is_empty()));
        }
        Ok(url)
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    async fn handle_response(response: reqwest::Response) -> Result<(), StoreError> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::Api { status, body })
        }
    }
}

impl StoreError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StoreError::Api { status, .. } => FailureKind::from_status(*status),
            StoreError::Request(_) => FailureKind::Network,
            StoreError::Io { .. } => FailureKind::LocalIo,
            StoreError::Url(_) | StoreError::InvalidEndpoint(_) => FailureKind::Config,
        }
    }
}

fn io_error(path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_url_appends_bucket_and_key_segments() {
        let client = StoreClient::new("https://store.example/api/", "t").unwrap();
        let url = client.object_url("photos", "2024/Summer Trip/a.jpg").unwrap();
        assert_eq!(
            url.as_str(),
            "https://store.example/api/photos/2024/Summer%20Trip/a.jpg"
        );
    }

    #[test]
    fn object_url_skips_empty_key_segments() {
        let client = StoreClient::new("https://store.example", "t").unwrap();
        let url = client.object_url("b", "/nested//file.txt").unwrap();
        assert_eq!(url.as_str(), "https://store.example/b/nested/file.txt");
    }

    #[test]
    fn statuses_map_to_failure_kinds() {
        let cases = [
            (StatusCode::FORBIDDEN, FailureKind::Auth),
            (StatusCode::TOO_MANY_REQUESTS, FailureKind::RateLimit),
            (StatusCode::REQUEST_TIMEOUT, FailureKind::Server),
            (StatusCode::BAD_GATEWAY, FailureKind::Server),
            (StatusCode::NOT_FOUND, FailureKind::Rejected),
            (StatusCode::CONFLICT, FailureKind::Rejected),
        ];
        for (status, kind) in cases {
            assert_eq!(FailureKind::from_status(status), kind, "{status}");
        }
    }

    #[test]
    fn non_api_errors_have_their_own_kind() {
        let io = io_error(Path::new("/missing"), io::ErrorKind::NotFound.into());
        assert_eq!(io.kind(), FailureKind::LocalIo);
        assert_eq!(io.kind().to_string(), "local-io");

        let endpoint = Url::parse("mailto:someone@example.com").unwrap();
        assert_eq!(
            StoreError::InvalidEndpoint(endpoint).kind(),
            FailureKind::Config
        );
    }
}
