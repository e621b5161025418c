// src/transfer.rs

//! Transfer capability used by the localization orchestrator
//!
//! The library never talks to a network on its own: every byte of a
//! distributed artifact is obtained through a [`Transfer`] implementation
//! handed in by the caller. Two implementations ship with the crate:
//! - `LocalTransfer`: relative references under a compose root, and remote
//!   URLs mirrored into local directories
//! - `HttpTransfer`: HTTP(S) via reqwest, streaming the response body
//!
//! OCI references are not fetched by either; registry access belongs to a
//! dedicated collaborator.

use crate::error::{Error, Result};
use crate::location::{Location, Reference};
use async_trait::async_trait;
use futures::TryStreamExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::debug;

/// Bytes of one fetched artifact
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Default timeout for establishing an HTTP connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetch artifact bytes for a location
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Open a byte stream for the location's reference
    async fn fetch(&self, location: &Location) -> Result<ByteStream>;

    /// Check whether the reference can be fetched, without fetching it
    async fn exists(&self, location: &Location) -> bool;

    /// Human-readable name for logs
    fn name(&self) -> &str;
}

/// Filesystem transfer
///
/// Relative references resolve under `root`. Remote URLs resolve through
/// registered mirrors: a URL starting with a mirror's prefix is read from
/// the mirror directory joined with the rest of the URL.
#[derive(Debug, Clone)]
pub struct LocalTransfer {
    root: PathBuf,
    mirrors: Vec<(String, PathBuf)>,
}

impl LocalTransfer {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            mirrors: Vec::new(),
        }
    }

    /// Serve URLs under `prefix` from `dir`
    pub fn with_mirror(mut self, prefix: &str, dir: impl AsRef<Path>) -> Self {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        self.mirrors.push((prefix, dir.as_ref().to_path_buf()));
        self
    }

    /// Filesystem path a location reads from
    pub fn source_path(&self, location: &Location) -> Result<PathBuf> {
        match location.reference() {
            Reference::Relative(path) => Ok(self.root.join(path)),
            Reference::Http(url) | Reference::Https(url) => self
                .mirrors
                .iter()
                .find_map(|(prefix, dir)| url.strip_prefix(prefix.as_str()).map(|rest| dir.join(rest)))
                .ok_or_else(|| Error::TransferError(format!("no local mirror for {url}"))),
            Reference::Oci(oci) => Err(Error::TransferError(format!(
                "OCI references are not supported by the local transfer: {oci}"
            ))),
        }
    }
}

#[async_trait]
impl Transfer for LocalTransfer {
    async fn fetch(&self, location: &Location) -> Result<ByteStream> {
        let path = self.source_path(location)?;
        debug!("Reading {} from {}", location, path.display());
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| Error::TransferError(format!("Failed to open {}: {e}", path.display())))?;
        Ok(Box::pin(file))
    }

    async fn exists(&self, location: &Location) -> bool {
        match self.source_path(location) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// HTTP(S) transfer
///
/// Relative references are joined onto an optional base URL.
pub struct HttpTransfer {
    client: reqwest::Client,
    base_url: Option<url::Url>,
}

impl HttpTransfer {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::TransferError(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: None,
        })
    }

    /// Resolve relative references against `base`
    pub fn with_base_url(mut self, base: &str) -> Result<Self> {
        let normalized = format!("{}/", base.trim_end_matches('/'));
        let url = url::Url::parse(&normalized)
            .map_err(|e| Error::ConfigError(format!("invalid base URL '{base}': {e}")))?;
        self.base_url = Some(url);
        Ok(self)
    }

    fn url_for(&self, location: &Location) -> Result<url::Url> {
        let parse = |s: &str| {
            url::Url::parse(s).map_err(|e| Error::InvalidLocation(format!("'{s}': {e}")))
        };
        match location.reference() {
            Reference::Http(url) | Reference::Https(url) => parse(url),
            Reference::Relative(path) => {
                let base = self.base_url.as_ref().ok_or_else(|| {
                    Error::TransferError(format!("relative reference '{path}' needs a base URL"))
                })?;
                base.join(path)
                    .map_err(|e| Error::InvalidLocation(format!("'{path}': {e}")))
            }
            Reference::Oci(oci) => Err(Error::TransferError(format!(
                "OCI references are not supported by the HTTP transfer: {oci}"
            ))),
        }
    }
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn fetch(&self, location: &Location) -> Result<ByteStream> {
        let url = self.url_for(location)?;
        debug!("GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::TransferError(format!("Failed to fetch {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::TransferError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(stream)))
    }

    async fn exists(&self, location: &Location) -> bool {
        let Ok(url) = self.url_for(location) else {
            return false;
        };
        match self.client.head(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
