//! The value returned by a download or retrieval.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tempfile::TempPath;

use crate::FetchError;

/// Where the content of a [`DownloadResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Fetched over HTTP(S) through a session.
    Network,
    /// Read from a `file://` URL.
    LocalFile,
    /// Served from the retriever's cache directory.
    Cache,
    /// Served from the retriever's fallback (fixture) directory.
    Fallback,
}

impl Origin {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::LocalFile => "local_file",
            Self::Cache => "cache",
            Self::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content of a download, either buffered or on disk.
#[derive(Debug)]
pub enum Body {
    /// Fully buffered in memory.
    Bytes(Bytes),
    /// Stored in a file the caller owns (or the cache owns).
    File(PathBuf),
    /// Stored in a temporary file deleted when this value is dropped.
    TempFile(TempPath),
}

impl Body {
    /// The buffered bytes, if the body is in memory.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            Self::File(_) | Self::TempFile(_) => None,
        }
    }

    /// The file holding the body, if it is on disk.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Bytes(_) => None,
            Self::File(path) => Some(path),
            Self::TempFile(path) => Some(path),
        }
    }

    /// Loads the whole body into memory.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Io`] if an on-disk body cannot be read.
    pub async fn read(&self) -> Result<Bytes, FetchError> {
        match self {
            Self::Bytes(bytes) => Ok(bytes.clone()),
            Self::File(_) | Self::TempFile(_) => {
                let path = self.path().unwrap_or_else(|| Path::new(""));
                tokio::fs::read(path)
                    .await
                    .map(Bytes::from)
                    .map_err(|e| FetchError::io(path, e))
            }
        }
    }
}

/// Outcome of a successful download or retrieval.
///
/// Owned by the caller; nothing in the crate keeps a reference to it.
#[derive(Debug)]
pub struct DownloadResult {
    /// The URL that was requested.
    pub source_url: String,
    /// HTTP status of the final response (200 for local, cached and fallback content).
    pub status: u16,
    /// Content-Type header, or a guess from the file extension.
    pub content_type: Option<String>,
    /// The content.
    pub body: Body,
    /// Where the content was written, when it was saved to a path.
    pub saved_path: Option<PathBuf>,
    /// Where the content came from.
    pub origin: Origin,
    /// Size of the content in bytes.
    pub bytes_len: u64,
}

impl DownloadResult {
    /// Loads the content into memory (see [`Body::read`]).
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Io`] if an on-disk body cannot be read.
    pub async fn bytes(&self) -> Result<Bytes, FetchError> {
        self.body.read().await
    }

    /// True when the content was fetched over the network by this call.
    #[must_use]
    pub fn is_from_network(&self) -> bool {
        self.origin == Origin::Network
    }
}
