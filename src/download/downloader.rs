//! The [`Downloader`]: fetch a URL into memory, onto disk, or into a typed value.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use reqwest::Response;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use super::filename::content_type_from_path;
use super::format::{FetchFormat, Json, Tabular, Text, Yaml};
use super::persist::{self, PendingFile};
use super::{Body, DownloadResult, Origin, TabularOptions, TabularRows};
use crate::FetchError;
use crate::session::{self, RequestError, Session, until_cancelled};

/// Options for a single [`Downloader::download`] call.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Save the content here. Parent directories are created as needed.
    pub path: Option<PathBuf>,
    /// Write the body to `path` chunk by chunk instead of buffering it.
    pub stream: bool,
    /// Replace an existing file at `path`.
    pub overwrite: bool,
    /// Abort the download when this token fires.
    pub cancel: Option<CancellationToken>,
}

impl DownloadOptions {
    /// Saves to `path`, buffering the body first.
    #[must_use]
    pub fn to_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Saves to `path`, streaming the body straight to disk.
    #[must_use]
    pub fn stream_to(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            stream: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    #[must_use]
    pub fn cancel_with(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

enum Source {
    Http,
    Local(PathBuf),
}

fn classify_url(url: &str) -> Result<Source, FetchError> {
    let parsed = Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;
    match parsed.scheme() {
        "http" | "https" => Ok(Source::Http),
        "file" => parsed
            .to_file_path()
            .map(Source::Local)
            .map_err(|()| FetchError::invalid_url(url)),
        scheme => Err(FetchError::UnsupportedScheme {
            url: url.to_string(),
            scheme: scheme.to_string(),
        }),
    }
}

/// Downloads content through a [`Session`].
///
/// `http(s)` URLs go through the session's retry and rate-limit machinery;
/// `file://` URLs are read from disk directly.
#[derive(Debug, Clone)]
pub struct Downloader {
    session: Session,
}

impl Downloader {
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Creates a downloader on the process-wide default session.
    ///
    /// # Errors
    ///
    /// Returns [`session::default::DefaultSessionError`] when no default
    /// session exists and none can be built.
    pub fn with_default_session() -> Result<Self, session::default::DefaultSessionError> {
        session::default::get().map(Self::new)
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Downloads `url` as described by `options`.
    ///
    /// # Errors
    ///
    /// - [`FetchError::InvalidUrl`] / [`FetchError::UnsupportedScheme`] for bad URLs
    /// - [`FetchError::FileExists`] if `path` exists and `overwrite` is off (checked before any request)
    /// - [`FetchError::NonRetryable`] / [`FetchError::RetryExhausted`] for transport failures
    /// - [`FetchError::Cancelled`] when the token fires
    /// - [`FetchError::Io`] for local filesystem failures
    #[instrument(skip(self, options), fields(url = %url, stream = options.stream))]
    pub async fn download(
        &self,
        url: &str,
        options: &DownloadOptions,
    ) -> Result<DownloadResult, FetchError> {
        let source = classify_url(url)?;

        if let Some(dest) = &options.path
            && !options.overwrite
            && persist::exists(dest).await?
        {
            return Err(FetchError::file_exists(dest));
        }
        if options
            .cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            return Err(FetchError::cancelled(url, 0));
        }

        let result = match source {
            Source::Http => self.download_http(url, options).await?,
            Source::Local(path) => read_local(url, &path, options).await?,
        };

        info!(
            bytes = result.bytes_len,
            status = result.status,
            saved = ?result.saved_path,
            "download complete"
        );
        Ok(result)
    }

    /// Downloads `url` into memory.
    ///
    /// # Errors
    ///
    /// Same as [`download`](Self::download).
    pub async fn download_bytes(&self, url: &str) -> Result<Bytes, FetchError> {
        self.download(url, &DownloadOptions::default())
            .await?
            .bytes()
            .await
    }

    /// Downloads `url` as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Same as [`download`](Self::download), plus [`FetchError::Parse`] for invalid UTF-8.
    pub async fn download_text(&self, url: &str) -> Result<String, FetchError> {
        self.fetch(url, &Text).await
    }

    /// Downloads `url` and deserializes it as JSON.
    ///
    /// # Errors
    ///
    /// Same as [`download`](Self::download), plus [`FetchError::Parse`] for malformed JSON.
    pub async fn download_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        self.fetch(url, &Json::<T>::new()).await
    }

    /// Downloads `url` and deserializes it as YAML.
    ///
    /// # Errors
    ///
    /// Same as [`download`](Self::download), plus [`FetchError::Parse`] for malformed YAML.
    pub async fn download_yaml<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        self.fetch(url, &Yaml::<T>::new()).await
    }

    /// Downloads `url` as a delimited table, read lazily row by row.
    ///
    /// The body is streamed to a temporary file that lives as long as the
    /// returned [`TabularRows`].
    ///
    /// # Errors
    ///
    /// Same as [`download`](Self::download), plus [`FetchError::Parse`] for a malformed header row.
    pub async fn download_tabular(
        &self,
        url: &str,
        options: &TabularOptions,
    ) -> Result<TabularRows, FetchError> {
        self.fetch(url, &Tabular(*options)).await
    }

    /// Downloads `url` and decodes it with `format`.
    ///
    /// # Errors
    ///
    /// Transport errors as for [`download`](Self::download); decoding errors from `format`.
    pub async fn fetch<F: FetchFormat>(&self, url: &str, format: &F) -> Result<F::Output, FetchError> {
        self.fetch_with(url, format, None).await
    }

    /// Like [`fetch`](Self::fetch), but aborts when `cancel` fires.
    ///
    /// # Errors
    ///
    /// As [`fetch`](Self::fetch), plus [`FetchError::Cancelled`].
    #[instrument(skip(self, format, cancel), fields(url = %url, format = format.name()))]
    pub async fn fetch_with<F: FetchFormat>(
        &self,
        url: &str,
        format: &F,
        cancel: Option<&CancellationToken>,
    ) -> Result<F::Output, FetchError> {
        let body = if format.streams_to_disk() {
            self.fetch_to_disk(url, cancel).await?
        } else {
            let options = DownloadOptions {
                cancel: cancel.cloned(),
                ..DownloadOptions::default()
            };
            self.download(url, &options).await?.body
        };
        format.decode(url, body)
    }

    async fn fetch_to_disk(
        &self,
        url: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Body, FetchError> {
        let source = classify_url(url)?;
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(FetchError::cancelled(url, 0));
        }
        match source {
            Source::Local(path) => {
                local_len(url, &path).await?;
                Ok(Body::File(path))
            }
            Source::Http => {
                let (response, attempts) = self.session.execute(url, cancel).await?;
                let mut pending = PendingFile::in_dir(&std::env::temp_dir()).await?;
                let written = pending
                    .write_stream(response.bytes_stream(), url, attempts, cancel)
                    .await?;
                debug!(bytes = written, "streamed body to temporary file");
                Ok(Body::TempFile(pending.into_temp().await?))
            }
        }
    }

    async fn download_http(
        &self,
        url: &str,
        options: &DownloadOptions,
    ) -> Result<DownloadResult, FetchError> {
        let cancel = options.cancel.as_ref();
        let (response, attempts) = self.session.execute(url, cancel).await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let (body, bytes_len) = match (&options.path, options.stream) {
            (Some(dest), true) => {
                let mut pending = PendingFile::beside(dest).await?;
                let written = pending
                    .write_stream(response.bytes_stream(), url, attempts, cancel)
                    .await?;
                pending.persist(dest, options.overwrite).await?;
                (Body::File(dest.clone()), written)
            }
            (Some(dest), false) => {
                let bytes = read_body(response, url, attempts, cancel).await?;
                persist::write_atomic(dest, &bytes, options.overwrite).await?;
                let len = bytes.len() as u64;
                (Body::Bytes(bytes), len)
            }
            (None, _) => {
                let bytes = read_body(response, url, attempts, cancel).await?;
                let len = bytes.len() as u64;
                (Body::Bytes(bytes), len)
            }
        };

        Ok(DownloadResult {
            source_url: url.to_string(),
            status,
            content_type,
            body,
            saved_path: options.path.clone(),
            origin: Origin::Network,
            bytes_len,
        })
    }
}

async fn read_body(
    response: Response,
    url: &str,
    attempts: u32,
    cancel: Option<&CancellationToken>,
) -> Result<Bytes, FetchError> {
    match until_cancelled(cancel, response.bytes()).await {
        None => Err(FetchError::cancelled(url, attempts)),
        Some(Ok(bytes)) => Ok(bytes),
        Some(Err(e)) => Err(FetchError::non_retryable(
            url,
            attempts,
            RequestError::from_transport(url, e),
        )),
    }
}

/// Size of a local source file; a missing file is a non-retryable not-found.
async fn local_len(url: &str, path: &Path) -> Result<u64, FetchError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FetchError::non_retryable(
            url,
            1,
            RequestError::not_found(path),
        )),
        Err(e) => Err(FetchError::non_retryable(url, 1, RequestError::io(path, e))),
    }
}

async fn read_local(
    url: &str,
    path: &Path,
    options: &DownloadOptions,
) -> Result<DownloadResult, FetchError> {
    local_len(url, path).await?;

    let (body, bytes_len) = match &options.path {
        Some(dest) if options.stream => {
            let copied = persist::copy_atomic(path, dest, options.overwrite).await?;
            (Body::File(dest.clone()), copied)
        }
        Some(dest) => {
            let bytes = read_local_bytes(path).await?;
            persist::write_atomic(dest, &bytes, options.overwrite).await?;
            let len = bytes.len() as u64;
            (Body::Bytes(bytes), len)
        }
        None => {
            let bytes = read_local_bytes(path).await?;
            let len = bytes.len() as u64;
            (Body::Bytes(bytes), len)
        }
    };

    Ok(DownloadResult {
        source_url: url.to_string(),
        status: 200,
        content_type: content_type_from_path(path).map(str::to_string),
        body,
        saved_path: options.path.clone(),
        origin: Origin::LocalFile,
        bytes_len,
    })
}

async fn read_local_bytes(path: &Path) -> Result<Bytes, FetchError> {
    tokio::fs::read(path)
        .await
        .map(Bytes::from)
        .map_err(|e| FetchError::io(path, e))
}
