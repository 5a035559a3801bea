//! The [`Retriever`]: cache-first and fixture-backed retrieval on top of a [`Downloader`].

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::cache::{CacheEntry, derive_cache_key, sanitize_cache_filename};
use super::mode::RetrievalMode;
use crate::FetchError;
use crate::download::filename::content_type_from_path;
use crate::download::{
    Body, DownloadOptions, DownloadResult, Downloader, FetchFormat, Json, Origin, Tabular,
    TabularOptions, TabularRows, Text, Yaml,
};

/// Options for a single [`Retriever::retrieve`] call.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    /// Use this filename as the cache key instead of deriving one from the URL.
    pub cache_filename: Option<String>,
    /// Skip the cache lookup in [`RetrievalMode::Normal`]. Ignored in
    /// [`RetrievalMode::UseSaved`], which never touches the network.
    pub fresh: bool,
    /// On a transport failure, answer from the fallback directory if the file is there.
    /// Cancellation is never answered from the fallback directory.
    pub fallback: bool,
    /// Abort the network fetch when this token fires.
    pub cancel: Option<CancellationToken>,
}

impl RetrieveOptions {
    #[must_use]
    pub fn cache_filename(mut self, name: impl Into<String>) -> Self {
        self.cache_filename = Some(name.into());
        self
    }

    #[must_use]
    pub fn fresh(mut self, fresh: bool) -> Self {
        self.fresh = fresh;
        self
    }

    #[must_use]
    pub fn fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    #[must_use]
    pub fn cancel_with(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Retrieves URLs through a cache directory and an optional fixture directory.
///
/// In [`RetrievalMode::Save`] every retrieval refreshes `cache_dir/<key>`; in
/// [`RetrievalMode::UseSaved`] only `fallback_dir/<key>` is read. Pointing both
/// at the same directory records fixtures in one run and replays them in the
/// next. The fallback directory is never written.
#[derive(Debug, Clone)]
pub struct Retriever {
    downloader: Downloader,
    cache_dir: PathBuf,
    fallback_dir: PathBuf,
    mode: RetrievalMode,
}

impl Retriever {
    /// Creates a retriever in [`RetrievalMode::Normal`] whose fallback
    /// directory is the cache directory.
    #[must_use]
    pub fn new(downloader: Downloader, cache_dir: impl Into<PathBuf>) -> Self {
        let cache_dir = cache_dir.into();
        Self {
            downloader,
            fallback_dir: cache_dir.clone(),
            cache_dir,
            mode: RetrievalMode::Normal,
        }
    }

    #[must_use]
    pub fn with_fallback_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fallback_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: RetrievalMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    #[must_use]
    pub fn fallback_dir(&self) -> &Path {
        &self.fallback_dir
    }

    #[must_use]
    pub fn mode(&self) -> RetrievalMode {
        self.mode
    }

    /// The cache key for `url`: the sanitized `cache_filename` if one is
    /// given, otherwise a key derived from the URL.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`] if a key has to be derived and `url` does not parse.
    pub fn cache_key(&self, url: &str, cache_filename: Option<&str>) -> Result<String, FetchError> {
        match cache_filename.and_then(sanitize_cache_filename) {
            Some(name) => Ok(name),
            None => derive_cache_key(url),
        }
    }

    /// The cache entry for `url`, if one exists in the cache directory.
    ///
    /// # Errors
    ///
    /// [`FetchError::InvalidUrl`] for a bad URL, [`FetchError::Io`] if the
    /// cache directory cannot be inspected.
    pub async fn cache_entry(
        &self,
        url: &str,
        cache_filename: Option<&str>,
    ) -> Result<Option<CacheEntry>, FetchError> {
        let key = self.cache_key(url, cache_filename)?;
        CacheEntry::load(&self.cache_dir, &key).await
    }

    /// Retrieves `url` according to the retriever's mode.
    ///
    /// # Errors
    ///
    /// - [`FetchError::NotCached`] in [`RetrievalMode::UseSaved`] when the fixture is missing
    /// - transport and filesystem errors from [`Downloader::download`]
    #[instrument(skip(self, options), fields(url = %url, mode = %self.mode))]
    pub async fn retrieve(
        &self,
        url: &str,
        options: &RetrieveOptions,
    ) -> Result<DownloadResult, FetchError> {
        let key = self.cache_key(url, options.cache_filename.as_deref())?;

        match self.mode {
            RetrievalMode::UseSaved => {
                if options.fresh {
                    debug!("fresh has no effect when only saved files may be used");
                }
                return serve_file(url, &self.fallback_dir, &key, Origin::Cache)
                    .await?
                    .ok_or_else(|| FetchError::not_cached(&key, &self.fallback_dir));
            }
            RetrievalMode::Normal if !options.fresh => {
                if let Some(hit) = serve_file(url, &self.cache_dir, &key, Origin::Cache).await? {
                    info!(key = %key, "cache hit");
                    return Ok(hit);
                }
                debug!(key = %key, "cache miss");
            }
            RetrievalMode::Normal | RetrievalMode::Save => {}
        }

        match self.fetch_into_cache(url, &key, options.cancel.clone()).await {
            Ok(result) => Ok(result),
            Err(error)
                if options.fallback
                    && error.is_transport()
                    && !matches!(error, FetchError::Cancelled { .. }) =>
            {
                match serve_file(url, &self.fallback_dir, &key, Origin::Fallback).await? {
                    Some(result) => {
                        warn!(key = %key, error = %error, "fetch failed, serving fallback file");
                        Ok(result)
                    }
                    None => Err(error),
                }
            }
            Err(error) => Err(error),
        }
    }

    /// Retrieves `url` and decodes it with `format`.
    ///
    /// # Errors
    ///
    /// As [`retrieve`](Self::retrieve), plus decoding errors from `format`.
    pub async fn retrieve_as<F: FetchFormat>(
        &self,
        url: &str,
        options: &RetrieveOptions,
        format: &F,
    ) -> Result<F::Output, FetchError> {
        let result = self.retrieve(url, options).await?;
        let body = if format.streams_to_disk() {
            result.body
        } else {
            Body::Bytes(result.bytes().await?)
        };
        format.decode(url, body)
    }

    /// Retrieves `url` as UTF-8 text.
    ///
    /// # Errors
    ///
    /// As [`retrieve_as`](Self::retrieve_as).
    pub async fn retrieve_text(
        &self,
        url: &str,
        options: &RetrieveOptions,
    ) -> Result<String, FetchError> {
        self.retrieve_as(url, options, &Text).await
    }

    /// Retrieves `url` and deserializes it as JSON.
    ///
    /// # Errors
    ///
    /// As [`retrieve_as`](Self::retrieve_as).
    pub async fn retrieve_json<T: DeserializeOwned>(
        &self,
        url: &str,
        options: &RetrieveOptions,
    ) -> Result<T, FetchError> {
        self.retrieve_as(url, options, &Json::<T>::new()).await
    }

    /// Retrieves `url` and deserializes it as YAML.
    ///
    /// # Errors
    ///
    /// As [`retrieve_as`](Self::retrieve_as).
    pub async fn retrieve_yaml<T: DeserializeOwned>(
        &self,
        url: &str,
        options: &RetrieveOptions,
    ) -> Result<T, FetchError> {
        self.retrieve_as(url, options, &Yaml::<T>::new()).await
    }

    /// Retrieves `url` as a lazily read table, straight from the cached file.
    ///
    /// # Errors
    ///
    /// As [`retrieve_as`](Self::retrieve_as).
    pub async fn retrieve_tabular(
        &self,
        url: &str,
        options: &RetrieveOptions,
        tabular: &TabularOptions,
    ) -> Result<TabularRows, FetchError> {
        self.retrieve_as(url, options, &Tabular(*tabular)).await
    }

    async fn fetch_into_cache(
        &self,
        url: &str,
        key: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<DownloadResult, FetchError> {
        let options = DownloadOptions {
            path: Some(self.cache_dir.join(key)),
            stream: true,
            overwrite: true,
            cancel,
        };
        let result = self.downloader.download(url, &options).await?;
        info!(key = %key, bytes = result.bytes_len, "cached");
        Ok(result)
    }
}

async fn serve_file(
    url: &str,
    dir: &Path,
    key: &str,
    origin: Origin,
) -> Result<Option<DownloadResult>, FetchError> {
    let Some(entry) = CacheEntry::load(dir, key).await? else {
        return Ok(None);
    };
    Ok(Some(DownloadResult {
        source_url: url.to_string(),
        status: 200,
        content_type: content_type_from_path(&entry.file_path).map(str::to_string),
        saved_path: Some(entry.file_path.clone()),
        body: Body::File(entry.file_path),
        origin,
        bytes_len: entry.size,
    }))
}
