//! Typed decoding of downloaded content.
//!
//! A [`FetchFormat`] turns a [`Body`] into a value. The downloader and the
//! retriever use the same formats, so `fetch(url, &Json::<T>::new())` works
//! the same whether the bytes came from the network, a `file://` URL, the
//! cache or a fallback fixture.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use super::{Body, TabularOptions, TabularRows};
use crate::FetchError;

/// A content format that a body can be decoded into.
pub trait FetchFormat {
    /// The decoded value.
    type Output;

    /// Short name used in parse errors.
    fn name(&self) -> &'static str;

    /// Whether the body should go to disk instead of memory when no
    /// destination path was given (for large, lazily read formats).
    fn streams_to_disk(&self) -> bool {
        false
    }

    /// Decodes `body`, fetched from `url`.
    ///
    /// # Errors
    ///
    /// [`FetchError::Parse`] when the content is not valid for this format,
    /// or [`FetchError::Io`] when an on-disk body cannot be read.
    fn decode(&self, url: &str, body: Body) -> Result<Self::Output, FetchError>;
}

fn body_bytes(body: &Body) -> Result<bytes::Bytes, FetchError> {
    match body {
        Body::Bytes(bytes) => Ok(bytes.clone()),
        Body::File(_) | Body::TempFile(_) => {
            let path = body.path().unwrap_or_else(|| std::path::Path::new(""));
            std::fs::read(path)
                .map(bytes::Bytes::from)
                .map_err(|e| FetchError::io(path, e))
        }
    }
}

/// UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Text;

impl FetchFormat for Text {
    type Output = String;

    fn name(&self) -> &'static str {
        "text"
    }

    fn decode(&self, url: &str, body: Body) -> Result<String, FetchError> {
        let bytes = body_bytes(&body)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| FetchError::parse(url, self.name(), e))
    }
}

/// JSON deserialized into `T` (use `serde_json::Value` for untyped access).
pub struct Json<T>(PhantomData<fn() -> T>);

impl<T> Json<T> {
    #[must_use]
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Json<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Json<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Json")
    }
}

impl<T: DeserializeOwned> FetchFormat for Json<T> {
    type Output = T;

    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, url: &str, body: Body) -> Result<T, FetchError> {
        let bytes = body_bytes(&body)?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::parse(url, self.name(), e))
    }
}

/// YAML deserialized into `T` (use `serde_yaml::Value` for untyped access).
pub struct Yaml<T>(PhantomData<fn() -> T>);

impl<T> Yaml<T> {
    #[must_use]
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Yaml<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Yaml<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Yaml")
    }
}

impl<T: DeserializeOwned> FetchFormat for Yaml<T> {
    type Output = T;

    fn name(&self) -> &'static str {
        "yaml"
    }

    fn decode(&self, url: &str, body: Body) -> Result<T, FetchError> {
        let bytes = body_bytes(&body)?;
        serde_yaml::from_slice(&bytes).map_err(|e| FetchError::parse(url, self.name(), e))
    }
}

/// Delimited table read lazily as [`TabularRows`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Tabular(pub TabularOptions);

impl FetchFormat for Tabular {
    type Output = TabularRows;

    fn name(&self) -> &'static str {
        "csv"
    }

    fn streams_to_disk(&self) -> bool {
        true
    }

    fn decode(&self, url: &str, body: Body) -> Result<TabularRows, FetchError> {
        TabularRows::open(url, body, &self.0)
    }
}
