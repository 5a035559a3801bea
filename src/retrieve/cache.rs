//! Cache keys and cache entries.
//!
//! A key is a plain filename. Derived keys look like
//! `<stem>_<16 hex digits><ext>`: the stem and extension keep keys readable
//! in a directory listing, the digest (SHA-256 of the normalized URL) keeps
//! distinct URLs apart.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

use crate::FetchError;
use crate::download::filename::{extension_from_url, sanitize_filename_component, stem_from_url};

/// Hex digits of the URL digest kept in a derived key.
const DIGEST_HEX_LEN: usize = 16;

/// A cached file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The filename under the cache directory.
    pub key: String,
    /// Full path of the cached file.
    pub file_path: PathBuf,
    /// When the file was last written (its modification time).
    pub fetched_at: DateTime<Utc>,
    /// Size of the cached file in bytes.
    pub size: u64,
}

impl CacheEntry {
    /// Reads the entry for `key` in `dir`, if the file exists.
    pub(crate) async fn load(dir: &Path, key: &str) -> Result<Option<Self>, FetchError> {
        let file_path = dir.join(key);
        let metadata = match tokio::fs::metadata(&file_path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FetchError::io(file_path, e)),
        };
        let fetched_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .map_err(|e| FetchError::io(&file_path, e))?;
        Ok(Some(Self {
            key: key.to_string(),
            file_path,
            fetched_at,
            size: metadata.len(),
        }))
    }
}

/// Canonical form of `url` used for hashing.
///
/// Scheme and host are lowercased and default ports dropped by the URL
/// parser; the fragment and an empty query are removed here.
///
/// # Errors
///
/// Returns [`FetchError::InvalidUrl`] if `url` does not parse.
pub fn normalize_url(url: &str) -> Result<Url, FetchError> {
    let mut parsed = Url::parse(url.trim()).map_err(|_| FetchError::invalid_url(url))?;
    parsed.set_fragment(None);
    if parsed.query() == Some("") {
        parsed.set_query(None);
    }
    Ok(parsed)
}

/// Derives the cache key for `url`.
///
/// # Errors
///
/// Returns [`FetchError::InvalidUrl`] if `url` does not parse.
pub fn derive_cache_key(url: &str) -> Result<String, FetchError> {
    let normalized = normalize_url(url)?;
    let digest = hex::encode(Sha256::digest(normalized.as_str().as_bytes()));
    let extension = extension_from_url(&normalized).unwrap_or_default();
    Ok(format!(
        "{}_{}{}",
        stem_from_url(&normalized),
        &digest[..DIGEST_HEX_LEN],
        extension
    ))
}

/// Reduces a caller-supplied cache filename to a single safe path component.
///
/// Returns `None` when nothing usable is left.
pub(crate) fn sanitize_cache_filename(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned = sanitize_filename_component(last);
    (!cleaned.is_empty()).then_some(cleaned)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_derived_key_shape() {
        let key = derive_cache_key("https://example.com/data/Report%202024.csv").unwrap();
        assert!(key.starts_with("Report_2024_"), "unexpected key {key}");
        assert!(key.ends_with(".csv"), "unexpected key {key}");
        let digest = key
            .trim_start_matches("Report_2024_")
            .trim_end_matches(".csv");
        assert_eq!(digest.len(), DIGEST_HEX_LEN);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_is_deterministic() {
        let url = "https://example.com/api/items.json?page=2";
        assert_eq!(derive_cache_key(url).unwrap(), derive_cache_key(url).unwrap());
    }

    #[test]
    fn test_normalization_ignores_case_port_and_fragment() {
        let a = derive_cache_key("HTTPS://Example.COM:443/x.csv#section").unwrap();
        let b = derive_cache_key("https://example.com/x.csv").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_urls_get_distinct_keys() {
        let urls = [
            "https://example.com/data.csv",
            "https://example.com/data.csv?v=1",
            "https://example.com/data.csv?v=2",
            "https://example.org/data.csv",
            "http://example.com/data.csv",
            "https://example.com/a/data.csv",
            "https://example.com/b/data.csv",
            "https://example.com/DATA.csv",
        ];
        let keys: HashSet<String> = urls.iter().map(|u| derive_cache_key(u).unwrap()).collect();
        assert_eq!(keys.len(), urls.len());
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(matches!(
            derive_cache_key("::not a url::"),
            Err(FetchError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_sanitize_cache_filename_strips_directories() {
        assert_eq!(
            sanitize_cache_filename("../../etc/passwd").as_deref(),
            Some("passwd")
        );
        assert_eq!(
            sanitize_cache_filename("my data.csv").as_deref(),
            Some("my_data.csv")
        );
        assert_eq!(sanitize_cache_filename("..").as_deref(), None);
        assert_eq!(sanitize_cache_filename("").as_deref(), None);
    }

    #[tokio::test]
    async fn test_entry_load_present_and_absent() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("k.csv"), b"a\n").unwrap();

        let entry = CacheEntry::load(dir.path(), "k.csv").await.unwrap().unwrap();
        assert_eq!(entry.key, "k.csv");
        assert_eq!(entry.file_path, dir.path().join("k.csv"));
        assert!(entry.fetched_at <= Utc::now());
        assert_eq!(entry.size, 2);

        assert!(CacheEntry::load(dir.path(), "missing").await.unwrap().is_none());
    }
}
