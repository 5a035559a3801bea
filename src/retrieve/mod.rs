//! Cached and fixture-backed retrieval.
//!
//! A [`Retriever`] sits in front of a [`Downloader`](crate::Downloader) and
//! decides, per [`RetrievalMode`], whether a URL is answered from the cache
//! directory, from the fallback (fixture) directory, or from the network.
//! Cache writes go through a temporary file and a rename, so concurrent
//! retrievers sharing a directory never see a partial entry.

mod cache;
mod mode;
mod retriever;

pub use cache::{CacheEntry, derive_cache_key, normalize_url};
pub use mode::{ParseModeError, RetrievalMode};
pub use retriever::{RetrieveOptions, Retriever};
