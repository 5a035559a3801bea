//! Downloading content from `http(s)://` and `file://` URLs.
//!
//! A [`Downloader`] wraps a [`Session`](crate::Session) and adds what the
//! session does not: saving to disk, streaming large bodies, reading local
//! files, and decoding content into typed values.
//!
//! # Features
//!
//! - Streaming downloads with bounded memory (temp file + atomic rename)
//! - `file://` URLs served without touching the network
//! - JSON, YAML, text and lazily read CSV/TSV through [`FetchFormat`]
//! - Parse failures reported separately from transport failures
//!
//! # Example
//!
//! ```no_run
//! use fetcher_core::download::{DownloadOptions, Downloader, TabularOptions};
//! use fetcher_core::Session;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Downloader::new(Session::builder("my-app/1.0").build()?);
//! let saved = downloader
//!     .download("https://example.com/big.bin", &DownloadOptions::stream_to("./big.bin"))
//!     .await?;
//! println!("saved {} bytes", saved.bytes_len);
//!
//! for row in downloader
//!     .download_tabular("https://example.com/data.csv", &TabularOptions::default())
//!     .await?
//! {
//!     println!("{:?}", row?.to_map());
//! }
//! # Ok(())
//! # }
//! ```

mod downloader;
pub(crate) mod filename;
mod format;
pub(crate) mod persist;
mod result;
mod tabular;

pub use downloader::{DownloadOptions, Downloader};
pub use format::{FetchFormat, Json, Tabular, Text, Yaml};
pub use result::{Body, DownloadResult, Origin};
pub use tabular::{Row, TabularOptions, TabularRows};
