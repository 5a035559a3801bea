//! Atomic writes: content goes to a temporary file beside the destination
//! and is renamed into place only once it is complete, so readers never see
//! a partial file and a failed transfer leaves nothing behind.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::FetchError;
use crate::session::{RequestError, until_cancelled};

/// Write buffer used when streaming bodies to disk.
pub(crate) const WRITE_BUFFER_CAPACITY: usize = 64 * 1024;

/// A temporary file being filled; removed on drop unless persisted.
pub(crate) struct PendingFile {
    writer: BufWriter<tokio::fs::File>,
    temp: TempPath,
}

impl PendingFile {
    /// Creates a temporary file in the directory that will hold `dest`.
    pub(crate) async fn beside(dest: &Path) -> Result<Self, FetchError> {
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::in_dir(&dir).await
    }

    /// Creates a temporary file in `dir`, creating `dir` first if needed.
    pub(crate) async fn in_dir(dir: &Path) -> Result<Self, FetchError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| FetchError::io(dir, e))?;
        let owned = dir.to_path_buf();
        let (file, temp) = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(".fetcher-")
                .suffix(".part")
                .tempfile_in(&owned)
        })
        .await
        .map_err(|e| join_error(dir, e))?
        .map_err(|e| FetchError::io(dir, e))?
        .into_parts();
        Ok(Self {
            writer: BufWriter::with_capacity(WRITE_BUFFER_CAPACITY, tokio::fs::File::from_std(file)),
            temp,
        })
    }

    pub(crate) async fn write_all(&mut self, chunk: &[u8]) -> Result<(), FetchError> {
        self.writer
            .write_all(chunk)
            .await
            .map_err(|e| FetchError::io(self.temp.to_path_buf(), e))
    }

    /// Streams a response body into the file, returning the bytes written.
    ///
    /// A transfer error mid-body is reported as non-retryable with the
    /// number of attempts it took to get the response.
    pub(crate) async fn write_stream<S>(
        &mut self,
        stream: S,
        url: &str,
        attempts: u32,
        cancel: Option<&CancellationToken>,
    ) -> Result<u64, FetchError>
    where
        S: Stream<Item = Result<Bytes, reqwest::Error>>,
    {
        let mut stream = std::pin::pin!(stream);
        let mut bytes_written: u64 = 0;
        loop {
            let Some(next) = until_cancelled(cancel, stream.next()).await else {
                return Err(FetchError::cancelled(url, attempts));
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| {
                FetchError::non_retryable(url, attempts, RequestError::from_transport(url, e))
            })?;
            self.write_all(&chunk).await?;
            bytes_written += chunk.len() as u64;
        }
        Ok(bytes_written)
    }

    /// Copies a local reader into the file, returning the bytes copied.
    pub(crate) async fn copy_from<R>(&mut self, reader: &mut R, source: &Path) -> Result<u64, FetchError>
    where
        R: AsyncRead + Unpin,
    {
        tokio::io::copy(reader, &mut self.writer)
            .await
            .map_err(|e| FetchError::io(source, e))
    }

    async fn finish(mut self) -> Result<TempPath, FetchError> {
        self.writer
            .flush()
            .await
            .map_err(|e| FetchError::io(self.temp.to_path_buf(), e))?;
        self.writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| FetchError::io(self.temp.to_path_buf(), e))?;
        Ok(self.temp)
    }

    /// Flushes and renames the file to `dest`.
    ///
    /// Without `overwrite`, an existing `dest` is left untouched and
    /// [`FetchError::FileExists`] is returned.
    pub(crate) async fn persist(self, dest: &Path, overwrite: bool) -> Result<(), FetchError> {
        let temp = self.finish().await?;
        let target = dest.to_path_buf();
        let outcome = tokio::task::spawn_blocking(move || {
            if overwrite {
                temp.persist(&target)
            } else {
                temp.persist_noclobber(&target)
            }
        })
        .await
        .map_err(|e| join_error(dest, e))?;
        match outcome {
            Ok(()) => {
                debug!(path = %dest.display(), "persisted file");
                Ok(())
            }
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(FetchError::file_exists(dest))
            }
            Err(e) => Err(FetchError::io(dest, e.error)),
        }
    }

    /// Flushes and keeps the file as a self-deleting temporary.
    pub(crate) async fn into_temp(self) -> Result<TempPath, FetchError> {
        self.finish().await
    }
}

fn join_error(path: &Path, error: tokio::task::JoinError) -> FetchError {
    FetchError::io(path, std::io::Error::other(error))
}

/// Writes `bytes` to `dest` atomically.
pub(crate) async fn write_atomic(dest: &Path, bytes: &[u8], overwrite: bool) -> Result<(), FetchError> {
    let mut pending = PendingFile::beside(dest).await?;
    pending.write_all(bytes).await?;
    pending.persist(dest, overwrite).await
}

/// Copies the file at `source` to `dest` atomically, returning the bytes copied.
pub(crate) async fn copy_atomic(source: &Path, dest: &Path, overwrite: bool) -> Result<u64, FetchError> {
    let mut reader = tokio::fs::File::open(source)
        .await
        .map_err(|e| FetchError::io(source, e))?;
    let mut pending = PendingFile::beside(dest).await?;
    let copied = pending.copy_from(&mut reader, source).await?;
    pending.persist(dest, overwrite).await?;
    Ok(copied)
}

/// True if something exists at `path`.
pub(crate) async fn exists(path: &Path) -> Result<bool, FetchError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| FetchError::io(path, e))
}
