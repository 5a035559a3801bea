//! Lazy, single-pass access to delimited tables (CSV, TSV).
//!
//! [`TabularRows`] reads the header row when it is opened and then yields one
//! [`Row`] per record as it is iterated. Records are never collected up front,
//! so a table streamed to disk is read with bounded memory.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::sync::Arc;

use tempfile::TempPath;

use super::Body;
use crate::FetchError;

const FORMAT: &str = "csv";

/// How to read a delimited table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabularOptions {
    /// Field delimiter (`b','` for CSV, `b'\t'` for TSV).
    pub delimiter: u8,
    /// Whether the first record names the columns.
    pub has_headers: bool,
    /// Accept records whose length differs from the header row.
    pub flexible: bool,
}

impl Default for TabularOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_headers: true,
            flexible: false,
        }
    }
}

impl TabularOptions {
    /// Tab-separated values with a header row.
    #[must_use]
    pub fn tsv() -> Self {
        Self {
            delimiter: b'\t',
            ..Self::default()
        }
    }

    /// Picks the delimiter from a file extension: tab for `.tsv`/`.tab`, comma otherwise.
    #[must_use]
    pub fn for_extension(ext: Option<&str>) -> Self {
        match ext.map(str::to_ascii_lowercase).as_deref() {
            Some("tsv" | "tab") => Self::tsv(),
            _ => Self::default(),
        }
    }
}

/// One record of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    headers: Arc<[String]>,
    values: Vec<String>,
}

impl Row {
    /// Value of the column named `column`, if the table has headers and the column exists.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        let index = self.headers.iter().position(|h| h == column)?;
        self.values.get(index).map(String::as_str)
    }

    /// Value at a zero-based position.
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    /// All values in column order.
    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Header-to-value map. Empty when the table has no header row.
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

/// Lazily iterated table rows.
///
/// Consuming the iterator is the only way to read records; it cannot be
/// rewound. Fetch again to read the table a second time.
pub struct TabularRows {
    url: String,
    headers: Arc<[String]>,
    records: csv::StringRecordsIntoIter<Box<dyn Read + Send>>,
    rows_read: u64,
    // Keeps a streamed temporary file alive until the rows are dropped.
    _body: Option<TempPath>,
}

impl std::fmt::Debug for TabularRows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabularRows")
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("rows_read", &self.rows_read)
            .finish_non_exhaustive()
    }
}

impl TabularRows {
    /// Opens `body` as a table, reading only the header row.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Io`] if an on-disk body cannot be opened
    /// - [`FetchError::Parse`] if the header row is malformed
    pub fn open(url: &str, body: Body, options: &TabularOptions) -> Result<Self, FetchError> {
        let (source, guard): (Box<dyn Read + Send>, Option<TempPath>) = match body {
            Body::Bytes(bytes) => (Box::new(Cursor::new(bytes)), None),
            Body::File(path) => {
                let file = File::open(&path).map_err(|e| FetchError::io(&path, e))?;
                (Box::new(file), None)
            }
            Body::TempFile(temp) => {
                let file = File::open(&temp).map_err(|e| FetchError::io(temp.to_path_buf(), e))?;
                (Box::new(file), Some(temp))
            }
        };

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(options.has_headers)
            .flexible(options.flexible)
            .from_reader(source);

        let headers: Arc<[String]> = if options.has_headers {
            reader
                .headers()
                .map_err(|e| FetchError::parse(url, FORMAT, e))?
                .iter()
                .map(str::to_string)
                .collect()
        } else {
            Arc::from(Vec::new())
        };

        Ok(Self {
            url: url.to_string(),
            headers,
            records: reader.into_records(),
            rows_read: 0,
            _body: guard,
        })
    }

    /// Column names, empty when the table has no header row.
    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Number of rows yielded so far.
    #[must_use]
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }
}

impl Iterator for TabularRows {
    type Item = Result<Row, FetchError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        self.rows_read += 1;
        Some(
            record
                .map(|record| Row {
                    headers: Arc::clone(&self.headers),
                    values: record.iter().map(str::to_string).collect(),
                })
                .map_err(|e| FetchError::parse(&self.url, FORMAT, e)),
        )
    }
}
