//! Filename helpers shared by downloads and cache keys.

use std::path::Path;

use url::Url;

/// Longest extension (dot included) taken from a URL or path.
const MAX_EXTENSION_LEN: usize = 12;

/// Longest stem kept when deriving a filename from a URL.
const MAX_STEM_CHARS: usize = 60;

/// Lowercased extension of the last URL path segment, dot included.
pub(crate) fn extension_from_url(url: &Url) -> Option<String> {
    let last_segment = url.path_segments()?.next_back()?;
    extension_of(last_segment)
}

/// Stem of the last URL path segment, sanitized for use in a filename.
///
/// Falls back to the host, then to `"download"`, when the path has no usable segment.
pub(crate) fn stem_from_url(url: &Url) -> String {
    let last_segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");
    let decoded = urlencoding::decode(last_segment).map_or_else(
        |_| last_segment.to_string(),
        std::borrow::Cow::into_owned,
    );
    let stem = match extension_of(&decoded) {
        Some(ext) => &decoded[..decoded.len() - ext.len()],
        None => decoded.as_str(),
    };

    let cleaned: String = sanitize_filename_component(stem)
        .chars()
        .take(MAX_STEM_CHARS)
        .collect();
    if !cleaned.is_empty() {
        return cleaned;
    }

    url.host_str()
        .map(|host| sanitize_filename_component(&host.replace('.', "-")))
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| "download".to_string())
}

fn extension_of(name: &str) -> Option<String> {
    let dot_index = name.rfind('.')?;
    let ext = &name[dot_index..];
    if ext.len() <= 1 || ext.len() > MAX_EXTENSION_LEN {
        return None;
    }
    if !ext[1..].chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Collapses anything that is not alphanumeric, `-`, `_` or `.` into single underscores.
pub(crate) fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            c if c.is_alphanumeric() || matches!(c, '-' | '.') => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    out.trim_matches(|c| c == '_' || c == '.').to_string()
}

/// Guesses a Content-Type from a file extension (used for `file://` and cached content).
pub(crate) fn content_type_from_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "csv" => "text/csv",
        "tsv" => "text/tab-separated-values",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_extension_from_url_lowercases() {
        assert_eq!(
            extension_from_url(&url("https://example.com/a/Data.CSV")),
            Some(".csv".to_string())
        );
    }

    #[test]
    fn test_extension_from_url_ignores_query_and_missing_ext() {
        assert_eq!(
            extension_from_url(&url("https://example.com/data.json?x=1.2")),
            Some(".json".to_string())
        );
        assert_eq!(extension_from_url(&url("https://example.com/download")), None);
        assert_eq!(extension_from_url(&url("https://example.com/")), None);
    }

    #[test]
    fn test_extension_from_url_rejects_long_or_odd_extensions() {
        assert_eq!(
            extension_from_url(&url("https://example.com/file.verylongextension")),
            None
        );
        assert_eq!(extension_from_url(&url("https://example.com/file.")), None);
        assert_eq!(extension_from_url(&url("https://example.com/v1.2-beta")), None);
    }

    #[test]
    fn test_stem_from_url_sanitizes_segment() {
        assert_eq!(
            stem_from_url(&url("https://example.com/reports/Q1%20sales%3A2024.csv")),
            "Q1_sales_2024"
        );
    }

    #[test]
    fn test_stem_from_url_falls_back_to_host() {
        assert_eq!(stem_from_url(&url("https://data.example.org/")), "data-example-org");
        assert_eq!(stem_from_url(&url("file:///")), "download");
    }

    #[test]
    fn test_stem_from_url_strips_traversal_dots() {
        let stem = stem_from_url(&url("https://example.com/..%2F..%2Fetc%2Fpasswd"));
        assert!(!stem.contains('/'));
        assert!(!stem.starts_with('.'));
    }

    #[test]
    fn test_sanitize_filename_component_collapses_separators() {
        assert_eq!(sanitize_filename_component("a  b//c"), "a_b_c");
        assert_eq!(sanitize_filename_component("__x__"), "x");
        assert_eq!(sanitize_filename_component("***"), "");
    }

    #[test]
    fn test_content_type_from_path_known_and_unknown() {
        assert_eq!(
            content_type_from_path(Path::new("/tmp/x.CSV")),
            Some("text/csv")
        );
        assert_eq!(
            content_type_from_path(Path::new("a.yml")),
            Some("application/yaml")
        );
        assert_eq!(content_type_from_path(Path::new("a.weird")), None);
        assert_eq!(content_type_from_path(Path::new("noext")), None);
    }
}
