//! Integration tests for the downloader.
//!
//! These tests verify the full download flow with mock HTTP servers and
//! local `file://` sources.

mod support;

use std::time::{Duration, Instant};

use fetcher_core::{
    Body, DownloadOptions, Downloader, FetchError, Origin, RetryPolicy, Session, TabularOptions,
};
use serde::Deserialize;
use support::fast_session;
use support::socket_guard::start_mock_server_or_skip;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn file_url(path: &std::path::Path) -> String {
    Url::from_file_path(path).unwrap().to_string()
}

#[tokio::test]
async fn test_stream_large_body_to_disk() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    let payload: Vec<u8> = (0..8 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    Mock::given(method("GET"))
        .and(path("/big.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("big.bin");
    let result = Downloader::new(fast_session(1))
        .download(
            &format!("{}/big.bin", mock_server.uri()),
            &DownloadOptions::stream_to(&dest),
        )
        .await
        .unwrap();

    assert!(matches!(&result.body, Body::File(p) if p == &dest));
    assert_eq!(result.saved_path.as_deref(), Some(dest.as_path()));
    assert_eq!(result.bytes_len, payload.len() as u64);
    assert_eq!(result.origin, Origin::Network);
    let on_disk = std::fs::read(&dest).unwrap();
    assert_eq!(on_disk.len(), payload.len());
    assert!(on_disk == payload, "streamed content differs");

    // no temp files left beside the destination
    let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(leftovers.len(), 1);
}

#[tokio::test]
async fn test_existing_destination_rejected_before_request() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("new"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("exists.txt");
    std::fs::write(&dest, "old").unwrap();

    let downloader = Downloader::new(fast_session(1));
    let url = format!("{}/exists.txt", mock_server.uri());
    let err = downloader
        .download(&url, &DownloadOptions::to_path(&dest))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::FileExists { ref path } if path == &dest));
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "old");
    assert_eq!(downloader.session().attempts_sent(), 0);
}

#[tokio::test]
async fn test_overwrite_replaces_existing_destination() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("new"))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("exists.txt");
    std::fs::write(&dest, "old").unwrap();

    Downloader::new(fast_session(1))
        .download(
            &format!("{}/exists.txt", mock_server.uri()),
            &DownloadOptions::to_path(&dest).overwrite(true),
        )
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "new");
}

#[tokio::test]
async fn test_invalid_json_is_parse_error() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/broken.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&mock_server)
        .await;

    let url = format!("{}/broken.json", mock_server.uri());
    let err = Downloader::new(fast_session(1))
        .download_json::<serde_json::Value>(&url)
        .await
        .unwrap_err();
    match err {
        FetchError::Parse {
            url: failed, format, ..
        } => {
            assert_eq!(failed, url);
            assert_eq!(format, "json");
        }
        other => panic!("expected Parse, got {other:?}"),
    }
}

#[derive(Debug, Deserialize, PartialEq)]
struct Station {
    id: String,
    elevation: i32,
}

#[tokio::test]
async fn test_yaml_decodes_into_typed_value() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/stations.yaml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("- id: a1\n  elevation: 12\n- id: b2\n  elevation: -3\n"),
        )
        .mount(&mock_server)
        .await;

    let stations: Vec<Station> = Downloader::new(fast_session(1))
        .download_yaml(&format!("{}/stations.yaml", mock_server.uri()))
        .await
        .unwrap();
    assert_eq!(
        stations,
        [
            Station {
                id: "a1".into(),
                elevation: 12
            },
            Station {
                id: "b2".into(),
                elevation: -3
            },
        ]
    );
}

#[tokio::test]
async fn test_file_url_is_read_locally() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("notes.txt");
    std::fs::write(&source, "local content").unwrap();

    let downloader = Downloader::new(fast_session(1));
    let result = downloader
        .download(&file_url(&source), &DownloadOptions::default())
        .await
        .unwrap();
    assert_eq!(result.origin, Origin::LocalFile);
    assert_eq!(result.status, 200);
    assert_eq!(&result.bytes().await.unwrap()[..], b"local content");
    assert_eq!(downloader.session().attempts_sent(), 0);
}

#[tokio::test]
async fn test_missing_file_url_is_non_retryable() {
    let temp_dir = TempDir::new().unwrap();
    let err = Downloader::new(fast_session(3))
        .download_text(&file_url(&temp_dir.path().join("absent.txt")))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::NonRetryable { attempts: 1, .. }));
}

#[tokio::test]
async fn test_unsupported_scheme_rejected() {
    let err = Downloader::new(fast_session(1))
        .download_bytes("ftp://example.com/data.csv")
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::UnsupportedScheme { ref scheme, .. } if scheme == "ftp"));
}

#[tokio::test]
async fn test_tabular_over_flaky_server() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/data.csv"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string("a,b\n1,2\n"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let session = Session::build(
        "fetcher-integration-tests",
        RetryPolicy::new(3, Duration::from_millis(10), 2.0),
        None,
        &[],
    )
    .unwrap();
    let downloader = Downloader::new(session);

    let started = Instant::now();
    let rows = downloader
        .download_tabular(
            &format!("{}/data.csv", mock_server.uri()),
            &TabularOptions::default(),
        )
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(30));

    assert_eq!(rows.headers(), ["a", "b"]);
    let rows: Vec<_> = rows.collect::<Result<_, _>>().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("a"), Some("1"));
    assert_eq!(rows[0].get("b"), Some("2"));
    assert_eq!(downloader.session().attempts_sent(), 3);
}

#[tokio::test]
async fn test_tabular_from_local_tsv() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("scores.tsv");
    std::fs::write(&source, "name\tscore\nada\t9\ngrace\t10\n").unwrap();

    let rows = Downloader::new(fast_session(1))
        .download_tabular(&file_url(&source), &TabularOptions::tsv())
        .await
        .unwrap();
    let names: Vec<String> = rows
        .map(|row| row.unwrap().get("name").unwrap().to_string())
        .collect();
    assert_eq!(names, ["ada", "grace"]);
}
