//! End-to-end CLI tests for the fetcher binary.

use assert_cmd::Command;
use fetcher_core::retrieve::derive_cache_key;
use predicates::prelude::*;
use tempfile::TempDir;

fn fetcher() -> Command {
    let mut cmd = Command::cargo_bin("fetcher").unwrap();
    // keep user config and environment out of the run
    cmd.env_remove("FETCHER_CACHE_DIR")
        .env_remove("FETCHER_FALLBACK_DIR")
        .env_remove("FETCHER_MODE")
        .env_remove("RUST_LOG");
    cmd
}

/// Test that the binary exits with code 0 when there is nothing to do.
#[test]
fn test_binary_without_urls_returns_zero() {
    fetcher().assert().success();
}

#[test]
fn test_binary_help_displays_usage() {
    fetcher()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--mode"))
        .stdout(predicate::str::contains("--fallback-dir"));
}

#[test]
fn test_binary_version_displays_version() {
    fetcher()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("fetcher"));
}

#[test]
fn test_binary_invalid_flag_returns_error() {
    fetcher()
        .arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_use_saved_serves_fixture() {
    let fixtures = TempDir::new().unwrap();
    let url = "https://data.example.invalid/cities.csv";
    std::fs::write(
        fixtures.path().join(derive_cache_key(url).unwrap()),
        "city,pop\nOslo,709000\nBergen,291000\n",
    )
    .unwrap();

    fetcher()
        .args(["--user-agent", "cli-tests", "--mode", "use-saved", "--format", "csv"])
        .arg("--cache-dir")
        .arg(fixtures.path())
        .arg(url)
        .assert()
        .success()
        .stdout(predicate::str::contains("cache\t2 rows [city,pop]"))
        .stdout(predicate::str::contains(url));
}

#[test]
fn test_binary_missing_fixture_exits_with_error() {
    let fixtures = TempDir::new().unwrap();

    fetcher()
        .args(["--user-agent", "cli-tests", "--mode", "use-saved", "-q"])
        .arg("--fallback-dir")
        .arg(fixtures.path())
        .arg("https://data.example.invalid/missing.json")
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("is not cached"));
}

#[test]
fn test_binary_reads_local_file_url() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("config.json");
    std::fs::write(&source, r#"{"a": 1, "b": [1, 2]}"#).unwrap();
    let url = url::Url::from_file_path(&source).unwrap().to_string();

    fetcher()
        .args(["--user-agent", "cli-tests", "--format", "json"])
        .arg("--cache-dir")
        .arg(dir.path().join("cache"))
        .arg(&url)
        .assert()
        .success()
        .stdout(predicate::str::contains("local_file\tobject with 2 keys"));
}

#[test]
fn test_binary_rejects_out_of_range_attempts() {
    fetcher()
        .args(["--max-attempts", "0", "https://example.invalid/x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("max-attempts"));
}

#[test]
fn test_binary_warns_on_period_without_rate_limit() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("a.txt");
    std::fs::write(&source, "x").unwrap();
    let url = url::Url::from_file_path(&source).unwrap().to_string();

    fetcher()
        .args(["--user-agent", "cli-tests", "--rate-limit-period-ms", "200"])
        .arg("--cache-dir")
        .arg(dir.path().join("cache"))
        .arg(&url)
        .assert()
        .success()
        .stderr(predicate::str::contains("--rate-limit-period-ms"))
        .stderr(predicate::str::contains("no rate limit configured"));
}
