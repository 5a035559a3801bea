//! CLI entry point for the fetcher tool.

use std::io::{self, IsTerminal, Read};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use fetcher_core::download::{FetchFormat, Json, Tabular, Yaml};
use fetcher_core::{
    Body, DownloadResult, Downloader, ErrorsOnExit, FetchConfig, FetchError, RetrieveOptions,
    Retriever, SessionRegistry, TabularOptions,
};
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, OutputFormat};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr; stdout carries one summary line per URL.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let mut config =
        FetchConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    for flag in args.apply_to(&mut config) {
        warn!(flag, "ignored: no rate limit configured");
    }
    config.validate().context("invalid command-line options")?;

    let urls = read_urls(&args)?;
    if urls.is_empty() {
        info!("No input provided. Pipe URLs via stdin or pass as arguments.");
        return Ok(ExitCode::SUCCESS);
    }

    let registry = SessionRegistry::from_config(&config).context("failed to build sessions")?;
    let session = match &args.session {
        Some(name) => registry.require(name)?.clone(),
        None => registry.default_session().clone(),
    };

    let retriever = Retriever::new(Downloader::new(session), config.cache_dir())
        .with_fallback_dir(config.fallback_dir())
        .with_mode(config.mode());
    let options = RetrieveOptions::default()
        .fresh(args.fresh)
        .fallback(args.fallback);

    info!(
        urls = urls.len(),
        mode = %retriever.mode(),
        cache_dir = %retriever.cache_dir().display(),
        "fetcher starting"
    );

    let errors = ErrorsOnExit::new();
    for url in &urls {
        match retrieve_one(&retriever, url, &options, args.format).await {
            Ok(line) => println!("{line}"),
            Err(error) => errors.add(format!("{url}: {error}")),
        }
    }

    Ok(errors.finish())
}

/// URLs from positional arguments, else one per non-blank stdin line.
fn read_urls(args: &Args) -> Result<Vec<String>> {
    if !args.urls.is_empty() {
        return Ok(args.urls.clone());
    }
    if io::stdin().is_terminal() {
        return Ok(Vec::new());
    }
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("failed to read URLs from stdin")?;
    Ok(buffer
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

async fn retrieve_one(
    retriever: &Retriever,
    url: &str,
    options: &RetrieveOptions,
    format: OutputFormat,
) -> Result<String, FetchError> {
    let result = retriever.retrieve(url, options).await?;
    let origin = result.origin;
    let location = result
        .saved_path
        .as_ref()
        .map_or_else(|| "-".to_string(), |path| path.display().to_string());

    let detail = match format {
        OutputFormat::Raw => format!("{} bytes", result.bytes_len),
        OutputFormat::Json => {
            let value = Json::<serde_json::Value>::new().decode(url, in_memory(&result).await?)?;
            describe_json(&value)
        }
        OutputFormat::Yaml => {
            let value = Yaml::<serde_yaml::Value>::new().decode(url, in_memory(&result).await?)?;
            describe_yaml(&value)
        }
        OutputFormat::Csv => {
            let extension = result
                .saved_path
                .as_deref()
                .and_then(|path| path.extension())
                .and_then(|ext| ext.to_str());
            let tabular = Tabular(TabularOptions::for_extension(extension));
            let rows = tabular.decode(url, result.body)?;
            let columns = rows.headers().join(",");
            let mut count = 0_u64;
            for row in rows {
                row?;
                count += 1;
            }
            format!("{count} rows [{columns}]")
        }
    };

    Ok(format!("{origin}\t{detail}\t{location}\t{url}"))
}

async fn in_memory(result: &DownloadResult) -> Result<Body, FetchError> {
    Ok(Body::Bytes(result.bytes().await?))
}

fn describe_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => format!("object with {} keys", map.len()),
        serde_json::Value::Array(items) => format!("array of {} items", items.len()),
        serde_json::Value::Null => "null".to_string(),
        _ => "scalar".to_string(),
    }
}

fn describe_yaml(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Mapping(map) => format!("mapping with {} keys", map.len()),
        serde_yaml::Value::Sequence(items) => format!("sequence of {} items", items.len()),
        serde_yaml::Value::Null => "null".to_string(),
        _ => "scalar".to_string(),
    }
}
