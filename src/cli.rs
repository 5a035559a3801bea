//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use fetcher_core::RetrievalMode;
use fetcher_core::config::{FetchConfig, MAX_ATTEMPTS_LIMIT, RateLimitSettings};

/// Period used when `--rate-limit-calls` is given without a period.
const DEFAULT_RATE_LIMIT_PERIOD_MS: u64 = 1000;

/// Retrieve remote data with retries, rate limiting, caching and fixtures.
///
/// Each URL is retrieved through the on-disk cache; a one-line summary per
/// URL is printed to stdout. URLs are read from stdin when none are given.
#[derive(Parser, Debug)]
#[command(name = "fetcher")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to retrieve (`http://`, `https://` or `file://`)
    pub urls: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// YAML configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Named session from the configuration file
    #[arg(long, value_name = "NAME")]
    pub session: Option<String>,

    /// User agent identifying the caller
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Maximum attempts per request, first try included (1-20)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_ATTEMPTS_LIMIT)))]
    pub max_attempts: Option<u32>,

    /// Delay before the second attempt, in milliseconds
    #[arg(long, value_name = "MS")]
    pub backoff_base_ms: Option<u64>,

    /// Multiplier applied to the delay after each failed attempt (>= 1)
    #[arg(long)]
    pub backoff_factor: Option<f64>,

    /// Maximum requests per rate-limit period
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub rate_limit_calls: Option<u32>,

    /// Rate-limit period in milliseconds
    #[arg(long, value_name = "MS", value_parser = clap::value_parser!(u64).range(1..))]
    pub rate_limit_period_ms: Option<u64>,

    /// Directory for cached downloads
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Directory fixtures are saved to and served from
    #[arg(long, value_name = "DIR")]
    pub fallback_dir: Option<PathBuf>,

    /// Retrieval mode
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Ignore cached copies and download again
    #[arg(long)]
    pub fresh: bool,

    /// Serve the saved copy when the network fails
    #[arg(long)]
    pub fallback: bool,

    /// How to decode each retrieved body
    #[arg(long, value_enum, default_value_t = OutputFormat::Raw)]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    Normal,
    Save,
    UseSaved,
}

impl From<ModeArg> for RetrievalMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Normal => Self::Normal,
            ModeArg::Save => Self::Save,
            ModeArg::UseSaved => Self::UseSaved,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Raw,
    Json,
    Yaml,
    Csv,
}

impl Args {
    /// Overlays the command-line values onto `config`. Flags win over the
    /// file and the environment.
    ///
    /// Returns the flags that had nothing to apply to.
    pub fn apply_to(&self, config: &mut FetchConfig) -> Vec<&'static str> {
        let mut ignored = Vec::new();
        if let Some(user_agent) = &self.user_agent {
            config.user_agent = Some(user_agent.clone());
        }
        if let Some(max_attempts) = self.max_attempts {
            config.retry.max_attempts = max_attempts;
        }
        if let Some(base) = self.backoff_base_ms {
            config.retry.backoff_base_ms = base;
        }
        if let Some(factor) = self.backoff_factor {
            config.retry.backoff_factor = factor;
        }
        match (self.rate_limit_calls, self.rate_limit_period_ms) {
            (Some(calls), period) => {
                let period_ms = period
                    .or(config.rate_limit.map(|limit| limit.period_ms))
                    .unwrap_or(DEFAULT_RATE_LIMIT_PERIOD_MS);
                config.rate_limit = Some(RateLimitSettings { calls, period_ms });
            }
            (None, Some(period_ms)) => match config.rate_limit.as_mut() {
                Some(limit) => limit.period_ms = period_ms,
                None => ignored.push("--rate-limit-period-ms"),
            },
            (None, None) => {}
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.fallback_dir {
            config.fallback_dir = Some(dir.clone());
        }
        if let Some(mode) = self.mode {
            config.mode = Some(mode.into());
        }
        ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["fetcher"]).unwrap();
        assert!(args.urls.is_empty());
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert_eq!(args.format, OutputFormat::Raw);
        assert!(args.mode.is_none());
        assert!(!args.fresh);
        assert!(!args.fallback);
    }

    #[test]
    fn test_cli_positional_urls_collected() {
        let args =
            Args::try_parse_from(["fetcher", "https://a.example/x.json", "file:///tmp/y.csv"])
                .unwrap();
        assert_eq!(
            args.urls,
            ["https://a.example/x.json", "file:///tmp/y.csv"]
        );
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["fetcher", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["fetcher", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["fetcher", "--quiet"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["fetcher", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["fetcher", "--version"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_unknown_flag_rejected() {
        let err = Args::try_parse_from(["fetcher", "--bogus"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_cli_mode_values() {
        let args = Args::try_parse_from(["fetcher", "--mode", "use-saved"]).unwrap();
        assert_eq!(args.mode, Some(ModeArg::UseSaved));
        assert_eq!(RetrievalMode::from(ModeArg::Save), RetrievalMode::Save);

        let err = Args::try_parse_from(["fetcher", "--mode", "offline"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn test_cli_format_values() {
        let args = Args::try_parse_from(["fetcher", "--format", "csv"]).unwrap();
        assert_eq!(args.format, OutputFormat::Csv);

        let err = Args::try_parse_from(["fetcher", "--format", "xlsx"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn test_cli_max_attempts_range_enforced() {
        let args = Args::try_parse_from(["fetcher", "--max-attempts", "20"]).unwrap();
        assert_eq!(args.max_attempts, Some(20));

        for bad in ["0", "21"] {
            let err = Args::try_parse_from(["fetcher", "--max-attempts", bad]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_cli_rate_limit_calls_zero_rejected() {
        let err = Args::try_parse_from(["fetcher", "--rate-limit-calls", "0"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    // ==== Config Overlay Tests ====

    #[test]
    fn test_apply_to_overrides_config() {
        let args = Args::try_parse_from([
            "fetcher",
            "--user-agent",
            "cli-agent",
            "--max-attempts",
            "5",
            "--backoff-base-ms",
            "250",
            "--backoff-factor",
            "3",
            "--cache-dir",
            "/tmp/cache",
            "--fallback-dir",
            "/tmp/fixtures",
            "--mode",
            "save",
        ])
        .unwrap();
        let mut config = FetchConfig {
            user_agent: Some("file-agent".to_string()),
            ..FetchConfig::default()
        };
        args.apply_to(&mut config);

        assert_eq!(config.user_agent.as_deref(), Some("cli-agent"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_base_ms, 250);
        assert!((config.retry.backoff_factor - 3.0).abs() < f64::EPSILON);
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/cache")));
        assert_eq!(config.fallback_dir, Some(PathBuf::from("/tmp/fixtures")));
        assert_eq!(config.mode, Some(RetrievalMode::Save));
        assert!(config.rate_limit.is_none());
    }

    #[test]
    fn test_apply_to_rate_limit_period_defaults() {
        let args = Args::try_parse_from(["fetcher", "--rate-limit-calls", "4"]).unwrap();
        let mut config = FetchConfig::default();
        args.apply_to(&mut config);
        let limit = config.rate_limit.unwrap();
        assert_eq!(limit.calls, 4);
        assert_eq!(limit.period_ms, DEFAULT_RATE_LIMIT_PERIOD_MS);
    }

    #[test]
    fn test_apply_to_period_alone_adjusts_existing_limit() {
        let args = Args::try_parse_from(["fetcher", "--rate-limit-period-ms", "200"]).unwrap();

        let mut unlimited = FetchConfig::default();
        let ignored = args.apply_to(&mut unlimited);
        assert!(unlimited.rate_limit.is_none());
        assert_eq!(ignored, ["--rate-limit-period-ms"]);

        let mut limited = FetchConfig {
            rate_limit: Some(RateLimitSettings {
                calls: 2,
                period_ms: 1000,
            }),
            ..FetchConfig::default()
        };
        assert!(args.apply_to(&mut limited).is_empty());
        let limit = limited.rate_limit.unwrap();
        assert_eq!((limit.calls, limit.period_ms), (2, 200));
    }
}
