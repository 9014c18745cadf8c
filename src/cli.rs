//! Command-line interface parsing for the `reqcache` demo binary
//!
//! The binary fetches a list of URLs several times through one engine, which
//! makes cache hits, expiry and coalescing visible from the shell.

use clap::Parser;
use reqwest::Url;
use thiserror::Error;
use tracing::Level;

use crate::config::EngineConfig;
use crate::logging::{parse_log_level, LogFormat, LoggingError};

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// A positional argument is not an absolute http(s) URL
    #[error("Invalid URL: '{0}'. Expected an absolute http:// or https:// URL")]
    InvalidUrl(String),

    /// `--repeat 0` would never touch the cache
    #[error("Invalid repeat count: 0. Each URL must be requested at least once")]
    InvalidRepeat,

    #[error(transparent)]
    Logging(#[from] LoggingError),
}

/// reqcache - fetch URLs through an argument-keyed response cache
#[derive(Parser, Debug)]
#[command(name = "reqcache")]
#[command(about = "Fetch URLs through an argument-keyed response cache")]
#[command(version)]
pub struct Cli {
    /// URLs to fetch, in order
    #[arg(required = true, value_name = "URL")]
    pub urls: Vec<String>,

    /// Seconds a response stays cached; cached forever when omitted
    #[arg(long, value_name = "SECONDS")]
    pub ttl: Option<u64>,

    /// How many times each URL is requested
    #[arg(long, default_value_t = 2)]
    pub repeat: u32,

    /// Share one request between concurrent lookups of the same URL
    #[arg(long)]
    pub coalesce: bool,

    /// Default log level (overridden by RUST_LOG)
    #[arg(long, value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

/// Validated settings derived from CLI arguments
#[derive(Debug, Clone)]
pub struct StartupConfig {
    pub urls: Vec<Url>,
    pub repeat: u32,
    pub engine: EngineConfig,
    pub log_level: Level,
    pub log_format: LogFormat,
}

/// Parses a URL argument, accepting only http and https
pub fn parse_url_arg(s: &str) -> Result<Url, CliError> {
    let url = Url::parse(s).map_err(|_| CliError::InvalidUrl(s.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(CliError::InvalidUrl(s.to_string())),
    }
}

impl StartupConfig {
    /// Creates a StartupConfig from parsed CLI arguments
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` with validated URLs and engine settings
    /// * `Err(CliError)` if a URL, the repeat count or the log level is invalid
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        if cli.repeat == 0 {
            return Err(CliError::InvalidRepeat);
        }

        let urls = cli
            .urls
            .iter()
            .map(|url| parse_url_arg(url))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StartupConfig {
            urls,
            repeat: cli.repeat,
            engine: EngineConfig {
                cache_time_seconds: cli.ttl,
                coalesce_in_flight: cli.coalesce,
            },
            log_level: parse_log_level(&cli.log_level)?,
            log_format: if cli.json_logs {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url_arg_accepts_http_and_https() {
        assert!(parse_url_arg("http://localhost:8080/users/7").is_ok());
        assert!(parse_url_arg("https://example.com/").is_ok());
    }

    #[test]
    fn test_parse_url_arg_rejects_other_schemes() {
        let err = parse_url_arg("ftp://example.com/file").unwrap_err();
        assert!(err.to_string().contains("Invalid URL"));
        assert!(err.to_string().contains("ftp://example.com/file"));
    }

    #[test]
    fn test_parse_url_arg_rejects_relative_paths() {
        assert!(parse_url_arg("/users/7").is_err());
    }

    #[test]
    fn test_cli_parse_defaults() {
        let cli = Cli::parse_from(["reqcache", "https://example.com/"]);
        assert_eq!(cli.urls, vec!["https://example.com/"]);
        assert!(cli.ttl.is_none());
        assert_eq!(cli.repeat, 2);
        assert!(!cli.coalesce);
        assert!(!cli.json_logs);
    }

    #[test]
    fn test_cli_requires_a_url() {
        assert!(Cli::try_parse_from(["reqcache"]).is_err());
    }

    #[test]
    fn test_startup_config_from_cli() {
        let cli = Cli::parse_from([
            "reqcache",
            "--ttl",
            "30",
            "--repeat",
            "3",
            "--coalesce",
            "--json-logs",
            "https://example.com/a",
            "https://example.com/b",
        ]);
        let config = StartupConfig::from_cli(&cli).unwrap();

        assert_eq!(config.urls.len(), 2);
        assert_eq!(config.repeat, 3);
        assert_eq!(config.engine.cache_time_seconds, Some(30));
        assert!(config.engine.coalesce_in_flight);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.log_level, Level::WARN);
    }

    #[test]
    fn test_startup_config_rejects_zero_repeat() {
        let cli = Cli::parse_from(["reqcache", "--repeat", "0", "https://example.com/"]);
        assert!(matches!(
            StartupConfig::from_cli(&cli),
            Err(CliError::InvalidRepeat)
        ));
    }

    #[test]
    fn test_startup_config_rejects_bad_log_level() {
        let cli = Cli::parse_from(["reqcache", "--log-level", "loud", "https://example.com/"]);
        assert!(matches!(
            StartupConfig::from_cli(&cli),
            Err(CliError::Logging(LoggingError::InvalidLevel(_)))
        ));
    }
}
