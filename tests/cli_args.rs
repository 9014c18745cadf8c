//! Integration tests for CLI argument handling
//!
//! Only invalid invocations run the binary; none of them reach the network.

use std::process::Command;

/// Helper to run the CLI with given args and capture output
fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_reqcache"))
        .args(args)
        .output()
        .expect("Failed to execute reqcache")
}

#[test]
fn test_help_flag_exits_successfully() {
    let output = run_cli(&["--help"]);
    assert!(
        output.status.success(),
        "Expected --help to exit successfully"
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("reqcache"), "Help should mention reqcache");
    assert!(stdout.contains("--ttl"), "Help should mention --ttl flag");
    assert!(stdout.contains("--coalesce"), "Help should mention --coalesce flag");
}

#[test]
fn test_missing_url_fails() {
    let output = run_cli(&[]);
    assert!(!output.status.success(), "Expected missing URL to fail");
}

#[test]
fn test_invalid_url_prints_error_and_exits() {
    let output = run_cli(&["not a url"]);
    assert!(!output.status.success(), "Expected invalid URL to fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Invalid URL"),
        "Should print error message about invalid URL: {}",
        stderr
    );
}

#[test]
fn test_zero_repeat_prints_error_and_exits() {
    let output = run_cli(&["--repeat", "0", "https://example.com/"]);
    assert!(!output.status.success(), "Expected --repeat 0 to fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("repeat"), "Should explain the repeat count: {}", stderr);
}

#[cfg(test)]
mod unit_tests {
    //! Unit tests for CLI parsing that don't require running the binary

    use clap::Parser;
    use reqcache::cli::{parse_url_arg, Cli, CliError, StartupConfig};

    #[test]
    fn test_cli_ttl_is_optional() {
        let cli = Cli::parse_from(["reqcache", "https://example.com/"]);
        let config = StartupConfig::from_cli(&cli).unwrap();
        assert!(config.engine.cache_time().is_none());
    }

    #[test]
    fn test_cli_ttl_sets_engine_cache_time() {
        let cli = Cli::parse_from(["reqcache", "--ttl", "5", "https://example.com/"]);
        let config = StartupConfig::from_cli(&cli).unwrap();
        assert_eq!(config.engine.cache_time_seconds, Some(5));
    }

    #[test]
    fn test_cli_rejects_non_numeric_ttl() {
        assert!(Cli::try_parse_from(["reqcache", "--ttl", "soon", "https://example.com/"]).is_err());
    }

    #[test]
    fn test_parse_url_arg_invalid_returns_error() {
        assert!(matches!(
            parse_url_arg("mailto:someone@example.com"),
            Err(CliError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_startup_config_keeps_url_order() {
        let cli = Cli::parse_from([
            "reqcache",
            "https://example.com/b",
            "https://example.com/a",
        ]);
        let config = StartupConfig::from_cli(&cli).unwrap();
        let paths: Vec<_> = config.urls.iter().map(|url| url.path()).collect();
        assert_eq!(paths, vec!["/b", "/a"]);
    }
}
