//! Command-line interface parsing for apicache
//!
//! This module handles parsing of CLI arguments using clap, including the
//! `KEY=VALUE` request parameters and `NAME=VALUE` placeholder variables.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use thiserror::Error;

use crate::key::Params;
use crate::policy::{PrunePolicy, Ttl};

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// A request parameter was not written as KEY=VALUE
    #[error("Invalid parameter: '{0}'. Expected KEY=VALUE")]
    InvalidParam(String),

    /// A placeholder variable was not written as NAME=VALUE
    #[error("Invalid variable: '{0}'. Expected NAME=VALUE")]
    InvalidVar(String),
}

/// apicache - local, versioned cache for API responses
#[derive(Parser, Debug)]
#[command(name = "apicache")]
#[command(about = "Local, versioned cache for API responses")]
#[command(version)]
pub struct Cli {
    /// Store file (defaults to the platform cache directory)
    #[arg(long, global = true, env = "APICACHE_LOCATION", value_name = "PATH")]
    pub location: Option<PathBuf>,

    /// Freshness window in seconds; 0 means stored responses never expire
    #[arg(long, global = true, env = "APICACHE_TTL", value_name = "SECS", default_value_t = 0)]
    pub ttl: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch through the cache and print the payload
    ///
    /// Examples:
    ///   apicache get '{BASE_URL}/users/{id}' id=42 --var BASE_URL=https://api.example.com
    ///   apicache get https://api.example.com/search q=rust page=2 --ttl 3600
    Get {
        #[command(flatten)]
        request: RequestArgs,

        /// Ambient placeholder value, e.g. BASE_URL=https://api.example.com
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var_arg)]
        vars: Vec<(String, String)>,
    },

    /// Print the newest stored payload without fetching
    Show(RequestArgs),

    /// Exit successfully if any version is stored for the request
    Has(RequestArgs),

    /// Print every stored version of a request, oldest first
    History(RequestArgs),

    /// List stored entries
    List,

    /// Remove every entry whose template starts with PREFIX
    Clear {
        /// Template prefix, e.g. https://api.example.com/users
        prefix: String,
    },

    /// Remove superseded versions
    Prune {
        /// Keep this many newest versions per entry (default 1)
        #[arg(long, value_name = "N", conflicts_with = "older_than")]
        retain: Option<usize>,

        /// Remove superseded versions older than this many seconds
        #[arg(long, value_name = "SECS")]
        older_than: Option<u64>,
    },

    /// Print entry and version totals
    Stats,
}

/// Template plus parameters identifying one logical request
#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// Request template, e.g. https://api.example.com/users/{id}
    pub template: String,

    /// Request parameters; values are parsed as JSON when valid, otherwise kept as text
    #[arg(value_name = "KEY=VALUE", value_parser = parse_param_arg)]
    pub params: Vec<(String, Value)>,
}

impl RequestArgs {
    /// Collects the parameters into a mapping (later duplicates win)
    pub fn params(&self) -> Params {
        self.params.iter().cloned().collect()
    }
}

impl Cli {
    pub fn ttl(&self) -> Ttl {
        Ttl::from_secs(self.ttl)
    }
}

impl Command {
    /// The prune policy selected by `prune` flags
    pub fn prune_policy(retain: Option<usize>, older_than: Option<u64>) -> PrunePolicy {
        match (retain, older_than) {
            (_, Some(secs)) => PrunePolicy::OlderThan(std::time::Duration::from_secs(secs)),
            (Some(n), None) => PrunePolicy::KeepLatest(n),
            (None, None) => PrunePolicy::default(),
        }
    }
}

/// Parses a KEY=VALUE request parameter.
///
/// # Returns
/// * `Ok((key, value))` where value is JSON if it parses as JSON, else a string
/// * `Err(CliError::InvalidParam)` if there is no `=` or the key is empty
pub fn parse_param_arg(s: &str) -> Result<(String, Value), CliError> {
    let (key, raw) = split_pair(s).ok_or_else(|| CliError::InvalidParam(s.to_string()))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Parses a NAME=VALUE placeholder variable.
pub fn parse_var_arg(s: &str) -> Result<(String, String), CliError> {
    let (name, value) = split_pair(s).ok_or_else(|| CliError::InvalidVar(s.to_string()))?;
    Ok((name.to_string(), value.to_string()))
}

fn split_pair(s: &str) -> Option<(&str, &str)> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Some((key, value)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_parse_param_json_values() {
        assert_eq!(parse_param_arg("page=2").unwrap(), ("page".into(), json!(2)));
        assert_eq!(parse_param_arg("on=true").unwrap(), ("on".into(), json!(true)));
        assert_eq!(
            parse_param_arg(r#"ids=[1,2]"#).unwrap(),
            ("ids".into(), json!([1, 2]))
        );
    }

    #[test]
    fn test_parse_param_text_values() {
        assert_eq!(parse_param_arg("q=rust").unwrap(), ("q".into(), json!("rust")));
        assert_eq!(parse_param_arg("q=").unwrap(), ("q".into(), json!("")));
        assert_eq!(
            parse_param_arg("expr=a=b").unwrap(),
            ("expr".into(), json!("a=b"))
        );
    }

    #[test]
    fn test_parse_param_invalid() {
        let result = parse_param_arg("novalue");
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Invalid parameter"));
        assert!(err.to_string().contains("novalue"));

        assert!(parse_param_arg("=x").is_err());
    }

    #[test]
    fn test_parse_var() {
        assert_eq!(
            parse_var_arg("BASE_URL=https://x.test/v1?a=b").unwrap(),
            ("BASE_URL".into(), "https://x.test/v1?a=b".into())
        );
        assert!(parse_var_arg("BASE_URL").is_err());
    }

    #[test]
    fn test_cli_parse_get() {
        let cli = Cli::parse_from([
            "apicache",
            "get",
            "{BASE_URL}/users/{id}",
            "id=42",
            "--var",
            "BASE_URL=https://api.example.com",
        ]);

        match cli.command {
            Command::Get { request, vars } => {
                assert_eq!(request.template, "{BASE_URL}/users/{id}");
                assert_eq!(request.params().get("id"), Some(&json!(42)));
                assert_eq!(vars, vec![("BASE_URL".into(), "https://api.example.com".into())]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::parse_from([
            "apicache",
            "list",
            "--location",
            "/tmp/c.sqlite3",
            "--ttl",
            "60",
        ]);

        assert_eq!(cli.location, Some(PathBuf::from("/tmp/c.sqlite3")));
        assert_eq!(cli.ttl(), Ttl::Within(Duration::from_secs(60)));
        assert!(matches!(cli.command, Command::List));
    }

    #[test]
    fn test_cli_prune_policy() {
        assert_eq!(Command::prune_policy(None, None), PrunePolicy::KeepLatest(1));
        assert_eq!(Command::prune_policy(Some(3), None), PrunePolicy::KeepLatest(3));
        assert_eq!(
            Command::prune_policy(None, Some(60)),
            PrunePolicy::OlderThan(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_cli_prune_flags_conflict() {
        let result = Cli::try_parse_from([
            "apicache",
            "prune",
            "--retain",
            "2",
            "--older-than",
            "60",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_params_last_wins() {
        let cli = Cli::parse_from(["apicache", "show", "/x", "a=1", "a=2"]);
        match cli.command {
            Command::Show(request) => assert_eq!(request.params().get("a"), Some(&json!(2))),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
