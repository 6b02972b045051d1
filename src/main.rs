//! apicache - local, versioned cache for API responses
//!
//! Thin command-line front end over the library: every subcommand opens the
//! configured store, performs one cache operation and prints JSON to stdout.
//! Diagnostics go to stderr; set `RUST_LOG=apicache=debug` for more detail.

use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use apicache::cli::{Cli, Command};
use apicache::{ApiCache, CacheConfig, CacheError, FetchError, HttpFetcher, Params};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "apicache=warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

#[derive(Debug, Error)]
enum RunError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("cannot encode output: {0}")]
    Output(#[from] serde_json::Error),
}

fn run(cli: Cli) -> Result<ExitCode, RunError> {
    let mut config = CacheConfig::new().with_ttl(cli.ttl());
    if let Some(location) = &cli.location {
        config = config.with_location(location);
    }

    let cache = match &cli.command {
        Command::Get { vars, .. } => {
            let fetcher = vars
                .iter()
                .cloned()
                .fold(HttpFetcher::new(), |fetcher, (name, value)| {
                    fetcher.with_var(name, value)
                });
            ApiCache::new(fetcher, config)?
        }
        _ => ApiCache::new(offline_fetcher(), config)?,
    };

    match cli.command {
        Command::Get { request, .. } => {
            let response = cache.request(&request.template, &request.params())?;
            if response.degraded {
                eprintln!(
                    "degraded: fetch failed, serving version {} cached at {}",
                    response.sequence, response.cached_at
                );
            } else if response.hit {
                eprintln!("hit: version {} cached at {}", response.sequence, response.cached_at);
            } else {
                eprintln!("miss: stored version {}", response.sequence);
            }
            print_json(&response.payload)?;
        }
        Command::Show(request) => match cache.read(&request.template, &request.params())? {
            Some(payload) => print_json(&payload)?,
            None => {
                eprintln!("not cached: {}", request.template);
                return Ok(ExitCode::FAILURE);
            }
        },
        Command::Has(request) => {
            let found = cache.has(&request.template, &request.params())?;
            println!("{}", found);
            if !found {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::History(request) => {
            print_json(&cache.history(&request.template, &request.params())?)?;
        }
        Command::List => print_json(&cache.entries()?)?,
        Command::Clear { prefix } => println!("{}", cache.clear_for_url(&prefix)?),
        Command::Prune { retain, older_than } => {
            let policy = Command::prune_policy(retain, older_than);
            println!("{}", cache.prune(policy)?);
        }
        Command::Stats => print_json(&cache.stats()?)?,
    }

    Ok(ExitCode::SUCCESS)
}

/// Fetcher for subcommands that only read or maintain the store
fn offline_fetcher() -> impl Fn(&str, &Params) -> Result<Value, FetchError> + Send + Sync + 'static {
    |template: &str, _: &Params| {
        Err(FetchError::new(format!(
            "fetching is only available through `get`: {}",
            template
        )))
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), RunError> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}
