//! reqcache - fetch URLs through an argument-keyed response cache
//!
//! Requests every URL `--repeat` times through one engine and prints a JSON
//! summary of how many requests actually went over the network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use clap::Parser;
use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use reqcache::cli::{Cli, StartupConfig};
use reqcache::{logging, Engine};

/// What the engine caches per URL
#[derive(Debug, Serialize)]
struct ResponseSummary {
    url: String,
    status: u16,
    bytes: usize,
}

/// Printed to stdout once every round has finished
#[derive(Debug, Serialize)]
struct RunReport {
    calls: usize,
    network_requests: usize,
    failures: usize,
    cached_entries: usize,
    responses: Vec<Arc<ResponseSummary>>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let startup = match StartupConfig::from_cli(&cli) {
        Ok(startup) => startup,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };
    logging::init(startup.log_level, startup.log_format)?;

    let client = Client::new();
    let network_requests = Arc::new(AtomicUsize::new(0));
    let counter = network_requests.clone();

    let engine = Engine::builder(move |(url,): (String,)| {
        let client = client.clone();
        counter.fetch_add(1, Ordering::Relaxed);
        async move {
            let response = client.get(&url).send().await?.error_for_status()?;
            let status = response.status().as_u16();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((url, status, body.len()))
        }
    })
    .adapter(|(url, status, bytes)| ResponseSummary { url, status, bytes })
    .error_adapter(|err: reqwest::Error| err.to_string())
    .config(startup.engine.clone())
    .build();

    let _errors = engine.on_error(|err| warn!(error = %err, "fetch failed"));
    let _done = engine.on_success(|summary| {
        info!(url = %summary.url, status = summary.status, bytes = summary.bytes, "fetched")
    });

    let mut calls = 0;
    let mut failures = 0;
    let mut responses = Vec::new();

    for round in 0..startup.repeat {
        info!(round, "starting round");
        // Each round's lookups run concurrently so `--coalesce` has something to share.
        let results = join_all(
            startup
                .urls
                .iter()
                .map(|url| engine.execute(false, (url.to_string(),))),
        )
        .await;

        for result in results {
            calls += 1;
            match result {
                Ok(summary) if round + 1 == startup.repeat => responses.push(summary),
                Ok(_) => {}
                Err(_) => failures += 1,
            }
        }
    }

    let report = RunReport {
        calls,
        network_requests: network_requests.load(Ordering::Relaxed),
        failures,
        cached_entries: engine.len(),
        responses,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
