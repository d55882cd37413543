// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Demo runner for the pipeline engine.
//!
//! Two entry points share one binary:
//!
//! * `flowline [config.yaml]` — run the demo pipeline with the configured
//!   strategy and print the outcome;
//! * `flowline --serve` — run as a worker process speaking the stdio
//!   protocol (this is what the hybrid and distributed executors spawn).

use std::env;
use std::io::Write;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use flowline::config::{
    load_and_validate_config, prepare_result_dir, Config, ExecutorOptions, HowSaving,
    ResultsOptions, Strategy,
};
use flowline::demo::{demo_factory, demo_registry, demo_topology};
use flowline::engine::{ExecutorFactory, SeriesRange};
use flowline::server::serve_stdio;
use flowline::topology::QueueEntry;
use flowline::traits::{ExitReason, SIGNAL_EXIT_CODE};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|arg| arg == "--serve") {
        // Worker mode: stdout carries the protocol, so logs go to stderr.
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
        serve_stdio(demo_registry(), Some(demo_factory()))
            .await
            .context("worker serve loop failed")?;
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match args.get(1) {
        Some(path) => load_and_validate_config(path)
            .with_context(|| format!("loading config '{}'", path))?,
        None => Config {
            strategy: Strategy::Cooperative,
            executor: ExecutorOptions::default(),
            results: ResultsOptions::default(),
        },
    };

    // The results-directory policy is resolved exactly once, up front.
    let input_dir = env::current_dir().context("no working directory")?;
    let (result_dir, how) = prepare_result_dir(
        &input_dir,
        config.results.path.as_deref(),
        config.results.postfix(),
        config.results.how,
        ask_how,
    )
    .context("preparing results directory")?;
    println!("path results: {}", result_dir.display());

    if how == HowSaving::Recompute {
        // Previous results are overwritten; nothing to clear beyond that
        // for the demo's per-couple files.
        tracing::info!(dir = %result_dir.display(), "recomputing into existing directory");
    }

    let series = SeriesRange::new(0, 8, 1);
    let topology = demo_topology(series, Some(result_dir));

    let executor = ExecutorFactory::from_config(&config);
    let report = topology
        .compute(executor.as_ref())
        .await
        .context("pipeline execution failed")?;

    println!(
        "strategy: {} | completed: {} | failed: {} | lost: {}",
        config.strategy.as_str(),
        report.completed,
        report.failed,
        report.lost
    );
    for (queue, entries) in &report.queues {
        if entries.is_empty() {
            continue;
        }
        println!("queue '{}' left with {} entries:", queue, entries.len());
        for (key, entry) in entries {
            match entry {
                QueueEntry::Item(item) => {
                    println!("  {} = {}", key, String::from_utf8_lossy(&item.payload))
                }
                QueueEntry::Failed(error) => println!("  {} = error: {}", key, error),
            }
        }
    }

    if report.exit == ExitReason::Interrupted && config.executor.has_to_exit {
        // The distinct status lets cluster schedulers tell preemption from
        // failure.
        std::process::exit(SIGNAL_EXIT_CODE);
    }
    Ok(())
}

/// Interactive resolution of the `ask` results policy, in the spirit of the
/// classic "New dir, Complete or Recompute?" prompt.
fn ask_how() -> HowSaving {
    loop {
        print!("The results directory already exists. [n]ew dir, [c]omplete or [r]ecompute? ");
        let _ = std::io::stdout().flush();
        let mut answer = String::new();
        match std::io::stdin().read_line(&mut answer) {
            // EOF or unreadable stdin: fall back to completing in place.
            Ok(0) | Err(_) => return HowSaving::Complete,
            Ok(_) => {}
        }
        match answer.trim().to_lowercase().as_str() {
            "n" => return HowSaving::NewDir,
            "c" => return HowSaving::Complete,
            "r" => return HowSaving::Recompute,
            _ => println!("The answer should be in ['n', 'c', 'r']"),
        }
    }
}
