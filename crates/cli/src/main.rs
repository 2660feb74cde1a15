// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::{Context, Result};
use clap::Parser;
use perftest_core::{DriverConfig, Mode, Outcome, PerfTest, Reporter, RunnerOptions, RunnerRegistry};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// perftest – warm up a runner, then time it in latency and throughput mode
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Runner to benchmark (noop, file, async-file)
    runner: String,

    /// Test name, used in logs and for the runner's output file
    name: String,

    /// Append one result line per measured phase to this file
    result_file: Option<PathBuf>,

    /// Threads requested for the latency run
    #[arg(default_value_t = 3)]
    thread_count: usize,

    /// Print progress and results to stdout (also accepts -verbose)
    #[arg(long)]
    verbose: bool,

    /// Warm up in throughput mode instead of latency mode (also accepts -throughput)
    #[arg(long)]
    throughput: bool,

    /// Directory file-backed runners write into (defaults to the system temp dir)
    #[arg(long, env = "PERFTEST_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

/// Accept the single-dash `-verbose` / `-throughput` spellings, in any case
/// and at any position, by rewriting them to their long form.
fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| match arg.to_str().map(str::to_ascii_lowercase).as_deref() {
            Some("-verbose") | Some("--verbose") => OsString::from("--verbose"),
            Some("-throughput") | Some("--throughput") => OsString::from("--throughput"),
            _ => arg,
        })
        .collect()
}

fn init_logging(verbose: bool) {
    let log_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("perftest={0},perftest_core={0}", log_level))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    // .env may set RUST_LOG or PERFTEST_LOG_DIR
    dotenvy::dotenv().ok();

    let args = Args::parse_from(normalize_args(std::env::args_os()));
    init_logging(args.verbose);

    info!("perftest v{} starting", env!("CARGO_PKG_VERSION"));
    run(args)
}

fn run(args: Args) -> Result<()> {
    let registry = RunnerRegistry::builtin();
    let log_dir = args.log_dir.clone().unwrap_or_else(std::env::temp_dir);
    let opts = RunnerOptions::new(args.name.as_str(), log_dir);
    let runner = registry
        .create(&args.runner, &opts)
        .with_context(|| format!("Failed to load runner '{}'", args.runner))?;

    if args.verbose {
        println!("Starting PerfTest {} ({})...", args.name, args.thread_count);
    }

    let config = DriverConfig {
        thread_count: args.thread_count,
        ..DriverConfig::default()
    };
    let reporter = Reporter::new(args.verbose, args.result_file.clone());
    let warmup_mode = if args.throughput {
        Mode::Throughput
    } else {
        Mode::Latency
    };

    let outcome = PerfTest::new(runner.as_ref(), config, reporter).run(&args.name, warmup_mode);
    // shut the runner down even when the run failed, but report the run error first
    let shutdown = runner.shutdown();
    let outcome = outcome.with_context(|| format!("Test '{}' failed", args.name))?;
    shutdown.with_context(|| format!("Failed to shut down runner '{}'", args.runner))?;

    match outcome {
        Outcome::Completed {
            latency,
            throughput,
        } => info!("✅ {} done: latency [{}], throughput [{}]", args.name, latency, throughput),
        Outcome::WarmupExhausted { rounds, elapsed } => info!(
            "{} stopped after {} warmup rounds ({:.1}s) without measuring",
            args.name,
            rounds,
            elapsed.as_secs_f64()
        ),
    }
    Ok(())
}
