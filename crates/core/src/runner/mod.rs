// crates/core/src/runner/mod.rs
use anyhow::{anyhow, bail, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::histogram::Histogram;

pub mod async_file;
pub mod file;
pub mod noop;

pub use async_file::AsyncFileRunner;
pub use file::FileRunner;
pub use noop::NoopRunner;

macro_rules! payload_100 {
    () => {
        "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz1234567890!\"#$%&'()-=^~|\\@`[]{};:+*,.<>/?_123456"
    };
}

/// 100 printable ASCII bytes.
pub const PAYLOAD_100: &str = payload_100!();
/// The message every timed operation logs.
pub const PAYLOAD_500: &str = concat!(
    payload_100!(),
    payload_100!(),
    payload_100!(),
    payload_100!(),
    payload_100!()
);

/// Busy-wait between latency samples, per requested thread.
pub const PAUSE_NANOS_PER_THREAD: u64 = 10_000;

/// A workload the driver can time.
///
/// Implementors only have to provide `log`; the timing loops have default
/// implementations that every built-in runner shares. Runners that manage
/// their own threads or batching can override them.
pub trait PerfTestRunner: Send + Sync {
    /// One operation under test.
    fn log(&self, message: &str) -> Result<()>;

    /// Time `lines` operations one by one and record each elapsed time, minus
    /// `clock_cost`, into `histogram`.
    ///
    /// The samples are split across `threads` scoped threads. Each thread
    /// pauses `10us * threads` between samples so a background consumer can
    /// keep up.
    fn run_latency_test(
        &self,
        lines: usize,
        histogram: &mut Histogram,
        clock_cost: Duration,
        threads: usize,
    ) -> Result<()> {
        let threads = threads.max(1);
        let pause = Duration::from_nanos(PAUSE_NANOS_PER_THREAD * threads as u64);
        let cost = u64::try_from(clock_cost.as_nanos()).unwrap_or(u64::MAX);
        let bounds = histogram.upper_bounds().to_vec();

        let partials: Vec<Result<Histogram>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|i| {
                    let samples = lines / threads + if i == 0 { lines % threads } else { 0 };
                    let bounds = bounds.clone();
                    s.spawn(move || time_samples(self, samples, bounds, cost, pause))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|_| Err(anyhow!("latency thread panicked"))))
                .collect()
        });

        for partial in partials {
            histogram.merge(&partial?)?;
        }
        Ok(())
    }

    /// Time `lines` back-to-back operations and record the rate in
    /// operations per second.
    fn run_throughput_test(&self, lines: usize, histogram: &mut Histogram) -> Result<()> {
        let start = Instant::now();
        for _ in 0..lines {
            self.log(PAYLOAD_500)?;
        }
        let elapsed = start.elapsed().as_nanos().max(1);
        let ops_per_sec = lines as u128 * 1_000_000_000 / elapsed;
        histogram.record(u64::try_from(ops_per_sec).unwrap_or(u64::MAX));
        Ok(())
    }

    /// Flush whatever the runner buffered and release it.
    fn shutdown(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn time_samples<R: PerfTestRunner + ?Sized>(
    runner: &R,
    samples: usize,
    bounds: Vec<u64>,
    cost: u64,
    pause: Duration,
) -> Result<Histogram> {
    let mut histogram = Histogram::new(bounds)?;
    for _ in 0..samples {
        let s1 = Instant::now();
        runner.log(PAYLOAD_500)?;
        let s2 = Instant::now();

        let elapsed = u64::try_from((s2 - s1).as_nanos()).unwrap_or(u64::MAX);
        let value = elapsed.saturating_sub(cost);
        if value > 0 {
            histogram.record(value);
        }

        while s2.elapsed() < pause {
            std::hint::spin_loop();
        }
    }
    Ok(histogram)
}

/// What a factory gets to build a runner from.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub test_name: String,
    /// Directory file-backed runners write into.
    pub log_dir: PathBuf,
}

impl RunnerOptions {
    pub fn new(test_name: impl Into<String>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            test_name: test_name.into(),
            log_dir: log_dir.into(),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(format!("{}.log", self.test_name))
    }
}

pub type RunnerFactory = fn(&RunnerOptions) -> Result<Box<dyn PerfTestRunner>>;

/// Runners selectable by name on the command line.
pub struct RunnerRegistry {
    factories: BTreeMap<String, RunnerFactory>,
}

impl std::fmt::Debug for RunnerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerRegistry")
            .field("runners", &self.names())
            .finish()
    }
}

impl Default for RunnerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry holding `noop`, `file` and `async-file`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(NoopRunner::NAME, NoopRunner::factory);
        registry.register(FileRunner::NAME, FileRunner::factory);
        registry.register(AsyncFileRunner::NAME, AsyncFileRunner::factory);
        registry
    }

    /// Add or replace the factory for `name`.
    pub fn register(&mut self, name: impl Into<String>, factory: RunnerFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn create(&self, name: &str, opts: &RunnerOptions) -> Result<Box<dyn PerfTestRunner>> {
        match self.factories.get(name) {
            Some(factory) => factory(opts),
            None => bail!(
                "unknown runner '{}' (available: {})",
                name,
                self.names().join(", ")
            ),
        }
    }
}
