use anyhow::{Context, Result};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::clock::{calc_clock_cost, DEFAULT_CLOCK_COST_ITERATIONS};
use crate::histogram::Histogram;
use crate::report::Reporter;
use crate::runner::PerfTestRunner;

/// Logged through the runner after each measured phase.
pub const FINAL_MESSAGE: &str = "end";

/// What a run measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Per-operation elapsed time, corrected for clock overhead.
    Latency,
    /// Operations completed per second.
    Throughput,
}

/// Operations per phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineCounts {
    pub warmup_latency: usize,
    pub warmup_throughput: usize,
    pub latency: usize,
    pub throughput: usize,
}

impl Default for LineCounts {
    fn default() -> Self {
        Self {
            warmup_latency: 200_000,
            warmup_throughput: 50_000,
            latency: 5_000_000,
            throughput: 50_000,
        }
    }
}

impl LineCounts {
    pub fn warmup(&self, mode: Mode) -> usize {
        match mode {
            Mode::Latency => self.warmup_latency,
            Mode::Throughput => self.warmup_throughput,
        }
    }

    pub fn measured(&self, mode: Mode) -> usize {
        match mode {
            Mode::Latency => self.latency,
            Mode::Throughput => self.throughput,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Warmup gives up once this much time has passed after round two.
    pub warmup_budget: Duration,
    pub max_warmup_rounds: u32,
    /// Pause after warmup for the runner's buffered work to settle.
    pub drain_pause: Duration,
    /// Pause between the latency and throughput runs.
    pub settle_pause: Duration,
    pub lines: LineCounts,
    pub clock_cost_iterations: u64,
    pub thread_count: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            warmup_budget: Duration::from_secs(60),
            max_warmup_rounds: 10,
            drain_pause: Duration::from_secs(10),
            settle_pause: Duration::from_secs(1),
            lines: LineCounts::default(),
            clock_cost_iterations: DEFAULT_CLOCK_COST_ITERATIONS,
            thread_count: 3,
        }
    }
}

/// How a full run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Both measured phases ran; holds their report lines.
    Completed { latency: String, throughput: String },
    /// Warmup ran out of time, nothing was measured.
    WarmupExhausted { rounds: u32, elapsed: Duration },
}

/// Warmup, then a latency run, then a throughput run against one runner.
pub struct PerfTest<'a> {
    runner: &'a dyn PerfTestRunner,
    config: DriverConfig,
    reporter: Reporter,
}

impl<'a> PerfTest<'a> {
    pub fn new(runner: &'a dyn PerfTestRunner, config: DriverConfig, reporter: Reporter) -> Self {
        Self {
            runner,
            config,
            reporter,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Run every phase for test `name`, warming up in `warmup_mode`.
    pub fn run(&self, name: &str, warmup_mode: Mode) -> Result<Outcome> {
        info!("Warming up...");
        let t0 = Instant::now();
        if let Some(rounds) = self.warmup(warmup_mode)? {
            let elapsed = t0.elapsed();
            warn!(
                "Warmup exceeded its {:?} budget after {} rounds ({:.1}s); skipping measurement",
                self.config.warmup_budget,
                rounds,
                elapsed.as_secs_f64()
            );
            return Ok(Outcome::WarmupExhausted { rounds, elapsed });
        }
        info!("Warmup complete in {:.1} seconds", t0.elapsed().as_secs_f64());

        info!(
            "Waiting {:?} for buffers to drain warmup data...",
            self.config.drain_pause
        );
        thread::sleep(self.config.drain_pause);

        info!("Starting the main test...");
        let latency = self.run_measured(name, Mode::Latency)?;

        thread::sleep(self.config.settle_pause);

        let throughput = self.run_measured(name, Mode::Throughput)?;

        Ok(Outcome::Completed {
            latency,
            throughput,
        })
    }

    /// Returns the round count if the budget ran out before all rounds finished.
    fn warmup(&self, mode: Mode) -> Result<Option<u32>> {
        let mut histogram = Histogram::with_default_bounds();
        let stop = Instant::now() + self.config.warmup_budget;
        let lines = self.config.lines.warmup(mode);

        for round in 0..self.config.max_warmup_rounds {
            self.run_test(mode, lines, None, &mut histogram, 1)
                .with_context(|| format!("Warmup round {} failed", round + 1))?;
            debug!("warmup round {} done ({} lines)", round + 1, lines);
            if round > 0 && Instant::now() >= stop {
                return Ok(Some(round + 1));
            }
        }
        Ok(None)
    }

    fn run_measured(&self, name: &str, mode: Mode) -> Result<String> {
        let mut histogram = Histogram::with_default_bounds();
        let lines = self.config.lines.measured(mode);
        self.run_test(
            mode,
            lines,
            Some(FINAL_MESSAGE),
            &mut histogram,
            self.config.thread_count,
        )
        .with_context(|| format!("{:?} run failed", mode))?;
        self.reporter.report(name, mode, &histogram)
    }

    /// One timed pass of the runner in `mode`.
    pub fn run_test(
        &self,
        mode: Mode,
        lines: usize,
        final_message: Option<&str>,
        histogram: &mut Histogram,
        threads: usize,
    ) -> Result<()> {
        match mode {
            Mode::Throughput => self.runner.run_throughput_test(lines, histogram)?,
            Mode::Latency => {
                let clock_cost = calc_clock_cost(self.config.clock_cost_iterations)?;
                debug!("clock read costs {:?}", clock_cost);
                self.runner
                    .run_latency_test(lines, histogram, clock_cost, threads)?;
            }
        }
        if let Some(message) = final_message {
            self.runner.log(message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Records which calls the driver made.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        logs: AtomicUsize,
        delay: Duration,
    }

    impl Recorder {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PerfTestRunner for Recorder {
        fn log(&self, message: &str) -> Result<()> {
            self.logs.fetch_add(1, Ordering::Relaxed);
            if message == FINAL_MESSAGE {
                self.calls.lock().unwrap().push("log end".to_string());
            }
            Ok(())
        }

        fn run_latency_test(
            &self,
            lines: usize,
            histogram: &mut Histogram,
            _clock_cost: Duration,
            threads: usize,
        ) -> Result<()> {
            thread::sleep(self.delay);
            self.calls
                .lock()
                .unwrap()
                .push(format!("latency {} x{}", lines, threads));
            for i in 0..lines as u64 {
                histogram.record(100 + i);
            }
            Ok(())
        }

        fn run_throughput_test(&self, lines: usize, histogram: &mut Histogram) -> Result<()> {
            thread::sleep(self.delay);
            self.calls
                .lock()
                .unwrap()
                .push(format!("throughput {}", lines));
            histogram.record(lines as u64 * 10);
            Ok(())
        }
    }

    fn quick_config() -> DriverConfig {
        DriverConfig {
            warmup_budget: Duration::from_secs(30),
            max_warmup_rounds: 3,
            drain_pause: Duration::from_millis(5),
            settle_pause: Duration::from_millis(5),
            lines: LineCounts {
                warmup_latency: 20,
                warmup_throughput: 5,
                latency: 100,
                throughput: 50,
            },
            clock_cost_iterations: 10_000,
            thread_count: 2,
        }
    }

    #[test]
    fn defaults_match_documented_timings() {
        let cfg = DriverConfig::default();
        assert_eq!(cfg.warmup_budget, Duration::from_secs(60));
        assert_eq!(cfg.drain_pause, Duration::from_secs(10));
        assert_eq!(cfg.settle_pause, Duration::from_secs(1));
        assert_eq!(cfg.lines.warmup(Mode::Latency), 200_000);
        assert_eq!(cfg.lines.warmup(Mode::Throughput), 50_000);
        assert_eq!(cfg.lines.measured(Mode::Latency), 5_000_000);
        assert_eq!(cfg.lines.measured(Mode::Throughput), 50_000);
    }

    #[test]
    fn full_run_goes_through_every_phase() {
        let dir = tempdir().unwrap();
        let results = dir.path().join("results.txt");
        let runner = Recorder::default();
        let test = PerfTest::new(
            &runner,
            quick_config(),
            Reporter::new(false, Some(results.clone())),
        );

        let outcome = test.run("Recorder", Mode::Latency).unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "latency 20 x1",
                "latency 20 x1",
                "latency 20 x1",
                "latency 100 x2",
                "log end",
                "throughput 50",
                "log end",
            ]
        );
        let Outcome::Completed {
            latency,
            throughput,
        } = outcome
        else {
            panic!("expected a completed run");
        };
        assert!(latency.ends_with("sampleCount=100"), "{latency}");
        assert_eq!(throughput, "500 operations/second");

        let text = fs::read_to_string(&results).unwrap();
        assert_eq!(text, format!("{}\n{}\n", latency, throughput));
    }

    #[test]
    fn throughput_warmup_uses_throughput_lines() {
        let runner = Recorder::default();
        let test = PerfTest::new(&runner, quick_config(), Reporter::default());
        test.run("Recorder", Mode::Throughput).unwrap();

        let calls = runner.calls();
        assert_eq!(&calls[..3], &["throughput 5", "throughput 5", "throughput 5"]);
        assert_eq!(calls[3], "latency 100 x2");
    }

    #[test]
    fn repeated_runs_are_independent() {
        let runner = Recorder::default();
        let test = PerfTest::new(&runner, quick_config(), Reporter::default());
        let first = test.run("a", Mode::Throughput).unwrap();
        let second = test.run("b", Mode::Latency).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn slow_warmup_gives_up_after_second_round() {
        let dir = tempdir().unwrap();
        let results = dir.path().join("results.txt");
        let runner = Recorder::slow(Duration::from_millis(40));
        let config = DriverConfig {
            warmup_budget: Duration::from_millis(50),
            max_warmup_rounds: 10,
            ..quick_config()
        };
        let test = PerfTest::new(&runner, config, Reporter::new(false, Some(results.clone())));

        let started = Instant::now();
        let outcome = test.run("slow", Mode::Throughput).unwrap();

        match outcome {
            Outcome::WarmupExhausted { rounds, elapsed } => {
                assert_eq!(rounds, 2);
                assert!(elapsed >= Duration::from_millis(80));
            }
            other => panic!("expected warmup to give up, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(runner.calls(), vec!["throughput 5", "throughput 5"]);
        assert_eq!(runner.logs.load(Ordering::Relaxed), 0);
        assert!(!results.exists());
    }

    #[test]
    fn first_round_always_completes_before_giving_up() {
        let runner = Recorder::slow(Duration::from_millis(20));
        let config = DriverConfig {
            warmup_budget: Duration::ZERO,
            ..quick_config()
        };
        let test = PerfTest::new(&runner, config, Reporter::default());
        let outcome = test.run("zero", Mode::Latency).unwrap();
        assert!(matches!(outcome, Outcome::WarmupExhausted { rounds: 2, .. }));
    }

    #[test]
    fn runner_failure_aborts_the_run() {
        struct Broken;
        impl PerfTestRunner for Broken {
            fn log(&self, _message: &str) -> Result<()> {
                bail!("disk full")
            }
        }

        let test = PerfTest::new(&Broken, quick_config(), Reporter::default());
        let err = test.run("broken", Mode::Throughput).unwrap_err();
        assert!(format!("{:#}", err).contains("disk full"));
    }

    #[test]
    fn run_test_logs_final_message_only_when_given() {
        let runner = Recorder::default();
        let test = PerfTest::new(&runner, quick_config(), Reporter::default());
        let mut hist = Histogram::with_default_bounds();

        test.run_test(Mode::Throughput, 7, None, &mut hist, 1).unwrap();
        test.run_test(Mode::Throughput, 7, Some(FINAL_MESSAGE), &mut hist, 1)
            .unwrap();

        assert_eq!(
            runner.calls(),
            vec!["throughput 7", "throughput 7", "log end"]
        );
        assert_eq!(hist.count(), 2);
    }
}
