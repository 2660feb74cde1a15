//! Core library for perftest ─ histogram, clock-cost estimation, runners and the test loop.

pub mod clock;
pub mod driver;
pub mod histogram;
pub mod report;
pub mod runner;

pub use clock::calc_clock_cost;
pub use driver::{DriverConfig, LineCounts, Mode, Outcome, PerfTest};
pub use histogram::Histogram;
pub use report::{format_report, Reporter};
pub use runner::{PerfTestRunner, RunnerOptions, RunnerRegistry};
