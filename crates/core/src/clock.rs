use anyhow::{bail, Result};
use std::hint::black_box;
use std::time::{Duration, Instant};

/// Iteration count used by the driver when estimating clock overhead.
pub const DEFAULT_CLOCK_COST_ITERATIONS: u64 = 10_000_000;

/// Average cost of one `Instant::now()` call, measured over `iterations` reads.
///
/// Latency runners subtract this from every sample. Errors out if the clock
/// did not advance across the loop, which means the host clock source is
/// unusable for timing.
pub fn calc_clock_cost(iterations: u64) -> Result<Duration> {
    let start = Instant::now();
    let mut finish = start;
    for _ in 0..iterations {
        finish = black_box(Instant::now());
    }

    if finish <= start {
        bail!(
            "monotonic clock did not advance over {} reads; clock source is broken",
            iterations
        );
    }

    let finish = Instant::now();
    let per_call = (finish - start).as_nanos() / u128::from(iterations);
    Ok(Duration::from_nanos(per_call as u64))
}
