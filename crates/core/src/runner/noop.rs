use anyhow::Result;
use std::hint::black_box;

use super::{PerfTestRunner, RunnerOptions};

/// Does nothing per operation. Useful as a baseline for the harness itself.
#[derive(Debug, Default)]
pub struct NoopRunner;

impl NoopRunner {
    pub const NAME: &'static str = "noop";

    pub fn factory(_opts: &RunnerOptions) -> Result<Box<dyn PerfTestRunner>> {
        Ok(Box::new(Self))
    }
}

impl PerfTestRunner for NoopRunner {
    fn log(&self, message: &str) -> Result<()> {
        black_box(message);
        Ok(())
    }
}
