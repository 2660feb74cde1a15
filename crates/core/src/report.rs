use anyhow::{Context, Result};
use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::driver::Mode;
use crate::histogram::Histogram;

/// One summary line for a finished phase.
pub fn format_report(mode: Mode, histogram: &Histogram) -> String {
    match mode {
        Mode::Throughput => format!("{} operations/second", histogram.max()),
        Mode::Latency => format!(
            "avg={:.0} 99%={} 99.99%={} sampleCount={}",
            histogram.mean(),
            histogram.two_nines_upper_bound(),
            histogram.four_nines_upper_bound(),
            histogram.count()
        ),
    }
}

/// Prints report lines and appends them to an optional result file.
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    verbose: bool,
    result_file: Option<PathBuf>,
}

impl Reporter {
    pub fn new(verbose: bool, result_file: Option<PathBuf>) -> Self {
        Self {
            verbose,
            result_file,
        }
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn result_file(&self) -> Option<&Path> {
        self.result_file.as_deref()
    }

    /// Format the phase result, echo it when verbose, and append it to the
    /// result file if one is set. The file is closed before this returns.
    pub fn report(&self, name: &str, mode: Mode, histogram: &Histogram) -> Result<String> {
        let line = format_report(mode, histogram);
        debug!("{} {:?}: {}", name, mode, line);
        if self.verbose {
            println!("{}", line);
        }

        if let Some(path) = &self.result_file {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open result file {:?}", path))?;
            writeln!(file, "{}", line)
                .with_context(|| format!("Failed to write result file {:?}", path))?;
        }
        Ok(line)
    }
}
