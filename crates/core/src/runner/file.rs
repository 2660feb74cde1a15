use anyhow::{anyhow, Context, Result};
use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};
use tracing::debug;

use super::{PerfTestRunner, RunnerOptions};

/// Appends every message as a line to a local file, synchronously.
pub struct FileRunner {
    path: PathBuf,
    out: Mutex<BufWriter<File>>,
}

impl FileRunner {
    pub const NAME: &'static str = "file";

    /// Open (or create) `path` for appending, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {:?}", parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {:?}", path))?;
        debug!("file runner writing to {:?}", path);
        Ok(Self {
            path,
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn factory(opts: &RunnerOptions) -> Result<Box<dyn PerfTestRunner>> {
        Ok(Box::new(Self::open(opts.log_path())?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PerfTestRunner for FileRunner {
    fn log(&self, message: &str) -> Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow!("writer for {:?} poisoned", self.path))?;
        out.write_all(message.as_bytes())?;
        out.write_all(b"\n")?;
        Ok(())
    }

    fn shutdown(self: Box<Self>) -> Result<()> {
        let path = self.path;
        let mut out = self.out.into_inner().unwrap_or_else(PoisonError::into_inner);
        out.flush()
            .with_context(|| format!("Failed to flush log file {:?}", path))
    }
}
