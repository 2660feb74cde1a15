use anyhow::{anyhow, Context, Result};
use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{PerfTestRunner, RunnerOptions};

/// Messages that can sit in the queue before `log` blocks.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256 * 1024;

/// Hands every message to a background task that writes it to a file.
///
/// `log` only pays for the enqueue; the write happens later on the runner's
/// own tokio runtime. Shutdown closes the queue and waits for it to drain.
pub struct AsyncFileRunner {
    path: PathBuf,
    tx: mpsc::Sender<String>,
    consumer: JoinHandle<Result<u64>>,
    runtime: Runtime,
}

impl AsyncFileRunner {
    pub const NAME: &'static str = "async-file";

    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
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

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("perftest-async-sink")
            .enable_all()
            .build()
            .context("Failed to start async sink runtime")?;

        let (tx, mut rx) = mpsc::channel::<String>(capacity.max(1));
        let consumer = runtime.spawn(async move {
            let mut out = BufWriter::new(tokio::fs::File::from_std(file));
            let mut written = 0u64;
            while let Some(line) = rx.recv().await {
                out.write_all(line.as_bytes()).await?;
                out.write_all(b"\n").await?;
                written += 1;
            }
            out.flush().await?;
            Ok::<u64, anyhow::Error>(written)
        });

        debug!("async file runner writing to {:?} (queue {})", path, capacity);
        Ok(Self {
            path,
            tx,
            consumer,
            runtime,
        })
    }

    pub fn factory(opts: &RunnerOptions) -> Result<Box<dyn PerfTestRunner>> {
        Ok(Box::new(Self::open(opts.log_path(), DEFAULT_QUEUE_CAPACITY)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PerfTestRunner for AsyncFileRunner {
    fn log(&self, message: &str) -> Result<()> {
        self.tx
            .blocking_send(message.to_owned())
            .map_err(|_| anyhow!("async sink for {:?} has stopped", self.path))
    }

    fn shutdown(self: Box<Self>) -> Result<()> {
        let Self {
            path,
            tx,
            consumer,
            runtime,
        } = *self;
        drop(tx);
        let written = runtime
            .block_on(consumer)
            .context("async sink task panicked")?
            .with_context(|| format!("Failed writing log file {:?}", path))?;
        info!("async sink drained {} lines into {:?}", written, path);
        Ok(())
    }
}
