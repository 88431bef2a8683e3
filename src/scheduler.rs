//! Bounded-concurrency batch execution of [`ConversionTask`]s.
//!
//! The scheduler filters out inputs that do not exist, makes sure the output
//! root is present, then runs every task on a dedicated rayon pool of at most
//! [`MAX_WORKERS`] threads. It blocks until each submitted task has reported
//! and returns one [`TaskOutcome`] per task in submission order, whatever
//! order they completed in. Task failures (and panics) become `Failure`
//! outcomes and never stop sibling tasks.
//!
//! `rayon::ThreadPool::scope` returns only once every spawned task has run,
//! so each task always reports. Tasks not yet started when the cancel flag
//! is raised report [`ConvertError::Cancelled`] instead of running.
//!
//! After the batch the pool is dropped and its threads get [`SHUTDOWN_GRACE`]
//! to exit. Threads still alive past the grace are only logged; they hold no
//! task of this batch.

use crate::config::{MAX_WORKERS, SHUTDOWN_GRACE};
use crate::error::{ConvertError, Result};
use crate::models::{BulkDataMode, TaskOutcome};
use crate::task::ConversionTask;
use crossbeam_channel::Receiver;
use indicatif::{ProgressBar, ProgressStyle};
use std::any::Any;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct BatchScheduler {
    output_root: PathBuf,
    parallelism: usize,
    bulk_data: BulkDataMode,
    progress: bool,
    cancel: Arc<AtomicBool>,
}

impl BatchScheduler {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            parallelism: 1,
            bulk_data: BulkDataMode::Uri,
            progress: false,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Requested worker count; clamped when the batch runs.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_bulk_data(mut self, mode: BulkDataMode) -> Self {
        self.bulk_data = mode;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Flag that, once set, turns every task not yet started into a
    /// `Cancelled` failure. Only the caller raises or clears it.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn effective_parallelism(requested: usize, tasks: usize) -> usize {
        requested.clamp(1, MAX_WORKERS).min(tasks)
    }

    /// Converts every existing file in `inputs`.
    ///
    /// Only a failure to create the output root is returned as an error;
    /// everything that goes wrong inside a task is part of its outcome.
    pub fn run<P: AsRef<Path>>(&self, inputs: &[P]) -> Result<Vec<TaskOutcome>> {
        self.run_with(inputs, ConversionTask::run)
    }

    /// Like [`run`](Self::run) with a custom task body.
    pub fn run_with<P, F>(&self, inputs: &[P], runner: F) -> Result<Vec<TaskOutcome>>
    where
        P: AsRef<Path>,
        F: Fn(&ConversionTask) -> TaskOutcome + Sync,
    {
        let tasks = self.collect_tasks(inputs);
        if tasks.is_empty() {
            info!("No existing input files, nothing to convert");
            return Ok(Vec::new());
        }

        fs::create_dir_all(&self.output_root).map_err(|source| ConvertError::OutputDirectory {
            path: self.output_root.clone(),
            source,
        })?;

        let workers = Self::effective_parallelism(self.parallelism, tasks.len());
        debug!(workers, tasks = tasks.len(), "Starting batch");

        // Every pool thread reports once when it exits
        let (exit_tx, exit_rx) = crossbeam_channel::bounded(workers);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("dicomxml-worker-{i}"))
            .exit_handler(move |_| {
                let _ = exit_tx.send(());
            })
            .build()
            .map_err(|e| ConvertError::Io(io::Error::other(e)))?;

        let progress = self.progress.then(|| make_progress_bar(tasks.len() as u64));
        let (tx, rx) = crossbeam_channel::unbounded();

        pool.scope(|scope| {
            for (index, task) in tasks.iter().enumerate() {
                let tx = tx.clone();
                let runner = &runner;
                let progress = progress.as_ref();
                let cancel = &self.cancel;
                scope.spawn(move |_| {
                    let outcome = if cancel.load(Ordering::SeqCst) {
                        TaskOutcome::Failure {
                            input: task.input().to_path_buf(),
                            error: ConvertError::Cancelled,
                        }
                    } else {
                        panic::catch_unwind(AssertUnwindSafe(|| runner(task))).unwrap_or_else(
                            |payload| TaskOutcome::Failure {
                                input: task.input().to_path_buf(),
                                error: ConvertError::Panicked(panic_message(payload.as_ref())),
                            },
                        )
                    };
                    if let Some(pb) = progress {
                        pb.inc(1);
                    }
                    let _ = tx.send((index, outcome));
                });
            }
        });
        drop(tx);

        // The scope has joined, so every index is present exactly once
        let mut slots: Vec<Option<TaskOutcome>> = (0..tasks.len()).map(|_| None).collect();
        for (index, outcome) in rx.iter() {
            slots[index] = Some(outcome);
        }
        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        shutdown(pool, &exit_rx, workers);

        Ok(slots.into_iter().flatten().collect())
    }

    fn collect_tasks<P: AsRef<Path>>(&self, inputs: &[P]) -> Vec<ConversionTask> {
        inputs
            .iter()
            .map(AsRef::as_ref)
            .filter(|path| {
                let exists = path.exists();
                if !exists {
                    warn!(input = ?path, "Skipping missing input");
                }
                exists
            })
            .map(|path| ConversionTask::new(path, &self.output_root).with_bulk_data(self.bulk_data))
            .collect()
    }

}

/// Drops the pool and waits up to [`SHUTDOWN_GRACE`] for its threads.
fn shutdown(pool: rayon::ThreadPool, exited: &Receiver<()>, workers: usize) {
    drop(pool);
    let deadline = Instant::now() + SHUTDOWN_GRACE;
    for stopped in 0..workers {
        if exited.recv_deadline(deadline).is_err() {
            warn!(
                grace_ms = SHUTDOWN_GRACE.as_millis() as u64,
                lingering = workers - stopped,
                "Worker threads did not stop in time"
            );
            return;
        }
    }
    debug!(workers, "Worker pool stopped");
}

fn make_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} files ({elapsed})")
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
