#![forbid(unsafe_code)]

//! Execution contexts for units of work.
//!
//! A [`Scheduler`] decides where and when a [`Job`] runs. Two
//! implementations ship with the crate:
//!
//! - [`ImmediateScheduler`] runs every job inline on the calling thread.
//! - [`QueueScheduler`] runs jobs one at a time, in submission order, on a
//!   dedicated named worker thread.
//!
//! # Contract
//!
//! Implementations must run jobs in FIFO order: a job scheduled after
//! another (from the same thread) never starts before it. Bindings rely on
//! this to apply corrective writes in the order they were resolved.
//!
//! # Failure Modes
//!
//! - A job that panics on a [`QueueScheduler`] is caught at the job boundary
//!   and logged; the worker keeps serving later jobs.
//! - Jobs scheduled after the worker stopped are dropped without running.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::{self, JoinHandle, ThreadId};

use crate::error::SchedulerError;

/// A unit of work handed to a [`Scheduler`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// An execution context that can run work now or later.
pub trait Scheduler: Send + Sync {
    /// Run `job` on this context. Must preserve FIFO order.
    fn schedule(&self, job: Job);

    /// Whether `schedule` runs the job synchronously before returning.
    fn is_immediate(&self) -> bool {
        false
    }
}

/// Runs every job inline on the caller's thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, job: Job) {
        job();
    }

    fn is_immediate(&self) -> bool {
        true
    }
}

/// Configuration for a [`QueueScheduler`] worker.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct QueueSchedulerConfig {
    /// Worker thread name, also used in log fields.
    pub name: String,
    /// Worker stack size in bytes. `None` uses the platform default.
    pub stack_size: Option<usize>,
}

impl Default for QueueSchedulerConfig {
    fn default() -> Self {
        Self {
            name: "tandem-queue".to_string(),
            stack_size: None,
        }
    }
}

/// A serial FIFO queue backed by one worker thread.
///
/// Dropping the scheduler closes the queue; the worker finishes the jobs
/// already queued and exits. The drop joins the worker unless it happens on
/// the worker thread itself.
pub struct QueueScheduler {
    name: String,
    sender: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl QueueScheduler {
    /// Start a queue whose worker thread is called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Spawn`] if the worker thread cannot be
    /// created.
    pub fn new(name: impl Into<String>) -> Result<Self, SchedulerError> {
        Self::with_config(&QueueSchedulerConfig {
            name: name.into(),
            ..QueueSchedulerConfig::default()
        })
    }

    /// Start a queue from explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Spawn`] if the worker thread cannot be
    /// created.
    pub fn with_config(config: &QueueSchedulerConfig) -> Result<Self, SchedulerError> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let mut builder = thread::Builder::new().name(config.name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let queue_name = config.name.clone();
        let worker = builder
            .spawn(move || run_worker(&queue_name, &receiver))
            .map_err(|source| SchedulerError::Spawn {
                name: config.name.clone(),
                source,
            })?;
        let worker_id = worker.thread().id();

        #[cfg(feature = "tracing")]
        tracing::debug!(queue = %config.name, "queue scheduler started");

        Ok(Self {
            name: config.name.clone(),
            sender: Some(sender),
            worker: Some(worker),
            worker_id,
        })
    }

    /// The worker thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the caller is running on this queue's worker thread.
    #[must_use]
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Block until every job scheduled before this call has run.
    ///
    /// Returns immediately when called from the worker thread, since
    /// waiting there would never finish.
    pub fn flush(&self) {
        if self.is_current() {
            return;
        }
        let (done_tx, done_rx) = mpsc::channel::<()>();
        self.schedule(Box::new(move || {
            let _ = done_tx.send(());
        }));
        // An error means the worker is gone and the marker job was dropped.
        let _ = done_rx.recv();
    }
}

fn run_worker(name: &str, receiver: &mpsc::Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            let message = panic_message(payload.as_ref());
            #[cfg(feature = "tracing")]
            tracing::error!(queue = %name, panic = %message, "scheduled job panicked");
            #[cfg(not(feature = "tracing"))]
            let _ = (name, message);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Scheduler for QueueScheduler {
    fn schedule(&self, job: Job) {
        let Some(sender) = self.sender.as_ref() else {
            return;
        };
        if sender.send(job).is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!(queue = %self.name, "queue worker stopped; job dropped");
        }
    }
}

impl Drop for QueueScheduler {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if !self.is_current() {
                let _ = worker.join();
            }
        }
    }
}

impl fmt::Debug for QueueScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueScheduler")
            .field("name", &self.name)
            .finish()
    }
}
