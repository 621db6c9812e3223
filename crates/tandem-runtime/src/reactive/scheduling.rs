#![forbid(unsafe_code)]

//! One calling convention for immediate and deferred execution contexts.
//!
//! Bindings need to know whether a scheduled write has landed by the time
//! `schedule` returns. [`BindingScheduler`] answers that once, at binding
//! time: immediate schedulers collapse to an inline call, everything else is
//! forwarded to the scheduler and completes later, possibly on another
//! thread.

use std::fmt;
use std::sync::Arc;

use tandem_core::scheduler::Scheduler;

/// Execution context as seen by a binding session.
#[derive(Clone)]
pub enum BindingScheduler {
    /// Work runs inline, before `schedule` returns.
    Immediate,
    /// Work is handed to the scheduler and runs eventually.
    Deferred(Arc<dyn Scheduler>),
}

impl BindingScheduler {
    /// Classify `scheduler` by its [`is_immediate()`](Scheduler::is_immediate)
    /// flag.
    #[must_use]
    pub fn new(scheduler: &Arc<dyn Scheduler>) -> Self {
        if scheduler.is_immediate() {
            Self::Immediate
        } else {
            Self::Deferred(Arc::clone(scheduler))
        }
    }

    /// Run `work` inline or hand it to the wrapped scheduler.
    pub fn schedule(&self, work: impl FnOnce() + Send + 'static) {
        match self {
            Self::Immediate => work(),
            Self::Deferred(scheduler) => scheduler.schedule(Box::new(work)),
        }
    }

    /// Whether work completes before [`schedule()`](Self::schedule) returns.
    #[must_use]
    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::Immediate)
    }
}

impl fmt::Debug for BindingScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => f.write_str("Immediate"),
            Self::Deferred(_) => f.write_str("Deferred"),
        }
    }
}
