#![forbid(unsafe_code)]

//! The two sides of a bidirectional binding.
//!
//! [`Upstream`] and [`Downstream`] wrap any [`ObservableProperty`] and attach
//! the execution context its writes must happen on. Upstream also carries
//! the [`MergePolicy`] used when both sides are written concurrently.
//!
//! Both default to [`ImmediateScheduler`]. Upstream writes issued by a
//! binding happen synchronously inside the binding's lock, on whatever
//! thread is resolving; downstream writes are scheduled on the downstream
//! context.
//!
//! # Caller Obligations
//!
//! - The wrapped property must notify on every write, on the writing thread,
//!   and tolerate recursive writes (see [`ObservableProperty`]).
//! - An endpoint should only be written from its declared context. When
//!   both contexts are immediate, the two endpoints must not be written
//!   concurrently from different threads. A deferred upstream context lifts
//!   this: downstream may then be written from any thread.

use std::fmt;
use std::sync::Arc;

use tandem_core::lifetime::Lifetime;
use tandem_core::property::ObservableProperty;
use tandem_core::scheduler::{ImmediateScheduler, Scheduler};

use super::merge_policy::MergePolicy;

fn immediate() -> Arc<dyn Scheduler> {
    Arc::new(ImmediateScheduler)
}

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

/// The authoritative side of a binding.
pub struct Upstream<P: ObservableProperty> {
    inner: P,
    scheduler: Arc<dyn Scheduler>,
    merge_policy: MergePolicy<P::Value>,
}

impl<P: ObservableProperty> Upstream<P> {
    /// Wrap `inner` with the immediate context and the default merge policy.
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            scheduler: immediate(),
            merge_policy: MergePolicy::default(),
        }
    }

    /// Declare the context upstream is written on.
    #[must_use]
    pub fn on(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Choose how conflicting writes are resolved.
    #[must_use]
    pub fn with_merge_policy(mut self, merge_policy: MergePolicy<P::Value>) -> Self {
        self.merge_policy = merge_policy;
        self
    }

    /// The current value.
    pub fn value(&self) -> P::Value {
        self.inner.value()
    }

    /// Write a new value.
    pub fn set_value(&self, value: P::Value) {
        self.inner.set_value(value);
    }

    /// The declared execution context.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// The conflict resolution strategy.
    #[must_use]
    pub fn merge_policy(&self) -> &MergePolicy<P::Value> {
        &self.merge_policy
    }

    /// Lifetime of the wrapped storage.
    pub fn lifetime(&self) -> Lifetime {
        self.inner.lifetime()
    }

    /// The wrapped property.
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: ObservableProperty> fmt::Debug for Upstream<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upstream")
            .field("immediate", &self.scheduler.is_immediate())
            .field("merge_policy", &self.merge_policy)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Downstream
// ---------------------------------------------------------------------------

/// The consuming side of a binding.
pub struct Downstream<P: ObservableProperty> {
    inner: P,
    scheduler: Arc<dyn Scheduler>,
}

impl<P: ObservableProperty> Downstream<P> {
    /// Wrap `inner` with the immediate context.
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            scheduler: immediate(),
        }
    }

    /// Declare the context downstream is written on.
    #[must_use]
    pub fn on(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// The current value.
    pub fn value(&self) -> P::Value {
        self.inner.value()
    }

    /// Write a new value.
    pub fn set_value(&self, value: P::Value) {
        self.inner.set_value(value);
    }

    /// The declared execution context.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Lifetime of the wrapped storage.
    pub fn lifetime(&self) -> Lifetime {
        self.inner.lifetime()
    }

    /// The wrapped property.
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: ObservableProperty> fmt::Debug for Downstream<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Downstream")
            .field("immediate", &self.scheduler.is_immediate())
            .finish()
    }
}
