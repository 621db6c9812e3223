#![forbid(unsafe_code)]

//! Collaborator abstractions for Tandem bindings.
//!
//! This crate holds the building blocks a binding session consumes:
//!
//! - [`disposable`]: idempotent teardown handles and composites.
//! - [`lifetime`]: end-of-life notification for owned values.
//! - [`scheduler`]: execution contexts (inline or serial queues).
//! - [`property`]: thread-safe observable values.
//!
//! None of these know about bindings; `tandem-runtime` builds the
//! synchronization engine on top of them.

pub mod disposable;
pub mod error;
pub mod lifetime;
pub mod property;
pub mod scheduler;

pub use disposable::{CompositeDisposable, Disposable, ScopedDisposable};
pub use error::SchedulerError;
pub use lifetime::{Lifetime, LifetimeToken};
pub use property::{MutableProperty, ObservableProperty, ObserverFn};
pub use scheduler::{ImmediateScheduler, Job, QueueScheduler, QueueSchedulerConfig, Scheduler};
