#![forbid(unsafe_code)]

//! Two-way bindings between independently scheduled observable values.
//!
//! - [`Upstream`] / [`Downstream`]: an [`ObservableProperty`] paired with
//!   the execution context it must be written on. Upstream also carries the
//!   [`MergePolicy`].
//! - [`bind`]: starts a session that keeps both endpoints converged.
//! - [`TwoWayBinding`]: handle that ends the session.
//! - [`BindingScope`]: owns several bindings and ends them together on drop.
//!
//! # Architecture
//!
//! A session subscribes to both endpoints. Every external write becomes a
//! [`MergeRequest`] that is resolved under one session lock on upstream's
//! context; the resulting corrective writes are issued with a one-shot mute
//! flag so the session does not hear its own echo.
//!
//! The session keeps only weak references to the endpoint wrappers and ends
//! when either endpoint's storage is dropped.
//!
//! # Invariants
//!
//! 1. After any quiescent point both endpoints hold the resolved value.
//! 2. Under [`MergePolicy::OverwriteUpstream`], once downstream has written,
//!    upstream-origin writes are reverted.
//! 3. Under [`MergePolicy::Custom`], every resolution writes the merged value
//!    to both endpoints.
//! 4. Disposal is idempotent; nothing is written after it completes.
//!
//! [`ObservableProperty`]: tandem_core::property::ObservableProperty

pub mod binding;
pub mod endpoint;
pub mod merge_policy;
pub mod scheduling;

pub use binding::{BindingScope, TwoWayBinding, bind, bind_with, try_bind, try_bind_with};
pub use endpoint::{Downstream, Upstream};
pub use merge_policy::{MergePolicy, MergeRequest, Origin, Outcome, Resolution, ResolutionState};
pub use scheduling::BindingScheduler;
