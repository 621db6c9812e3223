#![forbid(unsafe_code)]

//! Conflict resolution for two-way bindings.
//!
//! [`MergePolicy`] picks the value both endpoints converge to when they are
//! written concurrently. [`ResolutionState::resolve`] is the whole decision
//! procedure: it takes one [`MergeRequest`], updates the resolved value, and
//! returns a [`Resolution`] naming the corrective writes to issue. It never
//! schedules or writes anything itself.
//!
//! # Policies
//!
//! | Event | Downstream inactive | `OverwriteUpstream` | `Custom(f)` |
//! |-------|---------------------|---------------------|-------------|
//! | upstream `v` | adopt `v`, write downstream | keep resolved, write upstream | `f(v, prior)`, write both |
//! | downstream `v` | (becomes active) | adopt `v`, write upstream | `f(prior, v)`, write both |
//!
//! # Invariants
//!
//! 1. Once a downstream request has been resolved, `downstream_active()`
//!    stays `true`.
//! 2. Under `OverwriteUpstream`, the resolved value only ever changes to an
//!    upstream proposal while downstream is inactive.
//! 3. A downstream request under `OverwriteUpstream` never asks for a write
//!    back to downstream.

use std::fmt;
use std::sync::Arc;

type MergeFn<V> = dyn Fn(&V, &V) -> V + Send + Sync;

/// Strategy for resolving concurrent writes to a binding's endpoints.
pub enum MergePolicy<V> {
    /// Downstream always wins once it has written at least once.
    OverwriteUpstream,
    /// `f(upstream, downstream)` decides every conflict.
    ///
    /// Upstream-origin writes call `f(proposed, prior)`; downstream-origin
    /// writes call `f(prior, proposed)`. The function must be pure and must
    /// not touch the binding it belongs to.
    Custom(Arc<MergeFn<V>>),
}

impl<V> MergePolicy<V> {
    /// Build a [`MergePolicy::Custom`] from a closure.
    pub fn custom(merge: impl Fn(&V, &V) -> V + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(merge))
    }

    /// Whether this is [`MergePolicy::OverwriteUpstream`].
    #[must_use]
    pub fn is_overwrite_upstream(&self) -> bool {
        matches!(self, Self::OverwriteUpstream)
    }
}

impl<V> Default for MergePolicy<V> {
    fn default() -> Self {
        Self::OverwriteUpstream
    }
}

impl<V> Clone for MergePolicy<V> {
    fn clone(&self) -> Self {
        match self {
            Self::OverwriteUpstream => Self::OverwriteUpstream,
            Self::Custom(merge) => Self::Custom(Arc::clone(merge)),
        }
    }
}

impl<V> fmt::Debug for MergePolicy<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OverwriteUpstream => f.write_str("OverwriteUpstream"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Which endpoint produced a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Upstream,
    Downstream,
}

impl Origin {
    /// Stable lowercase name, used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::Downstream => "downstream",
        }
    }
}

/// One incoming change, tagged by the endpoint it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeRequest<V> {
    FromUpstream(V),
    FromDownstream(V),
}

impl<V> MergeRequest<V> {
    /// The endpoint that produced this change.
    #[must_use]
    pub fn origin(&self) -> Origin {
        match self {
            Self::FromUpstream(_) => Origin::Upstream,
            Self::FromDownstream(_) => Origin::Downstream,
        }
    }
}

/// What a resolution decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Upstream proposal adopted while downstream was inactive.
    AdoptedUpstream,
    /// Upstream proposal discarded; the resolved value is re-asserted.
    ReassertedResolved,
    /// Downstream proposal adopted.
    AdoptedDownstream,
    /// Custom merge function produced the resolved value.
    Merged,
}

impl Outcome {
    /// Stable snake-case name, used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AdoptedUpstream => "adopted_upstream",
            Self::ReassertedResolved => "reasserted_resolved",
            Self::AdoptedDownstream => "adopted_downstream",
            Self::Merged => "merged",
        }
    }
}

/// Corrective writes produced by one resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution<V> {
    pub outcome: Outcome,
    /// Value to write to upstream, if any.
    pub upstream: Option<V>,
    /// Value to write to downstream, if any.
    pub downstream: Option<V>,
}

/// Resolved value and activity flag of one binding.
#[derive(Debug, Clone)]
pub struct ResolutionState<V> {
    resolved: Option<V>,
    downstream_active: bool,
}

impl<V> Default for ResolutionState<V> {
    fn default() -> Self {
        Self {
            resolved: None,
            downstream_active: false,
        }
    }
}

impl<V: Clone> ResolutionState<V> {
    /// Fresh state: nothing resolved, downstream inactive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The last agreed value, if any request has been resolved.
    #[must_use]
    pub fn resolved(&self) -> Option<&V> {
        self.resolved.as_ref()
    }

    /// Whether downstream has ever produced a value through this binding.
    #[must_use]
    pub fn downstream_active(&self) -> bool {
        self.downstream_active
    }

    /// Resolve one request under `policy`.
    ///
    /// `current_upstream` supplies the prior value for a custom merge that
    /// runs before anything has been resolved.
    pub fn resolve(
        &mut self,
        policy: &MergePolicy<V>,
        request: MergeRequest<V>,
        current_upstream: impl FnOnce() -> V,
    ) -> Resolution<V> {
        match request {
            MergeRequest::FromUpstream(proposed) => {
                if !self.downstream_active {
                    return self.adopt_upstream(proposed);
                }
                match policy {
                    MergePolicy::OverwriteUpstream => match self.resolved.clone() {
                        Some(resolved) => Resolution {
                            outcome: Outcome::ReassertedResolved,
                            upstream: Some(resolved),
                            downstream: None,
                        },
                        None => self.adopt_upstream(proposed),
                    },
                    MergePolicy::Custom(merge) => {
                        let value = match &self.resolved {
                            Some(prior) => merge(&proposed, prior),
                            None => merge(&proposed, &current_upstream()),
                        };
                        self.merged(value)
                    }
                }
            }
            MergeRequest::FromDownstream(proposed) => {
                self.downstream_active = true;
                match policy {
                    MergePolicy::OverwriteUpstream => {
                        self.resolved = Some(proposed.clone());
                        Resolution {
                            outcome: Outcome::AdoptedDownstream,
                            upstream: Some(proposed),
                            downstream: None,
                        }
                    }
                    MergePolicy::Custom(merge) => {
                        let value = match &self.resolved {
                            Some(prior) => merge(prior, &proposed),
                            None => merge(&current_upstream(), &proposed),
                        };
                        self.merged(value)
                    }
                }
            }
        }
    }

    fn adopt_upstream(&mut self, proposed: V) -> Resolution<V> {
        self.resolved = Some(proposed.clone());
        Resolution {
            outcome: Outcome::AdoptedUpstream,
            upstream: None,
            downstream: Some(proposed),
        }
    }

    fn merged(&mut self, value: V) -> Resolution<V> {
        self.resolved = Some(value.clone());
        Resolution {
            outcome: Outcome::Merged,
            upstream: Some(value.clone()),
            downstream: Some(value),
        }
    }
}
