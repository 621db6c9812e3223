#![forbid(unsafe_code)]

//! Bidirectional synchronization between an [`Upstream`] and a
//! [`Downstream`].
//!
//! [`bind`] creates a session that subscribes to both endpoints and routes
//! every external write through one conflict-resolution procedure. The
//! returned [`TwoWayBinding`] tears the session down on
//! [`dispose()`](TwoWayBinding::dispose); the session also tears itself down
//! when either endpoint's lifetime ends.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use tandem_core::property::MutableProperty;
//! use tandem_runtime::reactive::{Downstream, Upstream, bind};
//!
//! let model = MutableProperty::new(1);
//! let view = MutableProperty::new(0);
//! let upstream = Arc::new(Upstream::new(model.clone()));
//! let downstream = Arc::new(Downstream::new(view.clone()));
//!
//! let binding = bind(&upstream, &downstream);
//! assert_eq!(view.get(), 1);
//!
//! view.set(5);
//! assert_eq!(model.get(), 5);
//!
//! binding.dispose();
//! view.set(9);
//! assert_eq!(model.get(), 5);
//! ```
//!
//! # Protocol
//!
//! 1. The downstream change stream is subscribed first, then the upstream
//!    value stream. Upstream replays its current value on subscription; that
//!    replay is the first upstream-origin event.
//! 2. Downstream events hop onto upstream's context before resolving.
//!    Upstream events resolve on whatever thread upstream notified from.
//! 3. Resolution runs under the session lock (see
//!    [`merge_policy`](super::merge_policy) for the decision table).
//! 4. Each corrective write is issued with the target's one-shot mute armed
//!    for the writing thread; the target's listener consumes it on that
//!    thread instead of forwarding the echo. Mutes are not guarded by the
//!    session lock, so a listener never waits on a resolution. Upstream
//!    writes happen synchronously inside the lock; downstream writes are
//!    scheduled on downstream's context.
//!
//! # Invariants
//!
//! 1. At most one resolution mutates session state at a time.
//! 2. A corrective write is never re-resolved as an external change.
//! 3. After teardown, no corrective write reaches either endpoint.
//! 4. Disposal is idempotent and may run from inside a resolution.
//!
//! # Failure Modes
//!
//! - Custom merge panic: propagates out of the write that triggered it. The
//!   lock is released during unwinding and the resolved value is unchanged.
//! - Endpoint wrapper dropped while bound: the next event tears the session
//!   down.
//! - Re-entering [`bind`] on the same pair from a merge function or an
//!   upstream setter is a caller error.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, ReentrantMutex};
use tandem_core::disposable::{CompositeDisposable, Disposable, ScopedDisposable};
use tandem_core::property::ObservableProperty;

use super::endpoint::{Downstream, Upstream};
use super::merge_policy::{MergePolicy, MergeRequest, ResolutionState};
use super::scheduling::BindingScheduler;
use crate::config::BindingConfig;
use crate::error::{BindError, Role};

static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Session: shared resolution state
// ---------------------------------------------------------------------------

/// One-shot echo suppression for one endpoint.
///
/// Armed with the id of the thread about to issue a corrective write. Only a
/// notification delivered on that thread consumes it, so an external write
/// racing in from another thread is never mistaken for the echo. Never held
/// while taking any other lock.
#[derive(Default)]
struct Mute {
    armed: Mutex<Option<ThreadId>>,
}

impl Mute {
    /// Run `write` with this endpoint muted for the current thread.
    fn write(&self, write: impl FnOnce()) {
        let current = thread::current().id();
        *self.armed.lock() = Some(current);
        let _disarm = Disarm {
            mute: self,
            thread: current,
        };
        write();
    }

    /// Consume the mute if it was armed by the current thread.
    fn take(&self) -> bool {
        let current = thread::current().id();
        let mut armed = self.armed.lock();
        if *armed == Some(current) {
            *armed = None;
            true
        } else {
            false
        }
    }
}

/// Clears a mute the corrective write never consumed.
struct Disarm<'a> {
    mute: &'a Mute,
    thread: ThreadId,
}

impl Drop for Disarm<'_> {
    fn drop(&mut self) {
        let mut armed = self.mute.armed.lock();
        if *armed == Some(self.thread) {
            *armed = None;
        }
    }
}

struct Session<P, Q>
where
    P: ObservableProperty,
    Q: ObservableProperty<Value = P::Value>,
{
    id: u64,
    label: Arc<str>,
    upstream: Weak<Upstream<P>>,
    downstream: Weak<Downstream<Q>>,
    upstream_scheduler: BindingScheduler,
    downstream_scheduler: BindingScheduler,
    policy: MergePolicy<P::Value>,
    // Re-entrant: an observer may write upstream again from inside a
    // corrective write. No `RefCell` borrow is held across a call into an
    // endpoint.
    state: ReentrantMutex<RefCell<ResolutionState<P::Value>>>,
    // Outside `state`: listeners run under the endpoint's write lock and must
    // not wait on the session lock.
    mutes_upstream: Mute,
    mutes_downstream: Mute,
    disposable: Arc<CompositeDisposable>,
}

impl<P, Q> Session<P, Q>
where
    P: ObservableProperty,
    Q: ObservableProperty<Value = P::Value>,
{
    fn on_upstream_value(self: &Arc<Self>, value: &P::Value) {
        if self.disposable.is_disposed() {
            return;
        }
        if self.mutes_upstream.take() {
            tracing::trace!(
                binding = self.id,
                label = %self.label,
                "upstream echo suppressed"
            );
            return;
        }
        self.merge(MergeRequest::FromUpstream(value.clone()));
    }

    fn on_downstream_value(self: &Arc<Self>, value: &P::Value) {
        if self.disposable.is_disposed() {
            return;
        }
        if self.mutes_downstream.take() {
            tracing::trace!(
                binding = self.id,
                label = %self.label,
                "downstream echo suppressed"
            );
            return;
        }
        let session = Arc::clone(self);
        let value = value.clone();
        self.upstream_scheduler
            .schedule(move || session.merge(MergeRequest::FromDownstream(value)));
    }

    fn merge(self: &Arc<Self>, request: MergeRequest<P::Value>) {
        if self.disposable.is_disposed() {
            self.trace_dropped();
            return;
        }
        let (Some(upstream), Some(downstream)) =
            (self.upstream.upgrade(), self.downstream.upgrade())
        else {
            tracing::warn!(
                binding = self.id,
                label = %self.label,
                "endpoint dropped while bound; tearing down"
            );
            self.disposable.dispose();
            return;
        };

        let origin = request.origin();
        let guard = self.state.lock();
        // Disposal may have completed on another thread while we waited.
        if self.disposable.is_disposed() {
            self.trace_dropped();
            return;
        }
        let resolution = guard
            .borrow_mut()
            .resolve(&self.policy, request, || upstream.value());

        tracing::trace!(
            binding = self.id,
            label = %self.label,
            origin = origin.as_str(),
            outcome = resolution.outcome.as_str(),
            writes_upstream = resolution.upstream.is_some(),
            writes_downstream = resolution.downstream.is_some(),
            "resolved"
        );

        if let Some(value) = resolution.upstream {
            self.mutes_upstream.write(|| upstream.set_value(value));
        }
        if let Some(value) = resolution.downstream {
            self.update_downstream(&downstream, value);
        }
    }

    fn update_downstream(self: &Arc<Self>, downstream: &Arc<Downstream<Q>>, value: P::Value) {
        let session = Arc::clone(self);
        let target = Arc::downgrade(downstream);
        self.downstream_scheduler.schedule(move || {
            if session.disposable.is_disposed() {
                return;
            }
            let Some(downstream) = target.upgrade() else {
                return;
            };
            session
                .mutes_downstream
                .write(|| downstream.set_value(value));
        });
    }

    fn trace_dropped(&self) {
        tracing::trace!(
            binding = self.id,
            label = %self.label,
            "request after teardown dropped"
        );
    }
}

// ---------------------------------------------------------------------------
// bind: establishing a session
// ---------------------------------------------------------------------------

/// Bind `upstream` and `downstream` with the default configuration.
///
/// If either endpoint's lifetime has already ended, the binding is a no-op
/// and the returned handle is already disposed. Use [`try_bind`] to get an
/// error instead.
pub fn bind<P, Q>(upstream: &Arc<Upstream<P>>, downstream: &Arc<Downstream<Q>>) -> TwoWayBinding
where
    P: ObservableProperty,
    Q: ObservableProperty<Value = P::Value>,
{
    bind_with(upstream, downstream, &BindingConfig::default())
}

/// Bind `upstream` and `downstream` with explicit configuration.
pub fn bind_with<P, Q>(
    upstream: &Arc<Upstream<P>>,
    downstream: &Arc<Downstream<Q>>,
    config: &BindingConfig,
) -> TwoWayBinding
where
    P: ObservableProperty,
    Q: ObservableProperty<Value = P::Value>,
{
    match try_bind_with(upstream, downstream, config) {
        Ok(binding) => binding,
        Err(err) => {
            let binding = TwoWayBinding::disposed(config.label());
            tracing::warn!(
                binding = binding.id,
                label = %binding.label,
                error = %err,
                "binding skipped"
            );
            binding
        }
    }
}

/// Bind `upstream` and `downstream`, failing if either has already ended.
///
/// # Errors
///
/// Returns [`BindError::LifetimeEnded`] naming the endpoint whose lifetime
/// ended before the binding could be established.
pub fn try_bind<P, Q>(
    upstream: &Arc<Upstream<P>>,
    downstream: &Arc<Downstream<Q>>,
) -> Result<TwoWayBinding, BindError>
where
    P: ObservableProperty,
    Q: ObservableProperty<Value = P::Value>,
{
    try_bind_with(upstream, downstream, &BindingConfig::default())
}

/// [`try_bind`] with explicit configuration.
///
/// # Errors
///
/// Returns [`BindError::LifetimeEnded`] naming the endpoint whose lifetime
/// ended before the binding could be established.
pub fn try_bind_with<P, Q>(
    upstream: &Arc<Upstream<P>>,
    downstream: &Arc<Downstream<Q>>,
    config: &BindingConfig,
) -> Result<TwoWayBinding, BindError>
where
    P: ObservableProperty,
    Q: ObservableProperty<Value = P::Value>,
{
    let upstream_lifetime = upstream.lifetime();
    let downstream_lifetime = downstream.lifetime();
    if upstream_lifetime.is_ended() {
        return Err(BindError::LifetimeEnded {
            role: Role::Upstream,
        });
    }
    if downstream_lifetime.is_ended() {
        return Err(BindError::LifetimeEnded {
            role: Role::Downstream,
        });
    }

    let id = NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed);
    let label: Arc<str> = Arc::from(config.label());
    let disposable = Arc::new(CompositeDisposable::new());

    let session = Arc::new(Session {
        id,
        label: Arc::clone(&label),
        upstream: Arc::downgrade(upstream),
        downstream: Arc::downgrade(downstream),
        upstream_scheduler: BindingScheduler::new(upstream.scheduler()),
        downstream_scheduler: BindingScheduler::new(downstream.scheduler()),
        policy: upstream.merge_policy().clone(),
        state: ReentrantMutex::new(RefCell::new(ResolutionState::new())),
        mutes_upstream: Mute::default(),
        mutes_downstream: Mute::default(),
        disposable: Arc::clone(&disposable),
    });

    tracing::debug!(
        binding = id,
        label = %label,
        upstream_immediate = session.upstream_scheduler.is_immediate(),
        downstream_immediate = session.downstream_scheduler.is_immediate(),
        policy = ?session.policy,
        "binding established"
    );

    let teardown_label = Arc::clone(&label);
    disposable.add(Disposable::new(move || {
        tracing::debug!(binding = id, label = %teardown_label, "binding torn down");
    }));

    // Downstream first: the initial upstream replay may write downstream
    // inline, and that echo must be caught by a registered listener.
    let listener = Arc::clone(&session);
    disposable.add(
        downstream
            .inner()
            .observe(Box::new(move |value: &P::Value| {
                listener.on_downstream_value(value);
            })),
    );

    let listener = Arc::clone(&session);
    disposable.add(
        upstream
            .inner()
            .observe_with_current(Box::new(move |value: &P::Value| {
                listener.on_upstream_value(value);
            })),
    );

    for lifetime in [upstream_lifetime, downstream_lifetime] {
        let on_end = Arc::clone(&disposable);
        if let Some(observation) = lifetime.observe_ended(move || on_end.dispose()) {
            disposable.add(observation);
        }
    }

    Ok(TwoWayBinding {
        id,
        label,
        disposable,
    })
}

// ---------------------------------------------------------------------------
// TwoWayBinding: disposal handle
// ---------------------------------------------------------------------------

/// Handle to a live binding session.
///
/// Dropping the handle does not end the binding; call
/// [`dispose()`](Self::dispose), end either endpoint's lifetime, or convert
/// it with [`into_scoped()`](Self::into_scoped) for drop-to-dispose.
#[derive(Clone)]
pub struct TwoWayBinding {
    id: u64,
    label: Arc<str>,
    disposable: Arc<CompositeDisposable>,
}

impl TwoWayBinding {
    /// Bind `upstream` and `downstream`; same as [`bind`].
    pub fn new<P, Q>(upstream: &Arc<Upstream<P>>, downstream: &Arc<Downstream<Q>>) -> Self
    where
        P: ObservableProperty,
        Q: ObservableProperty<Value = P::Value>,
    {
        bind(upstream, downstream)
    }

    fn disposed(label: &str) -> Self {
        let disposable = Arc::new(CompositeDisposable::new());
        disposable.dispose();
        Self {
            id: NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed),
            label: Arc::from(label),
            disposable,
        }
    }

    /// Tear the session down. Later calls do nothing.
    pub fn dispose(&self) {
        self.disposable.dispose();
    }

    /// Whether the session has been torn down, by any trigger.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposable.is_disposed()
    }

    /// Process-unique id, also used in log fields.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Label from [`BindingConfig`].
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// A generic disposal handle for this binding.
    #[must_use]
    pub fn as_disposable(&self) -> Disposable {
        let disposable = Arc::clone(&self.disposable);
        Disposable::new(move || disposable.dispose())
    }

    /// Convert into a guard that disposes the binding when dropped.
    pub fn into_scoped(self) -> ScopedDisposable {
        ScopedDisposable::new(self.as_disposable())
    }
}

impl fmt::Debug for TwoWayBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwoWayBinding")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// BindingScope: lifecycle management
// ---------------------------------------------------------------------------

/// Collects bindings and disposables for a logical scope.
///
/// When the scope is dropped, every held binding is disposed.
///
/// # Invariants
///
/// 1. Held handles are disposed in registration order on drop.
/// 2. `clear()` disposes everything immediately; the scope stays reusable.
/// 3. `binding_count()` counts every handle added since the last clear.
#[derive(Default)]
pub struct BindingScope {
    held: Vec<Disposable>,
}

impl BindingScope {
    /// Create an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self { held: Vec::new() }
    }

    /// Hold an arbitrary disposable until the scope ends.
    pub fn hold(&mut self, disposable: Disposable) {
        self.held.push(disposable);
    }

    /// Bind `upstream` and `downstream` for the lifetime of this scope.
    ///
    /// Returns a handle for early disposal.
    pub fn bind<P, Q>(
        &mut self,
        upstream: &Arc<Upstream<P>>,
        downstream: &Arc<Downstream<Q>>,
    ) -> TwoWayBinding
    where
        P: ObservableProperty,
        Q: ObservableProperty<Value = P::Value>,
    {
        let binding = bind(upstream, downstream);
        self.held.push(binding.as_disposable());
        binding
    }

    /// Number of handles held.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.held.len()
    }

    /// Whether the scope holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Dispose everything now and start empty.
    pub fn clear(&mut self) {
        for disposable in self.held.drain(..) {
            disposable.dispose();
        }
    }
}

impl Drop for BindingScope {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for BindingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingScope")
            .field("binding_count", &self.held.len())
            .finish()
    }
}
