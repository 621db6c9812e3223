#![forbid(unsafe_code)]

//! Explicit, idempotent cancellation handles.
//!
//! A [`Disposable`] wraps a one-shot teardown action. Handles are cheap to
//! clone; every clone refers to the same action, and the action runs at most
//! once no matter how many clones call [`dispose()`](Disposable::dispose).
//!
//! [`CompositeDisposable`] aggregates many handles into one. Disposing the
//! composite disposes every child exactly once; adding to an already-disposed
//! composite disposes the new child immediately.
//!
//! # Invariants
//!
//! 1. A disposal action runs at most once across all clones.
//! 2. Disposal actions never run while an internal lock is held, so an
//!    action may itself dispose other handles (or the same composite)
//!    without deadlocking.
//! 3. `is_disposed()` becomes `true` before the action starts running.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

type Action = Box<dyn FnOnce() + Send>;

struct DisposableInner {
    action: Mutex<Option<Action>>,
    disposed: AtomicBool,
}

/// A cloneable, idempotent teardown handle.
#[derive(Clone)]
pub struct Disposable {
    inner: Arc<DisposableInner>,
}

impl Disposable {
    /// Create a handle that runs `action` on first disposal.
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(DisposableInner {
                action: Mutex::new(Some(Box::new(action))),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// A handle with nothing to tear down.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(|| {})
    }

    /// Run the teardown action if it has not run yet.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let action = self.inner.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    /// Whether [`dispose()`](Self::dispose) has been called on any clone.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A set of disposables torn down together.
pub struct CompositeDisposable {
    // `None` once disposed.
    children: Mutex<Option<Vec<Disposable>>>,
}

impl CompositeDisposable {
    /// Create an empty, live composite.
    #[must_use]
    pub fn new() -> Self {
        Self {
            children: Mutex::new(Some(Vec::new())),
        }
    }

    /// Add a child. If the composite is already disposed the child is
    /// disposed right away.
    pub fn add(&self, disposable: Disposable) {
        let rejected = {
            let mut children = self.children.lock();
            match children.as_mut() {
                Some(list) => {
                    list.push(disposable);
                    None
                }
                None => Some(disposable),
            }
        };
        if let Some(disposable) = rejected {
            disposable.dispose();
        }
    }

    /// Dispose every child exactly once. Later calls do nothing.
    pub fn dispose(&self) {
        let children = self.children.lock().take();
        if let Some(children) = children {
            for child in children {
                child.dispose();
            }
        }
    }

    /// Whether the composite has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.children.lock().is_none()
    }

    /// Number of live children (zero once disposed).
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.lock().as_ref().map_or(0, Vec::len)
    }

    /// Whether there are no live children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CompositeDisposable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompositeDisposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeDisposable")
            .field("disposed", &self.is_disposed())
            .field("len", &self.len())
            .finish()
    }
}

/// RAII guard that disposes the wrapped handle when dropped.
#[must_use = "dropping this guard disposes the wrapped handle"]
pub struct ScopedDisposable {
    inner: Option<Disposable>,
}

impl ScopedDisposable {
    /// Wrap `inner` so it is disposed at end of scope.
    pub fn new(inner: Disposable) -> Self {
        Self { inner: Some(inner) }
    }

    /// Release the guard without disposing, returning the handle.
    #[must_use]
    pub fn into_inner(mut self) -> Disposable {
        self.inner.take().unwrap_or_else(Disposable::empty)
    }

    /// Whether the wrapped handle has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.as_ref().is_none_or(Disposable::is_disposed)
    }
}

impl Drop for ScopedDisposable {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.dispose();
        }
    }
}

impl fmt::Debug for ScopedDisposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedDisposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, Disposable) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let d = Disposable::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, d)
    }

    #[test]
    fn dispose_runs_action_once() {
        let (count, d) = counter();
        assert!(!d.is_disposed());
        d.dispose();
        d.dispose();
        assert!(d.is_disposed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clones_share_action() {
        let (count, d) = counter();
        let d2 = d.clone();
        d2.dispose();
        assert!(d.is_disposed());
        d.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn composite_disposes_all_children() {
        let composite = CompositeDisposable::new();
        let (c1, d1) = counter();
        let (c2, d2) = counter();
        composite.add(d1);
        composite.add(d2);
        assert_eq!(composite.len(), 2);

        composite.dispose();
        composite.dispose();
        assert!(composite.is_disposed());
        assert!(composite.is_empty());
        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(c2.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn add_after_dispose_disposes_immediately() {
        let composite = CompositeDisposable::new();
        composite.dispose();
        let (count, d) = counter();
        composite.add(d.clone());
        assert!(d.is_disposed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn child_may_dispose_parent_reentrantly() {
        let composite = Arc::new(CompositeDisposable::new());
        let parent = Arc::clone(&composite);
        composite.add(Disposable::new(move || parent.dispose()));
        let (count, d) = counter();
        composite.add(d);

        composite.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scoped_disposes_on_drop() {
        let (count, d) = counter();
        {
            let _guard = ScopedDisposable::new(d.clone());
        }
        assert!(d.is_disposed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scoped_into_inner_keeps_handle_alive() {
        let (count, d) = counter();
        let guard = ScopedDisposable::new(d);
        let released = guard.into_inner();
        assert!(!released.is_disposed());
        released.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn debug_format() {
        let composite = CompositeDisposable::new();
        composite.add(Disposable::empty());
        let debug = format!("{composite:?}");
        assert!(debug.contains("len: 1"));
    }

    proptest::proptest! {
        #[test]
        fn every_child_disposed_exactly_once(
            ops in proptest::collection::vec(proptest::bool::ANY, 1..64)
        ) {
            // `true` adds a counted child, `false` disposes the composite.
            let composite = CompositeDisposable::new();
            let count = Arc::new(AtomicUsize::new(0));
            let mut added = 0;
            for add in ops {
                if add {
                    let c = Arc::clone(&count);
                    composite.add(Disposable::new(move || {
                        c.fetch_add(1, Ordering::SeqCst);
                    }));
                    added += 1;
                } else {
                    composite.dispose();
                }
            }
            composite.dispose();
            proptest::prop_assert_eq!(count.load(Ordering::SeqCst), added);
        }
    }
}
