#![forbid(unsafe_code)]

//! Lifetime tracking for owned values.
//!
//! A [`Lifetime`] is the observable side of a [`LifetimeToken`]: the owner
//! keeps the token, and dropping it ends the lifetime. Anything holding a
//! `Lifetime` can register a callback with
//! [`observe_ended()`](Lifetime::observe_ended) to tear itself down when the
//! owner goes away.
//!
//! ```
//! use tandem_core::lifetime::Lifetime;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! let (lifetime, token) = Lifetime::make();
//! let ended = Arc::new(AtomicBool::new(false));
//! let flag = Arc::clone(&ended);
//! lifetime.observe_ended(move || flag.store(true, Ordering::SeqCst));
//!
//! drop(token);
//! assert!(ended.load(Ordering::SeqCst));
//! assert!(lifetime.is_ended());
//! ```
//!
//! # Invariants
//!
//! 1. Each observer runs at most once.
//! 2. Observers registered after the lifetime ended run immediately, on the
//!    registering thread.
//! 3. Observers run outside the internal lock; they may register or remove
//!    other observers.
//! 4. A `Lifetime` does not keep its token alive.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::disposable::Disposable;

type EndedAction = Box<dyn FnOnce() + Send>;

struct Observers {
    next_id: u64,
    // `None` once the lifetime has ended.
    pending: Option<Vec<(u64, EndedAction)>>,
}

struct LifetimeState {
    observers: Mutex<Observers>,
}

impl LifetimeState {
    fn end(&self) {
        let pending = self.observers.lock().pending.take();
        for (_, action) in pending.into_iter().flatten() {
            action();
        }
    }
}

/// Observable end-of-life signal for some owner.
#[derive(Clone)]
pub struct Lifetime {
    state: Arc<LifetimeState>,
}

/// Owner-side handle: dropping it ends the associated [`Lifetime`].
pub struct LifetimeToken {
    state: Arc<LifetimeState>,
}

impl Lifetime {
    /// Create a lifetime together with the token that controls it.
    #[must_use]
    pub fn make() -> (Lifetime, LifetimeToken) {
        let state = Arc::new(LifetimeState {
            observers: Mutex::new(Observers {
                next_id: 0,
                pending: Some(Vec::new()),
            }),
        });
        (
            Lifetime {
                state: Arc::clone(&state),
            },
            LifetimeToken { state },
        )
    }

    /// A lifetime that has already ended.
    #[must_use]
    pub fn ended() -> Lifetime {
        let (lifetime, token) = Self::make();
        drop(token);
        lifetime
    }

    /// Whether the owner has gone away.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.state.observers.lock().pending.is_none()
    }

    /// Run `action` when the lifetime ends.
    ///
    /// Returns a handle that detaches `action`, or `None` if the lifetime had
    /// already ended, in which case `action` has been run before returning.
    pub fn observe_ended(&self, action: impl FnOnce() + Send + 'static) -> Option<Disposable> {
        let registered = {
            let mut observers = self.state.observers.lock();
            let Observers { next_id, pending } = &mut *observers;
            match pending {
                Some(pending) => {
                    let id = *next_id;
                    *next_id += 1;
                    pending.push((id, Box::new(action) as EndedAction));
                    Ok(id)
                }
                None => Err(action),
            }
        };
        let id = match registered {
            Ok(id) => id,
            Err(action) => {
                action();
                return None;
            }
        };

        let weak: Weak<LifetimeState> = Arc::downgrade(&self.state);
        Some(Disposable::new(move || {
            if let Some(state) = weak.upgrade() {
                let removed = {
                    let mut observers = state.observers.lock();
                    observers.pending.as_mut().and_then(|pending| {
                        pending
                            .iter()
                            .position(|(entry, _)| *entry == id)
                            .map(|index| pending.remove(index))
                    })
                };
                // Dropped outside the lock: the action may own handles whose
                // drop re-enters this lifetime.
                drop(removed);
            }
        }))
    }

    /// Number of registered observers still waiting for the end.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.state
            .observers
            .lock()
            .pending
            .as_ref()
            .map_or(0, Vec::len)
    }
}

impl Drop for LifetimeToken {
    fn drop(&mut self) {
        self.state.end();
    }
}

impl fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifetime")
            .field("ended", &self.is_ended())
            .finish()
    }
}

impl fmt::Debug for LifetimeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifetimeToken").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_action(count: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let c = Arc::clone(count);
        move || {
            c.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn token_drop_ends_lifetime() {
        let (lifetime, token) = Lifetime::make();
        assert!(!lifetime.is_ended());
        drop(token);
        assert!(lifetime.is_ended());
    }

    #[test]
    fn observers_run_once_on_end() {
        let count = Arc::new(AtomicUsize::new(0));
        let (lifetime, token) = Lifetime::make();
        let handle = lifetime.observe_ended(counting_action(&count));
        assert!(handle.is_some());
        assert_eq!(lifetime.observer_count(), 1);

        drop(token);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(lifetime.observer_count(), 0);
    }

    #[test]
    fn observe_after_end_runs_immediately() {
        let count = Arc::new(AtomicUsize::new(0));
        let lifetime = Lifetime::ended();
        let handle = lifetime.observe_ended(counting_action(&count));
        assert!(handle.is_none());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disposing_observer_detaches_it() {
        let count = Arc::new(AtomicUsize::new(0));
        let (lifetime, token) = Lifetime::make();
        let handle = lifetime
            .observe_ended(counting_action(&count))
            .expect("lifetime is live");
        handle.dispose();
        assert_eq!(lifetime.observer_count(), 0);

        drop(token);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn observer_may_register_another_observer() {
        let count = Arc::new(AtomicUsize::new(0));
        let (lifetime, token) = Lifetime::make();
        let inner_lifetime = lifetime.clone();
        let inner_count = Arc::clone(&count);
        lifetime.observe_ended(move || {
            // Already ended: runs inline.
            inner_lifetime.observe_ended(counting_action(&inner_count));
        });

        drop(token);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lifetime_does_not_retain_token() {
        let (lifetime, token) = Lifetime::make();
        let clone = lifetime.clone();
        drop(lifetime);
        assert!(!clone.is_ended());
        drop(token);
        assert!(clone.is_ended());
    }
}
