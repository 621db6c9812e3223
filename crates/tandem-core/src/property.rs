#![forbid(unsafe_code)]

//! Thread-safe observable values.
//!
//! [`ObservableProperty`] is the interface bindings consume: a readable,
//! writable value that notifies observers on every write and exposes the
//! [`Lifetime`] of its storage. [`MutableProperty`] is the stock
//! implementation.
//!
//! # Architecture
//!
//! `MutableProperty<T>` is a cheap-to-clone handle over shared storage.
//! Reads go through an [`ArcSwap`] and never block. Writes are serialized by
//! a re-entrant lock that is held while observers run, so:
//!
//! - notifications for two writes never interleave across threads, and
//! - an observer may write the same property again from inside its own
//!   callback (a recursive write) without deadlocking.
//!
//! Observers are snapshotted before each notification and called outside
//! the observer-list lock, in registration order.
//!
//! # Invariants
//!
//! 1. Every write notifies, including writes of an equal value.
//! 2. `version()` increments exactly once per write.
//! 3. Disposing an observation stops callbacks from the next notification
//!    onward.
//! 4. The lifetime ends when the last handle to the storage is dropped.
//!
//! # Failure Modes
//!
//! - Observer panic: propagates to the caller of `set()`; the write lock is
//!   released during unwinding and the value stays written.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, ReentrantMutex};

use crate::disposable::Disposable;
use crate::lifetime::{Lifetime, LifetimeToken};

/// Callback invoked with each written value.
pub type ObserverFn<T> = Box<dyn Fn(&T) + Send + Sync>;

type SharedObserver<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A mutable value with change notification and a lifetime.
///
/// Implementations must notify observers synchronously, on the thread that
/// called [`set_value()`](Self::set_value), before it returns. They must
/// also tolerate recursive writes: calling `set_value()` from inside an
/// observer of the same property must not deadlock.
pub trait ObservableProperty: Send + Sync + 'static {
    /// The stored value type.
    type Value: Clone + Send + Sync + 'static;

    /// The current value.
    fn value(&self) -> Self::Value;

    /// Replace the value and notify observers.
    fn set_value(&self, value: Self::Value);

    /// Observe every subsequent write.
    fn observe(&self, observer: ObserverFn<Self::Value>) -> Disposable;

    /// Deliver the current value, then observe every subsequent write.
    ///
    /// The default delivers and registers in two steps; implementations
    /// should override it when a write can slip in between.
    fn observe_with_current(&self, observer: ObserverFn<Self::Value>) -> Disposable {
        observer(&self.value());
        self.observe(observer)
    }

    /// The lifetime of the underlying storage.
    fn lifetime(&self) -> Lifetime;
}

struct ObserverList<T> {
    next_id: u64,
    entries: Vec<(u64, SharedObserver<T>)>,
}

struct PropertyInner<T> {
    value: ArcSwap<T>,
    version: AtomicU64,
    write_lock: ReentrantMutex<()>,
    observers: Mutex<ObserverList<T>>,
    lifetime: Lifetime,
    _token: LifetimeToken,
}

/// A shared, thread-safe, observable value.
pub struct MutableProperty<T> {
    inner: Arc<PropertyInner<T>>,
}

impl<T> Clone for MutableProperty<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> MutableProperty<T> {
    /// Create a property holding `value`.
    pub fn new(value: T) -> Self {
        let (lifetime, token) = Lifetime::make();
        Self {
            inner: Arc::new(PropertyInner {
                value: ArcSwap::from_pointee(value),
                version: AtomicU64::new(0),
                write_lock: ReentrantMutex::new(()),
                observers: Mutex::new(ObserverList {
                    next_id: 0,
                    entries: Vec::new(),
                }),
                lifetime,
                _token: token,
            }),
        }
    }

    /// Replace the value and notify observers.
    pub fn set(&self, value: T) {
        let _write = self.inner.write_lock.lock();
        let value = Arc::new(value);
        self.inner.value.store(Arc::clone(&value));
        self.inner.version.fetch_add(1, Ordering::AcqRel);
        self.notify(&value);
    }

    /// Mutate the value in place, then notify observers.
    pub fn modify<R>(&self, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Clone,
    {
        let _write = self.inner.write_lock.lock();
        let mut next = T::clone(&self.inner.value.load());
        let result = f(&mut next);
        let next = Arc::new(next);
        self.inner.value.store(Arc::clone(&next));
        self.inner.version.fetch_add(1, Ordering::AcqRel);
        self.notify(&next);
        result
    }

    /// Borrow the current value without cloning it.
    pub fn with_value<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.load())
    }

    /// Number of writes so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    /// Number of live observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().entries.len()
    }

    /// Observe every subsequent write.
    pub fn subscribe(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> Disposable {
        let observer: SharedObserver<T> = Arc::new(observer);
        let id = {
            let mut list = self.inner.observers.lock();
            let id = list.next_id;
            list.next_id += 1;
            list.entries.push((id, observer));
            id
        };

        let weak: Weak<PropertyInner<T>> = Arc::downgrade(&self.inner);
        Disposable::new(move || {
            if let Some(inner) = weak.upgrade() {
                let removed = {
                    let mut list = inner.observers.lock();
                    list.entries
                        .iter()
                        .position(|(entry, _)| *entry == id)
                        .map(|index| list.entries.remove(index))
                };
                drop(removed);
            }
        })
    }

    /// Deliver the current value, then observe every subsequent write.
    ///
    /// No write can land between the delivery and the registration.
    pub fn subscribe_with_current(
        &self,
        observer: impl Fn(&T) + Send + Sync + 'static,
    ) -> Disposable {
        let _write = self.inner.write_lock.lock();
        observer(&self.inner.value.load());
        self.subscribe(observer)
    }

    fn notify(&self, value: &T) {
        let snapshot: Vec<SharedObserver<T>> = self
            .inner
            .observers
            .lock()
            .entries
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in snapshot {
            observer(value);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> MutableProperty<T> {
    /// The current value.
    #[must_use]
    pub fn get(&self) -> T {
        T::clone(&self.inner.value.load())
    }
}

impl<T: Clone + Send + Sync + 'static> ObservableProperty for MutableProperty<T> {
    type Value = T;

    fn value(&self) -> T {
        self.get()
    }

    fn set_value(&self, value: T) {
        self.set(value);
    }

    fn observe(&self, observer: ObserverFn<T>) -> Disposable {
        self.subscribe(observer)
    }

    fn observe_with_current(&self, observer: ObserverFn<T>) -> Disposable {
        self.subscribe_with_current(observer)
    }

    fn lifetime(&self) -> Lifetime {
        self.inner.lifetime.clone()
    }
}

impl<T: fmt::Debug> fmt::Debug for MutableProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableProperty")
            .field("value", &**self.inner.value.load())
            .field("version", &self.inner.version.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn get_set_roundtrip() {
        let prop = MutableProperty::new(1);
        assert_eq!(prop.get(), 1);
        prop.set(2);
        assert_eq!(prop.get(), 2);
        assert_eq!(prop.version(), 1);
    }

    #[test]
    fn equal_writes_still_notify() {
        let prop = MutableProperty::new(7);
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let _sub = prop.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        prop.set(7);
        prop.set(7);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(prop.version(), 2);
    }

    #[test]
    fn subscribe_with_current_replays_value() {
        let prop = MutableProperty::new(String::from("hello"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = prop.subscribe_with_current(move |v: &String| s.lock().push(v.clone()));
        prop.set("world".to_string());
        assert_eq!(*seen.lock(), vec!["hello".to_string(), "world".to_string()]);
    }

    #[test]
    fn dispose_stops_notifications() {
        let prop = MutableProperty::new(0);
        let last = Arc::new(AtomicUsize::new(0));
        let l = Arc::clone(&last);
        let sub = prop.subscribe(move |v| l.store(*v, Ordering::SeqCst));
        prop.set(5);
        sub.dispose();
        assert_eq!(prop.observer_count(), 0);
        prop.set(9);
        assert_eq!(last.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn observers_notified_in_registration_order() {
        let prop = MutableProperty::new(0);
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut subs = Vec::new();
        for tag in 0..3 {
            let o = Arc::clone(&order);
            subs.push(prop.subscribe(move |_| o.lock().push(tag)));
        }
        prop.set(1);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn recursive_write_does_not_deadlock() {
        let prop = MutableProperty::new(0_i32);
        let handle = prop.clone();
        let _sub = prop.subscribe(move |v| {
            if *v < 3 {
                handle.set(*v + 1);
            }
        });
        prop.set(0);
        assert_eq!(prop.get(), 3);
    }

    #[test]
    fn modify_and_with_value() {
        let prop = MutableProperty::new(vec![1, 2]);
        let len = prop.modify(|v| {
            v.push(3);
            v.len()
        });
        assert_eq!(len, 3);
        assert_eq!(prop.with_value(|v| v.iter().sum::<i32>()), 6);
        assert_eq!(prop.version(), 1);
    }

    #[test]
    fn lifetime_ends_with_last_handle() {
        let prop = MutableProperty::new(0);
        let clone = prop.clone();
        let lifetime = ObservableProperty::lifetime(&prop);
        drop(prop);
        assert!(!lifetime.is_ended());
        drop(clone);
        assert!(lifetime.is_ended());
    }

    #[test]
    fn subscription_does_not_keep_property_alive() {
        let prop = MutableProperty::new(0);
        let lifetime = ObservableProperty::lifetime(&prop);
        let sub = prop.subscribe(|_| {});
        drop(prop);
        assert!(lifetime.is_ended());
        sub.dispose();
    }

    #[test]
    fn concurrent_writers_serialize_notifications() {
        let prop = MutableProperty::new(0_usize);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let (f, o) = (Arc::clone(&in_flight), Arc::clone(&overlaps));
        let _sub = prop.subscribe(move |_| {
            if f.fetch_add(1, Ordering::SeqCst) != 0 {
                o.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::yield_now();
            f.fetch_sub(1, Ordering::SeqCst);
        });

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let p = prop.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        p.set(t * 100 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(prop.version(), 400);
    }

    #[test]
    fn trait_default_observe_with_current() {
        struct Plain(MutableProperty<u8>);

        impl ObservableProperty for Plain {
            type Value = u8;
            fn value(&self) -> u8 {
                self.0.get()
            }
            fn set_value(&self, value: u8) {
                self.0.set(value);
            }
            fn observe(&self, observer: ObserverFn<u8>) -> Disposable {
                self.0.subscribe(observer)
            }
            fn lifetime(&self) -> Lifetime {
                ObservableProperty::lifetime(&self.0)
            }
        }

        let plain = Plain(MutableProperty::new(4));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = plain.observe_with_current(Box::new(move |v: &u8| s.lock().push(*v)));
        plain.set_value(5);
        assert_eq!(*seen.lock(), vec![4, 5]);
    }
}
