#![forbid(unsafe_code)]

//! Tandem public facade.
//!
//! Two-way bindings between observable values that live on different
//! execution contexts. Most users only need the [`prelude`].
//!
//! ```
//! use std::sync::Arc;
//! use tandem::prelude::*;
//!
//! let model = MutableProperty::new(String::from("dark"));
//! let view = MutableProperty::new(String::new());
//! let upstream = Arc::new(Upstream::new(model.clone()));
//! let downstream = Arc::new(Downstream::new(view.clone()));
//!
//! let mut scope = BindingScope::new();
//! scope.bind(&upstream, &downstream);
//! assert_eq!(view.get(), "dark");
//!
//! view.set(String::from("light"));
//! assert_eq!(model.get(), "light");
//! ```

pub use tandem_core as core;
pub use tandem_runtime as runtime;

pub use tandem_core::{
    CompositeDisposable, Disposable, ImmediateScheduler, Lifetime, LifetimeToken,
    MutableProperty, ObservableProperty, QueueScheduler, QueueSchedulerConfig, Scheduler,
    SchedulerError, ScopedDisposable,
};
pub use tandem_runtime::{
    BindError, BindingConfig, BindingScope, Downstream, MergePolicy, Role, TwoWayBinding,
    Upstream, bind, bind_with, try_bind, try_bind_with,
};

/// Everything needed to declare endpoints and bind them.
pub mod prelude {
    pub use tandem_core::{
        Disposable, ImmediateScheduler, MutableProperty, ObservableProperty, QueueScheduler,
        Scheduler,
    };
    pub use tandem_runtime::{
        BindingConfig, BindingScope, Downstream, MergePolicy, TwoWayBinding, Upstream, bind,
        bind_with, try_bind,
    };
}
