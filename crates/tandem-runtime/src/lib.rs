#![forbid(unsafe_code)]

//! Runtime for Tandem two-way bindings.
//!
//! Builds on the primitives in [`tandem_core`]: see [`reactive`] for the
//! binding protocol, [`config`] for per-binding settings, and [`error`] for
//! failure types.

pub mod config;
pub mod error;
pub mod reactive;

pub use config::BindingConfig;
#[cfg(feature = "policy-config")]
pub use error::ConfigError;
pub use error::{BindError, Role};
pub use reactive::{
    BindingScope, Downstream, MergePolicy, TwoWayBinding, Upstream, bind, bind_with, try_bind,
    try_bind_with,
};
