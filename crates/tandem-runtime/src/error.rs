#![forbid(unsafe_code)]

//! Error types for establishing bindings and loading configuration.

use std::fmt;

use thiserror::Error;

/// Which side of a binding an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Upstream,
    Downstream,
}

impl Role {
    /// Stable lowercase name, also used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::Downstream => "downstream",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to establish a binding.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("{role} lifetime already ended")]
    LifetimeEnded { role: Role },
}

/// Failure to parse a configuration document.
#[cfg(feature = "policy-config")]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
}
