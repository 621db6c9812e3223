#![forbid(unsafe_code)]

//! Binding configuration.
//!
//! [`BindingConfig`] is plain data. With the `policy-config` feature it can
//! be loaded from TOML or JSON, for example:
//!
//! ```toml
//! label = "settings.theme"
//! ```
//!
//! Merge policies are closures and stay in code; only naming is
//! configurable. Queue schedulers read [`QueueSchedulerConfig`] the same way.
//!
//! [`QueueSchedulerConfig`]: tandem_core::scheduler::QueueSchedulerConfig

#[cfg(feature = "policy-config")]
use crate::error::ConfigError;

const DEFAULT_LABEL: &str = "binding";

/// Per-binding settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "policy-config", derive(serde::Deserialize))]
#[cfg_attr(feature = "policy-config", serde(default, deny_unknown_fields))]
pub struct BindingConfig {
    /// Name attached to every log event of the binding.
    pub label: Option<String>,
}

impl BindingConfig {
    /// Config with `label` set.
    #[must_use]
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }

    /// The configured label, or `"binding"`.
    #[must_use]
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(DEFAULT_LABEL)
    }

    /// Parse from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] on malformed input or unknown keys.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Parse from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] on malformed input or unknown keys.
    #[cfg(feature = "policy-config")]
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(input)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_label() {
        assert_eq!(BindingConfig::default().label(), "binding");
        assert_eq!(BindingConfig::labeled("theme").label(), "theme");
    }

    #[cfg(feature = "policy-config")]
    mod loading {
        use super::*;

        #[test]
        fn from_toml() {
            let config = BindingConfig::from_toml_str(r#"label = "settings.theme""#).unwrap();
            assert_eq!(config.label(), "settings.theme");
        }

        #[test]
        fn from_json() {
            let config = BindingConfig::from_json_str(r#"{"label": "volume"}"#).unwrap();
            assert_eq!(config, BindingConfig::labeled("volume"));
        }

        #[test]
        fn empty_document_uses_defaults() {
            assert_eq!(
                BindingConfig::from_toml_str("").unwrap(),
                BindingConfig::default()
            );
            assert_eq!(
                BindingConfig::from_json_str("{}").unwrap(),
                BindingConfig::default()
            );
        }

        #[test]
        fn unknown_keys_are_rejected() {
            let err = BindingConfig::from_toml_str("policy = \"max\"").unwrap_err();
            assert!(matches!(err, ConfigError::Toml(_)));
            let err = BindingConfig::from_json_str("[1]").unwrap_err();
            assert!(matches!(err, ConfigError::Json(_)));
        }
    }
}
