//! # Platform Base Configuration
//!
//! Settings that shape how the platform base talks to the driver and to the
//! application: which external platform interface version it serves and how
//! debug output is filtered.
//!
//! ## Configuration Categories
//!
//! - **Interface**: the external platform interface version to negotiate
//! - **Debug**: log filter and the severity threshold for forwarding debug
//!   messages to the application's callback

use serde::{Deserialize, Serialize};

use crate::callbacks::Severity;
use crate::platform::InterfaceVersion;

pub use crate::config::{Config, ConfigError};

/// # Debug Configuration
///
/// Controls log output and which debug messages reach the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Least severe message still forwarded to the debug callback
    pub forward_threshold: Severity,
    /// `env_logger` filter string, e.g. `"egl_platform_base=debug"`
    pub log_filter: String,
}

impl DebugConfig {
    /// Set the forwarding threshold
    pub const fn with_forward_threshold(mut self, threshold: Severity) -> Self {
        self.forward_threshold = threshold;
        self
    }

    /// Set the log filter
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self { forward_threshold: Severity::Warn, log_filter: "warn".to_string() }
    }
}

/// # Complete Platform Base Configuration
///
/// Handed to `PlatformBase::new`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformBaseConfig {
    /// Interface version this build serves
    pub interface: InterfaceVersion,
    /// Debug output settings
    pub debug: DebugConfig,
}

impl PlatformBaseConfig {
    /// Override the interface version
    pub const fn with_interface(mut self, interface: InterfaceVersion) -> Self {
        self.interface = interface;
        self
    }

    /// Override the debug settings
    pub fn with_debug(mut self, debug: DebugConfig) -> Self {
        self.debug = debug;
        self
    }

    /// Validate the configuration
    ///
    /// The interface version may not claim to be newer than what this library
    /// implements.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let supported = InterfaceVersion::SUPPORTED;
        if self.interface.major != supported.major || self.interface.minor > supported.minor {
            return Err(ConfigError::Invalid(format!(
                "interface version {} is not implemented (supported: {})",
                self.interface, supported
            )));
        }
        if self.debug.log_filter.trim().is_empty() {
            return Err(ConfigError::Invalid("log filter cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl Config for PlatformBaseConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;

    #[test]
    fn test_default_is_valid() {
        let config = PlatformBaseConfig::default();
        assert_eq!(config.interface, InterfaceVersion::SUPPORTED);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_partial_file_uses_defaults() {
        let text = "[debug]\nforward_threshold = \"info\"\n";
        let config = PlatformBaseConfig::from_text(text, ConfigFormat::Toml).unwrap();
        assert_eq!(config.debug.forward_threshold, Severity::Info);
        assert_eq!(config.debug.log_filter, "warn");
        assert_eq!(config.interface, InterfaceVersion::SUPPORTED);
    }

    #[test]
    fn test_ron_round_trip() {
        let config = PlatformBaseConfig::default()
            .with_debug(DebugConfig::default().with_log_filter("egl_platform_base=trace"));
        let text = config.to_text(ConfigFormat::Ron).unwrap();
        assert_eq!(PlatformBaseConfig::from_text(&text, ConfigFormat::Ron).unwrap(), config);
    }

    #[test]
    fn test_newer_interface_is_rejected() {
        let config = PlatformBaseConfig::default().with_interface(InterfaceVersion::new(1, 9));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        let config = PlatformBaseConfig::default().with_interface(InterfaceVersion::new(2, 0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_extension_is_unsupported() {
        assert!(matches!(
            PlatformBaseConfig::load_from_file("platform.json"),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
