//! Callbacks provided by the driver when it loads a platform

use serde::{Deserialize, Serialize};

use crate::egl::{EglError, EglInt};

/// Opaque address of a resolved entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcAddress(pub usize);

/// Debug message severity, ordered from most to least severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// `EGL_DEBUG_MSG_CRITICAL_KHR`
    Critical,
    /// `EGL_DEBUG_MSG_ERROR_KHR`
    Error,
    /// `EGL_DEBUG_MSG_WARN_KHR`
    Warn,
    /// `EGL_DEBUG_MSG_INFO_KHR`
    Info,
}

impl Severity {
    /// The EGL enum for this severity
    pub const fn as_enum(self) -> EglInt {
        match self {
            Self::Critical => 0x33B9,
            Self::Error => 0x33BA,
            Self::Warn => 0x33BB,
            Self::Info => 0x33BC,
        }
    }

    /// The matching `log` level
    pub const fn log_level(self) -> log::Level {
        match self {
            Self::Critical | Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

/// Driver-side services the platform base calls back into
pub trait PlatformCallbacks: Send + Sync {
    /// Resolve another driver entry point by name
    fn get_proc_address(&self, name: &str) -> Option<ProcAddress>;

    /// Deliver a debug message to the application's debug callback
    fn debug_message(&self, severity: Severity, message: &str);

    /// Set the calling thread's current EGL error
    fn set_error(&self, error: EglError, severity: Severity, message: &str);
}
