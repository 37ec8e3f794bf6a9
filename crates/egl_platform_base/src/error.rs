//! Error types for the platform base

use thiserror::Error;

use crate::egl::EglError;
use crate::platform::InterfaceVersion;

/// Convenience alias used across the crate
pub type Result<T, E = PlatformError> = std::result::Result<T, E>;

/// What kind of handle failed to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// An application-facing display
    Display,
    /// A surface on a display
    Surface,
    /// A loaded platform
    Platform,
}

/// Errors raised by the lifecycle engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// The handle does not resolve to a tracked object
    #[error("{kind:?} handle {handle:#x} is not tracked")]
    NotFound {
        /// Kind of object that was looked up
        kind: HandleKind,
        /// Raw handle value
        handle: u64,
    },

    /// The operation requires a prior successful initialize
    #[error("display {0:#x} is not initialized")]
    NotInitialized(u64),

    /// The display was terminated while busy and is waiting to be torn down
    #[error("display {0:#x} is terminating")]
    TerminatePending(u64),

    /// Out of memory while creating an object
    #[error("allocation failed: {0}")]
    AllocationFailure(String),

    /// The driver reported a failure; its own code is preserved
    #[error("driver error: {0}")]
    Driver(#[from] EglError),

    /// The driver asked for an interface version we cannot provide
    #[error("interface version {requested} is not compatible with {supported}")]
    VersionMismatch {
        /// Version requested by the driver
        requested: InterfaceVersion,
        /// Version this library implements
        supported: InterfaceVersion,
    },

    /// The platform has not finished initializing, or is being torn down
    #[error("platform is not ready")]
    PlatformNotReady,

    /// Caller misuse, such as unbalanced lock and unlock
    #[error("contract violation: {0}")]
    ContractViolation(String),
}

impl PlatformError {
    /// Shorthand for a display that could not be found
    pub const fn display_not_found(handle: u64) -> Self {
        Self::NotFound { kind: HandleKind::Display, handle }
    }

    /// Shorthand for a surface that could not be found
    pub const fn surface_not_found(handle: u64) -> Self {
        Self::NotFound { kind: HandleKind::Surface, handle }
    }

    /// The EGL error code a consuming layer should report for this error
    pub const fn egl_error(&self) -> EglError {
        match self {
            Self::NotFound { kind: HandleKind::Display, .. } => EglError::BAD_DISPLAY,
            Self::NotFound { kind: HandleKind::Surface, .. } => EglError::BAD_SURFACE,
            Self::NotFound { kind: HandleKind::Platform, .. } | Self::VersionMismatch { .. } => {
                EglError::BAD_PARAMETER
            }
            Self::NotInitialized(_) | Self::TerminatePending(_) | Self::PlatformNotReady => {
                EglError::NOT_INITIALIZED
            }
            Self::AllocationFailure(_) => EglError::BAD_ALLOC,
            Self::Driver(code) => *code,
            Self::ContractViolation(_) => EglError::BAD_ACCESS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_codes_pass_through() {
        let err = PlatformError::from(EglError::BAD_MATCH);
        assert_eq!(err.egl_error(), EglError::BAD_MATCH);
    }

    #[test]
    fn test_lookup_errors_map_to_standard_codes() {
        assert_eq!(PlatformError::display_not_found(1).egl_error(), EglError::BAD_DISPLAY);
        assert_eq!(PlatformError::surface_not_found(1).egl_error(), EglError::BAD_SURFACE);
        assert_eq!(PlatformError::NotInitialized(1).egl_error(), EglError::NOT_INITIALIZED);
        assert_eq!(PlatformError::TerminatePending(1).egl_error(), EglError::NOT_INITIALIZED);
    }
}
