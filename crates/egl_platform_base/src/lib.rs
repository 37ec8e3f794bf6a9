//! # EGL Platform Base
//!
//! Shared display and surface bookkeeping for EGL external platform
//! backends.
//!
//! ## Features
//!
//! - **Reference counting**: displays, surfaces, platforms and driver
//!   displays are shared handles freed by their last owner
//! - **Reentrant display locks**: a backend hook may call back into the
//!   display it was called for
//! - **Deferred teardown**: terminating a busy display, or destroying a
//!   current surface, completes once the last user lets go
//! - **Display references**: `EGL_KHR_display_reference` semantics even
//!   when the driver lacks them
//! - **Current-surface switching**: a backend can swap the driver surface
//!   behind a current surface without the application noticing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use egl_platform_base::prelude::*;
//! use egl_platform_base::backends::headless::{headless_descriptor, HeadlessDriver};
//!
//! fn main() -> Result<(), PlatformError> {
//!     let base = PlatformBase::new(PlatformBaseConfig::default());
//!     let platform = base.allocate_platform(headless_descriptor(Arc::new(HeadlessDriver::new())))?;
//!     base.init_finish(&platform);
//!
//!     let display = base.get_platform_display(&platform, NativeHandle(1), &[])?;
//!     let (major, minor) = base.initialize_display(display)?;
//!     println!("EGL {major}.{minor}");
//!     base.terminate_display(display)?;
//!
//!     base.unload_platform(platform);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

// Core modules
pub mod core;
pub mod foundation;

pub mod backends;
pub mod callbacks;
pub mod config;
pub mod display;
pub mod driver;
pub mod egl;
pub mod error;
pub mod platform;

mod base;

#[cfg(test)]
mod tests;

pub use base::PlatformBase;
pub use error::{PlatformError, Result};

/// Common imports for backend authors
pub mod prelude {
    pub use crate::{
        callbacks::{PlatformCallbacks, Severity},
        core::{Config, DebugConfig, PlatformBaseConfig},
        display::{Display, DisplayGuard, Surface, SurfaceGuard, SurfaceKind},
        driver::Driver,
        egl::{
            Attrib, ConfigHandle, ContextHandle, DeviceHandle, DisplayHandle, DriverDisplay, EglError,
            EglInt, NativeHandle, PlatformKind, SurfaceHandle,
        },
        platform::{
            DisplaySetup, InterfaceVersion, PlatformData, PlatformDescriptor, PlatformImpl, PlatformRef,
            SurfaceSetup,
        },
        PlatformBase, PlatformError,
    };
}
