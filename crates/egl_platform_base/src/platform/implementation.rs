//! Backend hook table
//!
//! A windowing-system backend implements `PlatformImpl`. The platform base
//! calls these hooks with the relevant display already locked, so a hook may
//! call back into the same display freely. Hooks must not touch a different
//! display, and `get_platform_display`/`is_same_display` run with the global
//! display list locked, so they must not call display-list operations.

use std::any::Any;

use crate::display::{Display, DisplayGuard, Surface};
use crate::egl::{Attrib, ConfigHandle, DriverDisplay, EglInt, NativeHandle, SurfaceHandle};
use crate::error::Result;
use crate::platform::PlatformData;

/// What a backend produces for a new display
pub struct DisplaySetup {
    /// Driver display the new display maps onto
    pub internal: DriverDisplay,
    /// Backend-private display data
    pub private: Option<Box<dyn Any + Send>>,
}

/// What a backend produces for a new window or pixmap surface
pub struct SurfaceSetup {
    /// Handle returned to the application
    pub external: SurfaceHandle,
    /// Driver surface currently backing it
    pub internal: SurfaceHandle,
    /// Backend-private surface data
    pub private: Option<Box<dyn Any + Send>>,
}

/// Hooks a backend provides
pub trait PlatformImpl: Send + Sync {
    /// Create the backend side of a new display
    fn get_platform_display(
        &self,
        platform: &PlatformData,
        native_display: NativeHandle,
        attribs: &[(Attrib, Attrib)],
    ) -> Result<DisplaySetup>;

    /// Whether an existing display can be handed out again for this request
    fn is_same_display(
        &self,
        _platform: &PlatformData,
        _display: &Display,
        _native_display: NativeHandle,
        _attribs: &[(Attrib, Attrib)],
    ) -> bool {
        true
    }

    /// Release backend resources for a display that is being unlinked
    fn cleanup_display(&self, _display: &DisplayGuard) {}

    /// Bring up the driver side of a display; returns the EGL version
    fn initialize_display(&self, display: &DisplayGuard) -> Result<(EglInt, EglInt)>;

    /// Shut down the driver side of a display
    fn terminate_display(&self, display: &DisplayGuard);

    /// Create a window surface
    fn create_window_surface(
        &self,
        display: &DisplayGuard,
        config: ConfigHandle,
        native_window: NativeHandle,
        attribs: &[(Attrib, Attrib)],
    ) -> Result<SurfaceSetup>;

    /// Create a pixmap surface
    fn create_pixmap_surface(
        &self,
        display: &DisplayGuard,
        config: ConfigHandle,
        native_pixmap: NativeHandle,
        attribs: &[(Attrib, Attrib)],
    ) -> Result<SurfaceSetup>;

    /// Physically destroy a surface that is no longer referenced
    fn destroy_surface(&self, display: &DisplayGuard, surface: &Surface);

    /// Present a window surface; `damage` is a flat list of x, y, w, h
    fn swap_buffers(&self, display: &DisplayGuard, surface: &Surface, damage: &[EglInt]) -> Result<()>;

    /// Release backend resources when the platform is unloaded
    fn cleanup_platform(&self, _platform: &PlatformData) {}
}
