//! Headless backend
//!
//! A complete in-memory backend: a driver, a windowing implementation and
//! recording callbacks. It needs no GPU or window system, which makes it the
//! backend the tests and the soak binary run against.

pub mod callbacks;
pub mod driver;
pub mod platform;

use std::sync::Arc;

pub use callbacks::RecordingCallbacks;
pub use driver::{DriverCalls, HeadlessDriver, HEADLESS_VERSION};
pub use platform::{HeadlessDisplay, HeadlessPlatform, HeadlessSurface, HookCalls};

use crate::egl::{EglError, PlatformKind};
use crate::platform::{InterfaceVersion, PlatformData, PlatformDescriptor};

/// Platform-private data of a headless platform
pub struct HeadlessShared {
    /// The backend instance serving the platform
    pub backend: Arc<HeadlessPlatform>,
    /// The callbacks handed to the platform
    pub callbacks: Arc<RecordingCallbacks>,
}

impl HeadlessShared {
    /// The headless data of `platform`, if it is a headless platform
    pub fn of(platform: &PlatformData) -> Option<&Self> {
        platform.private::<Self>()
    }
}

/// Descriptor for a headless platform on top of `driver`
pub fn headless_descriptor(driver: Arc<HeadlessDriver>) -> PlatformDescriptor {
    let backend = Arc::new(HeadlessPlatform::new());
    let callbacks = Arc::new(RecordingCallbacks::new());
    PlatformDescriptor {
        version: InterfaceVersion::SUPPORTED,
        kind: PlatformKind::SURFACELESS,
        driver,
        callbacks: callbacks.clone(),
        implementation: backend.clone(),
        private: Some(Box::new(HeadlessShared { backend, callbacks })),
    }
}

/// Errors the platform's callbacks have recorded
pub fn recorded_errors(platform: &PlatformData) -> Vec<(EglError, String)> {
    HeadlessShared::of(platform).map(|s| s.callbacks.errors()).unwrap_or_default()
}

#[cfg(test)]
pub(crate) fn test_platform() -> (crate::PlatformBase, crate::platform::PlatformRef, Arc<HeadlessDriver>) {
    crate::foundation::logging::init_for_tests();
    let base = crate::PlatformBase::default();
    let driver = Arc::new(HeadlessDriver::new());
    let platform = base
        .allocate_platform(headless_descriptor(Arc::clone(&driver)))
        .expect("headless platform allocates");
    base.init_finish(&platform);
    (base, platform, driver)
}

#[cfg(test)]
pub(crate) fn test_platform_with_display(
    track_references: bool,
) -> (crate::PlatformBase, crate::platform::PlatformRef, Arc<HeadlessDriver>, crate::egl::DisplayHandle) {
    use crate::egl::{self, NativeHandle};

    let (base, platform, driver) = test_platform();
    let attribs = if track_references { vec![(egl::TRACK_REFERENCES, egl::TRUE)] } else { Vec::new() };
    let display = base
        .get_platform_display(&platform, NativeHandle(0x100), &attribs)
        .expect("headless display is created");
    (base, platform, driver, display)
}
