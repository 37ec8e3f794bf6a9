//! Platform context
//!
//! One `PlatformData` exists per loaded backend. It owns the driver's function
//! table, the callbacks the driver handed over, the backend's hook table and
//! the registry of internal displays. The context is reference counted so
//! that a display operation already in flight keeps it alive while the
//! platform is being unloaded.

pub mod implementation;
pub mod internal_display;

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::callbacks::{PlatformCallbacks, Severity};
use crate::driver::Driver;
use crate::egl::{self, Attrib, DeviceHandle, EglError, EglInt, NativeHandle, PlatformKind};
use crate::error::{PlatformError, Result};
use crate::foundation::collections::PlatformKey;
use crate::foundation::refcount::RefCounted;

pub use implementation::{DisplaySetup, PlatformImpl, SurfaceSetup};
pub use internal_display::{InternalDisplay, InternalDisplayRef, InternalDisplayRegistry};

/// Shared handle to a platform context
pub type PlatformRef = RefCounted<PlatformData>;

/// External platform interface version negotiated with the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InterfaceVersion {
    /// Major version; must match exactly
    pub major: u32,
    /// Minor version; the driver may be newer
    pub minor: u32,
}

impl InterfaceVersion {
    /// The interface version this library implements
    pub const SUPPORTED: Self = Self { major: 1, minor: 1 };

    /// Create a version
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Whether a driver offering `requested` can load a platform built for `self`
    pub const fn accepts(self, requested: Self) -> bool {
        requested.major == self.major && requested.minor >= self.minor
    }
}

impl Default for InterfaceVersion {
    fn default() -> Self {
        Self::SUPPORTED
    }
}

impl fmt::Display for InterfaceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

bitflags! {
    /// Client extensions the driver advertises
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Extensions: u32 {
        /// `EGL_KHR_display_reference`
        const DISPLAY_REFERENCE = 1 << 0;
        /// `EGL_EXT_device_enumeration`
        const DEVICE_ENUMERATION = 1 << 1;
        /// `EGL_EXT_platform_device`
        const PLATFORM_DEVICE = 1 << 2;
    }
}

impl Extensions {
    /// Parse a client extension string
    pub fn from_extension_string(extensions: &str) -> Self {
        let mut flags = Self::empty();
        flags.set(Self::DISPLAY_REFERENCE, egl::has_extension(extensions, egl::EXT_DISPLAY_REFERENCE));
        flags.set(Self::DEVICE_ENUMERATION, egl::has_extension(extensions, egl::EXT_DEVICE_ENUMERATION));
        flags.set(Self::PLATFORM_DEVICE, egl::has_extension(extensions, egl::EXT_PLATFORM_DEVICE));
        flags
    }
}

/// Everything a backend supplies when it asks for a platform context
pub struct PlatformDescriptor {
    /// Interface version the driver offered
    pub version: InterfaceVersion,
    /// Platform enum this backend serves
    pub kind: PlatformKind,
    /// Driver function table
    pub driver: Arc<dyn Driver>,
    /// Driver callbacks
    pub callbacks: Arc<dyn PlatformCallbacks>,
    /// Backend hook table
    pub implementation: Arc<dyn PlatformImpl>,
    /// Backend-private platform data
    pub private: Option<Box<dyn Any + Send + Sync>>,
}

/// Per-backend platform context
pub struct PlatformData {
    key: PlatformKey,
    kind: PlatformKind,
    driver: Arc<dyn Driver>,
    callbacks: Arc<dyn PlatformCallbacks>,
    implementation: Arc<dyn PlatformImpl>,
    extensions: Extensions,
    forward_threshold: Severity,
    ready: AtomicBool,
    destroyed: AtomicBool,
    internal_displays: InternalDisplayRegistry,
    private: Option<Box<dyn Any + Send + Sync>>,
}

impl PlatformData {
    /// Build a context from a descriptor
    ///
    /// Fails with `VersionMismatch` if the driver's interface version is not
    /// one this library can serve.
    pub(crate) fn new(
        key: PlatformKey,
        descriptor: PlatformDescriptor,
        supported: InterfaceVersion,
        forward_threshold: Severity,
    ) -> Result<Self> {
        if !supported.accepts(descriptor.version) {
            return Err(PlatformError::VersionMismatch {
                requested: descriptor.version,
                supported,
            });
        }

        let client_extensions = descriptor
            .driver
            .query_string(egl::DriverDisplay::NONE, egl::EXTENSIONS)
            .unwrap_or_default();
        let extensions = Extensions::from_extension_string(&client_extensions);
        log::debug!(
            "Platform {:#x} sees client extensions {:?}",
            descriptor.kind.0,
            extensions
        );

        Ok(Self {
            key,
            kind: descriptor.kind,
            driver: descriptor.driver,
            callbacks: descriptor.callbacks,
            implementation: descriptor.implementation,
            extensions,
            forward_threshold,
            ready: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            internal_displays: InternalDisplayRegistry::new(),
            private: descriptor.private,
        })
    }

    /// Key of this platform in the platform list
    pub const fn key(&self) -> PlatformKey {
        self.key
    }

    /// The platform enum this context serves
    pub const fn kind(&self) -> PlatformKind {
        self.kind
    }

    /// The driver function table
    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    /// The driver callbacks
    pub fn callbacks(&self) -> &dyn PlatformCallbacks {
        self.callbacks.as_ref()
    }

    /// The backend hook table
    pub fn implementation(&self) -> &dyn PlatformImpl {
        self.implementation.as_ref()
    }

    /// Client extensions detected at allocation
    pub const fn extensions(&self) -> Extensions {
        self.extensions
    }

    /// Registry of internal displays owned by this platform
    pub const fn internal_displays(&self) -> &InternalDisplayRegistry {
        &self.internal_displays
    }

    /// Backend-private platform data
    pub fn private<T: Any>(&self) -> Option<&T> {
        self.private.as_ref()?.downcast_ref::<T>()
    }

    /// Whether `init_finish` has been called and teardown has not started
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) && !self.is_destroyed()
    }

    /// Whether teardown has started; no driver call may be made once set
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Latch the destroyed flag; returns false if it was already set
    pub(crate) fn mark_destroyed(&self) -> bool {
        !self.destroyed.swap(true, Ordering::AcqRel)
    }

    /// Set the calling thread's EGL error and emit the message
    pub fn set_error(&self, error: EglError, message: &str) {
        log::warn!("{}: {}", error, message);
        self.callbacks.set_error(error, Severity::Error, message);
    }

    /// Report a platform error to the application
    pub fn report(&self, error: &PlatformError) {
        self.set_error(error.egl_error(), &error.to_string());
    }

    /// Emit a debug message, forwarding it to the application if it is at
    /// least as severe as the configured threshold
    pub fn debug_message(&self, severity: Severity, message: &str) {
        log::log!(severity.log_level(), "{}", message);
        if severity <= self.forward_threshold {
            self.callbacks.debug_message(severity, message);
        }
    }

    /// Look up (or start tracking) the internal display for a driver handle
    pub fn lookup_internal_display(&self, handle: egl::DriverDisplay) -> InternalDisplayRef {
        self.internal_displays.lookup_or_create(handle)
    }

    /// Get the internal display for a device
    ///
    /// Asks the driver for the device platform display, requesting reference
    /// tracking when the driver supports it.
    pub fn device_internal_display(&self, device: DeviceHandle) -> Result<InternalDisplayRef> {
        if self.is_destroyed() {
            return Err(PlatformError::PlatformNotReady);
        }
        let mut attribs: Vec<(Attrib, Attrib)> = Vec::new();
        if self.extensions.contains(Extensions::DISPLAY_REFERENCE) {
            attribs.push((egl::TRACK_REFERENCES, egl::TRUE));
        }
        let handle = self
            .driver
            .get_platform_display(PlatformKind::DEVICE, NativeHandle(device.raw()), &attribs)?;
        Ok(self.lookup_internal_display(handle))
    }

    /// Initialize an internal display; see [`InternalDisplayRegistry`]
    pub fn initialize_internal_display(&self, display: &InternalDisplay) -> Result<(EglInt, EglInt)> {
        display.initialize(self)
    }

    /// Terminate one initialization of an internal display
    pub fn terminate_internal_display(&self, display: &InternalDisplay) -> Result<()> {
        display.terminate(self)
    }

    /// Every device the driver can enumerate
    pub fn get_all_devices(&self) -> Result<Vec<DeviceHandle>> {
        if self.is_destroyed() {
            return Ok(Vec::new());
        }
        let count = self.driver.query_devices(None)?;
        let mut devices = Vec::new();
        devices
            .try_reserve_exact(count)
            .map_err(|e| PlatformError::AllocationFailure(e.to_string()))?;
        devices.resize(count, DeviceHandle::NONE);
        let written = self.driver.query_devices(Some(&mut devices))?;
        devices.truncate(written);
        Ok(devices)
    }
}

impl fmt::Debug for PlatformData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformData")
            .field("kind", &format_args!("{:#x}", self.kind.0))
            .field("extensions", &self.extensions)
            .field("ready", &self.ready.load(Ordering::Relaxed))
            .field("destroyed", &self.destroyed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::headless::{headless_descriptor, HeadlessDriver};
    use crate::PlatformBase;

    fn platform_with_devices(count: usize) -> (PlatformBase, PlatformRef, Arc<HeadlessDriver>) {
        crate::foundation::logging::init_for_tests();
        let base = PlatformBase::default();
        let driver = Arc::new(HeadlessDriver::with_devices(count));
        let platform = base.allocate_platform(headless_descriptor(Arc::clone(&driver))).unwrap();
        base.init_finish(&platform);
        (base, platform, driver)
    }

    #[test]
    fn test_all_devices_are_enumerated() {
        let (base, platform, driver) = platform_with_devices(3);
        let devices = base.get_all_devices(&platform).unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices, driver.devices());
        assert!(devices.iter().all(|d| *d != DeviceHandle::NONE));
    }

    #[test]
    fn test_default_display_without_devices_is_bad_display() {
        let (base, platform, _driver) = platform_with_devices(0);
        assert!(base.get_all_devices(&platform).unwrap().is_empty());
        assert_eq!(
            base.get_platform_display(&platform, NativeHandle::NONE, &[]).err(),
            Some(PlatformError::Driver(EglError::BAD_DISPLAY))
        );
        assert_eq!(base.display_count(), 0);
    }

    #[test]
    fn test_destroyed_platform_enumerates_nothing() {
        let (base, platform, _driver) = platform_with_devices(2);
        let handle = platform.retain();
        base.unload_platform(platform);
        assert!(base.get_all_devices(&handle).unwrap().is_empty());
    }
}
