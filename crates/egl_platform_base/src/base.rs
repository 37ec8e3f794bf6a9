//! Top-level platform base context
//!
//! `PlatformBase` owns everything that would otherwise be process-wide state:
//! the loaded platforms, the global display list and each thread's current
//! bindings. The entry points a backend exposes to the driver are methods on
//! it.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::config::PlatformBaseConfig;
use crate::display::{
    CurrentBindings, Display, DisplayGuard, DisplayList, DisplayListGuard, DisplayRef, SurfaceKind,
};
use crate::display::current::CurrentBinding;
use crate::egl::{
    self, Attrib, ConfigHandle, ContextHandle, DeviceHandle, DisplayHandle, EglError, EglInt, NativeHandle,
    StreamHandle, SurfaceHandle,
};
use crate::error::{PlatformError, Result};
use crate::foundation::collections::{HandleMap, PlatformKey};
use crate::foundation::refcount::RefCounted;
use crate::platform::{PlatformData, PlatformDescriptor, PlatformRef};

/// Shared state for every backend loaded into the process
pub struct PlatformBase {
    config: PlatformBaseConfig,
    platforms: Mutex<HandleMap<PlatformKey, PlatformRef>>,
    displays: DisplayList,
    current: CurrentBindings,
}

impl PlatformBase {
    /// Create an empty context
    pub fn new(config: PlatformBaseConfig) -> Self {
        log::info!("Platform base serving interface {}", config.interface);
        Self {
            config,
            platforms: Mutex::new(HandleMap::with_key()),
            displays: DisplayList::new(),
            current: CurrentBindings::new(),
        }
    }

    /// The configuration this context was created with
    pub const fn config(&self) -> &PlatformBaseConfig {
        &self.config
    }

    fn platforms(&self) -> MutexGuard<'_, HandleMap<PlatformKey, PlatformRef>> {
        self.platforms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- platform lifecycle ----

    /// Allocate a platform context for a backend
    ///
    /// Fails if the driver's interface version is incompatible. On success the
    /// platform is listed but not ready; the backend must follow up with
    /// exactly one of [`init_finish`](Self::init_finish) or
    /// [`init_fail`](Self::init_fail).
    pub fn allocate_platform(&self, descriptor: PlatformDescriptor) -> Result<PlatformRef> {
        let supported = self.config.interface;
        let threshold = self.config.debug.forward_threshold;
        let kind = descriptor.kind;

        let mut platforms = self.platforms();
        let key = platforms.try_insert_with_key(|key| {
            PlatformData::new(key, descriptor, supported, threshold).map(|data| {
                RefCounted::with_destructor(data, |p| {
                    log::debug!("Platform {:#x} freed", p.kind().0);
                })
            })
        })?;
        log::info!("Allocated platform {:#x}", kind.0);
        Ok(platforms[key].retain())
    }

    /// Mark a platform ready after the backend finished its own setup
    pub fn init_finish(&self, platform: &PlatformRef) {
        platform.mark_ready();
        log::info!("Platform {:#x} ready", platform.kind().0);
    }

    /// Unwind a platform whose backend setup failed
    pub fn init_fail(&self, platform: PlatformRef) {
        platform.mark_destroyed();
        self.platforms().remove(platform.key());
        platform.internal_displays().teardown(&platform);
        log::warn!("Platform {:#x} failed to initialize", platform.kind().0);
    }

    /// Tear a platform down
    ///
    /// Sets the destroyed latch first, so no driver call is made from here on.
    /// Every display of the platform is unlinked and its surfaces freed, the
    /// internal display registry is drained, and the backend gets its
    /// `cleanup_platform` call. Calls still in flight on other threads keep
    /// the context alive until they return.
    pub fn unload_platform(&self, platform: PlatformRef) {
        if !platform.mark_destroyed() {
            log::debug!("Platform {:#x} already unloading", platform.kind().0);
            return;
        }
        self.platforms().remove(platform.key());

        let displays = self.displays.lock().drain_platform(platform.key());
        log::debug!("Unloading platform {:#x} with {} displays", platform.kind().0, displays.len());
        for display in displays {
            self.unlink_display(display);
        }

        platform.internal_displays().teardown(&platform);
        platform.implementation().cleanup_platform(&platform);
        log::info!("Platform {:#x} unloaded", platform.kind().0);
    }

    /// Look up a loaded platform by key
    pub fn platform(&self, key: PlatformKey) -> Option<PlatformRef> {
        self.platforms().get(key).map(RefCounted::retain)
    }

    /// Number of loaded platforms
    pub fn platform_count(&self) -> usize {
        self.platforms().len()
    }

    // ---- displays ----

    /// `eglGetPlatformDisplay`
    ///
    /// Hands out an existing display when one matches the platform, native
    /// display, reference-tracking mode and the backend's `is_same_display`;
    /// otherwise asks the backend for a new one. `EGL_TRACK_REFERENCES_KHR`
    /// is consumed here and not passed on.
    pub fn get_platform_display(
        &self,
        platform: &PlatformRef,
        native_display: NativeHandle,
        attribs: &[(Attrib, Attrib)],
    ) -> Result<DisplayHandle> {
        if !platform.is_ready() {
            return Err(PlatformError::PlatformNotReady);
        }
        let track_references =
            egl::find_attrib(attribs, egl::TRACK_REFERENCES).is_some_and(|v| v != egl::FALSE);
        let attribs: Vec<(Attrib, Attrib)> =
            attribs.iter().filter(|(k, _)| *k != egl::TRACK_REFERENCES).copied().collect();
        let implementation = platform.implementation();

        let mut list = self.displays.lock();
        // `unload_platform` latches before it takes the list lock.
        if platform.is_destroyed() {
            return Err(PlatformError::PlatformNotReady);
        }
        let existing = list.iter().find(|d| {
            d.platform_key() == platform.key()
                && d.native_display() == native_display
                && d.track_references() == track_references
                && !d.is_unlinked()
                && implementation.is_same_display(platform, d, native_display, &attribs)
        });
        if let Some(display) = existing {
            return Ok(display.handle());
        }

        let setup = implementation.get_platform_display(platform, native_display, &attribs)?;
        let display = list.insert_with(|key| Display::new(key, platform, native_display, track_references, setup));
        log::debug!(
            "Created display {:#x} for native display {:#x} (track references: {})",
            display.handle(),
            native_display,
            track_references
        );
        Ok(display.handle())
    }

    /// Lock a display without requiring it to be initialized
    pub fn lookup_display(&self, handle: DisplayHandle) -> Result<DisplayGuard> {
        let (display, platform) = {
            let list = self.displays.lock();
            let display = list
                .get(handle)
                .ok_or_else(|| PlatformError::display_not_found(handle.raw()))?
                .retain();
            let platform = display.platform().ok_or(PlatformError::PlatformNotReady)?;
            (display, platform)
        };
        let guard = DisplayGuard::lock(display, platform);
        if guard.is_unlinked() {
            return Err(PlatformError::display_not_found(handle.raw()));
        }
        Ok(guard)
    }

    /// Lock an initialized display and count one use
    ///
    /// The use ends when the guard is dropped.
    pub fn acquire_display(&self, handle: DisplayHandle) -> Result<DisplayGuard> {
        self.lookup_display(handle)?.begin_use()
    }

    /// `eglInitialize`
    pub fn initialize_display(&self, handle: DisplayHandle) -> Result<(EglInt, EglInt)> {
        self.lookup_display(handle)?.initialize()
    }

    /// `eglTerminate`
    pub fn terminate_display(&self, handle: DisplayHandle) -> Result<()> {
        self.lookup_display(handle)?.terminate()
    }

    /// Whether the display was created with `EGL_TRACK_REFERENCES_KHR`
    pub fn query_track_references(&self, handle: DisplayHandle) -> Result<bool> {
        Ok(self.lookup_display(handle)?.track_references())
    }

    /// Lock the global display list
    pub fn lock_display_list(&self) -> DisplayListGuard<'_> {
        self.displays.lock()
    }

    /// Finish tearing down a display taken out of the list with
    /// [`DisplayListGuard::remove`]
    pub fn unlink_display(&self, display: DisplayRef) {
        let Some(platform) = display.platform() else {
            return;
        };
        let bindings = self.current.take_for_display(display.key());
        let guard = DisplayGuard::lock(display, platform);
        for binding in bindings {
            guard.unbind_current(binding);
        }
        guard.unlink();
    }

    /// Drop every display of `platform` made for `native_display`
    ///
    /// Backends call this when the windowing system tells them a native
    /// display is gone. Returns the number of displays unlinked.
    pub fn invalidate_native_display(&self, platform: &PlatformData, native_display: NativeHandle) -> usize {
        let removed: Vec<DisplayRef> = {
            let mut list = self.displays.lock();
            list.find_native(platform.key(), native_display)
                .into_iter()
                .filter_map(|handle| list.remove(handle))
                .collect()
        };
        let count = removed.len();
        for display in removed {
            self.unlink_display(display);
        }
        count
    }

    /// Number of displays in the global list
    pub fn display_count(&self) -> usize {
        self.displays.lock().len()
    }

    // ---- surfaces ----

    /// `eglCreateWindowSurface`
    pub fn create_window_surface(
        &self,
        handle: DisplayHandle,
        config: ConfigHandle,
        native_window: NativeHandle,
        attribs: &[(Attrib, Attrib)],
    ) -> Result<SurfaceHandle> {
        let guard = self.acquire_display(handle)?;
        let setup = guard.platform().implementation().create_window_surface(&guard, config, native_window, attribs)?;
        Ok(guard.insert_surface(SurfaceKind::Window, setup).external())
    }

    /// `eglCreatePixmapSurface`
    pub fn create_pixmap_surface(
        &self,
        handle: DisplayHandle,
        config: ConfigHandle,
        native_pixmap: NativeHandle,
        attribs: &[(Attrib, Attrib)],
    ) -> Result<SurfaceHandle> {
        let guard = self.acquire_display(handle)?;
        let setup = guard.platform().implementation().create_pixmap_surface(&guard, config, native_pixmap, attribs)?;
        Ok(guard.insert_surface(SurfaceKind::Pixmap, setup).external())
    }

    /// `eglCreatePbufferSurface`; pbuffers go straight to the driver and are
    /// not tracked
    pub fn create_pbuffer_surface(
        &self,
        handle: DisplayHandle,
        config: ConfigHandle,
        attribs: &[(Attrib, Attrib)],
    ) -> Result<SurfaceHandle> {
        let guard = self.acquire_display(handle)?;
        Ok(guard.platform().driver().create_pbuffer_surface(guard.internal_display(), config, attribs)?)
    }

    /// `eglCreateStreamProducerSurfaceKHR`; not tracked
    pub fn create_stream_producer_surface(
        &self,
        handle: DisplayHandle,
        config: ConfigHandle,
        stream: StreamHandle,
        attribs: &[(EglInt, EglInt)],
    ) -> Result<SurfaceHandle> {
        let guard = self.acquire_display(handle)?;
        Ok(guard
            .platform()
            .driver()
            .create_stream_producer_surface(guard.internal_display(), config, stream, attribs)?)
    }

    /// `eglDestroySurface`
    ///
    /// A tracked surface is marked deleted and freed once nothing holds it.
    /// Anything else is passed to the driver.
    pub fn destroy_surface(&self, handle: DisplayHandle, surface: SurfaceHandle) -> Result<()> {
        let guard = self.acquire_display(handle)?;
        if guard.owns_surface(surface) {
            return guard.delete_surface(surface);
        }
        if guard.platform().is_destroyed() {
            return Ok(());
        }
        Ok(guard.platform().driver().destroy_surface(guard.internal_display(), surface)?)
    }

    /// `eglSwapBuffers` / `eglSwapBuffersWithDamageEXT`
    ///
    /// `damage` is a flat list of x, y, width, height; empty means the whole
    /// surface.
    pub fn swap_buffers(&self, handle: DisplayHandle, surface: SurfaceHandle, damage: &[EglInt]) -> Result<()> {
        let guard = self.acquire_display(handle)?;
        if let Some(tracked) = guard.acquire_surface(surface) {
            return guard.platform().implementation().swap_buffers(&guard, &tracked, damage);
        }
        if guard.owns_surface(surface) {
            return Err(PlatformError::surface_not_found(surface.raw()));
        }
        let driver = guard.platform().driver();
        if damage.is_empty() {
            driver.swap_buffers(guard.internal_display(), surface)?;
        } else {
            driver.swap_buffers_with_damage(guard.internal_display(), surface, damage)?;
        }
        Ok(())
    }

    /// `eglMakeCurrent`
    ///
    /// Tracked surfaces are translated to their driver surfaces. On success
    /// the calling thread's binding moves to the new surfaces; surfaces it
    /// held before are released, and freed if they were destroyed while
    /// current.
    pub fn make_current(
        &self,
        handle: DisplayHandle,
        draw: SurfaceHandle,
        read: SurfaceHandle,
        context: ContextHandle,
    ) -> Result<()> {
        let guard = self.acquire_display(handle)?;
        for requested in [draw, read] {
            if !guard.is_tracked_surface(requested) && guard.owns_surface(requested) {
                return Err(PlatformError::surface_not_found(requested.raw()));
            }
        }
        let draw_ref = guard.find_surface(draw);
        let read_ref = guard.find_surface(read);
        let internal_draw = draw_ref.as_ref().map_or(draw, |s| s.internal());
        let internal_read = read_ref.as_ref().map_or(read, |s| s.internal());

        if !guard.platform().is_destroyed() {
            guard
                .platform()
                .driver()
                .make_current(guard.internal_display(), internal_draw, internal_read, context)?;
        }

        let binding = if context.is_none() && draw_ref.is_none() && read_ref.is_none() {
            None
        } else {
            Some(guard.bind_current(draw_ref, read_ref))
        };
        let previous = self.current.replace_current(binding);
        let elsewhere = match previous {
            Some(previous) if previous.display().key() == guard.key() => {
                guard.unbind_current(previous);
                None
            }
            other => other,
        };
        drop(guard);

        if let Some(previous) = elsewhere {
            self.unbind_elsewhere(previous);
        }
        Ok(())
    }

    /// `eglReleaseThread`: drop whatever the calling thread has current
    ///
    /// The binding is only dropped once the driver has released the thread,
    /// so a failed release leaves every surface current.
    pub fn release_current(&self) -> Result<()> {
        let Some(display) = self.current.current_display_ref() else {
            return Ok(());
        };
        let Some(platform) = display.platform() else {
            self.current.replace_current(None);
            return Ok(());
        };
        let guard = DisplayGuard::lock(display, platform);
        if !guard.platform().is_destroyed() {
            guard.platform().driver().make_current(
                guard.internal_display(),
                SurfaceHandle::NONE,
                SurfaceHandle::NONE,
                ContextHandle::NONE,
            )?;
        }

        // The display may have been unlinked meanwhile, taking the binding with it.
        let elsewhere = match self.current.replace_current(None) {
            Some(binding) if binding.display().key() == guard.key() => {
                guard.unbind_current(binding);
                None
            }
            other => other,
        };
        drop(guard);
        if let Some(binding) = elsewhere {
            self.unbind_elsewhere(binding);
        }
        Ok(())
    }

    fn unbind_elsewhere(&self, binding: CurrentBinding) {
        let display = binding.display().retain();
        match display.platform() {
            Some(platform) => DisplayGuard::lock(display, platform).unbind_current(binding),
            None => drop(binding),
        }
    }

    /// Display the calling thread has current
    pub fn current_display(&self) -> Option<DisplayHandle> {
        self.current.current_display()
    }

    /// The per-thread current bindings
    pub const fn current_bindings(&self) -> &CurrentBindings {
        &self.current
    }

    // ---- misc ----

    /// Every device the platform's driver can enumerate
    pub fn get_all_devices(&self, platform: &PlatformData) -> Result<Vec<DeviceHandle>> {
        platform.get_all_devices()
    }

    /// Set the calling thread's EGL error through the platform's callbacks
    pub fn set_error(&self, platform: &PlatformData, error: EglError, message: &str) {
        platform.set_error(error, message);
    }
}

impl Default for PlatformBase {
    fn default() -> Self {
        Self::new(PlatformBaseConfig::default())
    }
}

impl Drop for PlatformBase {
    fn drop(&mut self) {
        let remaining: Vec<PlatformRef> = self.platforms().values().map(RefCounted::retain).collect();
        for platform in remaining {
            self.unload_platform(platform);
        }
    }
}
