//! Headless windowing backend
//!
//! Native windows and pixmaps are plain handles; each is backed by a driver
//! pbuffer. Windows can be resized from the outside, and the next swap
//! reallocates the backing pbuffer and swaps it in through the
//! current-surface switch, the way a real window-system backend handles a
//! resize.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::callbacks::Severity;
use crate::display::{Display, DisplayGuard, Surface, SurfaceKind};
use crate::egl::{Attrib, ConfigHandle, EglError, EglInt, NativeHandle};
use crate::error::{PlatformError, Result};
use crate::platform::{DisplaySetup, InternalDisplayRef, PlatformData, PlatformImpl, SurfaceSetup};

/// How many times each backend hook ran
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HookCalls {
    /// `get_platform_display`
    pub get_platform_display: usize,
    /// `initialize_display`
    pub initialize_display: usize,
    /// `terminate_display`
    pub terminate_display: usize,
    /// `create_window_surface` and `create_pixmap_surface`
    pub create_surface: usize,
    /// `destroy_surface`
    pub destroy_surface: usize,
    /// `swap_buffers`
    pub swap_buffers: usize,
    /// Swaps that reallocated a resized window
    pub resizes: usize,
    /// `cleanup_display`
    pub cleanup_display: usize,
    /// `cleanup_platform`
    pub cleanup_platform: usize,
}

/// Private data of a headless display
#[derive(Debug)]
pub struct HeadlessDisplay {
    internal: InternalDisplayRef,
}

impl HeadlessDisplay {
    /// The driver display record this display maps onto
    pub const fn internal(&self) -> &InternalDisplayRef {
        &self.internal
    }
}

/// Private data of a headless window or pixmap surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessSurface {
    /// Native window or pixmap
    pub native: NativeHandle,
    /// Config the surface was created with
    pub config: ConfigHandle,
    /// Size of the backing pbuffer
    pub size: (u32, u32),
}

/// The headless `PlatformImpl`
#[derive(Default)]
pub struct HeadlessPlatform {
    hooks: Mutex<HookCalls>,
    windows: Mutex<HashMap<NativeHandle, (u32, u32)>>,
}

impl HeadlessPlatform {
    /// A backend with no known windows
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self, f: impl FnOnce(&mut HookCalls)) {
        f(&mut self.hooks.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn windows(&self) -> MutexGuard<'_, HashMap<NativeHandle, (u32, u32)>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of this backend's hook counters
    pub fn calls(&self) -> HookCalls {
        *self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hook counters of the headless backend serving `platform`
    pub fn hook_calls(platform: &PlatformData) -> HookCalls {
        platform.private::<super::HeadlessShared>().map(|s| s.backend.calls()).unwrap_or_default()
    }

    /// Change the size of a native window; takes effect on the next swap
    pub fn resize_window(&self, native_window: NativeHandle, width: u32, height: u32) {
        self.windows().insert(native_window, (width, height));
    }

    fn window_size(&self, native_window: NativeHandle) -> (u32, u32) {
        *self.windows().entry(native_window).or_insert((64, 64))
    }

    fn internal_of(display: &DisplayGuard) -> Result<InternalDisplayRef> {
        display
            .with_private(|p: &mut HeadlessDisplay| p.internal.retain())
            .ok_or_else(|| PlatformError::ContractViolation("display has no headless data".to_string()))
    }

    fn create_backed_surface(
        &self,
        display: &DisplayGuard,
        config: ConfigHandle,
        native: NativeHandle,
        size: (u32, u32),
        attribs: &[(Attrib, Attrib)],
    ) -> Result<SurfaceSetup> {
        if native.is_none() {
            return Err(EglError::BAD_NATIVE_WINDOW.into());
        }
        let pbuffer = display.platform().driver().create_pbuffer_surface(display.internal_display(), config, attribs)?;
        self.bump(|c| c.create_surface += 1);
        Ok(SurfaceSetup {
            external: pbuffer,
            internal: pbuffer,
            private: Some(Box::new(HeadlessSurface { native, config, size })),
        })
    }

    fn reallocate_if_resized(&self, display: &DisplayGuard, surface: &Surface) -> Result<()> {
        let Some(info) = surface.with_private(|s: &mut HeadlessSurface| *s) else {
            return Ok(());
        };
        let size = self.window_size(info.native);
        if size == info.size {
            return Ok(());
        }

        let driver = display.platform().driver();
        let fresh = driver.create_pbuffer_surface(display.internal_display(), info.config, &[])?;
        let old = match display.replace_internal_surface(surface, fresh) {
            Ok(old) => old,
            Err(e) => {
                if let Err(cleanup) = driver.destroy_surface(display.internal_display(), fresh) {
                    log::warn!("Failed to free pbuffer {:#x}: {}", fresh, cleanup);
                }
                return Err(e);
            }
        };
        // The application-facing handle is the first pbuffer; keep it alive
        // for as long as the surface exists.
        if old != surface.external() {
            driver.destroy_surface(display.internal_display(), old)?;
        }
        surface.with_private(|s: &mut HeadlessSurface| s.size = size);
        self.bump(|c| c.resizes += 1);
        display.platform().debug_message(
            Severity::Info,
            &format!("surface {:#x} resized to {}x{}", surface.external(), size.0, size.1),
        );
        Ok(())
    }
}

impl PlatformImpl for HeadlessPlatform {
    fn get_platform_display(
        &self,
        platform: &PlatformData,
        native_display: NativeHandle,
        attribs: &[(Attrib, Attrib)],
    ) -> Result<DisplaySetup> {
        // The default display is the first device.
        let internal = if native_display.is_none() {
            let device = platform
                .get_all_devices()?
                .first()
                .copied()
                .ok_or(PlatformError::Driver(EglError::BAD_DISPLAY))?;
            platform.device_internal_display(device)?
        } else {
            let handle = platform.driver().get_platform_display(platform.kind(), native_display, attribs)?;
            platform.lookup_internal_display(handle)
        };
        self.bump(|c| c.get_platform_display += 1);
        Ok(DisplaySetup { internal: internal.handle(), private: Some(Box::new(HeadlessDisplay { internal })) })
    }

    fn is_same_display(
        &self,
        _platform: &PlatformData,
        _display: &Display,
        _native_display: NativeHandle,
        attribs: &[(Attrib, Attrib)],
    ) -> bool {
        // Any other attribute asks for a distinct display.
        attribs.is_empty()
    }

    fn cleanup_display(&self, _display: &DisplayGuard) {
        self.bump(|c| c.cleanup_display += 1);
    }

    fn initialize_display(&self, display: &DisplayGuard) -> Result<(EglInt, EglInt)> {
        let internal = Self::internal_of(display)?;
        let version = display.platform().initialize_internal_display(&internal)?;
        self.bump(|c| c.initialize_display += 1);
        Ok(version)
    }

    fn terminate_display(&self, display: &DisplayGuard) {
        self.bump(|c| c.terminate_display += 1);
        let result = Self::internal_of(display)
            .and_then(|internal| display.platform().terminate_internal_display(&internal));
        if let Err(e) = result {
            display.platform().report(&e);
        }
    }

    fn create_window_surface(
        &self,
        display: &DisplayGuard,
        config: ConfigHandle,
        native_window: NativeHandle,
        attribs: &[(Attrib, Attrib)],
    ) -> Result<SurfaceSetup> {
        let size = self.window_size(native_window);
        self.create_backed_surface(display, config, native_window, size, attribs)
    }

    fn create_pixmap_surface(
        &self,
        display: &DisplayGuard,
        config: ConfigHandle,
        native_pixmap: NativeHandle,
        attribs: &[(Attrib, Attrib)],
    ) -> Result<SurfaceSetup> {
        if native_pixmap.is_none() {
            return Err(EglError::BAD_NATIVE_PIXMAP.into());
        }
        self.create_backed_surface(display, config, native_pixmap, (0, 0), attribs)
    }

    fn destroy_surface(&self, display: &DisplayGuard, surface: &Surface) {
        self.bump(|c| c.destroy_surface += 1);
        let platform = display.platform();
        if platform.is_destroyed() {
            return;
        }
        let internal = surface.internal();
        let mut handles = vec![internal];
        if surface.external() != internal {
            handles.push(surface.external());
        }
        for handle in handles {
            match platform.driver().destroy_surface(display.internal_display(), handle) {
                Ok(()) => {}
                // Terminating the driver display already freed its pbuffers.
                Err(e) if !display.is_initialized() => {
                    log::trace!("Pbuffer {:#x} already gone: {}", handle, e);
                }
                Err(e) => platform.set_error(e, &format!("failed to destroy pbuffer {handle:#x}")),
            }
        }
    }

    fn swap_buffers(&self, display: &DisplayGuard, surface: &Surface, damage: &[EglInt]) -> Result<()> {
        self.bump(|c| c.swap_buffers += 1);
        if surface.kind() == SurfaceKind::Window {
            self.reallocate_if_resized(display, surface)?;
        }
        let driver = display.platform().driver();
        if damage.is_empty() {
            driver.swap_buffers(display.internal_display(), surface.internal())?;
        } else {
            driver.swap_buffers_with_damage(display.internal_display(), surface.internal(), damage)?;
        }
        Ok(())
    }

    fn cleanup_platform(&self, platform: &PlatformData) {
        self.bump(|c| c.cleanup_platform += 1);
        self.windows().clear();
        log::debug!("Headless platform {:#x} cleaned up", platform.kind().0);
    }
}

impl std::fmt::Debug for HeadlessPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessPlatform").field("hooks", &self.calls()).finish_non_exhaustive()
    }
}
