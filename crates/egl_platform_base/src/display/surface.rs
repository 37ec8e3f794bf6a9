//! Window and pixmap surfaces
//!
//! Surfaces live in their display's collection. Destroying one only marks it
//! deleted; it is freed once it is no longer bound as current and nobody but
//! the collection holds a reference. All of that happens under the owning
//! display's lock.

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::egl::SurfaceHandle;
use crate::error::{PlatformError, Result};
use crate::foundation::collections::SurfaceKey;
use crate::foundation::lifecycle::{DeferredTeardown, Lifecycle, TeardownRequest};
use crate::foundation::refcount::RefCounted;
use crate::platform::SurfaceSetup;

use super::DisplayGuard;

/// Shared handle to a surface
pub type SurfaceRef = RefCounted<Surface>;

/// What kind of native object backs a tracked surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SurfaceKind {
    /// A native window
    Window,
    /// A native pixmap
    Pixmap,
}

struct SurfaceState {
    internal: SurfaceHandle,
    /// `busy` counts the current bindings that reference the surface
    teardown: DeferredTeardown,
}

/// A tracked window or pixmap surface
pub struct Surface {
    key: SurfaceKey,
    external: SurfaceHandle,
    kind: SurfaceKind,
    state: Mutex<SurfaceState>,
    private: Mutex<Option<Box<dyn Any + Send>>>,
}

impl Surface {
    fn new(key: SurfaceKey, kind: SurfaceKind, setup: SurfaceSetup) -> Self {
        Self {
            key,
            external: setup.external,
            kind,
            state: Mutex::new(SurfaceState { internal: setup.internal, teardown: DeferredTeardown::new() }),
            private: Mutex::new(setup.private),
        }
    }

    fn state(&self) -> MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Key in the owning display's collection
    pub const fn key(&self) -> SurfaceKey {
        self.key
    }

    /// Handle the application sees
    pub const fn external(&self) -> SurfaceHandle {
        self.external
    }

    /// Driver surface currently backing this surface
    pub fn internal(&self) -> SurfaceHandle {
        self.state().internal
    }

    /// Window or pixmap
    pub const fn kind(&self) -> SurfaceKind {
        self.kind
    }

    /// Whether the application has destroyed the surface
    pub fn is_deleted(&self) -> bool {
        self.state().teardown.state() != Lifecycle::Active
    }

    /// Whether any thread has the surface bound as current
    pub fn is_current(&self) -> bool {
        self.state().teardown.busy() > 0
    }

    /// Number of current bindings (draw and read count separately)
    pub fn current_bindings(&self) -> u32 {
        self.state().teardown.busy()
    }

    /// Run `f` on the backend-private surface data
    pub fn with_private<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut private = self.private.lock().unwrap_or_else(PoisonError::into_inner);
        private.as_mut()?.downcast_mut::<T>().map(f)
    }

    pub(crate) fn set_internal(&self, internal: SurfaceHandle) -> SurfaceHandle {
        std::mem::replace(&mut self.state().internal, internal)
    }

    pub(crate) fn enter_current(&self) {
        self.state().teardown.enter();
    }

    pub(crate) fn leave_current(&self) -> Result<()> {
        self.state().teardown.leave().map(|_| ())
    }

    pub(crate) fn mark_deleted(&self) -> TeardownRequest {
        self.state().teardown.request()
    }

    pub(crate) fn force_destroyed(&self) {
        self.state().teardown.force_destroyed();
    }

    fn is_reapable(&self) -> bool {
        let state = self.state();
        state.teardown.state() != Lifecycle::Active && state.teardown.busy() == 0
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Surface")
            .field("external", &format_args!("{:#x}", self.external))
            .field("internal", &format_args!("{:#x}", state.internal))
            .field("kind", &self.kind)
            .field("state", &state.teardown.state())
            .field("current_bindings", &state.teardown.busy())
            .finish()
    }
}

/// A surface acquired under its display's lock
///
/// Borrowing the display guard keeps the display locked for as long as the
/// surface is in use.
pub struct SurfaceGuard<'a> {
    display: &'a DisplayGuard,
    surface: SurfaceRef,
}

impl SurfaceGuard<'_> {
    /// Shared handle to the surface
    pub const fn surface_ref(&self) -> &SurfaceRef {
        &self.surface
    }
}

impl Deref for SurfaceGuard<'_> {
    type Target = Surface;

    fn deref(&self) -> &Surface {
        &self.surface
    }
}

impl Drop for SurfaceGuard<'_> {
    fn drop(&mut self) {
        // The guard's own reference is still alive here.
        self.display.try_reap(self.surface.key(), 1);
    }
}

impl DisplayGuard {
    /// Find a live tracked surface by its application-facing handle
    ///
    /// Returns `None` for surfaces this registry does not track (pbuffers and
    /// stream producers) and for surfaces that were already destroyed.
    pub fn acquire_surface(&self, handle: SurfaceHandle) -> Option<SurfaceGuard<'_>> {
        self.find_surface(handle).map(|surface| SurfaceGuard { display: self, surface })
    }

    pub(crate) fn find_surface(&self, handle: SurfaceHandle) -> Option<SurfaceRef> {
        if handle.is_none() {
            return None;
        }
        let state = self.display_ref().state();
        state
            .surfaces
            .values()
            .find(|s| s.external() == handle && !s.is_deleted())
            .map(RefCounted::retain)
    }

    /// Give back a reference obtained from this display, freeing the surface
    /// if it was the last one keeping a deleted surface alive
    pub fn release_surface(&self, surface: SurfaceRef) {
        let key = surface.key();
        drop(surface);
        self.try_reap(key, 0);
    }

    /// Whether `handle` names a live surface tracked by this display
    pub fn is_tracked_surface(&self, handle: SurfaceHandle) -> bool {
        self.find_surface(handle).is_some()
    }

    /// Whether `handle` names a tracked surface, live or waiting to be freed
    pub(crate) fn owns_surface(&self, handle: SurfaceHandle) -> bool {
        !handle.is_none() && self.display_ref().state().surfaces.values().any(|s| s.external() == handle)
    }

    pub(crate) fn insert_surface(&self, kind: SurfaceKind, setup: SurfaceSetup) -> SurfaceRef {
        let mut state = self.display_ref().state();
        let key = state
            .surfaces
            .insert_with_key(|key| RefCounted::new(Surface::new(key, kind, setup)));
        let surface = state.surfaces[key].retain();
        log::debug!(
            "Display {:#x}: tracking {:?} surface {:#x}",
            self.handle(),
            kind,
            surface.external()
        );
        surface
    }

    /// Mark a surface deleted and free it if nothing else holds it
    pub(crate) fn delete_surface(&self, handle: SurfaceHandle) -> Result<()> {
        let surface = self
            .find_surface(handle)
            .ok_or_else(|| PlatformError::surface_not_found(handle.raw()))?;
        let key = surface.key();
        drop(surface);
        self.delete_surface_by_key(key);
        Ok(())
    }

    pub(crate) fn delete_surface_by_key(&self, key: SurfaceKey) {
        let surface = self.display_ref().state().surfaces.get(key).map(RefCounted::retain);
        let Some(surface) = surface else {
            return;
        };
        if surface.mark_deleted() == TeardownRequest::Deferred {
            log::debug!(
                "Display {:#x}: surface {:#x} is current, deferring destroy",
                self.handle(),
                surface.external()
            );
        }
        drop(surface);
        self.try_reap(key, 0);
    }

    /// Free the surface if it is deleted, unbound, and only the collection
    /// plus `outstanding` other holders reference it
    pub(crate) fn try_reap(&self, key: SurfaceKey, outstanding: usize) -> bool {
        let reaped = {
            let mut state = self.display_ref().state();
            let Some(surface) = state.surfaces.get(key) else {
                return false;
            };
            if !surface.is_reapable() || surface.ref_count() > 1 + outstanding {
                return false;
            }
            state.surfaces.remove(key)
        };
        let Some(surface) = reaped else {
            return false;
        };
        surface.force_destroyed();
        self.platform().implementation().destroy_surface(self, &surface);
        log::debug!("Display {:#x}: surface {:#x} freed", self.handle(), surface.external());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::headless::test_platform_with_display;
    use crate::egl::{ConfigHandle, NativeHandle};

    #[test]
    fn test_untracked_pbuffer_is_not_acquired() {
        let (base, _platform, _driver, dpy) = test_platform_with_display(false);
        base.initialize_display(dpy).unwrap();
        let pbuffer = base.create_pbuffer_surface(dpy, ConfigHandle(1), &[]).unwrap();
        let guard = base.acquire_display(dpy).unwrap();
        assert!(guard.acquire_surface(pbuffer).is_none());
        assert!(guard.acquire_surface(SurfaceHandle::NONE).is_none());
    }

    #[test]
    fn test_window_surface_acquire_and_release() {
        let (base, _platform, _driver, dpy) = test_platform_with_display(false);
        base.initialize_display(dpy).unwrap();
        let window = base.create_window_surface(dpy, ConfigHandle(1), NativeHandle(0x10), &[]).unwrap();
        let guard = base.acquire_display(dpy).unwrap();
        {
            let surface = guard.acquire_surface(window).unwrap();
            assert_eq!(surface.kind(), SurfaceKind::Window);
            assert_eq!(surface.surface_ref().ref_count(), 2);
        }
        assert_eq!(guard.surface_count(), 1);
    }

    #[test]
    fn test_destroy_with_outstanding_reference_defers_free() {
        let (base, platform, _driver, dpy) = test_platform_with_display(false);
        base.initialize_display(dpy).unwrap();
        let pixmap = base.create_pixmap_surface(dpy, ConfigHandle(1), NativeHandle(0x20), &[]).unwrap();
        let guard = base.acquire_display(dpy).unwrap();
        let held = guard.find_surface(pixmap).unwrap();

        guard.delete_surface(pixmap).unwrap();
        assert!(held.is_deleted());
        assert_eq!(guard.surface_count(), 1);
        assert!(guard.acquire_surface(pixmap).is_none());

        guard.release_surface(held);
        assert_eq!(guard.surface_count(), 0);
        let hooks = crate::backends::headless::HeadlessPlatform::hook_calls(&platform);
        assert_eq!(hooks.destroy_surface, 1);
    }

    #[test]
    fn test_delete_unknown_surface_is_not_found() {
        let (base, _platform, _driver, dpy) = test_platform_with_display(false);
        base.initialize_display(dpy).unwrap();
        let guard = base.acquire_display(dpy).unwrap();
        assert_eq!(
            guard.delete_surface(SurfaceHandle(0x99)),
            Err(PlatformError::surface_not_found(0x99))
        );
    }
}
