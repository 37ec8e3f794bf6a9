//! Current-surface bookkeeping
//!
//! Each thread that made a context current holds a binding that retains the
//! tracked draw and read surfaces. A bound surface counts as busy, so
//! destroying it only marks it deleted until the binding goes away.
//!
//! The switch protocol lets a backend swap the driver surface behind a
//! tracked surface (for example after a window resize) without the
//! application seeing its current surface change.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::egl::{DisplayHandle, SurfaceBinding, SurfaceHandle};
use crate::error::Result;
use crate::foundation::collections::DisplayKey;

use super::{DisplayGuard, DisplayRef, Surface, SurfaceRef};

/// One thread's current display and surfaces
pub struct CurrentBinding {
    display: DisplayRef,
    draw: Option<SurfaceRef>,
    read: Option<SurfaceRef>,
}

impl CurrentBinding {
    /// The display the binding was made on
    pub const fn display(&self) -> &DisplayRef {
        &self.display
    }

    /// Tracked draw surface, if any
    pub const fn draw(&self) -> Option<&SurfaceRef> {
        self.draw.as_ref()
    }

    /// Tracked read surface, if any
    pub const fn read(&self) -> Option<&SurfaceRef> {
        self.read.as_ref()
    }
}

/// Current bindings for every thread
#[derive(Default)]
pub struct CurrentBindings {
    by_thread: Mutex<HashMap<ThreadId, CurrentBinding>>,
}

impl CurrentBindings {
    /// No thread has anything current
    pub fn new() -> Self {
        Self::default()
    }

    fn by_thread(&self) -> MutexGuard<'_, HashMap<ThreadId, CurrentBinding>> {
        self.by_thread.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install the calling thread's binding, returning the previous one
    pub(crate) fn replace_current(&self, binding: Option<CurrentBinding>) -> Option<CurrentBinding> {
        let id = thread::current().id();
        let mut by_thread = self.by_thread();
        match binding {
            Some(binding) => by_thread.insert(id, binding),
            None => by_thread.remove(&id),
        }
    }

    /// Display the calling thread has current, if any
    pub fn current_display(&self) -> Option<DisplayHandle> {
        self.by_thread().get(&thread::current().id()).map(|b| b.display.handle())
    }

    /// Retained display of the calling thread's binding, left in place
    pub(crate) fn current_display_ref(&self) -> Option<DisplayRef> {
        self.by_thread().get(&thread::current().id()).map(|b| b.display.retain())
    }

    /// Whether the calling thread has a tracked surface current
    pub fn is_current_on_this_thread(&self, surface: SurfaceHandle) -> bool {
        self.by_thread().get(&thread::current().id()).is_some_and(|b| {
            b.draw.iter().chain(b.read.iter()).any(|s| s.external() == surface)
        })
    }

    /// Number of threads with a binding
    pub fn len(&self) -> usize {
        self.by_thread().len()
    }

    /// Whether no thread has a binding
    pub fn is_empty(&self) -> bool {
        self.by_thread().is_empty()
    }

    /// Remove every binding on `display`, whichever thread made it
    pub(crate) fn take_for_display(&self, display: DisplayKey) -> Vec<CurrentBinding> {
        let mut by_thread = self.by_thread();
        let ids: Vec<ThreadId> = by_thread
            .iter()
            .filter(|(_, b)| b.display.key() == display)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter().filter_map(|id| by_thread.remove(&id)).collect()
    }
}

impl DisplayGuard {
    /// Build a binding on this display, marking its surfaces current
    pub(crate) fn bind_current(&self, draw: Option<SurfaceRef>, read: Option<SurfaceRef>) -> CurrentBinding {
        for surface in draw.iter().chain(read.iter()) {
            surface.enter_current();
        }
        CurrentBinding { display: self.display_ref().retain(), draw, read }
    }

    /// Drop a binding made on this display, freeing surfaces that were only
    /// kept alive by it
    pub(crate) fn unbind_current(&self, binding: CurrentBinding) {
        if binding.display.key() != self.key() {
            log::error!(
                "Display {:#x}: asked to unbind a binding made on {:#x}",
                self.handle(),
                binding.display.handle()
            );
            return;
        }
        for surface in binding.draw.into_iter().chain(binding.read) {
            if let Err(e) = surface.leave_current() {
                log::error!("Surface {:#x}: {}", surface.external(), e);
            }
            self.release_surface(surface);
        }
    }

    /// Rebind the calling thread's current surfaces from `old` to `new`
    ///
    /// Both handles are driver surfaces. Nothing happens unless this display
    /// is current with a context and `old` is bound as draw or read; then a
    /// single make-current swaps it for `new`, keeping the context and the
    /// other binding.
    pub fn switch_current_surface(&self, old: SurfaceHandle, new: SurfaceHandle) -> Result<()> {
        let platform = self.platform();
        if platform.is_destroyed() {
            return Ok(());
        }
        let driver = platform.driver();
        let context = driver.get_current_context();
        if context.is_none() || driver.get_current_display() != self.internal_display() {
            return Ok(());
        }

        let draw = driver.get_current_surface(SurfaceBinding::Draw);
        let read = driver.get_current_surface(SurfaceBinding::Read);
        if draw != old && read != old {
            return Ok(());
        }

        let draw = if draw == old { new } else { draw };
        let read = if read == old { new } else { read };
        driver.make_current(self.internal_display(), draw, read, context)?;
        log::trace!("Display {:#x}: switched current surface {:#x} -> {:#x}", self.handle(), old, new);
        Ok(())
    }

    /// Point `surface` at a new driver surface, rebinding it if it is current
    /// on this thread
    ///
    /// Returns the previous driver surface, which the caller now owns. On
    /// failure nothing changes.
    pub fn replace_internal_surface(&self, surface: &Surface, new: SurfaceHandle) -> Result<SurfaceHandle> {
        let old = surface.internal();
        if old == new {
            return Ok(old);
        }
        self.switch_current_surface(old, new)?;
        surface.set_internal(new);
        Ok(old)
    }
}

#[cfg(test)]
mod tests {
    use crate::backends::headless::test_platform_with_display;
    use crate::driver::Driver;
    use crate::egl::{ConfigHandle, NativeHandle, SurfaceBinding, SurfaceHandle};

    #[test]
    fn test_switch_is_noop_when_old_not_bound() {
        let (base, _platform, driver, dpy) = test_platform_with_display(false);
        base.initialize_display(dpy).unwrap();
        let window = base.create_window_surface(dpy, ConfigHandle(1), NativeHandle(1), &[]).unwrap();
        let context = driver.create_context();
        base.make_current(dpy, window, window, context).unwrap();
        let before = driver.calls().make_current;

        let guard = base.acquire_display(dpy).unwrap();
        guard.switch_current_surface(SurfaceHandle(0xabc), SurfaceHandle(0xdef)).unwrap();
        assert_eq!(driver.calls().make_current, before);
    }

    #[test]
    fn test_switch_without_context_is_noop() {
        let (base, _platform, driver, dpy) = test_platform_with_display(false);
        base.initialize_display(dpy).unwrap();
        let guard = base.acquire_display(dpy).unwrap();
        guard.switch_current_surface(SurfaceHandle(1), SurfaceHandle(2)).unwrap();
        assert_eq!(driver.calls().make_current, 0);
    }

    #[test]
    fn test_switch_replaces_only_matching_binding() {
        let (base, _platform, driver, dpy) = test_platform_with_display(false);
        base.initialize_display(dpy).unwrap();
        let draw = base.create_window_surface(dpy, ConfigHandle(1), NativeHandle(1), &[]).unwrap();
        let read = base.create_window_surface(dpy, ConfigHandle(1), NativeHandle(2), &[]).unwrap();
        let context = driver.create_context();
        base.make_current(dpy, draw, read, context).unwrap();
        let before = driver.calls().make_current;

        let guard = base.acquire_display(dpy).unwrap();
        let old_internal = guard.acquire_surface(draw).unwrap().internal();
        guard.switch_current_surface(old_internal, SurfaceHandle(0x7777)).unwrap();

        assert_eq!(driver.calls().make_current, before + 1);
        assert_eq!(driver.get_current_surface(SurfaceBinding::Draw), SurfaceHandle(0x7777));
        let read_internal = guard.acquire_surface(read).unwrap().internal();
        assert_eq!(driver.get_current_surface(SurfaceBinding::Read), read_internal);
        assert_eq!(driver.get_current_context(), context);
    }

    #[test]
    fn test_replace_internal_keeps_external_handle() {
        let (base, _platform, driver, dpy) = test_platform_with_display(false);
        base.initialize_display(dpy).unwrap();
        let window = base.create_window_surface(dpy, ConfigHandle(1), NativeHandle(1), &[]).unwrap();
        base.make_current(dpy, window, window, driver.create_context()).unwrap();

        let guard = base.acquire_display(dpy).unwrap();
        let surface = guard.acquire_surface(window).unwrap();
        let fresh = SurfaceHandle(0x5151);
        let old = guard.replace_internal_surface(&surface, fresh).unwrap();
        assert_ne!(old, fresh);
        assert_eq!(surface.internal(), fresh);
        assert_eq!(surface.external(), window);
        assert_eq!(driver.get_current_surface(SurfaceBinding::Draw), fresh);
        assert_eq!(driver.get_current_surface(SurfaceBinding::Read), fresh);
    }
}
