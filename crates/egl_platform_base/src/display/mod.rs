//! Application-facing displays
//!
//! A `Display` is guarded by a reentrant lock. Holding a [`DisplayGuard`]
//! means the calling thread owns that lock and a reference to the display;
//! a guard obtained through `PlatformBase::acquire_display` additionally
//! counts as one use. Terminate requests that arrive while the display is in
//! use are deferred until the last use ends.
//!
//! Lock order: global display list, then a display's lock, then the
//! internal-display registry. A thread holding one display's lock never
//! takes another display's lock.

pub mod current;
pub mod list;
pub mod surface;

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::egl::{DisplayHandle, DriverDisplay, EglInt, NativeHandle, PlatformKind};
use crate::error::{PlatformError, Result};
use crate::foundation::collections::{key_to_raw, DisplayKey, HandleMap, PlatformKey, SurfaceKey};
use crate::foundation::lifecycle::{DeferredTeardown, Lifecycle, TeardownRequest};
use crate::foundation::reentrant::ReentrantLock;
use crate::foundation::refcount::{RefCounted, WeakRef};
use crate::platform::{DisplaySetup, PlatformData, PlatformRef};

pub use current::CurrentBindings;
pub use list::{DisplayList, DisplayListGuard};
pub use surface::{Surface, SurfaceGuard, SurfaceKind, SurfaceRef};

/// Shared handle to a display
pub type DisplayRef = RefCounted<Display>;

struct DisplayState {
    internal: DriverDisplay,
    surfaces: HandleMap<SurfaceKey, SurfaceRef>,
    init_count: u32,
    /// `busy` is the display's use count
    teardown: DeferredTeardown,
    major: EglInt,
    minor: EglInt,
    initialized: bool,
}

/// One application-facing display
pub struct Display {
    key: DisplayKey,
    platform_key: PlatformKey,
    platform: WeakRef<PlatformData>,
    platform_kind: PlatformKind,
    native_display: NativeHandle,
    track_references: bool,
    lock: ReentrantLock,
    state: Mutex<DisplayState>,
    private: Mutex<Option<Box<dyn Any + Send>>>,
}

impl Display {
    pub(crate) fn new(
        key: DisplayKey,
        platform: &PlatformRef,
        native_display: NativeHandle,
        track_references: bool,
        setup: DisplaySetup,
    ) -> Self {
        Self {
            key,
            platform_key: platform.key(),
            platform: platform.downgrade(),
            platform_kind: platform.kind(),
            native_display,
            track_references,
            lock: ReentrantLock::new(),
            state: Mutex::new(DisplayState {
                internal: setup.internal,
                surfaces: HandleMap::with_key(),
                init_count: 0,
                teardown: DeferredTeardown::new(),
                major: 0,
                minor: 0,
                initialized: false,
            }),
            private: Mutex::new(setup.private),
        }
    }

    fn state(&self) -> MutexGuard<'_, DisplayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Key of this display in the global display list
    pub const fn key(&self) -> DisplayKey {
        self.key
    }

    /// The application-facing handle
    pub fn handle(&self) -> DisplayHandle {
        DisplayHandle(key_to_raw(self.key))
    }

    /// Key of the owning platform
    pub const fn platform_key(&self) -> PlatformKey {
        self.platform_key
    }

    pub(crate) fn platform(&self) -> Option<PlatformRef> {
        self.platform.upgrade()
    }

    /// Platform enum the display was created for
    pub const fn platform_kind(&self) -> PlatformKind {
        self.platform_kind
    }

    /// Native display the application passed in
    pub const fn native_display(&self) -> NativeHandle {
        self.native_display
    }

    /// Whether the display was created with `EGL_TRACK_REFERENCES_KHR`
    pub const fn track_references(&self) -> bool {
        self.track_references
    }

    /// The driver display this display maps onto
    pub fn internal_display(&self) -> DriverDisplay {
        self.state().internal
    }

    /// Outstanding initializations (capped at 1 without reference tracking)
    pub fn init_count(&self) -> u32 {
        self.state().init_count
    }

    /// Number of callers currently inside an operation on this display
    pub fn use_count(&self) -> u32 {
        self.state().teardown.busy()
    }

    /// Whether the display is initialized and usable
    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    /// Whether a terminate is waiting for the display to become idle
    pub fn is_terminate_pending(&self) -> bool {
        self.state().teardown.state() == Lifecycle::PendingTeardown
    }

    /// Whether the display has been unlinked from its platform
    pub fn is_unlinked(&self) -> bool {
        self.state().teardown.state() == Lifecycle::Destroyed
    }

    /// Version reported when the display was initialized
    pub fn version(&self) -> Option<(EglInt, EglInt)> {
        let state = self.state();
        state.initialized.then_some((state.major, state.minor))
    }

    /// Number of surfaces the display still owns, including deleted ones
    /// that are waiting to be freed
    pub fn surface_count(&self) -> usize {
        self.state().surfaces.len()
    }
}

impl fmt::Debug for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Display")
            .field("handle", &format_args!("{:#x}", self.handle()))
            .field("native_display", &format_args!("{:#x}", self.native_display))
            .field("track_references", &self.track_references)
            .field("init_count", &state.init_count)
            .field("use_count", &state.teardown.busy())
            .field("initialized", &state.initialized)
            .field("surfaces", &state.surfaces.len())
            .finish()
    }
}

/// A display locked by the calling thread
///
/// Dropping the guard ends the use (running a deferred terminate if this was
/// the last one), unlocks the display and releases the reference. Guards are
/// bound to the thread that took the lock.
pub struct DisplayGuard {
    display: DisplayRef,
    platform: PlatformRef,
    counted: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl DisplayGuard {
    /// Lock `display` without counting a use
    pub(crate) fn lock(display: DisplayRef, platform: PlatformRef) -> Self {
        display.lock.lock();
        Self { display, platform, counted: false, _thread_bound: PhantomData }
    }

    /// Upgrade to a counted use; fails if the display is not initialized
    pub(crate) fn begin_use(mut self) -> Result<Self> {
        {
            let mut state = self.display.state();
            if !state.initialized {
                return Err(PlatformError::NotInitialized(self.display.handle().raw()));
            }
            state.teardown.enter();
        }
        self.counted = true;
        log::trace!("Display {:#x} acquired", self.display.handle());
        Ok(self)
    }

    /// The owning platform, kept alive for as long as the guard exists
    pub fn platform(&self) -> &PlatformData {
        &self.platform
    }

    /// Shared handle to the owning platform
    pub const fn platform_ref(&self) -> &PlatformRef {
        &self.platform
    }

    /// Shared handle to the display
    pub const fn display_ref(&self) -> &DisplayRef {
        &self.display
    }

    /// Whether this guard holds a use of the display
    pub const fn is_counted(&self) -> bool {
        self.counted
    }

    /// Run `f` on the backend-private display data
    ///
    /// Returns `None` if there is no private data of type `T`. `f` must not
    /// call back into the platform base.
    pub fn with_private<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut private = self.display.private.lock().unwrap_or_else(PoisonError::into_inner);
        private.as_mut()?.downcast_mut::<T>().map(f)
    }

    /// Drop the lock while keeping the reference and the use
    ///
    /// Call [`UnlockedDisplay::lock`] to resume.
    pub fn unlock(mut self) -> UnlockedDisplay {
        let unlocked = UnlockedDisplay {
            display: self.display.retain(),
            platform: self.platform.retain(),
            counted: self.counted,
        };
        self.counted = false;
        unlocked
    }

    /// Release the display; same as dropping the guard
    pub fn release(self) {}

    /// Count one initialization
    ///
    /// The backend's initialize hook runs only on the transition out of the
    /// uninitialized state; later calls bump the count (or keep it at 1
    /// without reference tracking) and return the cached version.
    pub(crate) fn initialize(&self) -> Result<(EglInt, EglInt)> {
        let handle = self.display.handle().raw();
        {
            let mut state = self.display.state();
            match state.teardown.state() {
                Lifecycle::PendingTeardown => return Err(PlatformError::TerminatePending(handle)),
                Lifecycle::Destroyed => return Err(PlatformError::display_not_found(handle)),
                Lifecycle::Active => {}
            }
            if state.initialized {
                state.init_count = if self.display.track_references { state.init_count + 1 } else { 1 };
                return Ok((state.major, state.minor));
            }
        }
        if self.platform.is_destroyed() {
            return Err(PlatformError::PlatformNotReady);
        }

        let (major, minor) = self.platform.implementation().initialize_display(self)?;

        let mut state = self.display.state();
        state.initialized = true;
        state.init_count = 1;
        state.major = major;
        state.minor = minor;
        log::debug!("Display {:#x} initialized, version {}.{}", self.display.handle(), major, minor);
        Ok((major, minor))
    }

    /// Drop one initialization
    ///
    /// When the count reaches zero the display stops being initialized. If it
    /// is idle the backend terminate runs now; otherwise it runs when the
    /// last use ends. Terminating a display that is not initialized, or
    /// whose terminate is already pending, does nothing.
    pub(crate) fn terminate(&self) -> Result<()> {
        let request = {
            let mut state = self.display.state();
            if !state.initialized {
                return Ok(());
            }
            state.init_count = if self.display.track_references { state.init_count - 1 } else { 0 };
            if state.init_count > 0 {
                return Ok(());
            }
            state.initialized = false;
            let request = state.teardown.request();
            if request == TeardownRequest::Immediate {
                state.teardown.revive();
            }
            request
        };

        match request {
            TeardownRequest::Immediate => self.complete_terminate(),
            TeardownRequest::Deferred => {
                log::debug!(
                    "Display {:#x} busy ({} users), deferring terminate",
                    self.display.handle(),
                    self.display.use_count()
                );
            }
            TeardownRequest::AlreadyPending | TeardownRequest::AlreadyDestroyed => {}
        }
        Ok(())
    }

    fn complete_terminate(&self) {
        let keys: Vec<SurfaceKey> = self.display.state().surfaces.keys().collect();
        for key in keys {
            self.delete_surface_by_key(key);
        }
        self.platform.implementation().terminate_display(self);

        let mut state = self.display.state();
        state.init_count = 0;
        state.initialized = false;
        log::debug!("Display {:#x} terminated", self.display.handle());
    }

    fn finish_use(&self) {
        let due = {
            let mut state = self.display.state();
            match state.teardown.leave() {
                Ok(due) => {
                    if due {
                        state.teardown.revive();
                    }
                    due
                }
                Err(e) => {
                    log::error!("Display {:#x}: {}", self.display.handle(), e);
                    false
                }
            }
        };
        log::trace!("Display {:#x} released", self.display.handle());
        if due {
            log::debug!("Display {:#x} idle, running deferred terminate", self.display.handle());
            self.complete_terminate();
        }
    }

    /// Tear the display down for good: terminate, free every surface and let
    /// the backend clean up
    ///
    /// Used when the platform is unloaded or the native display goes away.
    /// Uses still in flight on other threads finish against a dead display.
    pub(crate) fn unlink(&self) {
        let was_live = {
            let mut state = self.display.state();
            let live = state.initialized || state.teardown.state() == Lifecycle::PendingTeardown;
            state.initialized = false;
            state.init_count = 0;
            state.teardown.force_destroyed();
            live
        };
        let implementation = self.platform.implementation();
        let surfaces: Vec<SurfaceRef> = self.display.state().surfaces.drain().map(|(_, s)| s).collect();
        for surface in surfaces {
            surface.force_destroyed();
            implementation.destroy_surface(self, &surface);
        }
        if was_live {
            implementation.terminate_display(self);
        }
        implementation.cleanup_display(self);
        log::debug!("Display {:#x} unlinked", self.display.handle());
    }
}

impl Deref for DisplayGuard {
    type Target = Display;

    fn deref(&self) -> &Display {
        &self.display
    }
}

impl Drop for DisplayGuard {
    fn drop(&mut self) {
        if self.counted {
            self.counted = false;
            self.finish_use();
        }
        if let Err(e) = self.display.lock.unlock() {
            log::error!("Display {:#x}: {}", self.display.handle(), e);
        }
    }
}

/// A display whose lock was dropped by [`DisplayGuard::unlock`]
///
/// Still holds the reference and the use. Dropping it relocks the display and
/// releases both.
pub struct UnlockedDisplay {
    display: DisplayRef,
    platform: PlatformRef,
    counted: bool,
}

impl UnlockedDisplay {
    /// Re-take the display's lock
    pub fn lock(mut self) -> DisplayGuard {
        let mut guard = DisplayGuard::lock(self.display.retain(), self.platform.retain());
        guard.counted = self.counted;
        self.counted = false;
        guard
    }

    /// The display, for reading fields that do not need the lock
    pub fn display(&self) -> &Display {
        &self.display
    }
}

impl Drop for UnlockedDisplay {
    fn drop(&mut self) {
        if self.counted {
            let mut guard = DisplayGuard::lock(self.display.retain(), self.platform.retain());
            guard.counted = true;
            self.counted = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::backends::headless::test_platform_with_display;
    use crate::error::PlatformError;

    #[test]
    fn test_acquire_requires_initialize() {
        let (base, _platform, _driver, dpy) = test_platform_with_display(false);
        assert_eq!(
            base.acquire_display(dpy).err(),
            Some(PlatformError::NotInitialized(dpy.raw()))
        );
        base.initialize_display(dpy).unwrap();
        let guard = base.acquire_display(dpy).unwrap();
        assert_eq!(guard.use_count(), 1);
        assert!(guard.is_counted());
    }

    #[test]
    fn test_release_restores_counts() {
        let (base, _platform, _driver, dpy) = test_platform_with_display(false);
        base.initialize_display(dpy).unwrap();
        let before = base.lookup_display(dpy).unwrap().display_ref().ref_count();
        {
            let a = base.acquire_display(dpy).unwrap();
            let b = base.acquire_display(dpy).unwrap();
            assert_eq!(a.use_count(), 2);
            drop(b);
            assert_eq!(a.use_count(), 1);
        }
        let guard = base.lookup_display(dpy).unwrap();
        assert_eq!(guard.display_ref().ref_count(), before);
        assert_eq!(guard.use_count(), 0);
    }

    #[test]
    fn test_unlock_keeps_use_and_reference() {
        let (base, _platform, _driver, dpy) = test_platform_with_display(false);
        base.initialize_display(dpy).unwrap();
        let unlocked = base.acquire_display(dpy).unwrap().unlock();
        assert_eq!(unlocked.display().use_count(), 1);

        // Another thread can take the lock in the meantime.
        std::thread::scope(|s| {
            s.spawn(|| {
                let other = base.acquire_display(dpy).unwrap();
                assert_eq!(other.use_count(), 2);
            });
        });

        let guard = unlocked.lock();
        assert_eq!(guard.use_count(), 1);
        drop(guard);
        assert_eq!(base.lookup_display(dpy).unwrap().use_count(), 0);
    }

    #[test]
    fn test_dropping_unlocked_display_ends_use() {
        let (base, _platform, _driver, dpy) = test_platform_with_display(false);
        base.initialize_display(dpy).unwrap();
        let unlocked = base.acquire_display(dpy).unwrap().unlock();
        base.terminate_display(dpy).unwrap();
        assert!(base.lookup_display(dpy).unwrap().is_terminate_pending());
        drop(unlocked);
        let guard = base.lookup_display(dpy).unwrap();
        assert!(!guard.is_terminate_pending());
        assert_eq!(guard.use_count(), 0);
    }

    #[test]
    fn test_nested_acquire_on_same_thread() {
        let (base, _platform, _driver, dpy) = test_platform_with_display(true);
        base.initialize_display(dpy).unwrap();
        let outer = base.acquire_display(dpy).unwrap();
        let inner = base.acquire_display(dpy).unwrap();
        assert_eq!(inner.use_count(), 2);
        drop(inner);
        drop(outer);
    }

    #[test]
    fn test_private_data_downcast() {
        let (base, _platform, _driver, dpy) = test_platform_with_display(false);
        let guard = base.lookup_display(dpy).unwrap();
        let has_internal = guard.with_private(|p: &mut crate::backends::headless::HeadlessDisplay| {
            p.internal().handle() == guard.internal_display()
        });
        assert_eq!(has_internal, Some(true));
        assert_eq!(guard.with_private(|_: &mut u32| ()), None);
    }
}
