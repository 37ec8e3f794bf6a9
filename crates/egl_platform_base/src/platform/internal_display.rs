//! Internal display registry
//!
//! Many application-facing displays can map onto one driver display, so the
//! driver's view is tracked separately and looked up by handle. Each record
//! counts outstanding initializations, which gives display-reference
//! semantics even when the driver does not implement
//! `EGL_KHR_display_reference`: the driver is only initialized on the first
//! call and only terminated on the last.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::egl::{DriverDisplay, EglInt};
use crate::error::{PlatformError, Result};
use crate::foundation::collections::{HandleMap, InternalDisplayKey};
use crate::foundation::refcount::RefCounted;
use crate::platform::PlatformData;

/// Shared handle to an internal display record
pub type InternalDisplayRef = RefCounted<InternalDisplay>;

#[derive(Debug, Default, Clone, Copy)]
struct InitState {
    init_count: u32,
    major: EglInt,
    minor: EglInt,
}

/// The driver's view of one display
pub struct InternalDisplay {
    handle: DriverDisplay,
    state: Mutex<InitState>,
}

impl InternalDisplay {
    fn new(handle: DriverDisplay) -> Self {
        Self { handle, state: Mutex::new(InitState::default()) }
    }

    fn state(&self) -> MutexGuard<'_, InitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The driver display handle
    pub const fn handle(&self) -> DriverDisplay {
        self.handle
    }

    /// Number of outstanding initializations
    pub fn init_count(&self) -> u32 {
        self.state().init_count
    }

    /// Version reported by the driver's initialize, if initialized
    pub fn version(&self) -> Option<(EglInt, EglInt)> {
        let state = self.state();
        (state.init_count > 0).then_some((state.major, state.minor))
    }

    /// Count one initialization, calling the driver only on the first
    ///
    /// A failing driver call leaves the count untouched.
    pub(crate) fn initialize(&self, platform: &PlatformData) -> Result<(EglInt, EglInt)> {
        let mut state = self.state();
        if state.init_count == 0 {
            if platform.is_destroyed() {
                return Err(PlatformError::PlatformNotReady);
            }
            let (major, minor) = platform.driver().initialize(self.handle)?;
            log::debug!("Driver display {:#x} initialized, version {}.{}", self.handle, major, minor);
            state.major = major;
            state.minor = minor;
        }
        state.init_count += 1;
        Ok((state.major, state.minor))
    }

    /// Drop one initialization, calling the driver only on the last
    ///
    /// Once the platform is destroyed the driver call is skipped and the
    /// termination counts as done.
    pub(crate) fn terminate(&self, platform: &PlatformData) -> Result<()> {
        let mut state = self.state();
        match state.init_count {
            0 => Err(PlatformError::ContractViolation(format!(
                "terminate on driver display {:#x} that is not initialized",
                self.handle
            ))),
            1 => {
                if !platform.is_destroyed() {
                    platform.driver().terminate(self.handle)?;
                    log::debug!("Driver display {:#x} terminated", self.handle);
                }
                state.init_count = 0;
                Ok(())
            }
            _ => {
                state.init_count -= 1;
                Ok(())
            }
        }
    }

    /// Forget all initializations without calling the driver
    fn abandon(&self) -> u32 {
        std::mem::take(&mut self.state().init_count)
    }
}

impl fmt::Debug for InternalDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = *self.state();
        f.debug_struct("InternalDisplay")
            .field("handle", &format_args!("{:#x}", self.handle))
            .field("init_count", &state.init_count)
            .field("version", &(state.major, state.minor))
            .finish()
    }
}

/// Internal displays known to one platform
#[derive(Default)]
pub struct InternalDisplayRegistry {
    entries: Mutex<HandleMap<InternalDisplayKey, InternalDisplayRef>>,
}

impl InternalDisplayRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self { entries: Mutex::new(HandleMap::with_key()) }
    }

    fn entries(&self) -> MutexGuard<'_, HandleMap<InternalDisplayKey, InternalDisplayRef>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find the record for `handle`, creating it with `init_count == 0` if
    /// this is the first lookup; the result is already retained
    pub fn lookup_or_create(&self, handle: DriverDisplay) -> InternalDisplayRef {
        let mut entries = self.entries();
        if let Some(existing) = entries.values().find(|d| d.handle() == handle) {
            return existing.retain();
        }
        let record = RefCounted::new(InternalDisplay::new(handle));
        entries.insert(record.retain());
        log::trace!("Tracking driver display {:#x}", handle);
        record
    }

    /// Number of tracked driver displays
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no driver display is tracked
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Drop every record, abandoning any outstanding initializations
    ///
    /// Only called once the platform is destroyed, so no driver call is made.
    pub(crate) fn teardown(&self, platform: &PlatformData) {
        debug_assert!(platform.is_destroyed());
        let drained: Vec<InternalDisplayRef> = self.entries().drain().map(|(_, d)| d).collect();
        for display in drained {
            let abandoned = display.abandon();
            if abandoned > 0 {
                log::debug!(
                    "Abandoning driver display {:#x} with {} outstanding initializations",
                    display.handle(),
                    abandoned
                );
            }
        }
    }
}
