//! Global display list
//!
//! Every display lives here from creation until it is unlinked. The list lock
//! is the outermost lock in the crate: it may be held while locking a
//! display, never the other way round.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::egl::{DisplayHandle, NativeHandle};
use crate::foundation::collections::{key_from_raw, DisplayKey, HandleMap, PlatformKey};

use super::{Display, DisplayRef};

/// All application-facing displays
#[derive(Default)]
pub struct DisplayList {
    entries: Mutex<HandleMap<DisplayKey, DisplayRef>>,
}

impl DisplayList {
    /// Create an empty list
    pub fn new() -> Self {
        Self { entries: Mutex::new(HandleMap::with_key()) }
    }

    /// Lock the list
    pub fn lock(&self) -> DisplayListGuard<'_> {
        DisplayListGuard { entries: self.entries.lock().unwrap_or_else(PoisonError::into_inner) }
    }
}

/// The locked display list
///
/// Dropping the guard unlocks the list.
pub struct DisplayListGuard<'a> {
    entries: MutexGuard<'a, HandleMap<DisplayKey, DisplayRef>>,
}

impl DisplayListGuard<'_> {
    /// Number of displays
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every display, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &DisplayRef> + '_ {
        self.entries.values()
    }

    /// Resolve an application-facing handle
    pub fn get(&self, handle: DisplayHandle) -> Option<&DisplayRef> {
        if handle.is_none() {
            return None;
        }
        self.entries.get(key_from_raw::<DisplayKey>(handle.raw()))
    }

    /// Displays of `platform` created for `native_display`
    pub fn find_native(&self, platform: PlatformKey, native_display: NativeHandle) -> Vec<DisplayHandle> {
        self.entries
            .values()
            .filter(|d| d.platform_key() == platform && d.native_display() == native_display)
            .map(|d| d.handle())
            .collect()
    }

    /// Take a display out of the list
    ///
    /// The caller must hand the result to `PlatformBase::unlink_display`
    /// once the list guard is dropped.
    pub fn remove(&mut self, handle: DisplayHandle) -> Option<DisplayRef> {
        let removed = self.entries.remove(key_from_raw::<DisplayKey>(handle.raw()));
        if removed.is_some() {
            log::debug!("Display {:#x} removed from the display list", handle);
        }
        removed
    }

    pub(crate) fn insert_with(&mut self, build: impl FnOnce(DisplayKey) -> Display) -> DisplayRef {
        let key = self.entries.insert_with_key(|key| tracked(build(key)));
        self.entries[key].retain()
    }

    pub(crate) fn drain_platform(&mut self, platform: PlatformKey) -> Vec<DisplayRef> {
        let keys: Vec<DisplayKey> = self
            .entries
            .iter()
            .filter(|(_, d)| d.platform_key() == platform)
            .map(|(key, _)| key)
            .collect();
        keys.into_iter().filter_map(|key| self.entries.remove(key)).collect()
    }
}

fn tracked(display: Display) -> DisplayRef {
    DisplayRef::with_destructor(display, |d| {
        log::debug!("Display {:#x} freed", d.handle());
    })
}

#[cfg(test)]
mod tests {
    use crate::backends::headless::test_platform;
    use crate::egl::{DisplayHandle, NativeHandle};

    #[test]
    fn test_enumerate_and_find_native() {
        let (base, platform, _driver) = test_platform();
        let a = base.get_platform_display(&platform, NativeHandle(1), &[]).unwrap();
        let b = base.get_platform_display(&platform, NativeHandle(2), &[]).unwrap();
        let list = base.lock_display_list();
        assert_eq!(list.len(), 2);
        assert_eq!(list.find_native(platform.key(), NativeHandle(1)), vec![a]);
        assert!(list.get(b).is_some());
        assert!(list.get(DisplayHandle::NONE).is_none());
        assert!(list.get(DisplayHandle(0x1234_5678)).is_none());
    }

    #[test]
    fn test_remove_then_unlink() {
        let (base, platform, _driver) = test_platform();
        let dpy = base.get_platform_display(&platform, NativeHandle(1), &[]).unwrap();
        let removed = base.lock_display_list().remove(dpy).unwrap();
        base.unlink_display(removed);
        assert_eq!(base.display_count(), 0);
        assert!(base.lookup_display(dpy).is_err());
    }
}
