//! Surface tracking, deferred deletion and teardown paths

use crate::backends::headless::{test_platform_with_display, HeadlessPlatform};
use crate::egl::{ConfigHandle, ContextHandle, NativeHandle, StreamHandle, SurfaceHandle};
use crate::error::PlatformError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_surfaces_are_not_tracked() {
        let (base, _platform, driver, dpy) = test_platform_with_display(false);
        base.initialize_display(dpy).unwrap();
        let stream_surface = base
            .create_stream_producer_surface(dpy, ConfigHandle(2), StreamHandle(0x33), &[])
            .unwrap();
        let guard = base.acquire_display(dpy).unwrap();
        assert!(guard.acquire_surface(stream_surface).is_none());
        assert_eq!(guard.surface_count(), 0);
        drop(guard);
        assert_eq!(driver.calls().create_surface, 1);
    }

    #[test]
    fn test_surface_creation_requires_initialized_display() {
        let (base, _platform, _driver, dpy) = test_platform_with_display(false);
        assert_eq!(
            base.create_window_surface(dpy, ConfigHandle(1), NativeHandle(1), &[]).err(),
            Some(PlatformError::NotInitialized(dpy.raw()))
        );
    }

    #[test]
    fn test_terminate_marks_surfaces_and_frees_unbound_ones() {
        let (base, platform, driver, dpy) = test_platform_with_display(false);
        base.initialize_display(dpy).unwrap();
        let bound = base.create_window_surface(dpy, ConfigHandle(1), NativeHandle(1), &[]).unwrap();
        let idle = base.create_pixmap_surface(dpy, ConfigHandle(1), NativeHandle(2), &[]).unwrap();
        base.make_current(dpy, bound, bound, driver.create_context()).unwrap();

        base.terminate_display(dpy).unwrap();
        let lookup = base.lookup_display(dpy).unwrap();
        // Only the bound surface survives, deleted, until it is released.
        assert_eq!(lookup.surface_count(), 1);
        assert!(!lookup.is_tracked_surface(bound));
        assert!(!lookup.is_tracked_surface(idle));
        assert_eq!(HeadlessPlatform::hook_calls(&platform).destroy_surface, 1);
        drop(lookup);

        base.release_current().unwrap();
        assert_eq!(base.lookup_display(dpy).unwrap().surface_count(), 0);
        assert_eq!(HeadlessPlatform::hook_calls(&platform).destroy_surface, 2);
    }

    #[test]
    fn test_binding_survives_while_other_thread_destroys() {
        let (base, platform, driver, dpy) = test_platform_with_display(false);
        base.initialize_display(dpy).unwrap();
        let window = base.create_window_surface(dpy, ConfigHandle(1), NativeHandle(1), &[]).unwrap();
        let context = driver.create_context();

        std::thread::scope(|s| {
            s.spawn(|| {
                base.make_current(dpy, window, window, context).unwrap();
            })
            .join()
            .unwrap();
            // The spawned thread exited with the surface still current.
            base.destroy_surface(dpy, window).unwrap();
            assert_eq!(HeadlessPlatform::hook_calls(&platform).destroy_surface, 0);
            assert_eq!(base.current_bindings().len(), 1);
        });

        // Unloading reclaims bindings that no thread can release anymore.
        let handle = platform.retain();
        base.unload_platform(platform);
        assert!(base.current_bindings().is_empty());
        assert_eq!(HeadlessPlatform::hook_calls(&handle).destroy_surface, 1);
    }

    #[test]
    fn test_nested_surface_guards_keep_surface() {
        let (base, _platform, _driver, dpy) = test_platform_with_display(false);
        base.initialize_display(dpy).unwrap();
        let window = base.create_window_surface(dpy, ConfigHandle(1), NativeHandle(1), &[]).unwrap();
        let guard = base.acquire_display(dpy).unwrap();
        let outer = guard.acquire_surface(window).unwrap();
        {
            let inner = guard.acquire_surface(window).unwrap();
            assert_eq!(inner.surface_ref().ref_count(), 3);
        }
        guard.delete_surface(window).unwrap();
        // Still referenced by `outer`.
        assert_eq!(guard.surface_count(), 1);
        drop(outer);
        assert_eq!(guard.surface_count(), 0);
    }

    #[test]
    fn test_make_current_release_with_untracked_surfaces() {
        let (base, _platform, driver, dpy) = test_platform_with_display(false);
        base.initialize_display(dpy).unwrap();
        let pbuffer = base.create_pbuffer_surface(dpy, ConfigHandle(1), &[]).unwrap();
        base.make_current(dpy, pbuffer, pbuffer, driver.create_context()).unwrap();
        assert_eq!(base.current_display(), Some(dpy));
        base.make_current(dpy, SurfaceHandle::NONE, SurfaceHandle::NONE, ContextHandle::NONE).unwrap();
        assert_eq!(base.current_display(), None);
        assert_eq!(driver.calls().make_current, 2);
    }
}
