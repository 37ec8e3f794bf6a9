//! Display initialize/terminate counting and deferred terminate

use crate::backends::headless::{test_platform, test_platform_with_display, HeadlessPlatform, HEADLESS_VERSION};
use crate::egl::{self, NativeHandle};
use crate::error::PlatformError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_to_terminate_scenario() {
        let (base, platform, driver) = test_platform();

        // The internal display reports the driver's version.
        let internal = platform.lookup_internal_display(driver.add_display());
        assert_eq!(platform.initialize_internal_display(&internal).unwrap(), HEADLESS_VERSION);
        assert_eq!(HEADLESS_VERSION, (1, 5));
        platform.terminate_internal_display(&internal).unwrap();

        let before = driver.calls().terminate;
        let dpy = base.get_platform_display(&platform, NativeHandle(0x77), &[]).unwrap();
        assert!(!base.query_track_references(dpy).unwrap());
        base.initialize_display(dpy).unwrap();
        base.initialize_display(dpy).unwrap();
        base.terminate_display(dpy).unwrap();

        let guard = base.lookup_display(dpy).unwrap();
        assert_eq!(guard.init_count(), 0);
        assert!(!guard.is_initialized());
        assert_eq!(HeadlessPlatform::hook_calls(&platform).terminate_display, 1);
        assert_eq!(driver.calls().terminate, before + 1);
    }

    #[test]
    fn test_tracked_counts_each_initialize() {
        for (k, j) in [(1_u32, 0_u32), (3, 1), (4, 3), (5, 5)] {
            let (base, platform, _driver, dpy) = test_platform_with_display(true);
            for _ in 0..k {
                base.initialize_display(dpy).unwrap();
            }
            for step in 0..j {
                base.terminate_display(dpy).unwrap();
                let hooks = HeadlessPlatform::hook_calls(&platform);
                let expected = usize::from(step + 1 == k);
                assert_eq!(hooks.terminate_display, expected, "k={k} j={j} step={step}");
            }
            let guard = base.lookup_display(dpy).unwrap();
            assert_eq!(guard.init_count(), k - j, "k={k} j={j}");
            assert_eq!(guard.is_initialized(), k > j);
            assert_eq!(HeadlessPlatform::hook_calls(&platform).initialize_display, 1);
        }
    }

    #[test]
    fn test_untracked_caps_at_one() {
        let (base, platform, _driver, dpy) = test_platform_with_display(false);
        for _ in 0..5 {
            assert_eq!(base.initialize_display(dpy).unwrap(), HEADLESS_VERSION);
        }
        assert_eq!(base.lookup_display(dpy).unwrap().init_count(), 1);
        base.terminate_display(dpy).unwrap();
        assert_eq!(base.lookup_display(dpy).unwrap().init_count(), 0);
        assert_eq!(HeadlessPlatform::hook_calls(&platform).terminate_display, 1);
    }

    #[test]
    fn test_terminate_uninitialized_is_noop() {
        let (base, platform, _driver, dpy) = test_platform_with_display(true);
        base.terminate_display(dpy).unwrap();
        assert_eq!(HeadlessPlatform::hook_calls(&platform).terminate_display, 0);
    }

    #[test]
    fn test_terminate_while_acquired_is_deferred() {
        let (base, platform, _driver, dpy) = test_platform_with_display(false);
        base.initialize_display(dpy).unwrap();

        let guard = base.acquire_display(dpy).unwrap();
        // The display lock is reentrant, so the same thread may terminate.
        base.terminate_display(dpy).unwrap();
        assert!(guard.is_terminate_pending());
        assert_eq!(HeadlessPlatform::hook_calls(&platform).terminate_display, 0);

        // Mid-teardown the display is neither usable nor re-initializable.
        assert_eq!(base.acquire_display(dpy).err(), Some(PlatformError::NotInitialized(dpy.raw())));
        assert_eq!(
            base.initialize_display(dpy).err(),
            Some(PlatformError::TerminatePending(dpy.raw()))
        );

        drop(guard);
        assert_eq!(HeadlessPlatform::hook_calls(&platform).terminate_display, 1);
        let guard = base.lookup_display(dpy).unwrap();
        assert!(!guard.is_terminate_pending());
        assert_eq!(guard.use_count(), 0);
        drop(guard);

        // Once torn down the display can be brought back up.
        base.initialize_display(dpy).unwrap();
        assert_eq!(HeadlessPlatform::hook_calls(&platform).initialize_display, 2);
    }

    #[test]
    fn test_second_terminate_while_pending_is_noop() {
        let (base, platform, _driver, dpy) = test_platform_with_display(true);
        base.initialize_display(dpy).unwrap();
        base.initialize_display(dpy).unwrap();

        let guard = base.acquire_display(dpy).unwrap();
        base.terminate_display(dpy).unwrap();
        base.terminate_display(dpy).unwrap();
        assert!(guard.is_terminate_pending());
        base.terminate_display(dpy).unwrap();
        assert_eq!(guard.init_count(), 0);

        drop(guard);
        assert_eq!(HeadlessPlatform::hook_calls(&platform).terminate_display, 1);
    }

    #[test]
    fn test_deferred_terminate_runs_on_last_of_many_uses() {
        let (base, platform, _driver, dpy) = test_platform_with_display(false);
        base.initialize_display(dpy).unwrap();
        let first = base.acquire_display(dpy).unwrap();
        let second = base.acquire_display(dpy).unwrap();
        base.terminate_display(dpy).unwrap();

        drop(second);
        assert_eq!(HeadlessPlatform::hook_calls(&platform).terminate_display, 0);
        assert_eq!(first.use_count(), 1);
        drop(first);
        assert_eq!(HeadlessPlatform::hook_calls(&platform).terminate_display, 1);
    }

    #[test]
    fn test_terminate_from_other_thread_while_unlocked() {
        let (base, platform, _driver, dpy) = test_platform_with_display(false);
        base.initialize_display(dpy).unwrap();
        let unlocked = base.acquire_display(dpy).unwrap().unlock();

        std::thread::scope(|s| {
            s.spawn(|| base.terminate_display(dpy).unwrap());
        });
        assert_eq!(HeadlessPlatform::hook_calls(&platform).terminate_display, 0);

        let guard = unlocked.lock();
        assert!(guard.is_terminate_pending());
        drop(guard);
        assert_eq!(HeadlessPlatform::hook_calls(&platform).terminate_display, 1);
    }

    #[test]
    fn test_failed_initialize_leaves_display_uninitialized() {
        let (base, _platform, driver, dpy) = test_platform_with_display(false);
        driver.fail_next_initialize(egl::EglError::BAD_ALLOC);
        assert_eq!(
            base.initialize_display(dpy).err(),
            Some(PlatformError::Driver(egl::EglError::BAD_ALLOC))
        );
        let guard = base.lookup_display(dpy).unwrap();
        assert_eq!(guard.init_count(), 0);
        assert!(!guard.is_initialized());
        drop(guard);
        base.initialize_display(dpy).unwrap();
    }

    #[test]
    fn test_tracked_and_untracked_share_driver_display() {
        let (base, platform, driver) = test_platform();
        let plain = base.get_platform_display(&platform, NativeHandle(9), &[]).unwrap();
        let tracked = base
            .get_platform_display(&platform, NativeHandle(9), &[(egl::TRACK_REFERENCES, egl::TRUE)])
            .unwrap();
        base.initialize_display(plain).unwrap();
        base.initialize_display(tracked).unwrap();
        assert_eq!(driver.calls().initialize, 1);

        base.terminate_display(plain).unwrap();
        let internal = base.lookup_display(tracked).unwrap().internal_display();
        assert!(driver.is_initialized(internal));
        base.terminate_display(tracked).unwrap();
        assert!(!driver.is_initialized(internal));
        assert_eq!(driver.calls().terminate, 1);
    }
}
