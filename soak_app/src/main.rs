//! Platform base soak test
//!
//! Drives the headless backend from many threads with a random mix of
//! initialize, terminate, surface and make-current calls, then checks that
//! nothing leaked. Settings come from `platform_soak.toml` (or the path given
//! as the first argument) and fall back to defaults when the file is missing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use egl_platform_base::backends::headless::{headless_descriptor, HeadlessDriver, HeadlessPlatform, HeadlessShared};
use egl_platform_base::config::{Config, ConfigError};
use egl_platform_base::core::PlatformBaseConfig;
use egl_platform_base::egl::{self, ConfigHandle, ContextHandle, DisplayHandle, EglError, NativeHandle, SurfaceHandle};
use egl_platform_base::error::HandleKind;
use egl_platform_base::foundation::logging;
use egl_platform_base::{PlatformBase, PlatformError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_PATH: &str = "platform_soak.toml";

/// Soak run settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct SoakConfig {
    threads: usize,
    iterations: usize,
    track_references: bool,
    seed: u64,
    base: PlatformBaseConfig,
}

impl Default for SoakConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            iterations: 2_000,
            track_references: true,
            seed: 0x5eed,
            base: PlatformBaseConfig::default(),
        }
    }
}

impl Config for SoakConfig {}

#[derive(thiserror::Error, Debug)]
enum SoakError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("platform: {0}")]
    Platform(#[from] PlatformError),

    #[error("{0} threads requested, need at least one")]
    NoThreads(usize),

    #[error("worker thread {0} panicked")]
    WorkerPanicked(usize),

    #[error("leak after soak: {0}")]
    Leak(String),
}

/// Completed calls and calls refused for expected reasons, such as a
/// display terminated by another thread
#[derive(Default)]
struct Tally {
    completed: AtomicUsize,
    refused: AtomicUsize,
}

impl Tally {
    /// Count a call; an unexpected error is handed back to stop the worker
    fn record<T>(&self, result: Result<T, PlatformError>) -> Result<Option<T>, PlatformError> {
        match result {
            Ok(value) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            Err(e) if is_expected(&e) => {
                log::trace!("refused: {e}");
                self.refused.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => {
                log::error!("unexpected failure: {e}");
                Err(e)
            }
        }
    }
}

/// Failures a racing thread can cause: the display was terminated under us,
/// which also frees the surfaces we still hold handles to
fn is_expected(error: &PlatformError) -> bool {
    match error {
        PlatformError::NotInitialized(_)
        | PlatformError::TerminatePending(_)
        | PlatformError::NotFound { kind: HandleKind::Surface, .. } => true,
        PlatformError::Driver(code) => *code == EglError::BAD_SURFACE,
        _ => false,
    }
}

fn worker(
    base: &PlatformBase,
    driver: &HeadlessDriver,
    backend: &HeadlessPlatform,
    dpy: DisplayHandle,
    id: usize,
    config: &SoakConfig,
    tally: &Tally,
) -> Result<(), PlatformError> {
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(id as u64));
    let context = driver.create_context();
    let mut windows: Vec<(SurfaceHandle, NativeHandle)> = Vec::new();
    let mut next_native = 0x1_0000 * (id as u64 + 1);

    for _ in 0..config.iterations {
        match rng.gen_range(0..8) {
            0 => {
                tally.record(base.initialize_display(dpy))?;
            }
            1 => {
                tally.record(base.terminate_display(dpy))?;
            }
            2 => {
                next_native += 1;
                let native = NativeHandle(next_native);
                if let Some(window) = tally.record(base.create_window_surface(dpy, ConfigHandle(1), native, &[]))? {
                    windows.push((window, native));
                }
            }
            3 if !windows.is_empty() => {
                let (window, _) = windows.swap_remove(rng.gen_range(0..windows.len()));
                tally.record(base.destroy_surface(dpy, window))?;
            }
            4 if !windows.is_empty() => {
                let (window, _) = windows[rng.gen_range(0..windows.len())];
                tally.record(base.make_current(dpy, window, window, context))?;
            }
            5 if !windows.is_empty() => {
                let (window, native) = windows[rng.gen_range(0..windows.len())];
                if rng.gen_bool(0.25) {
                    backend.resize_window(native, rng.gen_range(16..256), rng.gen_range(16..256));
                }
                tally.record(base.swap_buffers(dpy, window, &[]))?;
            }
            6 => {
                let released = base.make_current(dpy, SurfaceHandle::NONE, SurfaceHandle::NONE, ContextHandle::NONE);
                tally.record(released)?;
            }
            _ => {
                // Hold a use across a yield so terminates from other threads defer.
                if let Some(guard) = tally.record(base.acquire_display(dpy))? {
                    let unlocked = guard.unlock();
                    thread::yield_now();
                    drop(unlocked);
                }
            }
        }
    }

    if let Err(e) = base.release_current() {
        log::warn!("thread {id}: release failed: {e}");
    }
    for (window, _) in windows {
        tally.record(base.destroy_surface(dpy, window))?;
    }
    Ok(())
}

fn run(config: &SoakConfig) -> Result<(), SoakError> {
    config.base.validate()?;
    if config.threads == 0 {
        return Err(SoakError::NoThreads(config.threads));
    }

    let base = PlatformBase::new(config.base.clone());
    let driver = Arc::new(HeadlessDriver::new());
    let platform = base.allocate_platform(headless_descriptor(Arc::clone(&driver)))?;
    base.init_finish(&platform);
    let backend = HeadlessShared::of(&platform)
        .map(|shared| Arc::clone(&shared.backend))
        .ok_or_else(|| SoakError::Leak("headless platform lost its backend".to_string()))?;

    let attribs = if config.track_references {
        vec![(egl::TRACK_REFERENCES, egl::TRUE)]
    } else {
        Vec::new()
    };
    let dpy = base.get_platform_display(&platform, NativeHandle(1), &attribs)?;
    let tally = Tally::default();

    log::info!(
        "Soaking {} threads x {} iterations (track references: {})",
        config.threads,
        config.iterations,
        config.track_references
    );
    let start = Instant::now();
    thread::scope(|s| {
        let workers: Vec<_> = (0..config.threads)
            .map(|id| {
                let (base, driver, backend, tally) = (&base, &*driver, &*backend, &tally);
                s.spawn(move || worker(base, driver, backend, dpy, id, config, tally))
            })
            .collect();
        // Join every worker before reporting, so no panic is left unjoined.
        let outcomes: Vec<_> = workers.into_iter().map(thread::ScopedJoinHandle::join).collect();
        outcomes.into_iter().enumerate().try_for_each(|(id, outcome)| {
            outcome.map_err(|_| SoakError::WorkerPanicked(id))?.map_err(SoakError::from)
        })
    })?;
    let elapsed = start.elapsed();

    while base.lookup_display(dpy)?.init_count() > 0 {
        base.terminate_display(dpy)?;
    }
    let surfaces = base.lookup_display(dpy)?.surface_count();
    if surfaces != 0 {
        return Err(SoakError::Leak(format!("{surfaces} tracked surfaces")));
    }
    if driver.surface_count() != 0 {
        return Err(SoakError::Leak(format!("{} driver surfaces", driver.surface_count())));
    }

    let hooks = backend.calls();
    log::info!(
        "Done in {:.2?}: {} calls completed, {} refused; {} surfaces created, {} destroyed, {} resizes",
        elapsed,
        tally.completed.load(Ordering::Relaxed),
        tally.refused.load(Ordering::Relaxed),
        hooks.create_surface,
        hooks.destroy_surface,
        hooks.resizes
    );
    if hooks.create_surface != hooks.destroy_surface {
        return Err(SoakError::Leak(format!(
            "{} surfaces created but {} destroyed",
            hooks.create_surface, hooks.destroy_surface
        )));
    }

    base.unload_platform(platform);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = SoakConfig::load_or_default(&path)?;

    logging::init_with_filter(&config.base.debug.log_filter);

    log::info!("Starting platform soak");
    run(&config)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_races_are_refused_not_fatal() {
        let tally = Tally::default();
        assert_eq!(tally.record::<()>(Err(PlatformError::NotInitialized(1))), Ok(None));
        assert_eq!(tally.record::<()>(Err(PlatformError::Driver(EglError::BAD_SURFACE))), Ok(None));
        assert_eq!(tally.record(Ok(3)), Ok(Some(3)));
        assert_eq!(tally.refused.load(Ordering::Relaxed), 2);
        assert_eq!(tally.completed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unexpected_error_is_returned() {
        let tally = Tally::default();
        let error = PlatformError::Driver(EglError::BAD_ALLOC);
        assert_eq!(tally.record::<()>(Err(error.clone())), Err(error));
        assert_eq!(tally.refused.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_zero_threads_is_rejected() {
        let config = SoakConfig { threads: 0, ..SoakConfig::default() };
        assert!(matches!(run(&config), Err(SoakError::NoThreads(0))));
    }

    #[test]
    fn test_short_soak_leaks_nothing() {
        let config = SoakConfig { threads: 4, iterations: 200, ..SoakConfig::default() };
        run(&config).unwrap();
    }
}
