//! In-memory EGL driver
//!
//! Keeps just enough state to behave like a driver from the platform base's
//! point of view: displays that can be initialized and terminated, pbuffer
//! surfaces, contexts, per-thread current state and devices. Every entry
//! point is counted so tests can assert on what reached the driver.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::driver::{Driver, DriverResult};
use crate::egl::{
    self, Attrib, ConfigHandle, ContextHandle, DeviceHandle, DriverDisplay, EglError, EglInt, NativeHandle,
    PlatformKind, StreamHandle, SurfaceBinding, SurfaceHandle,
};

/// Version every headless display reports
pub const HEADLESS_VERSION: (EglInt, EglInt) = (1, 5);

const CLIENT_EXTENSIONS: &str = "EGL_KHR_display_reference EGL_EXT_device_enumeration EGL_EXT_platform_device";
const DISPLAY_EXTENSIONS: &str = "EGL_EXT_swap_buffers_with_damage EGL_KHR_stream_producer_eglsurface";
const CONFIGS: [ConfigHandle; 2] = [ConfigHandle(1), ConfigHandle(2)];

/// How many times each driver entry point ran successfully
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DriverCalls {
    /// `eglGetPlatformDisplay`
    pub get_platform_display: usize,
    /// `eglInitialize`
    pub initialize: usize,
    /// `eglTerminate`
    pub terminate: usize,
    /// Surface creation of any kind
    pub create_surface: usize,
    /// `eglDestroySurface`
    pub destroy_surface: usize,
    /// `eglSwapBuffers`
    pub swap_buffers: usize,
    /// `eglSwapBuffersWithDamageEXT`
    pub swap_buffers_with_damage: usize,
    /// `eglMakeCurrent`
    pub make_current: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct ThreadCurrent {
    display: DriverDisplay,
    draw: SurfaceHandle,
    read: SurfaceHandle,
    context: ContextHandle,
}

#[derive(Debug, Default)]
struct DriverDisplayState {
    device: Option<DeviceHandle>,
    initialized: bool,
}

#[derive(Default)]
struct DriverState {
    next_handle: u64,
    by_native: HashMap<(PlatformKind, NativeHandle), DriverDisplay>,
    displays: HashMap<DriverDisplay, DriverDisplayState>,
    surfaces: HashMap<SurfaceHandle, DriverDisplay>,
    contexts: HashSet<ContextHandle>,
    current: HashMap<ThreadId, ThreadCurrent>,
    errors: HashMap<ThreadId, EglError>,
    devices: Vec<DeviceHandle>,
    fail_next_initialize: Option<EglError>,
    fail_next_make_current: Option<EglError>,
    calls: DriverCalls,
}

impl DriverState {
    fn allocate(&mut self) -> u64 {
        self.next_handle += 1;
        0x1000 + self.next_handle
    }

    fn fail<T>(&mut self, error: EglError) -> DriverResult<T> {
        self.errors.insert(thread::current().id(), error);
        Err(error)
    }

    fn check_initialized(&mut self, display: DriverDisplay) -> DriverResult<()> {
        match self.displays.get(&display).map(|d| d.initialized) {
            None => self.fail(EglError::BAD_DISPLAY),
            Some(false) => self.fail(EglError::NOT_INITIALIZED),
            Some(true) => Ok(()),
        }
    }

    fn new_surface(&mut self, display: DriverDisplay) -> SurfaceHandle {
        let surface = SurfaceHandle(self.allocate());
        self.surfaces.insert(surface, display);
        self.calls.create_surface += 1;
        surface
    }
}

/// A driver that keeps everything in memory
pub struct HeadlessDriver {
    state: Mutex<DriverState>,
}

impl HeadlessDriver {
    /// A driver with two devices
    pub fn new() -> Self {
        Self::with_devices(2)
    }

    /// A driver with `count` devices
    pub fn with_devices(count: usize) -> Self {
        let mut state = DriverState::default();
        for _ in 0..count {
            let device = DeviceHandle(state.allocate());
            state.devices.push(device);
        }
        Self { state: Mutex::new(state) }
    }

    fn state(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a driver display that no native display maps to
    pub fn add_display(&self) -> DriverDisplay {
        let mut state = self.state();
        let display = DriverDisplay(state.allocate());
        state.displays.insert(display, DriverDisplayState::default());
        display
    }

    /// Make the next `initialize` fail with `error`
    pub fn fail_next_initialize(&self, error: EglError) {
        self.state().fail_next_initialize = Some(error);
    }

    /// Make the next `make_current` fail with `error`, leaving the thread's
    /// current state untouched
    pub fn fail_next_make_current(&self, error: EglError) {
        self.state().fail_next_make_current = Some(error);
    }

    /// Devices the driver enumerates
    pub fn devices(&self) -> Vec<DeviceHandle> {
        self.state().devices.clone()
    }

    /// Create a rendering context
    pub fn create_context(&self) -> ContextHandle {
        let mut state = self.state();
        let context = ContextHandle(state.allocate());
        state.contexts.insert(context);
        context
    }

    /// Snapshot of the call counters
    pub fn calls(&self) -> DriverCalls {
        self.state().calls
    }

    /// Whether `display` is initialized at the driver level
    pub fn is_initialized(&self, display: DriverDisplay) -> bool {
        self.state().displays.get(&display).is_some_and(|d| d.initialized)
    }

    /// Number of live driver surfaces
    pub fn surface_count(&self) -> usize {
        self.state().surfaces.len()
    }
}

impl Default for HeadlessDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for HeadlessDriver {
    fn query_string(&self, display: DriverDisplay, name: EglInt) -> Option<String> {
        if display.is_none() {
            return (name == egl::EXTENSIONS).then(|| CLIENT_EXTENSIONS.to_string());
        }
        if !self.state().displays.contains_key(&display) {
            return None;
        }
        match name {
            egl::VENDOR => Some("headless".to_string()),
            egl::VERSION => Some(format!("{}.{} headless", HEADLESS_VERSION.0, HEADLESS_VERSION.1)),
            egl::EXTENSIONS => Some(DISPLAY_EXTENSIONS.to_string()),
            _ => None,
        }
    }

    fn get_platform_display(
        &self,
        platform: PlatformKind,
        native_display: NativeHandle,
        _attribs: &[(Attrib, Attrib)],
    ) -> DriverResult<DriverDisplay> {
        let mut state = self.state();
        let device = if platform == PlatformKind::DEVICE {
            let device = DeviceHandle(native_display.raw());
            if !state.devices.contains(&device) {
                return state.fail(EglError::BAD_PARAMETER);
            }
            Some(device)
        } else {
            None
        };
        state.calls.get_platform_display += 1;
        if let Some(display) = state.by_native.get(&(platform, native_display)) {
            return Ok(*display);
        }
        let display = DriverDisplay(state.allocate());
        state.by_native.insert((platform, native_display), display);
        state.displays.insert(display, DriverDisplayState { device, initialized: false });
        Ok(display)
    }

    fn initialize(&self, display: DriverDisplay) -> DriverResult<(EglInt, EglInt)> {
        let mut state = self.state();
        if !state.displays.contains_key(&display) {
            return state.fail(EglError::BAD_DISPLAY);
        }
        if let Some(error) = state.fail_next_initialize.take() {
            return state.fail(error);
        }
        if let Some(d) = state.displays.get_mut(&display) {
            d.initialized = true;
        }
        state.calls.initialize += 1;
        Ok(HEADLESS_VERSION)
    }

    fn terminate(&self, display: DriverDisplay) -> DriverResult<()> {
        let mut state = self.state();
        let Some(d) = state.displays.get_mut(&display) else {
            return state.fail(EglError::BAD_DISPLAY);
        };
        d.initialized = false;
        state.surfaces.retain(|_, owner| *owner != display);
        state.calls.terminate += 1;
        Ok(())
    }

    fn get_error(&self) -> EglError {
        self.state().errors.remove(&thread::current().id()).unwrap_or(EglError::SUCCESS)
    }

    fn create_pbuffer_surface(
        &self,
        display: DriverDisplay,
        config: ConfigHandle,
        _attribs: &[(Attrib, Attrib)],
    ) -> DriverResult<SurfaceHandle> {
        let mut state = self.state();
        state.check_initialized(display)?;
        if !CONFIGS.contains(&config) {
            return state.fail(EglError::BAD_CONFIG);
        }
        Ok(state.new_surface(display))
    }

    fn destroy_surface(&self, display: DriverDisplay, surface: SurfaceHandle) -> DriverResult<()> {
        let mut state = self.state();
        if state.surfaces.get(&surface) != Some(&display) {
            return state.fail(EglError::BAD_SURFACE);
        }
        state.surfaces.remove(&surface);
        state.calls.destroy_surface += 1;
        Ok(())
    }

    fn swap_buffers(&self, display: DriverDisplay, surface: SurfaceHandle) -> DriverResult<()> {
        let mut state = self.state();
        if state.surfaces.get(&surface) != Some(&display) {
            return state.fail(EglError::BAD_SURFACE);
        }
        state.calls.swap_buffers += 1;
        Ok(())
    }

    fn swap_buffers_with_damage(
        &self,
        display: DriverDisplay,
        surface: SurfaceHandle,
        rects: &[EglInt],
    ) -> DriverResult<()> {
        let mut state = self.state();
        if state.surfaces.get(&surface) != Some(&display) {
            return state.fail(EglError::BAD_SURFACE);
        }
        if rects.len() % 4 != 0 {
            return state.fail(EglError::BAD_PARAMETER);
        }
        state.calls.swap_buffers_with_damage += 1;
        Ok(())
    }

    fn choose_config(&self, display: DriverDisplay, _attribs: &[(Attrib, Attrib)]) -> DriverResult<Vec<ConfigHandle>> {
        self.state().check_initialized(display)?;
        Ok(CONFIGS.to_vec())
    }

    fn get_config_attrib(
        &self,
        display: DriverDisplay,
        config: ConfigHandle,
        _attribute: EglInt,
    ) -> DriverResult<EglInt> {
        let mut state = self.state();
        state.check_initialized(display)?;
        if !CONFIGS.contains(&config) {
            return state.fail(EglError::BAD_CONFIG);
        }
        Ok(8)
    }

    fn get_configs(&self, display: DriverDisplay) -> DriverResult<Vec<ConfigHandle>> {
        self.state().check_initialized(display)?;
        Ok(CONFIGS.to_vec())
    }

    fn get_current_display(&self) -> DriverDisplay {
        self.state().current.get(&thread::current().id()).map_or(DriverDisplay::NONE, |c| c.display)
    }

    fn get_current_surface(&self, which: SurfaceBinding) -> SurfaceHandle {
        let state = self.state();
        let Some(current) = state.current.get(&thread::current().id()) else {
            return SurfaceHandle::NONE;
        };
        match which {
            SurfaceBinding::Draw => current.draw,
            SurfaceBinding::Read => current.read,
        }
    }

    fn get_current_context(&self) -> ContextHandle {
        self.state().current.get(&thread::current().id()).map_or(ContextHandle::NONE, |c| c.context)
    }

    fn make_current(
        &self,
        display: DriverDisplay,
        draw: SurfaceHandle,
        read: SurfaceHandle,
        context: ContextHandle,
    ) -> DriverResult<()> {
        let mut state = self.state();
        let id = thread::current().id();
        if let Some(error) = state.fail_next_make_current.take() {
            return state.fail(error);
        }
        if context.is_none() {
            if !draw.is_none() || !read.is_none() {
                return state.fail(EglError::BAD_MATCH);
            }
            state.current.remove(&id);
        } else {
            state.check_initialized(display)?;
            if !state.contexts.contains(&context) {
                return state.fail(EglError::BAD_CONTEXT);
            }
            state.current.insert(id, ThreadCurrent { display, draw, read, context });
        }
        state.calls.make_current += 1;
        Ok(())
    }

    fn query_device_attrib(&self, device: DeviceHandle, _attribute: EglInt) -> DriverResult<Attrib> {
        let mut state = self.state();
        if !state.devices.contains(&device) {
            return state.fail(EglError::BAD_PARAMETER);
        }
        Ok(0)
    }

    fn query_device_string(&self, device: DeviceHandle, name: EglInt) -> Option<String> {
        let state = self.state();
        let index = state.devices.iter().position(|d| *d == device)?;
        (name == egl::EXTENSIONS).then(|| format!("EGL_headless_device_{index}"))
    }

    fn query_devices(&self, devices: Option<&mut [DeviceHandle]>) -> DriverResult<usize> {
        let state = self.state();
        match devices {
            None => Ok(state.devices.len()),
            Some(out) => {
                let written = out.len().min(state.devices.len());
                out[..written].copy_from_slice(&state.devices[..written]);
                Ok(written)
            }
        }
    }

    fn query_display_attrib(&self, display: DriverDisplay, attribute: EglInt) -> DriverResult<Attrib> {
        let mut state = self.state();
        let Some(device) = state.displays.get(&display).map(|d| d.device) else {
            return state.fail(EglError::BAD_DISPLAY);
        };
        match (attribute, device) {
            (egl::DEVICE, Some(device)) => match Attrib::try_from(device.raw()) {
                Ok(value) => Ok(value),
                Err(_) => state.fail(EglError::BAD_ATTRIBUTE),
            },
            _ => state.fail(EglError::BAD_ATTRIBUTE),
        }
    }

    fn create_stream_producer_surface(
        &self,
        display: DriverDisplay,
        config: ConfigHandle,
        stream: StreamHandle,
        _attribs: &[(EglInt, EglInt)],
    ) -> DriverResult<SurfaceHandle> {
        let mut state = self.state();
        state.check_initialized(display)?;
        if stream.is_none() {
            return state.fail(EglError::BAD_PARAMETER);
        }
        if !CONFIGS.contains(&config) {
            return state.fail(EglError::BAD_CONFIG);
        }
        Ok(state.new_surface(display))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_failure_injection() {
        let driver = HeadlessDriver::new();
        let display = driver.add_display();
        driver.fail_next_initialize(EglError::BAD_ALLOC);
        assert_eq!(driver.initialize(display), Err(EglError::BAD_ALLOC));
        assert_eq!(driver.get_error(), EglError::BAD_ALLOC);
        assert_eq!(driver.get_error(), EglError::SUCCESS);
        assert_eq!(driver.initialize(display), Ok(HEADLESS_VERSION));
        assert_eq!(driver.calls().initialize, 1);
    }

    #[test]
    fn test_terminate_destroys_display_surfaces() {
        let driver = HeadlessDriver::new();
        let display = driver.add_display();
        driver.initialize(display).unwrap();
        driver.create_pbuffer_surface(display, ConfigHandle(1), &[]).unwrap();
        assert_eq!(driver.surface_count(), 1);
        driver.terminate(display).unwrap();
        assert_eq!(driver.surface_count(), 0);
        assert!(!driver.is_initialized(display));
    }

    #[test]
    fn test_query_devices_two_call_protocol() {
        let driver = HeadlessDriver::with_devices(3);
        assert_eq!(driver.query_devices(None), Ok(3));
        let mut out = [DeviceHandle::NONE; 2];
        assert_eq!(driver.query_devices(Some(&mut out)), Ok(2));
        assert_eq!(out.to_vec(), driver.devices()[..2].to_vec());
    }

    #[test]
    fn test_device_display_reports_its_device() {
        let driver = HeadlessDriver::new();
        let device = driver.devices()[1];
        let display = driver
            .get_platform_display(PlatformKind::DEVICE, NativeHandle(device.raw()), &[])
            .unwrap();
        let raw = driver.query_display_attrib(display, egl::DEVICE).unwrap();
        assert_eq!(u64::try_from(raw).unwrap(), device.raw());
        assert_eq!(
            driver.get_platform_display(PlatformKind::DEVICE, NativeHandle(0xbad), &[]),
            Err(EglError::BAD_PARAMETER)
        );
    }

    #[test]
    fn test_current_state_is_per_thread() {
        let driver = HeadlessDriver::new();
        let display = driver.add_display();
        driver.initialize(display).unwrap();
        let context = driver.create_context();
        driver.make_current(display, SurfaceHandle(5), SurfaceHandle(6), context).unwrap();
        std::thread::scope(|s| {
            s.spawn(|| assert_eq!(driver.get_current_context(), ContextHandle::NONE));
        });
        assert_eq!(driver.get_current_surface(SurfaceBinding::Read), SurfaceHandle(6));
        assert_eq!(
            driver.make_current(display, SurfaceHandle(5), SurfaceHandle::NONE, ContextHandle::NONE),
            Err(EglError::BAD_MATCH)
        );
    }
}
