//! Driver entry points consumed by the platform base
//!
//! `Driver` is the function table the vendor library hands over at load
//! time. Results are passed through unchanged: a failing call returns the
//! driver's own error code.

use crate::egl::{
    Attrib, ConfigHandle, ContextHandle, DeviceHandle, DriverDisplay, EglError, EglInt,
    NativeHandle, PlatformKind, StreamHandle, SurfaceBinding, SurfaceHandle,
};

/// Result of a driver call
pub type DriverResult<T> = Result<T, EglError>;

/// The driver's EGL function table
pub trait Driver: Send + Sync {
    /// `eglQueryString`; `DriverDisplay::NONE` queries client extensions
    fn query_string(&self, display: DriverDisplay, name: EglInt) -> Option<String>;

    /// `eglGetPlatformDisplay`
    fn get_platform_display(
        &self,
        platform: PlatformKind,
        native_display: NativeHandle,
        attribs: &[(Attrib, Attrib)],
    ) -> DriverResult<DriverDisplay>;

    /// `eglInitialize`, returning the version
    fn initialize(&self, display: DriverDisplay) -> DriverResult<(EglInt, EglInt)>;

    /// `eglTerminate`
    fn terminate(&self, display: DriverDisplay) -> DriverResult<()>;

    /// `eglGetError`
    fn get_error(&self) -> EglError;

    /// `eglCreatePbufferSurface`
    fn create_pbuffer_surface(
        &self,
        display: DriverDisplay,
        config: ConfigHandle,
        attribs: &[(Attrib, Attrib)],
    ) -> DriverResult<SurfaceHandle>;

    /// `eglDestroySurface`
    fn destroy_surface(&self, display: DriverDisplay, surface: SurfaceHandle) -> DriverResult<()>;

    /// `eglSwapBuffers`
    fn swap_buffers(&self, display: DriverDisplay, surface: SurfaceHandle) -> DriverResult<()>;

    /// `eglSwapBuffersWithDamageEXT`; `rects` is a flat list of x, y, w, h
    fn swap_buffers_with_damage(
        &self,
        display: DriverDisplay,
        surface: SurfaceHandle,
        rects: &[EglInt],
    ) -> DriverResult<()>;

    /// `eglChooseConfig`
    fn choose_config(
        &self,
        display: DriverDisplay,
        attribs: &[(Attrib, Attrib)],
    ) -> DriverResult<Vec<ConfigHandle>>;

    /// `eglGetConfigAttrib`
    fn get_config_attrib(
        &self,
        display: DriverDisplay,
        config: ConfigHandle,
        attribute: EglInt,
    ) -> DriverResult<EglInt>;

    /// `eglGetConfigs`
    fn get_configs(&self, display: DriverDisplay) -> DriverResult<Vec<ConfigHandle>>;

    /// `eglGetCurrentDisplay` for the calling thread
    fn get_current_display(&self) -> DriverDisplay;

    /// `eglGetCurrentSurface` for the calling thread
    fn get_current_surface(&self, which: SurfaceBinding) -> SurfaceHandle;

    /// `eglGetCurrentContext` for the calling thread
    fn get_current_context(&self) -> ContextHandle;

    /// `eglMakeCurrent`
    fn make_current(
        &self,
        display: DriverDisplay,
        draw: SurfaceHandle,
        read: SurfaceHandle,
        context: ContextHandle,
    ) -> DriverResult<()>;

    /// `eglQueryDeviceAttribEXT`
    fn query_device_attrib(&self, device: DeviceHandle, attribute: EglInt) -> DriverResult<Attrib>;

    /// `eglQueryDeviceStringEXT`
    fn query_device_string(&self, device: DeviceHandle, name: EglInt) -> Option<String>;

    /// `eglQueryDevicesEXT`
    ///
    /// With `None`, returns the number of devices. Otherwise fills the slice
    /// and returns how many entries were written.
    fn query_devices(&self, devices: Option<&mut [DeviceHandle]>) -> DriverResult<usize>;

    /// `eglQueryDisplayAttribEXT`
    fn query_display_attrib(&self, display: DriverDisplay, attribute: EglInt) -> DriverResult<Attrib>;

    /// `eglCreateStreamProducerSurfaceKHR`
    fn create_stream_producer_surface(
        &self,
        display: DriverDisplay,
        config: ConfigHandle,
        stream: StreamHandle,
        attribs: &[(EglInt, EglInt)],
    ) -> DriverResult<SurfaceHandle>;
}
