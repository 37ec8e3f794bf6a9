//! EGL handle types and constants
//!
//! Every handle that crosses the driver or application boundary is an opaque
//! integer in EGL. These newtypes keep the different kinds apart so that a
//! driver display can never be passed where an application-facing display is
//! expected.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Attribute key or value (`EGLAttrib`)
pub type Attrib = isize;

/// Integer attribute or enum (`EGLint`)
pub type EglInt = i32;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// The null handle
            pub const NONE: Self = Self(0);

            /// Whether this is the null handle
            pub const fn is_none(self) -> bool {
                self.0 == 0
            }

            /// The raw handle value
            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

handle_type!(
    /// Application-facing display handle handed out by the platform library
    DisplayHandle
);
handle_type!(
    /// Display handle owned by the underlying driver
    DriverDisplay
);
handle_type!(
    /// Surface handle (either application-facing or driver-level)
    SurfaceHandle
);
handle_type!(
    /// Rendering context handle
    ContextHandle
);
handle_type!(
    /// Framebuffer configuration handle
    ConfigHandle
);
handle_type!(
    /// Driver device handle (`EGLDeviceEXT`)
    DeviceHandle
);
handle_type!(
    /// Driver stream handle (`EGLStreamKHR`)
    StreamHandle
);
handle_type!(
    /// Native windowing-system object (display connection, window, or pixmap)
    NativeHandle
);

/// Platform enum value (`EGL_PLATFORM_X11_KHR` and friends)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformKind(pub u32);

impl PlatformKind {
    /// `EGL_PLATFORM_DEVICE_EXT`
    pub const DEVICE: Self = Self(0x313F);
    /// `EGL_PLATFORM_X11_KHR`
    pub const X11: Self = Self(0x31D5);
    /// `EGL_PLATFORM_GBM_KHR`
    pub const GBM: Self = Self(0x31D7);
    /// `EGL_PLATFORM_WAYLAND_KHR`
    pub const WAYLAND: Self = Self(0x31D8);
    /// `EGL_PLATFORM_SURFACELESS_MESA`
    pub const SURFACELESS: Self = Self(0x31DD);
}

/// Which half of a current binding to query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceBinding {
    /// `EGL_DRAW`
    Draw,
    /// `EGL_READ`
    Read,
}

impl SurfaceBinding {
    /// The EGL enum for this binding
    pub const fn as_enum(self) -> EglInt {
        match self {
            Self::Draw => DRAW,
            Self::Read => READ,
        }
    }
}

/// `EGL_TRUE`
pub const TRUE: Attrib = 1;
/// `EGL_FALSE`
pub const FALSE: Attrib = 0;

/// `EGL_VENDOR`
pub const VENDOR: EglInt = 0x3053;
/// `EGL_VERSION`
pub const VERSION: EglInt = 0x3054;
/// `EGL_EXTENSIONS`
pub const EXTENSIONS: EglInt = 0x3055;
/// `EGL_DRAW`
pub const DRAW: EglInt = 0x3059;
/// `EGL_READ`
pub const READ: EglInt = 0x305A;
/// `EGL_DEVICE_EXT`
pub const DEVICE: EglInt = 0x322C;
/// `EGL_TRACK_REFERENCES_KHR`
pub const TRACK_REFERENCES: Attrib = 0x3352;

/// Client extension that provides native display reference counting
pub const EXT_DISPLAY_REFERENCE: &str = "EGL_KHR_display_reference";
/// Client extension for device enumeration
pub const EXT_DEVICE_ENUMERATION: &str = "EGL_EXT_device_enumeration";
/// Client extension for `EGL_PLATFORM_DEVICE_EXT`
pub const EXT_PLATFORM_DEVICE: &str = "EGL_EXT_platform_device";
/// Display extension for stream producer surfaces
pub const EXT_STREAM_PRODUCER: &str = "EGL_KHR_stream_producer_eglsurface";
/// Display extension for damage-aware swaps
pub const EXT_SWAP_WITH_DAMAGE: &str = "EGL_EXT_swap_buffers_with_damage";

/// Returns true if `name` appears as a whole word in a space-separated
/// extension string.
pub fn has_extension(extensions: &str, name: &str) -> bool {
    extensions.split_ascii_whitespace().any(|ext| ext == name)
}

/// Looks up `key` in an attribute list.
pub fn find_attrib(attribs: &[(Attrib, Attrib)], key: Attrib) -> Option<Attrib> {
    attribs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// An EGL error code as reported by `eglGetError`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("{} ({:#06x})", self.name(), self.0)]
pub struct EglError(pub EglInt);

impl EglError {
    /// `EGL_SUCCESS`
    pub const SUCCESS: Self = Self(0x3000);
    /// `EGL_NOT_INITIALIZED`
    pub const NOT_INITIALIZED: Self = Self(0x3001);
    /// `EGL_BAD_ACCESS`
    pub const BAD_ACCESS: Self = Self(0x3002);
    /// `EGL_BAD_ALLOC`
    pub const BAD_ALLOC: Self = Self(0x3003);
    /// `EGL_BAD_ATTRIBUTE`
    pub const BAD_ATTRIBUTE: Self = Self(0x3004);
    /// `EGL_BAD_CONFIG`
    pub const BAD_CONFIG: Self = Self(0x3005);
    /// `EGL_BAD_CONTEXT`
    pub const BAD_CONTEXT: Self = Self(0x3006);
    /// `EGL_BAD_CURRENT_SURFACE`
    pub const BAD_CURRENT_SURFACE: Self = Self(0x3007);
    /// `EGL_BAD_DISPLAY`
    pub const BAD_DISPLAY: Self = Self(0x3008);
    /// `EGL_BAD_MATCH`
    pub const BAD_MATCH: Self = Self(0x3009);
    /// `EGL_BAD_NATIVE_PIXMAP`
    pub const BAD_NATIVE_PIXMAP: Self = Self(0x300A);
    /// `EGL_BAD_NATIVE_WINDOW`
    pub const BAD_NATIVE_WINDOW: Self = Self(0x300B);
    /// `EGL_BAD_PARAMETER`
    pub const BAD_PARAMETER: Self = Self(0x300C);
    /// `EGL_BAD_SURFACE`
    pub const BAD_SURFACE: Self = Self(0x300D);

    /// Symbolic name of the code, or `"EGL_UNKNOWN_ERROR"`
    pub const fn name(self) -> &'static str {
        match self.0 {
            0x3000 => "EGL_SUCCESS",
            0x3001 => "EGL_NOT_INITIALIZED",
            0x3002 => "EGL_BAD_ACCESS",
            0x3003 => "EGL_BAD_ALLOC",
            0x3004 => "EGL_BAD_ATTRIBUTE",
            0x3005 => "EGL_BAD_CONFIG",
            0x3006 => "EGL_BAD_CONTEXT",
            0x3007 => "EGL_BAD_CURRENT_SURFACE",
            0x3008 => "EGL_BAD_DISPLAY",
            0x3009 => "EGL_BAD_MATCH",
            0x300A => "EGL_BAD_NATIVE_PIXMAP",
            0x300B => "EGL_BAD_NATIVE_WINDOW",
            0x300C => "EGL_BAD_PARAMETER",
            0x300D => "EGL_BAD_SURFACE",
            _ => "EGL_UNKNOWN_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_matching_is_whole_word() {
        let exts = "EGL_KHR_display_reference_extra EGL_EXT_device_enumeration";
        assert!(!has_extension(exts, EXT_DISPLAY_REFERENCE));
        assert!(has_extension(exts, EXT_DEVICE_ENUMERATION));
    }

    #[test]
    fn test_error_display_names_code() {
        assert_eq!(EglError::BAD_SURFACE.to_string(), "EGL_BAD_SURFACE (0x300d)");
        assert_eq!(EglError(0x1234).name(), "EGL_UNKNOWN_ERROR");
    }

    #[test]
    fn test_find_attrib() {
        let attribs = [(TRACK_REFERENCES, TRUE), (0x1000, 7)];
        assert_eq!(find_attrib(&attribs, 0x1000), Some(7));
        assert_eq!(find_attrib(&attribs, 0x2000), None);
    }
}
