//! Logging utilities

pub use log::{debug, error, info, trace, warn};

/// Initialize logging from `RUST_LOG` plus an explicit filter such as
/// `"egl_platform_base=debug"`; directives in `filter` win
///
/// Returns false if a logger was already installed, for example by a host
/// process, in which case nothing changes.
pub fn init_with_filter(filter: &str) -> bool {
    env_logger::Builder::from_default_env().parse_filters(filter).try_init().is_ok()
}

/// Initialize logging for unit tests
#[cfg(test)]
pub fn init_for_tests() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_init_leaves_installed_logger() {
        init_for_tests();
        assert!(!init_with_filter("egl_platform_base=trace"));
        assert!(!init_with_filter("warn"));
    }
}
