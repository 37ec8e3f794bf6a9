//! # Core Module
//!
//! Shared abstractions used throughout the platform base.
//!
//! ## Organization
//!
//! - **Config**: configuration for the platform base
//! - **Foundation**: low-level primitives (refcounting, locks, collections)

pub mod config;

// Re-export foundation modules for convenience
pub use crate::foundation;

// Re-export commonly used config types
pub use config::{Config, ConfigError, DebugConfig, PlatformBaseConfig};
