//! Foundation module - Core utilities and types
//!
//! This module provides the low-level pieces the lifecycle engine is built on:
//! - Reference-counted object handles
//! - The reentrant per-display lock
//! - The deferred teardown state machine
//! - Slot-map collections
//! - Logging utilities

pub mod collections;
pub mod lifecycle;
pub mod logging;
pub mod reentrant;
pub mod refcount;
