//! Backends built on the platform base

pub mod headless;
