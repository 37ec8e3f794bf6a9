//! Scenario tests that drive the platform base end to end through the
//! headless backend

mod display_lifecycle;
mod surface_lifecycle;
