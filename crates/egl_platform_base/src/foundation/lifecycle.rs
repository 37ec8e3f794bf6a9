//! Deferred teardown state machine
//!
//! Displays and surfaces share the same rule: a destructive request that
//! arrives while the object is busy is recorded and carried out by whoever
//! makes the object idle. For a display "busy" is its use count; for a
//! surface it is the number of current bindings that reference it.

use crate::error::{PlatformError, Result};

/// Where an object sits on its way to teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// Live and usable
    #[default]
    Active,
    /// Teardown requested while busy; waiting for the busy count to drain
    PendingTeardown,
    /// Torn down
    Destroyed,
}

/// Outcome of a teardown request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownRequest {
    /// The object is idle; the caller must tear it down now
    Immediate,
    /// The object is busy; the last `leave` will report that teardown is due
    Deferred,
    /// A request is already waiting
    AlreadyPending,
    /// The object was already torn down
    AlreadyDestroyed,
}

/// Busy counter plus the teardown state it guards
#[derive(Debug, Clone, Default)]
pub struct DeferredTeardown {
    state: Lifecycle,
    busy: u32,
}

impl DeferredTeardown {
    /// An active, idle object
    pub const fn new() -> Self {
        Self { state: Lifecycle::Active, busy: 0 }
    }

    /// Current state
    pub const fn state(&self) -> Lifecycle {
        self.state
    }

    /// Number of callers currently inside the object
    pub const fn busy(&self) -> u32 {
        self.busy
    }

    /// Whether the object is live (not pending or destroyed)
    pub fn is_active(&self) -> bool {
        self.state == Lifecycle::Active
    }

    /// Record one more caller inside the object
    pub fn enter(&mut self) {
        self.busy += 1;
    }

    /// Record that a caller left the object
    ///
    /// Returns true when this was the last caller and teardown is pending;
    /// the state has then moved to `Destroyed` and the caller must carry out
    /// the teardown.
    pub fn leave(&mut self) -> Result<bool> {
        if self.busy == 0 {
            return Err(PlatformError::ContractViolation(
                "leave() without a matching enter()".to_string(),
            ));
        }
        self.busy -= 1;
        if self.busy == 0 && self.state == Lifecycle::PendingTeardown {
            self.state = Lifecycle::Destroyed;
            return Ok(true);
        }
        Ok(false)
    }

    /// Ask for teardown
    pub fn request(&mut self) -> TeardownRequest {
        match self.state {
            Lifecycle::Destroyed => TeardownRequest::AlreadyDestroyed,
            Lifecycle::PendingTeardown => TeardownRequest::AlreadyPending,
            Lifecycle::Active if self.busy > 0 => {
                self.state = Lifecycle::PendingTeardown;
                TeardownRequest::Deferred
            }
            Lifecycle::Active => {
                self.state = Lifecycle::Destroyed;
                TeardownRequest::Immediate
            }
        }
    }

    /// Force the object into `Destroyed` regardless of the busy count
    pub fn force_destroyed(&mut self) {
        self.state = Lifecycle::Destroyed;
    }

    /// Bring a torn-down object back to `Active`
    pub fn revive(&mut self) {
        if self.state == Lifecycle::Destroyed {
            self.state = Lifecycle::Active;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_request_is_immediate() {
        let mut t = DeferredTeardown::new();
        assert_eq!(t.request(), TeardownRequest::Immediate);
        assert_eq!(t.state(), Lifecycle::Destroyed);
        assert_eq!(t.request(), TeardownRequest::AlreadyDestroyed);
    }

    #[test]
    fn test_busy_request_defers_to_last_leave() {
        let mut t = DeferredTeardown::new();
        t.enter();
        t.enter();
        assert_eq!(t.request(), TeardownRequest::Deferred);
        assert_eq!(t.request(), TeardownRequest::AlreadyPending);
        assert!(!t.leave().unwrap());
        assert_eq!(t.state(), Lifecycle::PendingTeardown);
        assert!(t.leave().unwrap());
        assert_eq!(t.state(), Lifecycle::Destroyed);
    }

    #[test]
    fn test_unbalanced_leave_is_violation() {
        let mut t = DeferredTeardown::new();
        assert!(t.leave().is_err());
        assert_eq!(t.busy(), 0);
    }

    #[test]
    fn test_revive_only_from_destroyed() {
        let mut t = DeferredTeardown::new();
        t.enter();
        t.request();
        t.revive();
        assert_eq!(t.state(), Lifecycle::PendingTeardown);
        t.leave().unwrap();
        t.revive();
        assert!(t.is_active());
    }
}
