//! Callbacks that record what they were given

use std::sync::{Mutex, PoisonError};

use crate::callbacks::{PlatformCallbacks, ProcAddress, Severity};
use crate::egl::EglError;

/// `PlatformCallbacks` that keep every message and error for inspection
#[derive(Debug, Default)]
pub struct RecordingCallbacks {
    messages: Mutex<Vec<(Severity, String)>>,
    errors: Mutex<Vec<(EglError, String)>>,
}

impl RecordingCallbacks {
    /// Nothing recorded yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Debug messages forwarded so far
    pub fn messages(&self) -> Vec<(Severity, String)> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Errors set so far
    pub fn errors(&self) -> Vec<(EglError, String)> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl PlatformCallbacks for RecordingCallbacks {
    fn get_proc_address(&self, _name: &str) -> Option<ProcAddress> {
        None
    }

    fn debug_message(&self, severity: Severity, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((severity, message.to_string()));
    }

    fn set_error(&self, error: EglError, _severity: Severity, message: &str) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((error, message.to_string()));
    }
}
