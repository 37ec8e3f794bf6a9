//! Reentrant lock keyed on the owning thread
//!
//! A backend hook that runs with a display locked may call straight back into
//! the platform base for the same display. The lock therefore records which
//! thread owns it and how many times that thread has entered, and only
//! blocks other threads.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::error::{PlatformError, Result};

#[derive(Debug, Default)]
struct Owner {
    thread: Option<ThreadId>,
    depth: usize,
}

/// Exclusive lock that the owning thread may take repeatedly
#[derive(Debug, Default)]
pub struct ReentrantLock {
    owner: Mutex<Owner>,
    released: Condvar,
}

impl ReentrantLock {
    /// Create an unowned lock
    pub fn new() -> Self {
        Self::default()
    }

    fn owner(&self) -> MutexGuard<'_, Owner> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the calling thread owns the lock, then add one level
    pub fn lock(&self) {
        let me = thread::current().id();
        let mut owner = self.owner();
        loop {
            match owner.thread {
                None => {
                    owner.thread = Some(me);
                    owner.depth = 1;
                    return;
                }
                Some(thread) if thread == me => {
                    owner.depth += 1;
                    return;
                }
                Some(_) => {
                    owner = self.released.wait(owner).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Take the lock only if no other thread owns it
    pub fn try_lock(&self) -> bool {
        let me = thread::current().id();
        let mut owner = self.owner();
        match owner.thread {
            None => {
                owner.thread = Some(me);
                owner.depth = 1;
                true
            }
            Some(thread) if thread == me => {
                owner.depth += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Drop one level; the lock is released when the depth reaches zero
    pub fn unlock(&self) -> Result<()> {
        let me = thread::current().id();
        let mut owner = self.owner();
        if owner.thread != Some(me) {
            return Err(PlatformError::ContractViolation(
                "reentrant lock released by a thread that does not own it".to_string(),
            ));
        }
        owner.depth -= 1;
        if owner.depth == 0 {
            owner.thread = None;
            drop(owner);
            self.released.notify_one();
        }
        Ok(())
    }

    /// Whether the calling thread currently owns the lock
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owner().thread == Some(thread::current().id())
    }

    /// Nesting depth held by the owner (0 when unowned)
    pub fn depth(&self) -> usize {
        self.owner().depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_owner_can_nest() {
        let lock = ReentrantLock::new();
        lock.lock();
        lock.lock();
        assert_eq!(lock.depth(), 2);
        lock.unlock().unwrap();
        assert!(lock.is_owned_by_current_thread());
        lock.unlock().unwrap();
        assert!(!lock.is_owned_by_current_thread());
        assert_eq!(lock.depth(), 0);
    }

    #[test]
    fn test_unlock_without_owning_is_violation() {
        let lock = ReentrantLock::new();
        assert!(matches!(lock.unlock(), Err(PlatformError::ContractViolation(_))));
    }

    #[test]
    fn test_try_lock_fails_for_other_thread() {
        let lock = Arc::new(ReentrantLock::new());
        lock.lock();
        let other = Arc::clone(&lock);
        let took = thread::spawn(move || other.try_lock()).join().unwrap();
        assert!(!took);
        assert!(lock.try_lock());
        lock.unlock().unwrap();
        lock.unlock().unwrap();
    }

    #[test]
    fn test_other_thread_blocks_until_fully_released() {
        let lock = Arc::new(ReentrantLock::new());
        let acquired = Arc::new(AtomicBool::new(false));
        lock.lock();
        lock.lock();

        let waiter = {
            let lock = Arc::clone(&lock);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                lock.lock();
                acquired.store(true, Ordering::SeqCst);
                lock.unlock().unwrap();
            })
        };

        thread::sleep(Duration::from_millis(20));
        lock.unlock().unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(!acquired.load(Ordering::SeqCst));
        lock.unlock().unwrap();
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }
}
