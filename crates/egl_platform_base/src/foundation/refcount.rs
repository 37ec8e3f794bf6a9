//! Reference-counted objects with a release callback
//!
//! `RefCounted<T>` is a shared-ownership handle: `retain` hands out another
//! owner, `release` gives one up, and whichever owner releases last runs the
//! object's `on_zero` callback exactly once before the value is dropped.
//! Because `release` consumes the handle, releasing more often than retaining
//! cannot be expressed.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

type OnZero<T> = Box<dyn FnOnce(&T) + Send + Sync>;

struct Inner<T> {
    value: T,
    on_zero: Option<OnZero<T>>,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(on_zero) = self.on_zero.take() {
            on_zero(&self.value);
        }
    }
}

/// Shared handle to a reference-counted object
pub struct RefCounted<T> {
    inner: Arc<Inner<T>>,
}

impl<T> RefCounted<T> {
    /// Wrap `value` with a count of one
    pub fn new(value: T) -> Self {
        Self { inner: Arc::new(Inner { value, on_zero: None }) }
    }

    /// Wrap `value` with a count of one and a callback for the 1 -> 0 transition
    pub fn with_destructor(value: T, on_zero: impl FnOnce(&T) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Inner { value, on_zero: Some(Box::new(on_zero)) }),
        }
    }

    /// Take another reference
    #[must_use]
    pub fn retain(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }

    /// Give up this reference
    ///
    /// Returns true if this was the last reference and the object was
    /// destroyed.
    pub fn release(self) -> bool {
        Arc::into_inner(self.inner).is_some()
    }

    /// Current number of strong references
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Non-owning back-reference
    pub fn downgrade(&self) -> WeakRef<T> {
        WeakRef { inner: Arc::downgrade(&self.inner) }
    }

    /// Whether two handles refer to the same object
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl<T> Clone for RefCounted<T> {
    fn clone(&self) -> Self {
        self.retain()
    }
}

impl<T> Deref for RefCounted<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.value
    }
}

impl<T: fmt::Debug> fmt::Debug for RefCounted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCounted")
            .field("count", &self.ref_count())
            .field("value", &self.inner.value)
            .finish()
    }
}

/// Non-owning reference that does not keep the object alive
pub struct WeakRef<T> {
    inner: Weak<Inner<T>>,
}

impl<T> WeakRef<T> {
    /// Retain the object if it is still alive
    pub fn upgrade(&self) -> Option<RefCounted<T>> {
        self.inner.upgrade().map(|inner| RefCounted { inner })
    }
}

impl<T> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        Self { inner: Weak::clone(&self.inner) }
    }
}

impl<T> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef").field("alive", &(self.inner.strong_count() > 0)).finish()
    }
}
