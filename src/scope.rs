//! Cleanup scopes for automatic listener teardown.
//!
//! A scope stands in for a UI component lifetime: the integration layer
//! creates one per component and calls [`CleanupScope::run_cleanups`] when the
//! component is destroyed. The service only registers cleanups; it never owns
//! the scope. Dropping a scope runs any cleanups that were never triggered
//! explicitly.

use std::sync::{Mutex, PoisonError};

type Cleanup = Box<dyn FnOnce() + Send>;

/// Ordered collection of teardown callbacks tied to one owner lifetime.
#[derive(Default)]
pub struct CleanupScope {
    cleanups: Mutex<Vec<Cleanup>>,
}

impl CleanupScope {
    /// Creates an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback to run when the scope is torn down.
    pub fn register_cleanup(&self, cleanup: impl FnOnce() + Send + 'static) {
        self.cleanups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(cleanup));
    }

    /// Runs and removes all registered cleanups, in registration order.
    ///
    /// Each cleanup runs at most once; callbacks registered after a run are
    /// picked up by the next one.
    pub fn run_cleanups(&self) {
        let drained = std::mem::take(
            &mut *self
                .cleanups
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for cleanup in drained {
            cleanup();
        }
    }

    /// Number of cleanups currently registered.
    pub fn pending_cleanups(&self) -> usize {
        self.cleanups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for CleanupScope {
    fn drop(&mut self) {
        let drained = std::mem::take(
            self.cleanups
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for cleanup in drained {
            cleanup();
        }
    }
}
