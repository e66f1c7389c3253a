//! Cancellation scopes.
//!
//! A `Lifetime` is cancelled when it, or any lifetime it was derived from,
//! is cancelled. Cloning shares the scope; `child()` and `join()` derive a
//! new one that can be cancelled on its own without touching its parents.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Scope {
    cancelled: AtomicBool,
    parents: Vec<Lifetime>,
}

#[derive(Clone, Default)]
pub struct Lifetime {
    scope: Arc<Scope>,
}

impl Lifetime {
    /// A root lifetime.
    pub fn new() -> Self {
        Self::default()
    }

    fn derived(parents: Vec<Lifetime>) -> Self {
        Self {
            scope: Arc::new(Scope {
                cancelled: AtomicBool::new(false),
                parents,
            }),
        }
    }

    /// A lifetime cancelled with `self` or on its own.
    pub fn child(&self) -> Self {
        Self::derived(vec![self.clone()])
    }

    /// A lifetime cancelled with either `self` or `other`, or on its own.
    pub fn join(&self, other: &Lifetime) -> Self {
        Self::derived(vec![self.clone(), other.clone()])
    }

    pub fn cancel(&self) {
        self.scope.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.scope.cancelled.load(Ordering::SeqCst)
            || self.scope.parents.iter().any(Lifetime::is_cancelled)
    }
}

impl std::fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifetime")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
