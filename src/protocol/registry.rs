//! Backend key registry (SPEC_FULL.md §4.5-EXPANDED, GLOSSARY "Backend key
//! registry"): maps a session's `(pid, secret)` pair to a handle the startup
//! phase can use to act on a `CancelRequest`.
//!
//! This is a mock server with no query executor to interrupt, so acting on a
//! cancellation is necessarily best-effort: a lookup miss or a mismatched
//! secret is silently ignored, matching real backends' refusal to
//! acknowledge whether a given pid exists.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tokio::sync::Notify;

struct Entry {
    secret: i32,
    cancel: Arc<Notify>,
}

/// Process-wide `(pid, secret) -> cancel handle` registry.
pub struct BackendKeyRegistry {
    entries: DashMap<i32, Entry>,
}

impl BackendKeyRegistry {
    fn new() -> Self {
        BackendKeyRegistry {
            entries: DashMap::new(),
        }
    }

    /// Register a freshly-authenticated session's backend key, returning the
    /// `Notify` handle its protocol task should select on to detect a
    /// matching `CancelRequest`.
    pub fn register(&self, pid: i32, secret: i32) -> Arc<Notify> {
        let cancel = Arc::new(Notify::new());
        self.entries.insert(
            pid,
            Entry {
                secret,
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    pub fn unregister(&self, pid: i32) {
        self.entries.remove(&pid);
    }

    /// Best-effort delivery of a cancellation: a miss or secret mismatch is
    /// not reported back to the requester (spec.md §4.5 `CancelRequest`
    /// handling never returns a response of any kind).
    pub fn try_cancel(&self, pid: i32, secret: i32) {
        if let Some(entry) = self.entries.get(&pid) {
            if entry.secret == secret {
                entry.cancel.notify_one();
            }
        }
    }
}

impl Default for BackendKeyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub static REGISTRY: Lazy<BackendKeyRegistry> = Lazy::new(BackendKeyRegistry::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn matching_cancel_notifies_the_registered_handle() {
        let registry = BackendKeyRegistry::new();
        let handle = registry.register(42, 99);
        registry.try_cancel(42, 99);
        handle.notified().await;
    }

    #[tokio::test]
    async fn mismatched_secret_is_silently_ignored() {
        let registry = BackendKeyRegistry::new();
        let handle = registry.register(42, 99);
        registry.try_cancel(42, 12345);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), handle.notified())
                .await
                .is_err()
        );
    }

    #[test]
    fn unregister_makes_future_cancels_a_no_op() {
        let registry = BackendKeyRegistry::new();
        registry.register(7, 1);
        registry.unregister(7);
        registry.try_cancel(7, 1);
    }
}
