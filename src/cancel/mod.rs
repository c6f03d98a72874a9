//! Cancellation Registry
//!
//! Routes an externally supplied session id to the cancel handle of the
//! connection currently running that session.
//!
//! # Lifecycle
//! - `register_active` returns an [`ActiveSession`] guard
//! - Dropping the guard removes its own registration, and only its own: every
//!   registration carries a generation number, so a stale guard never removes
//!   a later session that reused the id
//! - At most one registration exists per session id at a time
//!
//! # Cancel semantics
//! `cancel` marks the session before calling the handle. The orchestrator
//! reads the mark between statements, so statements not yet started are never
//! attempted even when the driver-level cancel arrives too late.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::engine::CancelHandle;
use crate::error::{ConsoleError, Result};

/// Result of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The cancel was delivered and the session is marked canceled
    Canceled,
    /// No session with that id is running
    NotFound,
    /// The session's connection cannot cancel; it runs to completion
    Unsupported,
}

struct Registration {
    generation: u64,
    handle: Option<Arc<dyn CancelHandle>>,
    canceled: Arc<AtomicBool>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: Mutex<HashMap<String, Registration>>,
    next_generation: AtomicU64,
}

/// Concurrency-safe map from session id to in-flight cancel handle
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for CancellationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationRegistry").field("active", &self.inner.sessions.lock().len()).finish()
    }
}

impl CancellationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running session
    ///
    /// Fails with `SESSION_CONFLICT` when the id is already active.
    pub fn register_active(
        &self,
        session_id: &str,
        handle: Option<Arc<dyn CancelHandle>>,
    ) -> Result<ActiveSession> {
        let mut sessions = self.inner.sessions.lock();
        if sessions.contains_key(session_id) {
            return Err(ConsoleError::session_conflict(format!(
                "Session '{session_id}' is already running"
            )));
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let canceled = Arc::new(AtomicBool::new(false));
        sessions.insert(
            session_id.to_string(),
            Registration { generation, handle, canceled: Arc::clone(&canceled) },
        );

        tracing::debug!(session_id, generation, "registered active session");
        Ok(ActiveSession {
            registry: self.clone(),
            session_id: session_id.to_string(),
            generation,
            canceled,
        })
    }

    /// Cancel the statement currently running under `session_id`
    pub async fn cancel(&self, session_id: &str) -> CancelOutcome {
        let handle = {
            let sessions = self.inner.sessions.lock();
            let Some(registration) = sessions.get(session_id) else {
                return CancelOutcome::NotFound;
            };
            let Some(handle) = registration.handle.clone() else {
                return CancelOutcome::Unsupported;
            };
            registration.canceled.store(true, Ordering::SeqCst);
            handle
        };

        if let Err(e) = handle.cancel().await {
            // Remaining statements are still skipped through the mark
            tracing::warn!(session_id, error = %e, "cancel request was not delivered");
        }
        tracing::info!(session_id, "session canceled");
        CancelOutcome::Canceled
    }

    /// Remove a registration regardless of which guard owns it
    pub fn unregister(&self, session_id: &str) -> bool {
        self.inner.sessions.lock().remove(session_id).is_some()
    }

    #[must_use]
    pub fn is_active(&self, session_id: &str) -> bool {
        self.inner.sessions.lock().contains_key(session_id)
    }

    fn release(&self, session_id: &str, generation: u64) {
        let mut sessions = self.inner.sessions.lock();
        if sessions.get(session_id).is_some_and(|r| r.generation == generation) {
            sessions.remove(session_id);
            tracing::debug!(session_id, generation, "unregistered session");
        }
    }
}

/// Registration guard for one running session
#[must_use = "dropping the guard unregisters the session"]
pub struct ActiveSession {
    registry: CancellationRegistry,
    session_id: String,
    generation: u64,
    canceled: Arc<AtomicBool>,
}

impl ActiveSession {
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether a cancel request reached this session
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.registry.release(&self.session_id, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingHandle {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl CancelHandle for CountingHandle {
        async fn cancel(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ConsoleError::engine_error("test", "server unreachable"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_unknown_session() {
        let registry = CancellationRegistry::new();
        assert_eq!(registry.cancel("missing").await, CancelOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_cancel_active_session() {
        let registry = CancellationRegistry::new();
        let handle = Arc::new(CountingHandle::default());
        let active = registry.register_active("s1", Some(handle.clone())).unwrap();

        assert!(!active.is_canceled());
        assert_eq!(registry.cancel("s1").await, CancelOutcome::Canceled);
        assert!(active.is_canceled());
        assert_eq!(handle.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_without_handle_is_unsupported() {
        let registry = CancellationRegistry::new();
        let active = registry.register_active("s1", None).unwrap();

        assert_eq!(registry.cancel("s1").await, CancelOutcome::Unsupported);
        assert!(!active.is_canceled());
    }

    #[tokio::test]
    async fn test_failed_delivery_still_marks_session() {
        let registry = CancellationRegistry::new();
        let handle = Arc::new(CountingHandle { fail: true, ..Default::default() });
        let active = registry.register_active("s1", Some(handle)).unwrap();

        assert_eq!(registry.cancel("s1").await, CancelOutcome::Canceled);
        assert!(active.is_canceled());
    }

    #[test]
    fn test_duplicate_registration_conflicts() {
        let registry = CancellationRegistry::new();
        let _active = registry.register_active("s1", None).unwrap();

        let err = registry.register_active("s1", None).err().unwrap();
        assert_eq!(err.error_code(), "SESSION_CONFLICT");
    }

    #[test]
    fn test_guard_drop_unregisters() {
        let registry = CancellationRegistry::new();
        {
            let active = registry.register_active("s1", None).unwrap();
            assert_eq!(active.session_id(), "s1");
            assert!(registry.is_active("s1"));
        }
        assert!(!registry.is_active("s1"));
    }

    #[test]
    fn test_stale_guard_keeps_newer_registration() {
        let registry = CancellationRegistry::new();
        let stale = registry.register_active("s1", None).unwrap();

        assert!(registry.unregister("s1"));
        let _fresh = registry.register_active("s1", None).unwrap();

        drop(stale);
        assert!(registry.is_active("s1"));
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_not_found() {
        let registry = CancellationRegistry::new();
        let handle = Arc::new(CountingHandle::default());
        drop(registry.register_active("s1", Some(handle.clone())).unwrap());

        assert_eq!(registry.cancel("s1").await, CancelOutcome::NotFound);
        assert_eq!(handle.calls.load(Ordering::SeqCst), 0);
    }
}
