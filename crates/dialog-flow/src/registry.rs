//! Session Registry
//!
//! The set of sessions currently bound to a running flow. Admission is an
//! atomic insert-if-absent, so of two racing admissions for the same session
//! exactly one wins. Release is unconditional and idempotent.

use dashmap::DashSet;

use crate::types::SessionId;

/// Sessions currently bound to an active flow.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: DashSet<SessionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `session_id` to a new flow.
    ///
    /// Returns `false` if the session already has one.
    pub fn try_admit(&self, session_id: &SessionId) -> bool {
        let admitted = self.active.insert(session_id.clone());
        if admitted {
            tracing::debug!("Admitted session {}", session_id);
        } else {
            tracing::debug!("Session {} already has an active flow", session_id);
        }
        admitted
    }

    /// Free the slot held by `session_id`. Releasing an unknown session is a no-op.
    pub fn release(&self, session_id: &SessionId) {
        if self.active.remove(session_id).is_some() {
            tracing::debug!("Released session {}", session_id);
        }
    }

    /// Membership probe, for observability only.
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.active.contains(session_id)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_admit_release_cycle() {
        let registry = SessionRegistry::new();
        let s1 = SessionId::from("s1");

        assert!(registry.try_admit(&s1));
        assert!(!registry.try_admit(&s1));
        assert!(registry.contains(&s1));

        registry.release(&s1);
        assert!(!registry.contains(&s1));
        assert!(registry.try_admit(&s1), "released slot can be admitted again");
    }

    #[test]
    fn test_release_is_idempotent() {
        let registry = SessionRegistry::new();
        let s1 = SessionId::from("s1");

        registry.release(&s1);
        assert!(registry.try_admit(&s1));
        registry.release(&s1);
        registry.release(&s1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sessions_are_independent() {
        let registry = SessionRegistry::new();
        assert!(registry.try_admit(&"a".into()));
        assert!(registry.try_admit(&"b".into()));
        assert_eq!(registry.len(), 2);

        registry.release(&"a".into());
        assert!(!registry.contains(&"a".into()));
        assert!(registry.contains(&"b".into()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_admissions_only_one_wins() {
        for round in 0..50 {
            let registry = Arc::new(SessionRegistry::new());
            let wins = Arc::new(AtomicUsize::new(0));
            let session = SessionId(format!("race-{}", round));

            let mut handles = Vec::new();
            for _ in 0..8 {
                let registry = registry.clone();
                let wins = wins.clone();
                let session = session.clone();
                handles.push(tokio::spawn(async move {
                    if registry.try_admit(&session) {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }

            assert_eq!(wins.load(Ordering::SeqCst), 1);
        }
    }
}
