//! In-process single-flight control for translation runs.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use doctrans_shared::{DocTransError, Result};

/// Tracks which sessions have a live run in this process.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `session_id` for a run. Fails with a validation error if a run
    /// for that session is already in flight.
    pub fn try_acquire(&self, session_id: &str) -> Result<RunGuard> {
        if !self.lock().insert(session_id.to_string()) {
            return Err(DocTransError::validation(format!(
                "a translation run is already active for session {session_id}"
            )));
        }
        Ok(RunGuard {
            registry: self.clone(),
            session_id: session_id.to_string(),
        })
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.lock().contains(session_id)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked.
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Releases the session claim when dropped.
#[derive(Debug)]
pub struct RunGuard {
    registry: RunRegistry,
    session_id: String,
}

impl RunGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_is_rejected_until_release() {
        let registry = RunRegistry::new();
        let guard = registry.try_acquire("s1").unwrap();
        assert!(registry.is_active("s1"));

        let err = registry.try_acquire("s1").unwrap_err();
        assert!(matches!(err, DocTransError::Validation { .. }));

        // Other sessions are independent.
        let _other = registry.try_acquire("s2").unwrap();

        drop(guard);
        assert!(!registry.is_active("s1"));
        assert!(registry.try_acquire("s1").is_ok());
    }

    #[test]
    fn clones_share_state() {
        let registry = RunRegistry::new();
        let clone = registry.clone();
        let _guard = registry.try_acquire("s").unwrap();
        assert!(clone.try_acquire("s").is_err());
    }
}
