//! Session manager for tracking active sessions
//!
//! Admission is counted with an atomic so the active count can never pass
//! the configured maximum, even under concurrent creates.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use dashmap::DashMap;

use crate::client::EditorClient;
use crate::types::{AgentError, Result, SessionConfig};

use super::session::Session;

pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    active: AtomicUsize,
    config: SessionConfig,
    client: Arc<dyn EditorClient>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("active", &self.active_count())
            .field("max_sessions", &self.config.max_sessions)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(config: SessionConfig, client: Arc<dyn EditorClient>) -> Self {
        Self {
            sessions: DashMap::new(),
            active: AtomicUsize::new(0),
            config,
            client,
        }
    }

    /// Create a session rooted at `cwd`
    ///
    /// Fails with [`AgentError::LimitExceeded`] when the maximum number of
    /// sessions is already live.
    pub fn create(&self, cwd: PathBuf) -> Result<Arc<Session>> {
        let max = self.config.max_sessions;
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .map_err(|active| AgentError::LimitExceeded { active, max })?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(
            session_id.clone(),
            cwd,
            &self.config,
            Arc::clone(&self.client),
        ));
        self.sessions.insert(session_id.clone(), Arc::clone(&session));

        tracing::info!(
            session_id = %session_id,
            cwd = %session.cwd.display(),
            active = self.active_count(),
            "Session created"
        );
        Ok(session)
    }

    /// Look up a session; does not count as activity
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|r| Arc::clone(&r))
    }

    pub fn get_or_error(&self, session_id: &str) -> Result<Arc<Session>> {
        self.get(session_id)
            .ok_or_else(|| AgentError::session_not_found(session_id))
    }

    /// Tear down a session; returns false if it was not live
    pub fn destroy(&self, session_id: &str) -> bool {
        match self.sessions.remove(session_id) {
            Some((_, session)) => {
                session.destroy();
                self.active.fetch_sub(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn destroy_all(&self) -> usize {
        let ids = self.session_ids();
        let destroyed = ids.iter().filter(|id| self.destroy(id)).count();
        if destroyed > 0 {
            tracing::info!(destroyed, "Destroyed all sessions");
        }
        destroyed
    }

    /// Destroy every session idle for longer than the configured timeout
    ///
    /// Sessions with a turn in flight are never reaped, however long the
    /// turn has been waiting on the editor or the backend.
    pub fn reap_expired(&self) -> Vec<String> {
        self.reap_expired_at(Instant::now())
    }

    pub fn reap_expired_at(&self, now: Instant) -> Vec<String> {
        let timeout = self.config.idle_timeout();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| {
                let session = entry.value();
                session.idle_for(now) > timeout && !session.is_busy()
            })
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .into_iter()
            .filter(|id| {
                let reaped = self.destroy(id);
                if reaped {
                    tracing::info!(session_id = %id, timeout_secs = timeout.as_secs(), "Reaped idle session");
                }
                reaped
            })
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}
