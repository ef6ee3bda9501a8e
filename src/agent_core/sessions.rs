//! Session lifecycle: creation, expiry, activity tracking and cleanup.
//!
//! Sessions expire after `timeout` of inactivity, except that sessions younger
//! than `grace` never expire (a slow first LLM turn must not lose the session
//! it just created). The periodic sweeper uses a more conservative timeout of
//! `max(2 × timeout, 4h)`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::errors::AgentError;
use super::store::SessionStore;
use super::types::Session;

/// Sweeper timeout floor.
const MIN_CLEANUP_TIMEOUT_MINUTES: i64 = 240;

/// Retry delay after a failed sweep.
const CLEANUP_RETRY: std::time::Duration = std::time::Duration::from_secs(120);

/// Snapshot counts for `sessions` / diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub total: usize,
    pub active: usize,
    pub by_state: BTreeMap<String, usize>,
}

/// Owns session persistence and expiry rules.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    timeout: Duration,
    grace: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, timeout_minutes: i64, grace_minutes: i64) -> Self {
        tracing::info!(
            timeout_minutes,
            grace_minutes,
            "session manager initialized"
        );
        Self {
            store,
            timeout: Duration::minutes(timeout_minutes),
            grace: Duration::minutes(grace_minutes),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    // ─── CRUD ───────────────────────────────────────────────────────────

    /// Create and persist a new session. A random id is used when none is given.
    pub fn create_session(&self, user_id: &str, session_id: Option<&str>) -> Result<Session, AgentError> {
        let id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let session = Session::new(id, user_id, Utc::now());
        self.store.save_session(&session)?;
        tracing::info!(session_id = %session.session_id, user_id = %user_id, "created session");
        Ok(session)
    }

    /// Load a live session and refresh its activity.
    ///
    /// Expired sessions are deleted and reported as absent.
    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>, AgentError> {
        self.get_session_at(session_id, Utc::now())
    }

    fn get_session_at(&self, session_id: &str, now: DateTime<Utc>) -> Result<Option<Session>, AgentError> {
        if session_id.is_empty() {
            return Ok(None);
        }
        let Some(mut session) = self.store.load_session(session_id)? else {
            tracing::debug!(session_id = %session_id, "session not found");
            return Ok(None);
        };

        if session.is_expired_at(now, self.timeout, self.grace) {
            tracing::info!(
                session_id = %session_id,
                idle_secs = (now - session.last_activity).num_seconds(),
                "session expired"
            );
            self.store.delete_session(session_id)?;
            return Ok(None);
        }

        session.touch(now);
        self.store.save_session(&session)?;
        Ok(Some(session))
    }

    /// Persist a session, stamping activity.
    pub fn save_session(&self, session: &mut Session) -> Result<(), AgentError> {
        let now = Utc::now();
        session.updated_at = now;
        session.last_activity = now;
        self.store.save_session(session)?;
        tracing::debug!(session_id = %session.session_id, state = %session.state, "saved session");
        Ok(())
    }

    pub fn delete_session(&self, session_id: &str) -> Result<bool, AgentError> {
        let removed = self.store.delete_session(session_id)?;
        if removed {
            tracing::info!(session_id = %session_id, "deleted session");
        } else {
            tracing::warn!(session_id = %session_id, "delete requested for unknown session");
        }
        Ok(removed)
    }

    // ─── Queries ────────────────────────────────────────────────────────

    /// Sessions for a user. With `active_only`, expired ones are deleted
    /// and left out.
    pub fn user_sessions(&self, user_id: &str, active_only: bool) -> Result<Vec<Session>, AgentError> {
        let sessions = self.store.user_sessions(user_id)?;
        if !active_only {
            return Ok(sessions);
        }
        let now = Utc::now();
        let mut active = Vec::new();
        for session in sessions {
            if session.is_expired_at(now, self.timeout, self.grace) {
                self.store.delete_session(&session.session_id)?;
            } else {
                active.push(session);
            }
        }
        Ok(active)
    }

    /// Keep the `keep_latest` most recently active sessions of a user and
    /// delete the rest. Returns the number deleted.
    pub fn cleanup_user_sessions(&self, user_id: &str, keep_latest: usize) -> Result<usize, AgentError> {
        let mut sessions = self.store.user_sessions(user_id)?;
        if sessions.len() <= keep_latest {
            return Ok(0);
        }
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));

        let mut deleted = 0;
        for session in &sessions[keep_latest..] {
            if self.store.delete_session(&session.session_id)? {
                deleted += 1;
            }
        }
        tracing::info!(user_id = %user_id, deleted, "cleaned up user sessions");
        Ok(deleted)
    }

    /// Delete every session inactive for longer than `timeout`, sparing
    /// recently created ones.
    pub fn cleanup_expired(&self, timeout: Duration) -> Result<usize, AgentError> {
        self.cleanup_expired_at(timeout, Utc::now())
    }

    fn cleanup_expired_at(&self, timeout: Duration, now: DateTime<Utc>) -> Result<usize, AgentError> {
        let mut deleted = 0;
        for session in self.store.all_sessions()? {
            if session.is_expired_at(now, timeout, self.grace)
                && self.store.delete_session(&session.session_id)?
            {
                deleted += 1;
            }
        }
        if deleted > 0 {
            tracing::info!(
                deleted,
                timeout_minutes = timeout.num_minutes(),
                "cleaned up expired sessions"
            );
        }
        Ok(deleted)
    }

    /// Timeout used by the periodic sweeper.
    pub fn cleanup_timeout(&self) -> Duration {
        std::cmp::max(
            self.timeout * 2,
            Duration::minutes(MIN_CLEANUP_TIMEOUT_MINUTES),
        )
    }

    pub fn session_stats(&self) -> Result<SessionStats, AgentError> {
        let now = Utc::now();
        let mut stats = SessionStats::default();
        for session in self.store.all_sessions()? {
            stats.total += 1;
            if !session.is_expired_at(now, self.timeout, self.grace) {
                stats.active += 1;
            }
            *stats
                .by_state
                .entry(session.state.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }

    // ─── Background sweeper ─────────────────────────────────────────────

    /// Spawn the periodic expiry sweep on the current tokio runtime.
    pub fn spawn_cleanup_task(
        self: Arc<Self>,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.cleanup_expired(self.cleanup_timeout()) {
                    tracing::error!(error = %e, "session cleanup failed");
                    tokio::time::sleep(CLEANUP_RETRY).await;
                }
            }
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::store::InMemorySessionStore;
    use crate::agent_core::types::SessionState;

    fn manager() -> (SessionManager, Arc<InMemorySessionStore>) {
        let store = Arc::new(InMemorySessionStore::new());
        (SessionManager::new(store.clone(), 120, 10), store)
    }

    fn aged_session(id: &str, user: &str, age_min: i64, idle_min: i64) -> Session {
        let now = Utc::now();
        let mut s = Session::new(id, user, now - Duration::minutes(age_min));
        s.last_activity = now - Duration::minutes(idle_min);
        s
    }

    #[test]
    fn test_create_with_explicit_and_generated_ids() {
        let (mgr, store) = manager();
        let a = mgr.create_session("u1", Some("given")).unwrap();
        assert_eq!(a.session_id, "given");
        let b = mgr.create_session("u1", None).unwrap();
        assert_eq!(b.session_id.len(), 36);
        assert_eq!(store.all_sessions().unwrap().len(), 2);
    }

    #[test]
    fn test_get_session_touches_activity() {
        let (mgr, store) = manager();
        store.save_session(&aged_session("s1", "u1", 60, 30)).unwrap();
        let s = mgr.get_session("s1").unwrap().unwrap();
        assert_eq!(s.activity_count, 1);
        assert!(Utc::now() - s.last_activity < Duration::minutes(1));
        assert_eq!(store.load_session("s1").unwrap().unwrap().activity_count, 1);
    }

    #[test]
    fn test_expired_session_is_deleted() {
        let (mgr, store) = manager();
        store.save_session(&aged_session("old", "u1", 300, 121)).unwrap();
        assert!(mgr.get_session("old").unwrap().is_none());
        assert!(store.load_session("old").unwrap().is_none());
    }

    #[test]
    fn test_young_session_exempt_from_expiry() {
        let (mgr, store) = manager();
        // Created 5 minutes ago but with a stale activity stamp.
        store.save_session(&aged_session("young", "u1", 5, 500)).unwrap();
        assert!(mgr.get_session("young").unwrap().is_some());
    }

    #[test]
    fn test_empty_id_is_absent() {
        let (mgr, _) = manager();
        assert!(mgr.get_session("").unwrap().is_none());
    }

    #[test]
    fn test_user_sessions_active_only_prunes() {
        let (mgr, store) = manager();
        store.save_session(&aged_session("live", "u1", 60, 5)).unwrap();
        store.save_session(&aged_session("dead", "u1", 600, 400)).unwrap();
        assert_eq!(mgr.user_sessions("u1", false).unwrap().len(), 2);
        let active = mgr.user_sessions("u1", true).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, "live");
        assert!(store.load_session("dead").unwrap().is_none());
    }

    #[test]
    fn test_cleanup_user_sessions_keeps_latest() {
        let (mgr, store) = manager();
        store.save_session(&aged_session("a", "u1", 60, 50)).unwrap();
        store.save_session(&aged_session("b", "u1", 60, 5)).unwrap();
        store.save_session(&aged_session("c", "u1", 60, 30)).unwrap();
        assert_eq!(mgr.cleanup_user_sessions("u1", 1).unwrap(), 2);
        let left = store.user_sessions("u1").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].session_id, "b");
        assert_eq!(mgr.cleanup_user_sessions("u1", 1).unwrap(), 0);
    }

    #[test]
    fn test_cleanup_expired_uses_given_timeout() {
        let (mgr, store) = manager();
        store.save_session(&aged_session("idle3h", "u1", 600, 180)).unwrap();
        store.save_session(&aged_session("idle5h", "u1", 600, 300)).unwrap();
        store.save_session(&aged_session("young", "u1", 2, 300)).unwrap();

        let deleted = mgr.cleanup_expired(mgr.cleanup_timeout()).unwrap();
        assert_eq!(deleted, 1);
        assert!(store.load_session("idle3h").unwrap().is_some());
        assert!(store.load_session("young").unwrap().is_some());
    }

    #[test]
    fn test_cleanup_timeout_floor() {
        let (mgr, _) = manager();
        assert_eq!(mgr.cleanup_timeout(), Duration::minutes(240));
        let store = Arc::new(InMemorySessionStore::new());
        let long = SessionManager::new(store, 200, 10);
        assert_eq!(long.cleanup_timeout(), Duration::minutes(400));
    }

    #[test]
    fn test_session_stats() {
        let (mgr, store) = manager();
        let mut s = aged_session("a", "u1", 60, 5);
        s.state = SessionState::InProgress;
        store.save_session(&s).unwrap();
        store.save_session(&aged_session("b", "u2", 600, 400)).unwrap();
        let stats = mgr.session_stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.by_state.get("IN_PROGRESS"), Some(&1));
        assert_eq!(stats.by_state.get("STARTING"), Some(&1));
    }

    #[tokio::test]
    async fn test_cleanup_task_sweeps() {
        let (mgr, store) = manager();
        store.save_session(&aged_session("stale", "u1", 900, 600)).unwrap();
        let mgr = Arc::new(mgr);
        let handle = mgr.clone().spawn_cleanup_task(std::time::Duration::from_millis(20));
        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        handle.abort();
        assert!(store.load_session("stale").unwrap().is_none());
    }
}
