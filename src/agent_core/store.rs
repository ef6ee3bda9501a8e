//! Storage seams for the agent core.
//!
//! `SessionStore` holds conversation sessions; `FormRepository` is the
//! document store for templates, access contexts and submitted responses.
//! `AssistantDatabase` implements both over SQLite; `InMemorySessionStore`
//! is the process-local session backend.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::errors::AgentError;
use super::forms::{AvailableForm, FormResponseRecord, FormTemplate, ResponseQuery, ResponseSummary};
use super::types::{Session, Speaker};

// ─── Traits ─────────────────────────────────────────────────────────────────

/// Keyed session persistence (last write wins).
pub trait SessionStore: Send + Sync {
    fn save_session(&self, session: &Session) -> Result<(), AgentError>;
    fn load_session(&self, session_id: &str) -> Result<Option<Session>, AgentError>;
    /// Returns `true` if a session was removed.
    fn delete_session(&self, session_id: &str) -> Result<bool, AgentError>;
    fn user_sessions(&self, user_id: &str) -> Result<Vec<Session>, AgentError>;
    fn all_sessions(&self) -> Result<Vec<Session>, AgentError>;

    /// Append one line to the durable conversation log.
    fn log_turn(
        &self,
        _session_id: &str,
        _role: Speaker,
        _message: &str,
        _at: DateTime<Utc>,
    ) -> Result<(), AgentError> {
        Ok(())
    }
}

/// Form templates, access and submitted responses.
pub trait FormRepository: Send + Sync {
    /// Non-archived forms the user can fill, across all their contexts.
    fn available_forms(&self, user_id: &str) -> Result<Vec<AvailableForm>, AgentError>;
    fn form_template(&self, form_id: &str) -> Result<Option<FormTemplate>, AgentError>;
    /// Persist a record and return its id.
    fn insert_response(&self, record: &FormResponseRecord) -> Result<String, AgentError>;
    /// Stored responses matching the query, newest first.
    fn search_responses(&self, query: &ResponseQuery) -> Result<Vec<ResponseSummary>, AgentError>;
}

// ─── In-memory sessions ─────────────────────────────────────────────────────

/// Session store backed by a process-local map.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Session>>, AgentError> {
        self.sessions.lock().map_err(|e| AgentError::DatabaseError {
            reason: format!("session map lock poisoned: {e}"),
        })
    }
}

impl SessionStore for InMemorySessionStore {
    fn save_session(&self, session: &Session) -> Result<(), AgentError> {
        self.lock()?
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    fn load_session(&self, session_id: &str) -> Result<Option<Session>, AgentError> {
        Ok(self.lock()?.get(session_id).cloned())
    }

    fn delete_session(&self, session_id: &str) -> Result<bool, AgentError> {
        Ok(self.lock()?.remove(session_id).is_some())
    }

    fn user_sessions(&self, user_id: &str) -> Result<Vec<Session>, AgentError> {
        Ok(self
            .lock()?
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    fn all_sessions(&self) -> Result<Vec<Session>, AgentError> {
        Ok(self.lock()?.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_round_trip() {
        let store = InMemorySessionStore::new();
        let s = Session::new("s1", "u1", Utc::now());
        store.save_session(&s).unwrap();
        assert_eq!(store.load_session("s1").unwrap(), Some(s));
        assert_eq!(store.user_sessions("u1").unwrap().len(), 1);
        assert!(store.user_sessions("u2").unwrap().is_empty());
        assert!(store.delete_session("s1").unwrap());
        assert!(!store.delete_session("s1").unwrap());
        assert!(store.load_session("s1").unwrap().is_none());
    }
}
