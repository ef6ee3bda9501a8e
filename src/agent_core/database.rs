//! SQLite database for sessions, the conversation log, form templates, access
//! contexts, and submitted responses.
//!
//! Uses `rusqlite` in synchronous mode behind a mutex so one handle can be
//! shared by the async conversation service. WAL mode is enabled for
//! concurrent readers (CLI inspection while a chat is running).

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::errors::AgentError;
use super::forms::{
    AvailableForm, FormContext, FormResponseRecord, FormTemplate, ResponseQuery, ResponseStatus,
    ResponseSummary,
};
use super::store::{FormRepository, SessionStore};
use super::types::{Session, SessionState, Speaker};

// ─── Database ───────────────────────────────────────────────────────────────

/// SQLite database handle for the assistant.
pub struct AssistantDatabase {
    conn: Mutex<Connection>,
}

impl AssistantDatabase {
    /// Open (or create) the assistant database at the given path.
    ///
    /// Pass `":memory:"` for an in-memory database (tests).
    pub fn open(path: &str) -> Result<Self, AgentError> {
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AgentError> {
        self.conn.lock().map_err(|e| AgentError::DatabaseError {
            reason: format!("connection lock poisoned: {e}"),
        })
    }

    /// Create all required tables if they don't exist.
    fn create_tables(&self) -> Result<(), AgentError> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                state TEXT NOT NULL,
                form_id TEXT,
                created_at TEXT NOT NULL,
                last_activity TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_user
                ON sessions(user_id, last_activity);

            CREATE TABLE IF NOT EXISTS conversation_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                role TEXT NOT NULL,
                message TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_log_session
                ON conversation_log(session_id, id);

            CREATE TABLE IF NOT EXISTS contexts (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_by TEXT NOT NULL,
                assigned_professionals TEXT NOT NULL DEFAULT '[]',
                assigned_users TEXT NOT NULL DEFAULT '[]',
                archived INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS form_templates (
                id TEXT PRIMARY KEY,
                context_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                match_keywords TEXT NOT NULL DEFAULT '[]',
                fields TEXT NOT NULL DEFAULT '[]',
                archived INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (context_id) REFERENCES contexts(id)
            );

            CREATE TABLE IF NOT EXISTS form_responses (
                id TEXT PRIMARY KEY,
                form_template_id TEXT NOT NULL,
                context_id TEXT NOT NULL,
                respondent_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                responses TEXT NOT NULL,
                status TEXT NOT NULL,
                completion_percentage REAL NOT NULL,
                required_completion_percentage REAL NOT NULL,
                submitted_at TEXT NOT NULL,
                metadata TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_responses_respondent
                ON form_responses(respondent_id, submitted_at);
            ",
        )?;
        Ok(())
    }

    // ─── Contexts & Templates ───────────────────────────────────────────

    /// Insert or replace an access context.
    pub fn upsert_context(&self, ctx: &FormContext) -> Result<(), AgentError> {
        let professionals = serde_json::to_string(&ctx.assigned_professionals)?;
        let users = serde_json::to_string(&ctx.assigned_users)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO contexts
             (id, title, created_by, assigned_professionals, assigned_users, archived)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                ctx.id,
                ctx.title,
                ctx.created_by,
                professionals,
                users,
                ctx.archived
            ],
        )?;
        Ok(())
    }

    /// Insert or replace a form template.
    pub fn upsert_template(&self, form: &FormTemplate) -> Result<(), AgentError> {
        let keywords = serde_json::to_string(&form.match_keywords)?;
        let fields = serde_json::to_string(&form.fields)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO form_templates
             (id, context_id, title, description, match_keywords, fields, archived)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                form.id,
                form.context_id,
                form.title,
                form.description,
                keywords,
                fields,
                form.archived
            ],
        )?;
        Ok(())
    }

    /// Load contexts and templates from a YAML seed file.
    ///
    /// Returns `(contexts, templates)` counts.
    pub fn seed_from_file(&self, path: &Path) -> Result<(usize, usize), AgentError> {
        let raw = std::fs::read_to_string(path).map_err(|e| AgentError::SeedError {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        let seed: SeedFile = serde_yaml::from_str(&raw).map_err(|e| AgentError::SeedError {
            reason: format!("failed to parse {}: {e}", path.display()),
        })?;
        self.apply_seed(&seed)
    }

    fn apply_seed(&self, seed: &SeedFile) -> Result<(usize, usize), AgentError> {
        for ctx in &seed.contexts {
            self.upsert_context(ctx)?;
        }
        for form in &seed.forms {
            self.upsert_template(form)?;
        }
        tracing::info!(
            contexts = seed.contexts.len(),
            forms = seed.forms.len(),
            "seeded form catalogue"
        );
        Ok((seed.contexts.len(), seed.forms.len()))
    }

    fn list_contexts(&self) -> Result<Vec<FormContext>, AgentError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, created_by, assigned_professionals, assigned_users, archived
             FROM contexts WHERE archived = 0",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(FormContext {
                id: row.get(0)?,
                title: row.get(1)?,
                created_by: row.get(2)?,
                assigned_professionals: parse_json_or_default(&row.get::<_, String>(3)?),
                assigned_users: parse_json_or_default(&row.get::<_, String>(4)?),
                archived: row.get(5)?,
            })
        })?;

        let mut contexts = Vec::new();
        for row in rows {
            contexts.push(row?);
        }
        Ok(contexts)
    }

    fn templates_for_context(&self, context_id: &str) -> Result<Vec<FormTemplate>, AgentError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, context_id, title, description, match_keywords, fields, archived
             FROM form_templates
             WHERE context_id = ?1 AND archived = 0
             ORDER BY title ASC",
        )?;
        let rows = stmt.query_map(params![context_id], row_to_template)?;

        let mut templates = Vec::new();
        for row in rows {
            templates.push(row?);
        }
        Ok(templates)
    }

    // ─── Conversation Log ───────────────────────────────────────────────

    /// Get the logged turns for a session, oldest first.
    pub fn conversation_log(&self, session_id: &str) -> Result<Vec<(Speaker, String)>, AgentError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT role, message FROM conversation_log
             WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            let role: String = row.get(0)?;
            let speaker = if role == "user" {
                Speaker::User
            } else {
                Speaker::Assistant
            };
            Ok((speaker, row.get::<_, String>(1)?))
        })?;

        let mut log = Vec::new();
        for row in rows {
            log.push(row?);
        }
        Ok(log)
    }

    /// Number of stored response records (all respondents).
    pub fn response_count(&self) -> Result<usize, AgentError> {
        let count: i64 =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM form_responses", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

// ─── SessionStore ───────────────────────────────────────────────────────────

impl SessionStore for AssistantDatabase {
    fn save_session(&self, session: &Session) -> Result<(), AgentError> {
        let data = serde_json::to_string(session)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO sessions
             (id, user_id, state, form_id, created_at, last_activity, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.session_id,
                session.user_id,
                session.state.as_str(),
                session.form_id,
                format_timestamp(&session.created_at),
                format_timestamp(&session.last_activity),
                data
            ],
        )?;
        Ok(())
    }

    fn load_session(&self, session_id: &str) -> Result<Option<Session>, AgentError> {
        let row = self
            .conn()?
            .query_row(
                "SELECT id, user_id, state, created_at, data FROM sessions WHERE id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(id, user_id, state, created_at, data)| {
            decode_session(&id, &user_id, &state, &created_at, &data)
        }))
    }

    fn delete_session(&self, session_id: &str) -> Result<bool, AgentError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM conversation_log WHERE session_id = ?1",
            params![session_id],
        )?;
        let removed = conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        Ok(removed > 0)
    }

    fn user_sessions(&self, user_id: &str) -> Result<Vec<Session>, AgentError> {
        self.query_sessions(
            "SELECT id, user_id, state, created_at, data FROM sessions
             WHERE user_id = ?1 ORDER BY last_activity DESC",
            Some(user_id),
        )
    }

    fn all_sessions(&self) -> Result<Vec<Session>, AgentError> {
        self.query_sessions(
            "SELECT id, user_id, state, created_at, data FROM sessions
             ORDER BY last_activity DESC",
            None,
        )
    }

    fn log_turn(
        &self,
        session_id: &str,
        role: Speaker,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AgentError> {
        self.conn()?.execute(
            "INSERT INTO conversation_log (session_id, timestamp, role, message)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, format_timestamp(&at), role.as_str(), message],
        )?;
        Ok(())
    }
}

impl AssistantDatabase {
    fn query_sessions(&self, sql: &str, user_id: Option<&str>) -> Result<Vec<Session>, AgentError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        };
        let rows = match user_id {
            Some(user) => stmt.query_map(params![user], map_row)?.collect::<Vec<_>>(),
            None => stmt.query_map([], map_row)?.collect::<Vec<_>>(),
        };

        let mut sessions = Vec::new();
        for row in rows {
            let (id, user, state, created_at, data) = row?;
            sessions.push(decode_session(&id, &user, &state, &created_at, &data));
        }
        Ok(sessions)
    }
}

// ─── FormRepository ─────────────────────────────────────────────────────────

impl FormRepository for AssistantDatabase {
    fn available_forms(&self, user_id: &str) -> Result<Vec<AvailableForm>, AgentError> {
        let mut forms = Vec::new();
        for ctx in self.list_contexts()? {
            let Some(access) = ctx.access_for(user_id) else {
                continue;
            };
            for template in self.templates_for_context(&ctx.id)? {
                forms.push(AvailableForm {
                    field_count: template.fields.len(),
                    required_count: template.required_count(),
                    id: template.id,
                    title: template.title,
                    description: template.description,
                    match_keywords: template.match_keywords,
                    context_id: ctx.id.clone(),
                    context_title: ctx.title.clone(),
                    access_level: access,
                });
            }
        }
        forms.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));
        Ok(forms)
    }

    fn form_template(&self, form_id: &str) -> Result<Option<FormTemplate>, AgentError> {
        let result = self
            .conn()?
            .query_row(
                "SELECT id, context_id, title, description, match_keywords, fields, archived
                 FROM form_templates WHERE id = ?1",
                params![form_id],
                row_to_template,
            )
            .optional()?;
        Ok(result)
    }

    fn insert_response(&self, record: &FormResponseRecord) -> Result<String, AgentError> {
        let responses = serde_json::to_string(&record.responses)?;
        let metadata = serde_json::to_string(&record.metadata)?;
        self.conn()?.execute(
            "INSERT INTO form_responses
             (id, form_template_id, context_id, respondent_id, session_id, responses,
              status, completion_percentage, required_completion_percentage,
              submitted_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id,
                record.form_template_id,
                record.context_id,
                record.respondent_id,
                record.session_id,
                responses,
                record.status.as_str(),
                record.completion_percentage,
                record.required_completion_percentage,
                format_timestamp(&record.submitted_at),
                metadata
            ],
        )?;
        Ok(record.id.clone())
    }

    fn search_responses(&self, query: &ResponseQuery) -> Result<Vec<ResponseSummary>, AgentError> {
        let from = query.from.as_ref().map(format_timestamp);
        let to = query.to.as_ref().map(format_timestamp);

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT r.id, r.form_template_id, COALESCE(t.title, r.form_template_id),
                    r.status, r.completion_percentage, r.submitted_at, r.responses
             FROM form_responses r
             LEFT JOIN form_templates t ON t.id = r.form_template_id
             WHERE r.respondent_id = ?1
               AND (?2 IS NULL OR r.submitted_at >= ?2)
               AND (?3 IS NULL OR r.submitted_at <= ?3)
             ORDER BY r.submitted_at DESC",
        )?;
        let rows = stmt.query_map(params![query.respondent_id, from, to], |row| {
            Ok(ResponseSummary {
                id: row.get(0)?,
                form_template_id: row.get(1)?,
                form_title: row.get(2)?,
                status: ResponseStatus::parse(&row.get::<_, String>(3)?),
                completion_percentage: row.get(4)?,
                submitted_at: parse_timestamp(&row.get::<_, String>(5)?),
                responses: parse_json_or_default(&row.get::<_, String>(6)?),
            })
        })?;

        let keywords: Vec<String> = query.keywords.iter().map(|k| k.to_lowercase()).collect();
        let mut results = Vec::new();
        for row in rows {
            let summary = row?;
            if keywords.is_empty() || matches_keywords(&summary, &keywords) {
                results.push(summary);
            }
            if query.limit > 0 && results.len() >= query.limit {
                break;
            }
        }
        Ok(results)
    }
}

// ─── Seed File ──────────────────────────────────────────────────────────────

/// On-disk format for `seed --file`.
#[derive(Debug, Default, Deserialize)]
struct SeedFile {
    #[serde(default)]
    contexts: Vec<FormContext>,
    #[serde(default)]
    forms: Vec<FormTemplate>,
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn row_to_template(row: &rusqlite::Row<'_>) -> rusqlite::Result<FormTemplate> {
    Ok(FormTemplate {
        id: row.get(0)?,
        context_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        match_keywords: parse_json_or_default(&row.get::<_, String>(4)?),
        fields: parse_json_or_default(&row.get::<_, String>(5)?),
        archived: row.get(6)?,
    })
}

/// Decode a stored session, falling back to a minimal session on corrupt data.
fn decode_session(id: &str, user_id: &str, state: &str, created_at: &str, data: &str) -> Session {
    match serde_json::from_str::<Session>(data) {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(
                session_id = %id,
                state = %state,
                error = %e,
                "corrupt session data, starting over"
            );
            let mut session = Session::new(id, user_id, parse_timestamp(created_at));
            if SessionState::parse(state).is_none() {
                tracing::warn!(session_id = %id, state = %state, "unknown stored session state");
            }
            session.last_activity = Utc::now();
            session
        }
    }
}

fn matches_keywords(summary: &ResponseSummary, keywords: &[String]) -> bool {
    let title = summary.form_title.to_lowercase();
    keywords.iter().any(|k| {
        title.contains(k.as_str())
            || summary.responses.values().any(|v| match v {
                serde_json::Value::String(s) => s.to_lowercase().contains(k.as_str()),
                other => other.to_string().contains(k.as_str()),
            })
    })
}

/// Timestamps are stored as fixed-width RFC 3339 UTC so they sort as text.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a JSON column, defaulting on malformed data.
fn parse_json_or_default<T: DeserializeOwned + Default>(json: &str) -> T {
    serde_json::from_str(json).unwrap_or_default()
}

// ─── Tests ──────────────────────────────────────────────────────────────────
