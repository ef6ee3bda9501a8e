//! Shared types across the agent core: sessions, conversation history, and
//! the alternative-selection menu that lives on a session between turns.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::errors::AgentError;

// ─── Session State ──────────────────────────────────────────────────────────

/// Lifecycle state of a conversation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Starting,
    InProgress,
    AwaitingFormConfirmation,
    Confirmation,
    Completed,
    Error,
    Cancelled,
}

impl SessionState {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Starting => "STARTING",
            SessionState::InProgress => "IN_PROGRESS",
            SessionState::AwaitingFormConfirmation => "AWAITING_FORM_CONFIRMATION",
            SessionState::Confirmation => "CONFIRMATION",
            SessionState::Completed => "COMPLETED",
            SessionState::Error => "ERROR",
            SessionState::Cancelled => "CANCELLED",
        }
    }

    /// Parse from database string representation (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STARTING" => Some(SessionState::Starting),
            "IN_PROGRESS" => Some(SessionState::InProgress),
            "AWAITING_FORM_CONFIRMATION" => Some(SessionState::AwaitingFormConfirmation),
            "CONFIRMATION" => Some(SessionState::Confirmation),
            "COMPLETED" => Some(SessionState::Completed),
            "ERROR" => Some(SessionState::Error),
            "CANCELLED" => Some(SessionState::Cancelled),
            _ => None,
        }
    }

    /// COMPLETED, ERROR and CANCELLED end a form cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Error | SessionState::Cancelled
        )
    }

    /// Position along the forward path of a form cycle.
    fn rank(&self) -> u8 {
        match self {
            SessionState::Starting => 0,
            SessionState::AwaitingFormConfirmation => 1,
            SessionState::InProgress => 2,
            SessionState::Confirmation => 3,
            SessionState::Completed
            | SessionState::Error
            | SessionState::Cancelled => 4,
        }
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Forward moves along STARTING → AWAITING_FORM_CONFIRMATION →
    /// IN_PROGRESS → CONFIRMATION → COMPLETED are allowed, as are
    /// CONFIRMATION → IN_PROGRESS, any → ERROR, and non-terminal → CANCELLED.
    /// Leaving a terminal state requires a new form assignment
    /// ([`Session::start_form`]).
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        if *self == next || next == SessionState::Error {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (SessionState::Confirmation, SessionState::InProgress) => true,
            (_, SessionState::Cancelled) => true,
            (_, SessionState::Completed) => *self == SessionState::Confirmation,
            _ => next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Graph Nodes ────────────────────────────────────────────────────────────

/// A node of the conversation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Router,
    FormPredictor,
    FormFiller,
    FormSearcher,
    ReportGenerator,
    ClarificationHandler,
    ErrorHandler,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Router => "router",
            NodeKind::FormPredictor => "form_predictor",
            NodeKind::FormFiller => "form_filler",
            NodeKind::FormSearcher => "form_searcher",
            NodeKind::ReportGenerator => "report_generator",
            NodeKind::ClarificationHandler => "clarification_handler",
            NodeKind::ErrorHandler => "error_handler",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Conversation History ───────────────────────────────────────────────────

/// Who said a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Assistant => "assistant",
        }
    }
}

/// One turn of conversation kept on the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Speaker,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

// ─── Field Answers ──────────────────────────────────────────────────────────

/// A stored answer for one form field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldAnswer {
    /// Validated, normalized value.
    Value(String),
    /// User explicitly skipped an optional field.
    Skipped,
}

impl FieldAnswer {
    pub fn as_value(&self) -> Option<&str> {
        match self {
            FieldAnswer::Value(v) => Some(v),
            FieldAnswer::Skipped => None,
        }
    }

    /// Text shown in summaries.
    pub fn display(&self) -> &str {
        match self {
            FieldAnswer::Value(v) => v,
            FieldAnswer::Skipped => "(skipped)",
        }
    }
}

// ─── Alternative Selection ──────────────────────────────────────────────────

/// One entry of the low-confidence alternative menu.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionOption {
    pub form_id: String,
    pub title: String,
    pub score: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub match_keywords: Vec<String>,
}

/// An open alternative menu waiting for the user's pick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionScenario {
    /// Sorted by descending score, at most the configured maximum.
    pub options: Vec<SelectionOption>,
    /// The message that produced the low-confidence prediction.
    pub original_message: String,
    /// Consecutive unrecognized answers.
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

// ─── Session ────────────────────────────────────────────────────────────────

/// Full state of one conversation session.
///
/// This is the single typed record persisted by the session store and
/// threaded through the conversation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    /// Assigned form template, if any.
    #[serde(default)]
    pub form_id: Option<String>,
    pub state: SessionState,
    #[serde(default)]
    pub responses: BTreeMap<String, FieldAnswer>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Field currently being asked.
    #[serde(default)]
    pub current_field: Option<String>,
    #[serde(default)]
    pub pending_selection: Option<SelectionScenario>,
    /// Confidence with which the current form was assigned.
    #[serde(default)]
    pub prediction_confidence: Option<f64>,
    /// Set after the user rejected the confirmation summary.
    #[serde(default)]
    pub editing: bool,
    /// The filler has introduced the current form (welcome or the
    /// "is this the right form?" question).
    #[serde(default)]
    pub form_started: bool,
    #[serde(default)]
    pub activity_count: u64,
    /// Reference of the last finalized response record.
    #[serde(default)]
    pub last_submission_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            form_id: None,
            state: SessionState::Starting,
            responses: BTreeMap::new(),
            history: Vec::new(),
            current_field: None,
            pending_selection: None,
            prediction_confidence: None,
            editing: false,
            form_started: false,
            activity_count: 0,
            last_submission_id: None,
            created_at: now,
            last_activity: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Move to `next`, enforcing the state machine.
    pub fn transition_to(&mut self, next: SessionState) -> Result<(), AgentError> {
        if !self.state.can_transition_to(next) {
            return Err(AgentError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        if self.state != next {
            tracing::debug!(
                session_id = %self.session_id,
                from = %self.state,
                to = %next,
                "session transition"
            );
        }
        self.state = next;
        Ok(())
    }

    /// Assign a form and open a fresh filling cycle.
    ///
    /// Allowed from STARTING and from terminal states; the filler takes the
    /// session forward from here.
    pub fn start_form(&mut self, form_id: impl Into<String>, confidence: f64) {
        self.form_id = Some(form_id.into());
        self.prediction_confidence = Some(confidence);
        self.responses.clear();
        self.current_field = None;
        self.pending_selection = None;
        self.editing = false;
        self.form_started = false;
        self.completed_at = None;
        if self.state != SessionState::Starting {
            tracing::debug!(
                session_id = %self.session_id,
                from = %self.state,
                "new form cycle"
            );
            self.state = SessionState::Starting;
        }
    }

    /// Drop the assigned form and all per-form progress.
    pub fn clear_form(&mut self) {
        self.form_id = None;
        self.responses.clear();
        self.current_field = None;
        self.editing = false;
        self.form_started = false;
        self.prediction_confidence = None;
    }

    /// Move to ERROR and drop anything that would route back into a form.
    pub fn fail(&mut self) {
        self.state = SessionState::Error;
        self.pending_selection = None;
        self.clear_form();
    }

    /// Append a history entry, keeping at most `max_history` entries.
    pub fn record(&mut self, role: Speaker, message: &str, now: DateTime<Utc>, max_history: usize) {
        self.history.push(HistoryEntry {
            role,
            message: message.to_string(),
            timestamp: now,
        });
        if max_history > 0 && self.history.len() > max_history {
            let excess = self.history.len() - max_history;
            self.history.drain(..excess);
        }
    }

    /// Mark activity at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
        self.updated_at = now;
        self.activity_count += 1;
    }

    /// Whether the last activity is within `timeout`.
    pub fn is_active_at(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_activity < timeout
    }

    /// Whether the session was created within `grace`.
    pub fn is_recently_created_at(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        now - self.created_at < grace
    }

    /// Expired: inactive for `timeout` and older than `grace`.
    pub fn is_expired_at(&self, now: DateTime<Utc>, timeout: Duration, grace: Duration) -> bool {
        !self.is_recently_created_at(now, grace) && !self.is_active_at(now, timeout)
    }

    /// Number of user turns in the retained history.
    pub fn user_turns(&self) -> usize {
        self.history
            .iter()
            .filter(|h| h.role == Speaker::User)
            .count()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
