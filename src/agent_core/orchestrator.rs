//! Conversation graph: one user turn in, one assistant reply out.
//!
//! ```text
//!            ┌────────► form_searcher ─────┐
//! router ────┼────────► report_generator ◄─┼── form_predictor
//!            ├────────► clarification      │        │
//!            └────────► form_predictor ────┘        ▼
//!                                 form_filler ──► (finalize)
//! any node error ──► error_handler
//! ```
//!
//! Every per-turn value flows through [`TurnState`]. A turn runs under a
//! timeout; when it fires, the working copy is discarded and the session
//! keeps its previous state.

use std::sync::Arc;

use chrono::Utc;

use super::errors::AgentError;
use super::filler::{FillerStep, FormFiller};
use super::finalize::finalize;
use super::forms_cache::FormsCache;
use super::predictor::{FormPredictor, PredictorEdge};
use super::report::ReportGenerator;
use super::router::{route, Intent};
use super::search::FormSearcher;
use super::sessions::SessionManager;
use super::store::FormRepository;
use super::types::{NodeKind, Session, SessionState, Speaker};
use crate::config::AssistantSettings;
use crate::inference::LanguageModel;

pub const DEFAULT_RESPONSE: &str =
    "I'm sorry, I couldn't process your request right now. Please try again.";

const TIMEOUT_RESPONSE: &str =
    "Sorry, that request took too long and timed out. Nothing was changed; please try again.";

const CLARIFICATION_CONFIDENCE: f64 = 0.3;

const CLARIFICATION_RESPONSE: &str = "I'm not sure what you'd like to do. I can help you:
  • fill out a form (\"I need to submit an expense claim\")
  • find forms you've already submitted (\"show my forms from last week\")
  • get a report of your submissions (\"report for this month\")
What would you like to do?";

// ─── Types ──────────────────────────────────────────────────────────────────

/// Everything one turn reads and writes.
#[derive(Debug, Clone)]
pub struct TurnState {
    pub session: Session,
    pub message: Option<String>,
    pub intent: Option<Intent>,
    /// Reply fragments in node order.
    pub responses: Vec<String>,
    pub confidence: Option<f64>,
    pub error_message: Option<String>,
    /// Reference id when this turn finalized a form.
    pub submission_id: Option<String>,
    pub visited: Vec<NodeKind>,
}

impl TurnState {
    pub fn new(session: Session, message: Option<&str>) -> Self {
        Self {
            session,
            message: message.map(str::to_string),
            intent: None,
            responses: Vec::new(),
            confidence: None,
            error_message: None,
            submission_id: None,
            visited: Vec::new(),
        }
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    fn say(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.responses.push(text);
        }
    }

    fn response(&self) -> String {
        if self.responses.is_empty() {
            DEFAULT_RESPONSE.to_string()
        } else {
            self.responses.join("\n\n")
        }
    }
}

/// What the caller gets back for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    pub session_id: String,
    pub response: String,
    pub state: SessionState,
    pub form_id: Option<String>,
    pub intent: Option<Intent>,
    pub confidence: Option<f64>,
    pub submission_id: Option<String>,
    pub nodes: Vec<NodeKind>,
    pub timed_out: bool,
}

// ─── Assistant ──────────────────────────────────────────────────────────────

/// The assistant with all of its dependencies injected.
pub struct FormAssistant {
    llm: Arc<dyn LanguageModel>,
    repo: Arc<dyn FormRepository>,
    sessions: SessionManager,
    cache: Arc<FormsCache>,
    settings: AssistantSettings,
}

impl FormAssistant {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        repo: Arc<dyn FormRepository>,
        sessions: SessionManager,
        cache: Arc<FormsCache>,
        settings: AssistantSettings,
    ) -> Self {
        Self {
            llm,
            repo,
            sessions,
            cache,
            settings,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn settings(&self) -> &AssistantSettings {
        &self.settings
    }

    /// Drop every cached form list, e.g. after the catalogue was re-seeded.
    pub fn reload_forms(&self) {
        self.cache.invalidate_all();
        tracing::info!("forms cache cleared");
    }

    /// Load the caller's session, or open one (under `session_id` when
    /// given). A session owned by someone else is an error.
    fn open_session(&self, user_id: &str, session_id: Option<&str>) -> Result<Session, AgentError> {
        let Some(id) = session_id.filter(|id| !id.is_empty()) else {
            return self.sessions.create_session(user_id, None);
        };
        match self.sessions.get_session(id)? {
            Some(session) if session.user_id == user_id => Ok(session),
            Some(_) => Err(AgentError::SessionOwnership {
                session_id: id.to_string(),
                user_id: user_id.to_string(),
            }),
            None => self.sessions.create_session(user_id, Some(id)),
        }
    }

    /// Assign a form to a session directly, skipping prediction. The form
    /// must be one the user can see (non-archived, in one of their contexts).
    pub fn assign_form(&self, user_id: &str, session_id: &str, form_id: &str) -> Result<Session, AgentError> {
        let predictor = FormPredictor {
            llm: self.llm.as_ref(),
            repo: self.repo.as_ref(),
            cache: self.cache.as_ref(),
            settings: &self.settings,
        };
        if !predictor
            .available_forms(user_id)?
            .iter()
            .any(|f| f.id == form_id)
        {
            tracing::warn!(user_id = %user_id, form_id = %form_id, "form not available to user");
            return Err(AgentError::FormNotFound {
                form_id: form_id.to_string(),
            });
        }
        let mut session = self.open_session(user_id, Some(session_id))?;
        session.start_form(form_id, 1.0);
        self.sessions.save_session(&mut session)?;
        Ok(session)
    }

    /// Run one turn.
    pub async fn handle_message(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        message: Option<&str>,
    ) -> Result<TurnReply, AgentError> {
        let session = self.open_session(user_id, session_id)?;
        let message = message.map(str::trim).filter(|m| !m.is_empty());
        let started = std::time::Instant::now();

        let outcome = tokio::time::timeout(
            self.settings.turn_timeout(),
            self.run_graph(TurnState::new(session.clone(), message)),
        )
        .await;

        let (mut turn, timed_out) = match outcome {
            Ok(Ok(turn)) => (turn, false),
            Ok(Err(e)) => {
                tracing::error!(session_id = %session.session_id, error = %e, "conversation graph failed");
                (TurnState::new(session, message), false)
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    timeout_ms = self.settings.turn_timeout_ms,
                    "turn timed out"
                );
                let mut turn = TurnState::new(session, message);
                turn.say(TIMEOUT_RESPONSE);
                (turn, true)
            }
        };

        let response = turn.response();
        self.record_turn(&mut turn.session, message, &response);
        self.sessions.save_session(&mut turn.session)?;

        tracing::info!(
            session_id = %turn.session.session_id,
            state = %turn.session.state,
            nodes = ?turn.visited,
            elapsed_ms = started.elapsed().as_millis() as u64,
            timed_out,
            "turn complete"
        );

        Ok(TurnReply {
            session_id: turn.session.session_id.clone(),
            response,
            state: turn.session.state,
            form_id: turn.session.form_id.clone(),
            intent: turn.intent,
            confidence: turn.confidence,
            submission_id: turn.submission_id,
            nodes: turn.visited,
            timed_out,
        })
    }

    fn record_turn(&self, session: &mut Session, message: Option<&str>, response: &str) {
        let now = Utc::now();
        let max = self.settings.max_history;
        let store = self.sessions.store();
        if let Some(message) = message {
            session.record(Speaker::User, message, now, max);
            if let Err(e) = store.log_turn(&session.session_id, Speaker::User, message, now) {
                tracing::warn!(error = %e, "failed to log user turn");
            }
        }
        session.record(Speaker::Assistant, response, now, max);
        if let Err(e) = store.log_turn(&session.session_id, Speaker::Assistant, response, now) {
            tracing::warn!(error = %e, "failed to log assistant turn");
        }
    }

    /// Walk the graph from the router until a node ends the turn.
    async fn run_graph(&self, mut turn: TurnState) -> Result<TurnState, AgentError> {
        let mut node = NodeKind::Router;
        for _ in 0..self.settings.max_graph_steps {
            turn.visited.push(node);
            let next = match self.step(node, &mut turn).await {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!(
                        session_id = %turn.session.session_id,
                        node = %node,
                        error = %e,
                        "node failed"
                    );
                    turn.error_message = Some(e.to_string());
                    (node != NodeKind::ErrorHandler).then_some(NodeKind::ErrorHandler)
                }
            };
            match next {
                Some(next) => node = next,
                None => return Ok(turn),
            }
        }
        Err(AgentError::GraphLimitExceeded {
            steps: self.settings.max_graph_steps,
        })
    }

    /// Run one node. `None` ends the turn.
    async fn step(&self, node: NodeKind, turn: &mut TurnState) -> Result<Option<NodeKind>, AgentError> {
        let llm = self.llm.as_ref();
        match node {
            NodeKind::Router => {
                let decision = route(llm, &turn.session, turn.message()).await;
                tracing::info!(
                    session_id = %turn.session.session_id,
                    node = %decision.node,
                    intent = decision.intent.map(|i| i.as_str()).unwrap_or("-"),
                    reason = decision.reason,
                    "routed"
                );
                turn.intent = decision.intent;
                Ok(Some(decision.node))
            }
            NodeKind::FormPredictor => {
                let predictor = FormPredictor {
                    llm,
                    repo: self.repo.as_ref(),
                    cache: self.cache.as_ref(),
                    settings: &self.settings,
                };
                let message = turn.message.clone();
                let step = predictor.run(&mut turn.session, message.as_deref()).await?;
                if let Some(response) = step.response {
                    turn.say(response);
                }
                if step.confidence.is_some() {
                    turn.confidence = step.confidence;
                }
                Ok(match step.edge {
                    PredictorEdge::Filler => Some(NodeKind::FormFiller),
                    PredictorEdge::ReportGenerator => Some(NodeKind::ReportGenerator),
                    PredictorEdge::End if turn.responses.is_empty() => {
                        turn.error_message = Some("no response from form prediction".into());
                        Some(NodeKind::ErrorHandler)
                    }
                    PredictorEdge::End => None,
                    PredictorEdge::Error(reason) => {
                        turn.error_message = Some(reason);
                        Some(NodeKind::ErrorHandler)
                    }
                })
            }
            NodeKind::FormFiller => {
                let form_id = turn
                    .session
                    .form_id
                    .clone()
                    .ok_or_else(|| AgentError::FormNotFound {
                        form_id: String::new(),
                    })?;
                let template = self
                    .repo
                    .form_template(&form_id)?
                    .ok_or(AgentError::FormNotFound { form_id })?;
                let filler = FormFiller {
                    llm,
                    settings: &self.settings,
                };
                let message = turn.message.clone();
                match filler.run(&mut turn.session, &template, message.as_deref()).await? {
                    FillerStep::Reply(text) => turn.say(text),
                    FillerStep::Finalize => {
                        let submission = finalize(
                            &mut turn.session,
                            &template,
                            self.repo.as_ref(),
                            self.cache.as_ref(),
                            Utc::now(),
                        )?;
                        turn.submission_id = Some(submission.reference_id);
                        turn.say(submission.message);
                    }
                }
                Ok(None)
            }
            NodeKind::FormSearcher => {
                let searcher = FormSearcher {
                    llm,
                    repo: self.repo.as_ref(),
                    settings: &self.settings,
                };
                let text = searcher
                    .run(&turn.session, turn.message().unwrap_or_default(), Utc::now())
                    .await?;
                turn.say(text);
                Ok(None)
            }
            NodeKind::ReportGenerator => {
                let generator = ReportGenerator {
                    repo: self.repo.as_ref(),
                    settings: &self.settings,
                };
                let text = generator.run(&turn.session, turn.message().unwrap_or_default(), Utc::now())?;
                turn.say(text);
                Ok(None)
            }
            NodeKind::ClarificationHandler => {
                turn.confidence = Some(CLARIFICATION_CONFIDENCE);
                turn.say(CLARIFICATION_RESPONSE);
                Ok(None)
            }
            NodeKind::ErrorHandler => {
                let reason = turn
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string());
                turn.session.fail();
                turn.say(format!(
                    "Sorry, something went wrong: {reason}.\nYou can describe the form you need again, ask me to search your submitted forms, or ask for a report."
                ));
                Ok(None)
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::database::AssistantDatabase;
    use crate::agent_core::filler::tests::abc_template;
    use crate::agent_core::finalize::tests::FailingRepository;
    use crate::agent_core::forms::{
        AvailableForm, FormContext, FormResponseRecord, FormTemplate, ResponseQuery, ResponseSummary,
    };
    use crate::agent_core::store::{InMemorySessionStore, SessionStore};
    use crate::inference::scripted::ScriptedModel;
    use std::time::Duration;

    fn catalogue() -> Arc<AssistantDatabase> {
        let db = AssistantDatabase::open(":memory:").unwrap();
        db.upsert_context(&FormContext {
            id: "c1".into(),
            title: "Office".into(),
            created_by: "admin".into(),
            assigned_professionals: vec![],
            assigned_users: vec!["u1".into()],
            archived: false,
        })
        .unwrap();
        db.upsert_template(&abc_template()).unwrap();
        db.upsert_template(&FormTemplate {
            id: "leave".into(),
            title: "Leave Request".into(),
            match_keywords: vec!["vacation".into()],
            ..abc_template()
        })
        .unwrap();
        Arc::new(db)
    }

    fn prediction(form_id: &str, score: f64) -> String {
        format!(
            r#"{{"primary_prediction":{{"form_id":"{form_id}","confidence_score":{score},"reasoning":"matches","matched_keywords":[]}},"alternative_forms":[],"requires_user_selection":false}}"#
        )
    }

    fn assistant_with(
        llm: ScriptedModel,
        repo: Arc<dyn FormRepository>,
        store: Arc<dyn SessionStore>,
        settings: AssistantSettings,
    ) -> FormAssistant {
        FormAssistant::new(
            Arc::new(llm),
            repo,
            SessionManager::new(store, 120, 10),
            Arc::new(FormsCache::new(Duration::from_secs(1800))),
            settings,
        )
    }

    #[tokio::test]
    async fn test_full_form_cycle() {
        let db = catalogue();
        let llm = ScriptedModel::with_replies([prediction("abc", 0.92)]);
        let assistant = assistant_with(llm, db.clone(), db.clone(), AssistantSettings::default());

        let first = assistant
            .handle_message("u1", Some("s1"), Some("I need the ABC form"))
            .await
            .unwrap();
        assert_eq!(first.state, SessionState::InProgress);
        assert_eq!(first.form_id.as_deref(), Some("abc"));
        assert_eq!(
            first.nodes,
            vec![NodeKind::Router, NodeKind::FormPredictor, NodeKind::FormFiller]
        );
        assert!(first.response.contains("ABC Form"));

        assistant.handle_message("u1", Some("s1"), Some("alpha")).await.unwrap();
        let summary = assistant
            .handle_message("u1", Some("s1"), Some("ana@example.com"))
            .await
            .unwrap();
        assert_eq!(summary.state, SessionState::Confirmation);

        let done = assistant.handle_message("u1", Some("s1"), Some("yes")).await.unwrap();
        assert_eq!(done.state, SessionState::Completed);
        assert!(done.form_id.is_none());
        assert!(done.submission_id.is_some());
        assert_eq!(db.response_count().unwrap(), 1);

        let stored = db
            .search_responses(&ResponseQuery {
                respondent_id: "u1".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(stored.len(), 1);

        let session = assistant.sessions().get_session("s1").unwrap().unwrap();
        assert!(session.responses.is_empty());
        assert_eq!(session.history.len(), 8);
        assert_eq!(db.conversation_log("s1").unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_low_confidence_shows_menu_then_selection() {
        let db = catalogue();
        let reply = r#"{"primary_prediction":{"form_id":"abc","confidence_score":0.5,"reasoning":"maybe"},"alternative_forms":[{"form_id":"leave","confidence_score":0.4,"reasoning":"maybe"}],"requires_user_selection":false}"#;
        let llm = ScriptedModel::with_replies([reply]);
        let assistant = assistant_with(llm, db.clone(), db.clone(), AssistantSettings::default());

        let menu = assistant
            .handle_message("u1", Some("s1"), Some("I need something for work"))
            .await
            .unwrap();
        assert_eq!(menu.state, SessionState::Starting);
        assert!(menu.form_id.is_none());
        assert!(menu.response.contains("1."));

        let picked = assistant.handle_message("u1", Some("s1"), Some("2")).await.unwrap();
        assert_eq!(picked.form_id.as_deref(), Some("leave"));
        assert_eq!(picked.state, SessionState::InProgress);
    }

    #[tokio::test]
    async fn test_turn_timeout_keeps_previous_state() {
        let db = catalogue();
        let llm = ScriptedModel::with_replies(["search_forms"]).with_delay(Duration::from_millis(300));
        let settings = AssistantSettings {
            turn_timeout_ms: 30,
            ..AssistantSettings::default()
        };
        let assistant = assistant_with(llm, db.clone(), db.clone(), settings);

        let reply = assistant
            .handle_message("u1", Some("s1"), Some("show my forms"))
            .await
            .unwrap();
        assert!(reply.timed_out);
        assert!(reply.response.contains("timed out"));
        assert_eq!(reply.state, SessionState::Starting);

        let session = assistant.sessions().get_session("s1").unwrap().unwrap();
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].message, "show my forms");
    }

    #[tokio::test]
    async fn test_repository_failure_routes_to_error_handler() {
        let store = Arc::new(InMemorySessionStore::new());
        let assistant = assistant_with(
            ScriptedModel::new(),
            Arc::new(FailingRepository),
            store,
            AssistantSettings::default(),
        );
        let reply = assistant
            .handle_message("u1", None, Some("I need a form"))
            .await
            .unwrap();
        assert_eq!(reply.state, SessionState::Error);
        assert_eq!(reply.nodes.last(), Some(&NodeKind::ErrorHandler));
        assert!(reply.response.contains("offline"));
    }

    #[tokio::test]
    async fn test_no_forms_available_is_an_error() {
        let db = Arc::new(AssistantDatabase::open(":memory:").unwrap());
        let assistant = assistant_with(ScriptedModel::new(), db.clone(), db, AssistantSettings::default());
        let reply = assistant
            .handle_message("u1", None, Some("I need a form"))
            .await
            .unwrap();
        assert_eq!(reply.state, SessionState::Error);
        assert!(reply.response.contains("no forms available"));
    }

    #[tokio::test]
    async fn test_session_owned_by_someone_else() {
        let db = catalogue();
        let assistant = assistant_with(ScriptedModel::new(), db.clone(), db, AssistantSettings::default());
        assistant.handle_message("u1", Some("s1"), None).await.unwrap();
        let err = assistant
            .handle_message("intruder", Some("s1"), Some("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::SessionOwnership { .. }));
    }

    #[tokio::test]
    async fn test_greeting_lists_forms() {
        let db = catalogue();
        let assistant = assistant_with(ScriptedModel::new(), db.clone(), db, AssistantSettings::default());
        let reply = assistant.handle_message("u1", None, None).await.unwrap();
        assert!(reply.response.contains("Leave Request"));
        assert_eq!(reply.state, SessionState::Starting);
    }

    #[tokio::test]
    async fn test_unclear_intent_goes_to_clarification() {
        let db = catalogue();
        let llm = ScriptedModel::with_replies(["clarification_needed"]);
        let assistant = assistant_with(llm, db.clone(), db, AssistantSettings::default());
        let reply = assistant
            .handle_message("u1", None, Some("show me something"))
            .await
            .unwrap();
        assert_eq!(reply.intent, Some(Intent::ClarificationNeeded));
        assert_eq!(reply.confidence, Some(CLARIFICATION_CONFIDENCE));
        assert!(reply.response.contains("What would you like to do?"));
    }

    /// Serves templates from the catalogue but refuses to store responses.
    struct ReadOnlyCatalogue(Arc<AssistantDatabase>);

    impl FormRepository for ReadOnlyCatalogue {
        fn available_forms(&self, user_id: &str) -> Result<Vec<AvailableForm>, AgentError> {
            self.0.available_forms(user_id)
        }
        fn form_template(&self, form_id: &str) -> Result<Option<FormTemplate>, AgentError> {
            self.0.form_template(form_id)
        }
        fn insert_response(&self, _record: &FormResponseRecord) -> Result<String, AgentError> {
            Err(AgentError::DatabaseError { reason: "read-only".into() })
        }
        fn search_responses(&self, query: &ResponseQuery) -> Result<Vec<ResponseSummary>, AgentError> {
            self.0.search_responses(query)
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_still_completes() {
        let db = catalogue();
        let store = Arc::new(InMemorySessionStore::new());
        let assistant = assistant_with(
            ScriptedModel::new(),
            Arc::new(ReadOnlyCatalogue(db.clone())),
            store,
            AssistantSettings::default(),
        );
        assistant.assign_form("u1", "abcdef123456", "abc").unwrap();
        assistant.handle_message("u1", Some("abcdef123456"), None).await.unwrap();
        assistant.handle_message("u1", Some("abcdef123456"), Some("alpha")).await.unwrap();
        assistant
            .handle_message("u1", Some("abcdef123456"), Some("ana@example.com"))
            .await
            .unwrap();
        let done = assistant
            .handle_message("u1", Some("abcdef123456"), Some("submit"))
            .await
            .unwrap();
        assert_eq!(done.state, SessionState::Completed);
        let reference = done.submission_id.unwrap();
        assert!(reference.starts_with("fallback_"));
        assert!(reference.ends_with("_abcdef12"));
        assert_eq!(db.response_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_assign_form_requires_access() {
        let db = catalogue();
        db.upsert_template(&FormTemplate {
            id: "old".into(),
            archived: true,
            ..abc_template()
        })
        .unwrap();
        db.upsert_context(&FormContext {
            id: "c2".into(),
            title: "Payroll".into(),
            created_by: "admin".into(),
            assigned_professionals: vec![],
            assigned_users: vec!["u2".into()],
            archived: false,
        })
        .unwrap();
        db.upsert_template(&FormTemplate {
            id: "payslip".into(),
            context_id: "c2".into(),
            ..abc_template()
        })
        .unwrap();
        let store = Arc::new(InMemorySessionStore::new());
        let assistant = assistant_with(ScriptedModel::new(), db, store.clone(), AssistantSettings::default());

        for form_id in ["old", "payslip", "missing"] {
            let err = assistant.assign_form("u1", "s1", form_id).unwrap_err();
            assert!(matches!(err, AgentError::FormNotFound { .. }), "{form_id}: {err}");
        }
        assert!(store.load_session("s1").unwrap().is_none());

        let session = assistant.assign_form("u1", "s1", "abc").unwrap();
        assert_eq!(session.form_id.as_deref(), Some("abc"));
        assert!(assistant.assign_form("u2", "s2", "payslip").is_ok());
    }

    #[tokio::test]
    async fn test_reload_forms_sees_new_templates() {
        let db = catalogue();
        let store = Arc::new(InMemorySessionStore::new());
        let assistant = assistant_with(ScriptedModel::new(), db.clone(), store, AssistantSettings::default());
        assistant.assign_form("u1", "s1", "abc").unwrap();

        db.upsert_template(&FormTemplate {
            id: "late".into(),
            title: "Late Arrival".into(),
            ..abc_template()
        })
        .unwrap();
        assert!(assistant.assign_form("u1", "s2", "late").is_err());

        assistant.reload_forms();
        assert!(assistant.assign_form("u1", "s2", "late").is_ok());
    }
}
