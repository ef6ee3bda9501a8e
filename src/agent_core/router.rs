//! Entry node: decide which handler takes the turn.
//!
//! Most turns never reach the LLM. A session with an assigned form goes
//! straight to the filler, an open alternative menu goes back to the
//! predictor, and a first message that doesn't smell like a search or report
//! request is sent to the predictor without classification.

use serde::{Deserialize, Serialize};

use super::keywords::Tokens;
use super::types::{NodeKind, Session, SessionState};
use crate::inference::{CompletionRequest, LanguageModel};

pub const REPORT_KEYWORDS: &[&str] = &[
    "report", "relatório", "análise", "analysis", "resumo", "summary", "dados", "data",
    "estatística", "estatisticas", "tendência", "trend",
];

pub const SEARCH_KEYWORDS: &[&str] = &[
    "buscar", "search", "encontrar", "find", "consultar", "query", "mostrar", "show", "ver", "see",
    "list",
];

const CLASSIFY_SYSTEM_PROMPT: &str = r#"You classify user requests for a form management assistant.

Categories:
1. fill_form - the user wants to start, continue or interact with filling a form.
   Examples: "I need to fill out a form", "help me with the safety inspection", "I want to submit information"
2. search_forms - the user wants to find or look through forms they already submitted.
   Examples: "show me yesterday's submissions", "find my expense reports", "what did I send today"
3. generate_report - the user wants analysis, summaries or reports over submitted data.
   Examples: "generate a summary", "show me the trends", "create a report for last month"
4. clarification_needed - the request is vague or could match several categories.

Reply with ONLY the category name."#;

/// Classified purpose of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    FillForm,
    SearchForms,
    GenerateReport,
    ClarificationNeeded,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::FillForm => "fill_form",
            Intent::SearchForms => "search_forms",
            Intent::GenerateReport => "generate_report",
            Intent::ClarificationNeeded => "clarification_needed",
        }
    }

    /// Graph node that handles this intent.
    pub fn node(&self) -> NodeKind {
        match self {
            Intent::FillForm => NodeKind::FormPredictor,
            Intent::SearchForms => NodeKind::FormSearcher,
            Intent::GenerateReport => NodeKind::ReportGenerator,
            Intent::ClarificationNeeded => NodeKind::ClarificationHandler,
        }
    }
}

/// Map a free-form model label onto an intent.
///
/// An exact category name wins; otherwise containment rules apply in order
/// (form, search, report/generate), and anything else needs clarification.
pub fn normalize_intent(label: &str) -> Intent {
    let label = label
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.')
        .to_lowercase();
    for intent in [
        Intent::FillForm,
        Intent::SearchForms,
        Intent::GenerateReport,
        Intent::ClarificationNeeded,
    ] {
        if label == intent.as_str() {
            return intent;
        }
    }
    if label.contains("fill_form") || label.contains("form") {
        Intent::FillForm
    } else if label.contains("search") {
        Intent::SearchForms
    } else if label.contains("report") || label.contains("generate") {
        Intent::GenerateReport
    } else {
        Intent::ClarificationNeeded
    }
}

/// Where the turn goes, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub node: NodeKind,
    /// Set when the LLM classified the message.
    pub intent: Option<Intent>,
    pub reason: &'static str,
}

impl RouteDecision {
    fn direct(node: NodeKind, reason: &'static str) -> Self {
        Self {
            node,
            intent: None,
            reason,
        }
    }
}

/// Routing rules that need no model call. `None` means "classify".
pub fn pre_route(session: &Session, message: Option<&str>) -> Option<RouteDecision> {
    if session.form_id.is_some() && session.state != SessionState::Completed {
        return Some(RouteDecision::direct(NodeKind::FormFiller, "active form"));
    }
    if session.pending_selection.is_some() {
        return Some(RouteDecision::direct(
            NodeKind::FormPredictor,
            "pending selection",
        ));
    }
    let message = match message.map(str::trim) {
        Some(m) if !m.is_empty() => m,
        _ => return Some(RouteDecision::direct(NodeKind::FormPredictor, "no message")),
    };

    if session.state == SessionState::Starting {
        let tokens = Tokens::new(message);
        if !tokens.has_any(REPORT_KEYWORDS) && !tokens.has_any(SEARCH_KEYWORDS) {
            return Some(RouteDecision::direct(
                NodeKind::FormPredictor,
                "first message looks like a form request",
            ));
        }
    }
    None
}

/// Ask the model for an intent. Any failure means `fill_form`.
pub async fn classify_intent(llm: &dyn LanguageModel, message: &str) -> Intent {
    let request = CompletionRequest::new(
        CLASSIFY_SYSTEM_PROMPT,
        format!("User message: \"{message}\""),
    );
    match llm.complete(request).await {
        Ok(label) => normalize_intent(&label),
        Err(e) => {
            tracing::warn!(error = %e, "intent classification failed, defaulting to fill_form");
            Intent::FillForm
        }
    }
}

/// Full routing decision for one turn.
pub async fn route(llm: &dyn LanguageModel, session: &Session, message: Option<&str>) -> RouteDecision {
    if let Some(decision) = pre_route(session, message) {
        return decision;
    }
    let message = message.unwrap_or_default();
    let intent = classify_intent(llm, message).await;
    RouteDecision {
        node: intent.node(),
        intent: Some(intent),
        reason: "classified",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::types::{SelectionScenario, SessionState};
    use crate::inference::scripted::ScriptedModel;
    use chrono::Utc;

    fn session(state: SessionState) -> Session {
        let mut s = Session::new("s1", "u1", Utc::now());
        s.state = state;
        s
    }

    #[test]
    fn test_normalize_intent() {
        assert_eq!(normalize_intent("fill_form"), Intent::FillForm);
        assert_eq!(normalize_intent(" search_forms\n"), Intent::SearchForms);
        assert_eq!(normalize_intent("\"generate_report\""), Intent::GenerateReport);
        assert_eq!(normalize_intent("The user wants a form"), Intent::FillForm);
        assert_eq!(normalize_intent("search"), Intent::SearchForms);
        assert_eq!(normalize_intent("report please"), Intent::GenerateReport);
        assert_eq!(normalize_intent("unsure"), Intent::ClarificationNeeded);
    }

    #[test]
    fn test_active_form_goes_to_filler() {
        let mut s = session(SessionState::InProgress);
        s.form_id = Some("f1".into());
        let d = pre_route(&s, Some("show me a report")).unwrap();
        assert_eq!(d.node, NodeKind::FormFiller);
    }

    #[test]
    fn test_pending_selection_goes_to_predictor() {
        let mut s = session(SessionState::Starting);
        s.pending_selection = Some(SelectionScenario {
            options: vec![],
            original_message: "x".into(),
            attempts: 0,
            created_at: Utc::now(),
        });
        let d = pre_route(&s, Some("2")).unwrap();
        assert_eq!(d.node, NodeKind::FormPredictor);
    }

    #[test]
    fn test_missing_message_goes_to_predictor() {
        let s = session(SessionState::Completed);
        assert_eq!(pre_route(&s, None).unwrap().node, NodeKind::FormPredictor);
        assert_eq!(pre_route(&s, Some("  ")).unwrap().node, NodeKind::FormPredictor);
    }

    #[test]
    fn test_first_message_shortcut() {
        let s = session(SessionState::Starting);
        let d = pre_route(&s, Some("I need to file an expense claim")).unwrap();
        assert_eq!(d.node, NodeKind::FormPredictor);
        // keyword hit forces classification
        assert!(pre_route(&s, Some("show my expense claims")).is_none());
        assert!(pre_route(&s, Some("relatório do mês")).is_none());
        // whole words only: "update" is not "data"
        assert!(pre_route(&s, Some("update my address")).is_some());
    }

    #[test]
    fn test_later_messages_are_classified() {
        let s = session(SessionState::Completed);
        assert!(pre_route(&s, Some("I need another form")).is_none());
    }

    #[tokio::test]
    async fn test_route_uses_classifier() {
        let llm = ScriptedModel::with_replies(["search_forms"]);
        let s = session(SessionState::Completed);
        let d = route(&llm, &s, Some("find what I sent")).await;
        assert_eq!(d.node, NodeKind::FormSearcher);
        assert_eq!(d.intent, Some(Intent::SearchForms));
    }

    #[tokio::test]
    async fn test_classifier_failure_defaults_to_fill_form() {
        let llm = ScriptedModel::new();
        let s = session(SessionState::Completed);
        let d = route(&llm, &s, Some("whatever")).await;
        assert_eq!(d.node, NodeKind::FormPredictor);
        assert_eq!(d.intent, Some(Intent::FillForm));
    }
}
