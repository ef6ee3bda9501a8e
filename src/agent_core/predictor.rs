//! Form prediction and the confidence-gated selection protocol.
//!
//! The model ranks the user's available forms against the request. A
//! confident, unambiguous top candidate is assigned directly; otherwise the
//! top alternatives are offered as a numbered menu that lives on the
//! session until the user picks one, rejects them all, or runs out of
//! retries. When the model is unavailable a keyword ranking takes over; its
//! scores stay below the acceptance threshold so the user always confirms.

use serde::Deserialize;
use serde_json::Value;

use super::confidence::{apply_gate, describe, sanitize_score, GateDecision};
use super::errors::AgentError;
use super::forms::AvailableForm;
use super::forms_cache::FormsCache;
use super::keywords::{tokenize, Tokens};
use super::reply_parser::parse_json_reply;
use super::selection::{resolve_selection, SelectionOutcome};
use super::store::FormRepository;
use super::types::{SelectionOption, SelectionScenario, Session, SessionState};
use crate::config::AssistantSettings;
use crate::inference::{CompletionRequest, LanguageModel};

/// Analysis phrasing that belongs to the report generator even after the
/// router sent the message here. Plain "report" is left out: many forms are
/// themselves called reports.
const REPORT_INDICATORS: &[&str] = &[
    "analysis", "análise", "estatística", "estatisticas", "tendência", "trend", "trends",
    "show data", "mostrar dados", "generate report", "generate a report", "gerar relatório",
    "create a report", "criar relatório", "summary of my", "resumo dos",
];

/// Ceiling for keyword-ranking scores.
const KEYWORD_SCORE_CAP: f64 = 0.65;

/// Title words too common to count as evidence.
const TITLE_STOPWORDS: &[&str] = &[
    "the", "and", "for", "form", "forms", "request", "de", "da", "do", "das", "dos", "para", "com",
    "formulário",
];

const PREDICT_SYSTEM_PROMPT: &str = r#"You match a user's request to the form they need to fill.

You receive the request and the list of forms the user can access. Rank the
forms by how well they fit. Use only form ids from the list.

Reply with a single JSON object:
{
  "primary_prediction": {
    "form_id": "<id or null>",
    "confidence_score": <0.0 to 1.0>,
    "reasoning": "<one sentence>",
    "matched_keywords": ["..."]
  },
  "alternative_forms": [
    {"form_id": "<id>", "confidence_score": <0.0 to 1.0>, "reasoning": "<one sentence>"}
  ],
  "requires_user_selection": <true if the user should choose between several forms>
}"#;

// ─── Prediction ─────────────────────────────────────────────────────────────

/// One ranked form.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredForm {
    pub form_id: String,
    pub score: f64,
    pub reasoning: String,
    pub matched_keywords: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionSource {
    Model,
    KeywordFallback,
}

/// Normalized ranking: the candidate (if any) outscores every alternative,
/// and alternatives are sorted by descending score.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub candidate: Option<ScoredForm>,
    pub alternatives: Vec<ScoredForm>,
    pub requires_user_selection: bool,
    pub source: PredictionSource,
}

impl Prediction {
    pub fn score(&self) -> f64 {
        self.candidate.as_ref().map(|c| c.score).unwrap_or(0.0)
    }

    /// Candidate followed by alternatives.
    pub fn ranked(&self) -> Vec<&ScoredForm> {
        self.candidate.iter().chain(self.alternatives.iter()).collect()
    }

    /// Top `max` entries as menu options.
    pub fn menu(&self, forms: &[AvailableForm], max: usize) -> Vec<SelectionOption> {
        self.ranked()
            .into_iter()
            .filter_map(|scored| {
                let form = forms.iter().find(|f| f.id == scored.form_id)?;
                Some(SelectionOption {
                    form_id: form.id.clone(),
                    title: form.title.clone(),
                    score: scored.score,
                    reasoning: scored.reasoning.clone(),
                    match_keywords: form.match_keywords.clone(),
                })
            })
            .take(max)
            .collect()
    }

    /// Enforce ordering: sort alternatives and promote the best one if it
    /// beats the candidate.
    fn normalize(mut self) -> Self {
        sort_by_score(&mut self.alternatives);
        let promote = match (&self.candidate, self.alternatives.first()) {
            (Some(c), Some(top)) => top.score > c.score,
            _ => false,
        };
        if promote {
            let top = self.alternatives.remove(0);
            if let Some(old) = self.candidate.replace(top) {
                self.alternatives.push(old);
                sort_by_score(&mut self.alternatives);
            }
        }
        self
    }
}

fn sort_by_score(forms: &mut [ScoredForm]) {
    forms.sort_by(|a, b| b.score.total_cmp(&a.score));
}

#[derive(Debug, Default, Deserialize)]
struct RawCandidate {
    #[serde(default)]
    form_id: Option<String>,
    #[serde(default, alias = "confidence")]
    confidence_score: Option<Value>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    matched_keywords: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPrediction {
    #[serde(default)]
    primary_prediction: Option<RawCandidate>,
    #[serde(default)]
    alternative_forms: Vec<RawCandidate>,
    #[serde(default)]
    requires_user_selection: bool,
}

fn score_value(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse().unwrap_or(0.0),
        _ => 0.0,
    };
    sanitize_score(raw)
}

fn scored(raw: RawCandidate, forms: &[AvailableForm]) -> Option<ScoredForm> {
    let form_id = raw.form_id?.trim().to_string();
    if form_id.is_empty() || form_id == "null" {
        return None;
    }
    if !forms.iter().any(|f| f.id == form_id) {
        tracing::warn!(form_id = %form_id, "model predicted a form the user cannot access");
        return None;
    }
    Some(ScoredForm {
        score: score_value(raw.confidence_score.as_ref()),
        form_id,
        reasoning: raw.reasoning.unwrap_or_default(),
        matched_keywords: raw.matched_keywords,
    })
}

/// Parse and normalize a model reply against the user's forms.
pub fn parse_prediction(reply: &str, forms: &[AvailableForm]) -> Result<Prediction, AgentError> {
    let raw: RawPrediction = parse_json_reply(reply)?;

    let candidate = raw.primary_prediction.and_then(|c| scored(c, forms));
    let mut alternatives: Vec<ScoredForm> = Vec::new();
    for alt in raw.alternative_forms {
        let Some(alt) = scored(alt, forms) else {
            continue;
        };
        let duplicate = candidate.as_ref().is_some_and(|c| c.form_id == alt.form_id)
            || alternatives.iter().any(|a| a.form_id == alt.form_id);
        if !duplicate {
            alternatives.push(alt);
        }
    }

    Ok(Prediction {
        candidate,
        alternatives,
        requires_user_selection: raw.requires_user_selection,
        source: PredictionSource::Model,
    }
    .normalize())
}

/// Deterministic ranking from title words and `match_keywords`.
///
/// Every form is ranked (forms with no overlap score 0), and scores are
/// capped below `threshold` so the result always goes through the menu.
pub fn keyword_ranking(message: &str, forms: &[AvailableForm], threshold: f64) -> Prediction {
    let tokens = Tokens::new(message);
    let cap = KEYWORD_SCORE_CAP.min(threshold - 0.05).max(0.0);

    let mut ranked: Vec<ScoredForm> = forms
        .iter()
        .map(|form| {
            let mut points = 0usize;
            let mut matched = Vec::new();
            for kw in &form.match_keywords {
                if tokens.has(kw) {
                    points += 2;
                    matched.push(kw.clone());
                }
            }
            for word in tokenize(&form.title) {
                if word.chars().count() >= 3
                    && !TITLE_STOPWORDS.contains(&word.as_str())
                    && tokens.has(&word)
                    && !matched.contains(&word)
                {
                    points += 1;
                    matched.push(word);
                }
            }
            let score = if points == 0 {
                0.0
            } else {
                cap * points as f64 / (points as f64 + 2.0)
            };
            let reasoning = if matched.is_empty() {
                "No keyword overlap with your request".to_string()
            } else {
                format!("Mentions {}", matched.join(", "))
            };
            ScoredForm {
                form_id: form.id.clone(),
                score,
                reasoning,
                matched_keywords: matched,
            }
        })
        .collect();
    sort_by_score(&mut ranked);

    let mut ranked = ranked.into_iter();
    Prediction {
        candidate: ranked.next(),
        alternatives: ranked.collect(),
        requires_user_selection: true,
        source: PredictionSource::KeywordFallback,
    }
}

fn format_forms_for_prompt(forms: &[AvailableForm]) -> String {
    forms
        .iter()
        .map(|f| {
            format!(
                "ID: {}\nTitle: {}\nContext: {}\nDescription: {}\nFields: {} ({} required)\nKeywords: {}",
                f.id,
                f.title,
                f.context_title,
                if f.description.is_empty() { "-" } else { &f.description },
                f.field_count,
                f.required_count,
                if f.match_keywords.is_empty() {
                    "-".to_string()
                } else {
                    f.match_keywords.join(", ")
                },
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Rank `forms` for `message`, falling back to keywords on any model failure
/// or when the model names no accessible form.
pub async fn predict(
    llm: &dyn LanguageModel,
    message: &str,
    forms: &[AvailableForm],
    threshold: f64,
) -> Prediction {
    let request = CompletionRequest::new(
        PREDICT_SYSTEM_PROMPT,
        format!(
            "User request: \"{message}\"\n\nAvailable forms:\n\n{}",
            format_forms_for_prompt(forms)
        ),
    )
    .json();

    let prediction = match llm.complete(request).await {
        Ok(reply) => parse_prediction(&reply, forms),
        Err(e) => Err(e.into()),
    };

    match prediction {
        Ok(p) if !p.ranked().is_empty() => {
            tracing::info!(
                form_id = p.candidate.as_ref().map(|c| c.form_id.as_str()).unwrap_or("-"),
                score = p.score(),
                alternatives = p.alternatives.len(),
                "form prediction"
            );
            p
        }
        Ok(_) => {
            tracing::warn!("model ranked no accessible forms, using keyword ranking");
            keyword_ranking(message, forms, threshold)
        }
        Err(e) => {
            tracing::warn!(error = %e, "form prediction failed, using keyword ranking");
            keyword_ranking(message, forms, threshold)
        }
    }
}

/// Whether the message asks for analysis rather than a form.
pub fn has_report_indicator(message: &str) -> bool {
    Tokens::new(message).has_any(REPORT_INDICATORS)
}

// ─── Rendering ──────────────────────────────────────────────────────────────

pub fn render_menu(scenario: &SelectionScenario) -> String {
    let mut out = String::from("I found a few forms that might match your request");
    if !scenario.original_message.trim().is_empty() {
        out.push_str(&format!(" (\"{}\")", scenario.original_message.trim()));
    }
    out.push_str(":\n");
    for (i, option) in scenario.options.iter().enumerate() {
        out.push_str(&format!(
            "\n{}. **{}** - {}",
            i + 1,
            option.title,
            describe(option.score)
        ));
        if !option.reasoning.is_empty() {
            out.push_str(&format!("\n   {}", option.reasoning));
        }
    }
    let count = scenario.options.len();
    out.push_str(&format!(
        "\n\nReply with a number (1-{count}), the form's name, or 'none' if none of these fit."
    ));
    out
}

/// Every available form, grouped by context.
pub fn render_form_list(forms: &[AvailableForm]) -> String {
    let mut out = String::new();
    let mut contexts: Vec<&str> = Vec::new();
    for form in forms {
        if !contexts.contains(&form.context_title.as_str()) {
            contexts.push(&form.context_title);
        }
    }
    for context in contexts {
        out.push_str(&format!("\n{context}:\n"));
        for form in forms.iter().filter(|f| f.context_title == context) {
            out.push_str(&format!(
                "  • {} ({} fields)\n",
                form.title, form.field_count
            ));
        }
    }
    out
}

// ─── Node ───────────────────────────────────────────────────────────────────

/// Where the graph goes after the predictor.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictorEdge {
    /// A form was assigned; the filler takes over.
    Filler,
    ReportGenerator,
    /// A question or menu was shown; the turn ends.
    End,
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictorStep {
    pub edge: PredictorEdge,
    pub response: Option<String>,
    pub confidence: Option<f64>,
}

impl PredictorStep {
    fn end(response: String) -> Self {
        Self {
            edge: PredictorEdge::End,
            response: Some(response),
            confidence: None,
        }
    }
}

/// The predictor node with its dependencies.
pub struct FormPredictor<'a> {
    pub llm: &'a dyn LanguageModel,
    pub repo: &'a dyn FormRepository,
    pub cache: &'a FormsCache,
    pub settings: &'a AssistantSettings,
}

impl FormPredictor<'_> {
    /// Forms the user can fill, through the cache.
    pub fn available_forms(&self, user_id: &str) -> Result<Vec<AvailableForm>, AgentError> {
        if let Some(forms) = self.cache.get(user_id) {
            tracing::debug!(user_id = %user_id, count = forms.len(), "forms cache hit");
            return Ok(forms);
        }
        let forms = self.repo.available_forms(user_id)?;
        if !forms.is_empty() {
            self.cache.put(user_id, forms.clone());
        }
        Ok(forms)
    }

    pub async fn run(&self, session: &mut Session, message: Option<&str>) -> Result<PredictorStep, AgentError> {
        if session.pending_selection.is_some() {
            return self.resolve_pending(session, message);
        }

        let message = message.map(str::trim).unwrap_or_default();

        if !message.is_empty() && has_report_indicator(message) {
            tracing::info!(session_id = %session.session_id, "redirecting to report generator");
            return Ok(PredictorStep {
                edge: PredictorEdge::ReportGenerator,
                response: None,
                confidence: None,
            });
        }

        let forms = self.available_forms(&session.user_id)?;
        if forms.is_empty() {
            return Ok(PredictorStep {
                edge: PredictorEdge::Error("no forms available".into()),
                response: None,
                confidence: Some(0.0),
            });
        }

        if message.is_empty() {
            return Ok(PredictorStep::end(format!(
                "Hi! I can help you fill out a form. These are the forms you can use:\n{}\nTell me what you need to do.",
                render_form_list(&forms)
            )));
        }

        let threshold = self.settings.confidence_threshold;
        let prediction = predict(self.llm, message, &forms, threshold).await;
        let decision = apply_gate(
            prediction.score(),
            prediction.candidate.is_some(),
            prediction.requires_user_selection,
            threshold,
        );

        match (decision, prediction.candidate.as_ref()) {
            (GateDecision::Accept, Some(candidate)) => {
                let title = title_of(&forms, &candidate.form_id);
                session.start_form(candidate.form_id.clone(), candidate.score);
                tracing::info!(
                    session_id = %session.session_id,
                    form_id = %candidate.form_id,
                    score = candidate.score,
                    "form accepted"
                );
                let mut response = format!(
                    "I found the right form for you: **{title}** (confidence {}).",
                    describe(candidate.score)
                );
                if !candidate.reasoning.is_empty() {
                    response.push_str(&format!("\nWhy: {}", candidate.reasoning));
                }
                Ok(PredictorStep {
                    edge: PredictorEdge::Filler,
                    response: Some(response),
                    confidence: Some(candidate.score),
                })
            }
            _ => self.clarify(session, message, &prediction, &forms),
        }
    }

    /// Low confidence: a yes/no question for a lone candidate, otherwise
    /// the alternative menu.
    fn clarify(
        &self,
        session: &mut Session,
        message: &str,
        prediction: &Prediction,
        forms: &[AvailableForm],
    ) -> Result<PredictorStep, AgentError> {
        let options = prediction.menu(forms, self.settings.max_alternatives);

        if let [only] = options.as_slice() {
            session.start_form(only.form_id.clone(), only.score);
            session.transition_to(SessionState::AwaitingFormConfirmation)?;
            return Ok(PredictorStep {
                edge: PredictorEdge::Filler,
                response: None,
                confidence: Some(only.score),
            });
        }

        if options.is_empty() {
            return Ok(PredictorStep {
                edge: PredictorEdge::Error("could not rank any form".into()),
                response: None,
                confidence: Some(0.0),
            });
        }

        let scenario = SelectionScenario {
            options,
            original_message: message.to_string(),
            attempts: 0,
            created_at: chrono::Utc::now(),
        };
        let response = render_menu(&scenario);
        tracing::info!(
            session_id = %session.session_id,
            options = scenario.options.len(),
            score = prediction.score(),
            "showing alternative menu"
        );
        session.pending_selection = Some(scenario);
        Ok(PredictorStep {
            edge: PredictorEdge::End,
            response: Some(response),
            confidence: Some(prediction.score()),
        })
    }

    fn resolve_pending(
        &self,
        session: &mut Session,
        message: Option<&str>,
    ) -> Result<PredictorStep, AgentError> {
        let Some(mut scenario) = session.pending_selection.take() else {
            return Ok(PredictorStep::end(String::new()));
        };
        let Some(message) = message.map(str::trim).filter(|m| !m.is_empty()) else {
            let response = render_menu(&scenario);
            session.pending_selection = Some(scenario);
            return Ok(PredictorStep::end(response));
        };

        let outcome = resolve_selection(message, &scenario.options);
        tracing::info!(
            session_id = %session.session_id,
            outcome = outcome.as_str(),
            attempts = scenario.attempts,
            "menu answer"
        );

        let hint = match outcome {
            SelectionOutcome::Selected(option) => {
                session.start_form(option.form_id.clone(), 1.0);
                return Ok(PredictorStep {
                    edge: PredictorEdge::Filler,
                    response: Some(format!("Great, let's fill out **{}**.", option.title)),
                    confidence: Some(1.0),
                });
            }
            SelectionOutcome::RejectedAll => {
                return Ok(PredictorStep::end(
                    "Understood, none of those fit. Could you describe in more detail what you need to do?"
                        .to_string(),
                ));
            }
            SelectionOutcome::InvalidSelection { choice } => format!(
                "Option {choice} isn't available. Please choose a number between 1 and {}.",
                scenario.options.len()
            ),
            SelectionOutcome::Unclear => "I didn't catch your choice.".to_string(),
        };

        scenario.attempts += 1;
        if scenario.attempts >= self.settings.max_clarification_retries {
            tracing::warn!(
                session_id = %session.session_id,
                attempts = scenario.attempts,
                "giving up on alternative menu"
            );
            let forms = self.available_forms(&session.user_id)?;
            session.fail();
            return Ok(PredictorStep::end(format!(
                "I still couldn't tell which form you need. These are all the forms you can fill:\n{}\nPlease describe what you need to do and I'll find the right one.",
                render_form_list(&forms)
            )));
        }

        let response = format!("{hint}\n\n{}", render_menu(&scenario));
        session.pending_selection = Some(scenario);
        Ok(PredictorStep::end(response))
    }
}

fn title_of(forms: &[AvailableForm], form_id: &str) -> String {
    forms
        .iter()
        .find(|f| f.id == form_id)
        .map(|f| f.title.clone())
        .unwrap_or_else(|| form_id.to_string())
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agent_core::forms::AccessLevel;
    use crate::inference::scripted::ScriptedModel;

    pub(crate) fn available(id: &str, title: &str, keywords: &[&str]) -> AvailableForm {
        AvailableForm {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            match_keywords: keywords.iter().map(|s| s.to_string()).collect(),
            context_id: "c1".into(),
            context_title: "Office".into(),
            access_level: AccessLevel::User,
            field_count: 3,
            required_count: 2,
        }
    }

    fn forms() -> Vec<AvailableForm> {
        vec![
            available("expense", "Expense Claim", &["receipt", "reimbursement"]),
            available("leave", "Leave Request", &["vacation", "holiday"]),
            available("incident", "Incident Report", &["accident", "injury"]),
            available("feedback", "Customer Feedback", &["complaint"]),
        ]
    }

    fn reply(primary: (&str, f64), alts: &[(&str, f64)], requires: bool) -> String {
        let alts: Vec<String> = alts
            .iter()
            .map(|(id, s)| format!(r#"{{"form_id":"{id}","confidence_score":{s},"reasoning":"alt"}}"#))
            .collect();
        format!(
            r#"```json
{{"primary_prediction":{{"form_id":"{}","confidence_score":{},"reasoning":"best","matched_keywords":[]}},
"alternative_forms":[{}],"requires_user_selection":{requires}}}
```"#,
            primary.0,
            primary.1,
            alts.join(",")
        )
    }

    #[test]
    fn test_parse_prediction_sorts_and_filters() {
        let text = reply(
            ("expense", 0.6),
            &[("leave", 0.2), ("ghost", 0.9), ("incident", 0.5), ("expense", 0.1)],
            false,
        );
        let p = parse_prediction(&text, &forms()).unwrap();
        assert_eq!(p.candidate.as_ref().unwrap().form_id, "expense");
        let ids: Vec<&str> = p.alternatives.iter().map(|a| a.form_id.as_str()).collect();
        assert_eq!(ids, vec!["incident", "leave"]);
    }

    #[test]
    fn test_parse_prediction_promotes_higher_alternative() {
        let text = reply(("expense", 0.4), &[("leave", 0.8)], false);
        let p = parse_prediction(&text, &forms()).unwrap();
        assert_eq!(p.candidate.as_ref().unwrap().form_id, "leave");
        assert_eq!(p.alternatives[0].form_id, "expense");
    }

    #[test]
    fn test_parse_prediction_unknown_candidate_scores_zero() {
        let text = reply(("ghost", 0.95), &[("leave", 0.3)], false);
        let p = parse_prediction(&text, &forms()).unwrap();
        assert!(p.candidate.is_none());
        assert_eq!(p.score(), 0.0);
        assert_eq!(p.alternatives.len(), 1);
    }

    #[test]
    fn test_parse_prediction_sanitizes_scores() {
        let text = r#"{"primary_prediction":{"form_id":"leave","confidence_score":"85%"},
                       "alternative_forms":[{"form_id":"expense","confidence":7}]}"#;
        let p = parse_prediction(text, &forms()).unwrap();
        assert_eq!(p.score(), 0.0);
        assert_eq!(p.alternatives[0].score, 0.0);
    }

    #[test]
    fn test_keyword_ranking_stays_below_threshold() {
        let p = keyword_ranking("I need reimbursement for a receipt from my expense", &forms(), 0.7);
        let c = p.candidate.as_ref().unwrap();
        assert_eq!(c.form_id, "expense");
        assert!(c.score > 0.0 && c.score < 0.7);
        assert!(p.requires_user_selection);
        assert_eq!(p.ranked().len(), 4);
        let scores: Vec<f64> = p.ranked().iter().map(|s| s.score).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_menu_is_capped_and_sorted() {
        let text = reply(
            ("expense", 0.5),
            &[("leave", 0.2), ("incident", 0.45), ("feedback", 0.3)],
            false,
        );
        let p = parse_prediction(&text, &forms()).unwrap();
        let menu = p.menu(&forms(), 3);
        let ids: Vec<&str> = menu.iter().map(|o| o.form_id.as_str()).collect();
        assert_eq!(ids, vec!["expense", "incident", "feedback"]);
    }

    #[test]
    fn test_report_indicator() {
        assert!(has_report_indicator("show me the trend of incidents"));
        assert!(has_report_indicator("quero uma análise"));
        assert!(!has_report_indicator("I need to file an incident report"));
    }

    #[test]
    fn test_render_menu_numbers_options() {
        let scenario = SelectionScenario {
            options: keyword_ranking("holiday", &forms(), 0.7).menu(&forms(), 3),
            original_message: "holiday".into(),
            attempts: 0,
            created_at: chrono::Utc::now(),
        };
        let text = render_menu(&scenario);
        assert!(text.contains("1. **Leave Request**"));
        assert!(text.contains("3. **"));
        assert!(!text.contains("4. **"));
    }

    #[tokio::test]
    async fn test_predict_falls_back_on_model_error() {
        let llm = ScriptedModel::new();
        let p = predict(&llm, "holiday next week", &forms(), 0.7).await;
        assert_eq!(p.source, PredictionSource::KeywordFallback);
        assert_eq!(p.candidate.unwrap().form_id, "leave");
    }

    #[tokio::test]
    async fn test_predict_falls_back_on_garbage() {
        let llm = ScriptedModel::with_replies(["I think it's the leave form"]);
        let p = predict(&llm, "holiday", &forms(), 0.7).await;
        assert_eq!(p.source, PredictionSource::KeywordFallback);
        assert!(llm.last_prompt().unwrap().json_mode);
    }
}
