//! Form filling: one field at a time, then a confirmation summary.
//!
//! The filler owns the IN_PROGRESS, AWAITING_FORM_CONFIRMATION and
//! CONFIRMATION states. It never persists anything itself; a confirmed
//! summary is handed back as [`FillerStep::Finalize`].

use std::collections::BTreeMap;

use serde_json::Value;

use super::confidence::describe;
use super::confirmation::{
    classify_confirmation, classify_form_confirmation, ConfirmationIntent, FormConfirmation,
};
use super::errors::AgentError;
use super::forms::{FieldType, FormField, FormTemplate};
use super::keywords::Tokens;
use super::reply_parser::parse_json_reply;
use super::types::{FieldAnswer, Session, SessionState};
use super::validation::{validate_answer, ValidationError};
use crate::config::AssistantSettings;
use crate::inference::{CompletionRequest, LanguageModel};

const HELP_COMMANDS: &[&str] = &["help", "commands", "options"];
const SKIP_COMMANDS: &[&str] = &["skip", "none", "n/a", "not applicable"];
const CANCEL_COMMANDS: &[&str] = &["cancel", "cancelar"];
const SUMMARY_COMMANDS: &[&str] = &["summary", "review", "what did i answer"];
const CHANGE_KEYWORDS: &[&str] = &["change", "modify", "update"];

const PROGRESS_WIDTH: usize = 20;

const HELP_TEXT: &str = "Here's what you can do while filling a form:
  • Just answer the question; I'll check the format for you.
  • 'skip' or 'none' leaves an optional field blank.
  • 'summary' or 'review' shows what you've answered so far.
  • 'change <field>' lets you correct an earlier answer.
  • 'cancel' stops without submitting anything.";

const EXTRACT_SYSTEM_PROMPT: &str = r#"You extract form answers from a user's message.

You receive the message and the form fields that still need answers. Return a
JSON object mapping field_id to the value stated in the message, for example
{"full_name": "Ana Souza", "start_date": "2024-03-15"}.

Rules:
- Only include values the user actually stated. Never invent information.
- For select fields use one of the listed options.
- For yes/no fields use "yes" or "no". Dates use YYYY-MM-DD.
- Return {} if nothing matches."#;

const CHANGE_FIELD_SYSTEM_PROMPT: &str = r#"The user wants to change one of their form answers.
Reply with ONLY the field_id they mean, or UNCLEAR if you cannot tell."#;

/// What the filler wants the graph to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum FillerStep {
    Reply(String),
    /// The user confirmed the summary.
    Finalize,
}

// ─── Field priority ─────────────────────────────────────────────────────────

/// Next field to ask, by priority: the first unanswered required field,
/// then the first unanswered field whose dependency is answered, then the
/// first unanswered field. Skipped fields count as answered.
pub fn next_field<'t>(
    template: &'t FormTemplate,
    responses: &BTreeMap<String, FieldAnswer>,
) -> Option<&'t FormField> {
    let unanswered = || {
        template
            .fields
            .iter()
            .filter(|f| !responses.contains_key(&f.field_id))
    };
    unanswered()
        .find(|f| f.required)
        .or_else(|| {
            unanswered().find(|f| {
                f.depends_on
                    .as_ref()
                    .is_some_and(|dep| responses.contains_key(dep))
            })
        })
        .or_else(|| unanswered().next())
}

/// First unanswered required field.
pub fn next_required_field<'t>(
    template: &'t FormTemplate,
    responses: &BTreeMap<String, FieldAnswer>,
) -> Option<&'t FormField> {
    template
        .fields
        .iter()
        .find(|f| f.required && !responses.contains_key(&f.field_id))
}

// ─── Rendering ──────────────────────────────────────────────────────────────

/// `██████░░░░░░░░░░░░░░ 30%`
pub fn progress_bar(completed: usize, total: usize) -> String {
    if total == 0 {
        return format!("{} 100%", "█".repeat(PROGRESS_WIDTH));
    }
    let completed = completed.min(total);
    let filled = PROGRESS_WIDTH * completed / total;
    format!(
        "{}{} {}%",
        "█".repeat(filled),
        "░".repeat(PROGRESS_WIDTH - filled),
        100 * completed / total
    )
}

fn progress_line(template: &FormTemplate, session: &Session) -> String {
    let total = template.fields.len();
    let answered = template
        .fields
        .iter()
        .filter(|f| session.responses.contains_key(&f.field_id))
        .count();
    format!(
        "Progress: {} ({answered}/{total})",
        progress_bar(answered, total)
    )
}

/// The question for one field, with format hints.
pub fn field_prompt(field: &FormField) -> String {
    let mut out = format!("**{}**", field.label);
    out.push_str(if field.required {
        " (required)"
    } else {
        " (optional, type 'skip' to leave it blank)"
    });
    if let Some(help) = field.help_text.as_deref().filter(|h| !h.is_empty()) {
        out.push_str(&format!("\n{help}"));
    }
    let hint = match field.field_type {
        FieldType::Email => Some("e.g. user@example.com".to_string()),
        FieldType::Phone => Some("e.g. +1 555 123 4567".to_string()),
        FieldType::Date => Some("format YYYY-MM-DD".to_string()),
        FieldType::Number => Some("a number".to_string()),
        FieldType::Currency => Some("an amount, e.g. 1,250.00".to_string()),
        FieldType::Url => Some("a link starting with https://".to_string()),
        FieldType::Boolean => Some("yes or no".to_string()),
        FieldType::Select if !field.options.is_empty() => {
            Some(format!("options: {}", field.options.join(", ")))
        }
        FieldType::Multiselect if !field.options.is_empty() => Some(format!(
            "choose one or more, separated by commas: {}",
            field.options.join(", ")
        )),
        _ => None,
    };
    if let Some(hint) = hint {
        out.push_str(&format!("\n({hint})"));
    }
    out
}

/// Answers so far, missing required fields and counts.
pub fn render_summary(template: &FormTemplate, responses: &BTreeMap<String, FieldAnswer>) -> String {
    let mut out = format!("**{}**", template.title);
    let mut missing_required = Vec::new();
    let mut missing_optional = 0usize;
    let mut answered = 0usize;

    for field in &template.fields {
        match responses.get(&field.field_id) {
            Some(answer) => {
                answered += 1;
                let marker = if field.required { "*" } else { "" };
                out.push_str(&format!("\n  • {}{marker}: {}", field.label, answer.display()));
            }
            None if field.required => missing_required.push(field.label.as_str()),
            None => missing_optional += 1,
        }
    }
    if answered == 0 {
        out.push_str("\n  (no answers yet)");
    }
    if !missing_required.is_empty() {
        out.push_str(&format!(
            "\nStill required: {}",
            missing_required.join(", ")
        ));
    }
    if missing_optional > 0 {
        out.push_str(&format!("\nOptional fields left blank: {missing_optional}"));
    }
    let required_total = template.required_count();
    out.push_str(&format!(
        "\n{answered}/{} fields answered, {}/{required_total} required",
        template.fields.len(),
        required_total - missing_required.len()
    ));
    out
}

fn ready_to_submit(template: &FormTemplate, session: &Session) -> String {
    format!(
        "All done! Here's what you entered:\n\n{}\n\nReady to submit? Reply 'yes' to submit, 'no' to make changes, or 'review' to see it again.",
        render_summary(template, &session.responses)
    )
}

fn welcome(template: &FormTemplate) -> String {
    let mut out = format!("Let's fill out **{}**.", template.title);
    if !template.description.is_empty() {
        out.push_str(&format!("\n{}", template.description));
    }
    let total = template.fields.len();
    let required = template.required_count();
    out.push_str(&format!(
        "\nThis form has {total} field{}, {required} of them required. Type 'help' at any time for options.",
        if total == 1 { "" } else { "s" }
    ));
    out
}

fn form_question(template: &FormTemplate, confidence: f64) -> String {
    let mut out = format!(
        "I think you want to fill out **{}** (confidence {}).",
        template.title,
        describe(confidence)
    );
    if !template.description.is_empty() {
        out.push_str(&format!("\n{}", template.description));
    }
    out.push_str(&format!(
        "\nIt has {} fields, {} required.\n\nIs this the right form? Reply 'yes' to start or 'no' to look for another one.",
        template.fields.len(),
        template.required_count()
    ));
    out
}

/// Find a field named in `message` by label or id. Longest label wins so
/// "last name" beats "name".
pub fn resolve_field_reference<'t>(template: &'t FormTemplate, message: &str) -> Option<&'t FormField> {
    let tokens = Tokens::new(message);
    template
        .fields
        .iter()
        .filter(|f| tokens.has(&f.label) || tokens.has(&f.field_id.replace('_', " ")))
        .max_by_key(|f| f.label.chars().count())
}

fn value_to_answer(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "yes" } else { "no" }.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_to_answer).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        _ => None,
    }
}

fn validation_reply(field: &FormField, error: &ValidationError) -> String {
    let mut out = format!("There's a problem with {}: {}", field.label, error.message);
    for suggestion in &error.suggestions {
        out.push_str(&format!("\n  {suggestion}"));
    }
    out.push_str(&format!("\n\nPlease try again:\n{}", field_prompt(field)));
    out
}

// ─── Node ───────────────────────────────────────────────────────────────────

/// The filler node with its dependencies.
pub struct FormFiller<'a> {
    pub llm: &'a dyn LanguageModel,
    pub settings: &'a AssistantSettings,
}

impl FormFiller<'_> {
    pub async fn run(
        &self,
        session: &mut Session,
        template: &FormTemplate,
        message: Option<&str>,
    ) -> Result<FillerStep, AgentError> {
        if !session.form_started {
            return self.start(session, template).map(FillerStep::Reply);
        }
        let message = message.map(str::trim).unwrap_or_default();

        match session.state {
            SessionState::AwaitingFormConfirmation => self
                .handle_form_confirmation(session, template, message)
                .map(FillerStep::Reply),
            SessionState::Confirmation => self.handle_confirmation(session, template, message),
            SessionState::InProgress => self
                .handle_answer(session, template, message)
                .await
                .map(FillerStep::Reply),
            _ => {
                session.form_started = false;
                self.start(session, template).map(FillerStep::Reply)
            }
        }
    }

    /// Introduce the form: ask for confirmation when it was assigned with
    /// low confidence, otherwise welcome and ask the first question.
    fn start(&self, session: &mut Session, template: &FormTemplate) -> Result<String, AgentError> {
        session.form_started = true;
        let confidence = session.prediction_confidence.unwrap_or(1.0);
        if session.state == SessionState::AwaitingFormConfirmation
            || confidence < self.settings.confidence_threshold
        {
            session.transition_to(SessionState::AwaitingFormConfirmation)?;
            return Ok(form_question(template, confidence));
        }
        tracing::info!(
            session_id = %session.session_id,
            form_id = %template.id,
            fields = template.fields.len(),
            "starting form"
        );
        let next = self.advance(session, template)?;
        Ok(format!("{}\n\n{next}", welcome(template)))
    }

    /// Move to the next pending field, or to CONFIRMATION when none remain.
    fn advance(&self, session: &mut Session, template: &FormTemplate) -> Result<String, AgentError> {
        let include_optional = self.settings.ask_optional_fields || session.editing;
        let next = if include_optional {
            next_field(template, &session.responses)
        } else {
            next_required_field(template, &session.responses)
        };
        match next {
            Some(field) => {
                session.transition_to(SessionState::InProgress)?;
                session.current_field = Some(field.field_id.clone());
                Ok(format!("Next question:\n{}", field_prompt(field)))
            }
            None => {
                session.transition_to(SessionState::Confirmation)?;
                session.current_field = None;
                session.editing = false;
                tracing::info!(session_id = %session.session_id, "all fields answered, awaiting confirmation");
                Ok(ready_to_submit(template, session))
            }
        }
    }

    fn handle_form_confirmation(
        &self,
        session: &mut Session,
        template: &FormTemplate,
        message: &str,
    ) -> Result<String, AgentError> {
        match classify_form_confirmation(message) {
            FormConfirmation::Yes => {
                session.prediction_confidence = Some(1.0);
                let next = self.advance(session, template)?;
                Ok(format!("{}\n\n{next}", welcome(template)))
            }
            FormConfirmation::No => {
                tracing::info!(session_id = %session.session_id, form_id = %template.id, "user rejected predicted form");
                session.fail();
                Ok("No problem. Tell me a bit more about what you need: what the form is for, and any names or keywords you remember. I'll look again.".to_string())
            }
            FormConfirmation::Unclear => Ok(format!(
                "I need a clear answer to continue. Is **{}** the right form? Reply 'yes' or 'no'.",
                template.title
            )),
        }
    }

    fn handle_confirmation(
        &self,
        session: &mut Session,
        template: &FormTemplate,
        message: &str,
    ) -> Result<FillerStep, AgentError> {
        let intent = classify_confirmation(message);
        tracing::debug!(session_id = %session.session_id, intent = intent.as_str(), "confirmation reply");
        let reply = match intent {
            ConfirmationIntent::Confirm => return Ok(FillerStep::Finalize),
            ConfirmationIntent::Review => format!(
                "{}\n\nReady to submit? Reply 'yes' to submit or 'no' to make changes.",
                render_summary(template, &session.responses)
            ),
            ConfirmationIntent::Reject => {
                session.transition_to(SessionState::InProgress)?;
                session.editing = true;
                match next_field(template, &session.responses) {
                    Some(field) => {
                        session.current_field = Some(field.field_id.clone());
                        format!(
                            "Sure. Let's go through the remaining fields first, then you can change anything else.\n\n{}",
                            field_prompt(field)
                        )
                    }
                    None => {
                        session.current_field = None;
                        format!(
                            "Sure. Which field would you like to change?\n\n{}",
                            render_summary(template, &session.responses)
                        )
                    }
                }
            }
            ConfirmationIntent::Unclear => "I didn't quite get that. You can:\n  • reply 'yes' or 'submit' to send the form\n  • reply 'no' or 'change' to edit an answer\n  • reply 'review' to see your answers again".to_string(),
        };
        Ok(FillerStep::Reply(reply))
    }

    async fn handle_answer(
        &self,
        session: &mut Session,
        template: &FormTemplate,
        message: &str,
    ) -> Result<String, AgentError> {
        let current = session
            .current_field
            .as_deref()
            .and_then(|id| template.field(id));

        if message.is_empty() {
            return match current {
                Some(field) => Ok(field_prompt(field)),
                None => self.advance(session, template),
            };
        }

        let command = message.to_lowercase();
        if HELP_COMMANDS.contains(&command.as_str()) {
            let question = current.map(field_prompt).unwrap_or_default();
            return Ok(format!("{HELP_TEXT}\n\n{question}").trim_end().to_string());
        }
        if SKIP_COMMANDS.contains(&command.as_str()) {
            return self.skip(session, template);
        }
        if CANCEL_COMMANDS.contains(&command.as_str()) {
            session.transition_to(SessionState::Cancelled)?;
            session.clear_form();
            tracing::info!(session_id = %session.session_id, form_id = %template.id, "form cancelled");
            return Ok("Form cancelled. Nothing was submitted. Let me know if you need another form.".to_string());
        }
        if SUMMARY_COMMANDS.contains(&command.as_str()) {
            let question = current.map(field_prompt).unwrap_or_default();
            return Ok(format!(
                "{}\n\nLet's continue:\n{question}",
                render_summary(template, &session.responses)
            ));
        }
        if Tokens::new(message).has_any(CHANGE_KEYWORDS) {
            return self.change_request(session, template, message).await;
        }

        let Some(field) = current else {
            // Editing with nothing pending: the message names a field.
            return self.change_request(session, template, message).await;
        };

        let mut acknowledgements = Vec::new();
        let mut current_extracted = false;
        if self.settings.multi_field_extraction {
            for (field_id, value) in self.extract_fields(session, template, message).await {
                let Some(target) = template.field(&field_id) else {
                    continue;
                };
                match validate_answer(target, &value) {
                    Ok(valid) if !valid.value.is_empty() => {
                        acknowledgements.push(format!("Saved {}: {}", target.label, valid.value));
                        session
                            .responses
                            .insert(field_id.clone(), FieldAnswer::Value(valid.value));
                        current_extracted |= field_id == field.field_id;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!(field_id = %field_id, error = %e, "extracted value rejected"),
                }
            }
        }

        if !current_extracted {
            match validate_answer(field, message) {
                Ok(valid) => {
                    let answer = if valid.value.is_empty() {
                        acknowledgements.push(format!("Skipped {}", field.label));
                        FieldAnswer::Skipped
                    } else {
                        acknowledgements.push(format!("Saved {}: {}", field.label, valid.value));
                        FieldAnswer::Value(valid.value)
                    };
                    if let Some(warning) = valid.warning {
                        acknowledgements.push(warning);
                    }
                    session.responses.insert(field.field_id.clone(), answer);
                }
                Err(e) => {
                    tracing::debug!(
                        session_id = %session.session_id,
                        field_id = %field.field_id,
                        error = %e,
                        "answer rejected"
                    );
                    let retry = validation_reply(field, &e);
                    if acknowledgements.is_empty() {
                        return Ok(retry);
                    }
                    return Ok(format!("{}\n\n{retry}", acknowledgements.join("\n")));
                }
            }
        }

        let next = self.advance(session, template)?;
        Ok(format!(
            "{}\n{}\n\n{next}",
            acknowledgements.join("\n"),
            progress_line(template, session)
        ))
    }

    fn skip(&self, session: &mut Session, template: &FormTemplate) -> Result<String, AgentError> {
        let Some(field) = session
            .current_field
            .as_deref()
            .and_then(|id| template.field(id))
        else {
            return self.advance(session, template);
        };
        if field.required {
            return Ok(format!(
                "{} is required and can't be skipped.\n\n{}",
                field.label,
                field_prompt(field)
            ));
        }
        session
            .responses
            .insert(field.field_id.clone(), FieldAnswer::Skipped);
        let label = field.label.clone();
        let next = self.advance(session, template)?;
        Ok(format!(
            "Skipped {label}.\n{}\n\n{next}",
            progress_line(template, session)
        ))
    }

    async fn change_request(
        &self,
        session: &mut Session,
        template: &FormTemplate,
        message: &str,
    ) -> Result<String, AgentError> {
        let field = match resolve_field_reference(template, message) {
            Some(field) => Some(field),
            None => self.llm_field_reference(session, template, message).await,
        };
        let Some(field) = field else {
            return Ok(format!(
                "I'm not sure which field you'd like to change. Please tell me its name.\n\n{}",
                render_summary(template, &session.responses)
            ));
        };
        session.transition_to(SessionState::InProgress)?;
        session.current_field = Some(field.field_id.clone());
        let current = session
            .responses
            .get(&field.field_id)
            .map(FieldAnswer::display)
            .unwrap_or("(not answered yet)");
        Ok(format!(
            "Updating {}. Current value: {current}\n\n{}",
            field.label,
            field_prompt(field)
        ))
    }

    async fn llm_field_reference<'t>(
        &self,
        session: &Session,
        template: &'t FormTemplate,
        message: &str,
    ) -> Option<&'t FormField> {
        if template.fields.is_empty() {
            return None;
        }
        let fields: Vec<String> = template
            .fields
            .iter()
            .map(|f| {
                let value = session
                    .responses
                    .get(&f.field_id)
                    .map(FieldAnswer::display)
                    .unwrap_or("(not answered)");
                format!("- {} (id: {}): {value}", f.label, f.field_id)
            })
            .collect();
        let request = CompletionRequest::new(
            CHANGE_FIELD_SYSTEM_PROMPT,
            format!(
                "Fields:\n{}\n\nUser's request: \"{message}\"",
                fields.join("\n")
            ),
        );
        match self.llm.complete(request).await {
            Ok(reply) => {
                let id = reply.trim().trim_matches(|c: char| c == '"' || c == '`' || c == '.');
                template.field(id)
            }
            Err(e) => {
                tracing::warn!(error = %e, "field reference lookup failed");
                None
            }
        }
    }

    /// Ask the model for answers to unanswered fields. Failures yield
    /// nothing.
    async fn extract_fields(
        &self,
        session: &Session,
        template: &FormTemplate,
        message: &str,
    ) -> Vec<(String, String)> {
        let pending: Vec<&FormField> = template
            .fields
            .iter()
            .filter(|f| !session.responses.contains_key(&f.field_id))
            .collect();
        if pending.is_empty() {
            return Vec::new();
        }
        let listing: Vec<String> = pending
            .iter()
            .map(|f| {
                let mut line = format!("- {}: {} [{}]", f.field_id, f.label, f.field_type.as_str());
                if !f.options.is_empty() {
                    line.push_str(&format!(" options: {}", f.options.join(", ")));
                }
                line
            })
            .collect();
        let request = CompletionRequest::new(
            EXTRACT_SYSTEM_PROMPT,
            format!(
                "Message: \"{message}\"\n\nFields still needed:\n{}",
                listing.join("\n")
            ),
        )
        .json();

        let reply = match self.llm.complete(request).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!(error = %e, "field extraction skipped");
                return Vec::new();
            }
        };
        let Ok(map) = parse_json_reply::<serde_json::Map<String, Value>>(&reply) else {
            return Vec::new();
        };
        let extracted: Vec<(String, String)> = pending
            .iter()
            .filter_map(|f| {
                let value = value_to_answer(map.get(&f.field_id)?)?;
                Some((f.field_id.clone(), value))
            })
            .collect();
        if !extracted.is_empty() {
            tracing::info!(
                session_id = %session.session_id,
                count = extracted.len(),
                "extracted answers from message"
            );
        }
        extracted
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
