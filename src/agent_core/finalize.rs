//! Finalization: turn a confirmed session into a stored response record.
//!
//! Persistence is best-effort. When the document store refuses the record
//! the session still completes and the user gets a `fallback_...` reference.

use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};

use super::errors::AgentError;
use super::forms::{
    FieldType, FormField, FormResponseRecord, FormTemplate, ResponseMetadata, ResponseStatus,
};
use super::forms_cache::FormsCache;
use super::store::FormRepository;
use super::types::{FieldAnswer, Session, SessionState};

/// Field counts behind the completion percentages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionStats {
    pub total_fields: usize,
    pub completed_fields: usize,
    pub required_fields: usize,
    pub completed_required_fields: usize,
}

impl CompletionStats {
    /// Skipped answers do not count as completed.
    pub fn compute(template: &FormTemplate, session: &Session) -> Self {
        let answered = |f: &&FormField| {
            session
                .responses
                .get(&f.field_id)
                .and_then(FieldAnswer::as_value)
                .is_some()
        };
        Self {
            total_fields: template.fields.len(),
            completed_fields: template.fields.iter().filter(answered).count(),
            required_fields: template.required_count(),
            completed_required_fields: template
                .fields
                .iter()
                .filter(|f| f.required)
                .filter(answered)
                .count(),
        }
    }

    pub fn completion_percentage(&self) -> f64 {
        percentage(self.completed_fields, self.total_fields)
    }

    /// 100 when the form has no required fields.
    pub fn required_completion_percentage(&self) -> f64 {
        percentage(self.completed_required_fields, self.required_fields)
    }

    pub fn status(&self) -> ResponseStatus {
        if self.completed_required_fields >= self.required_fields {
            ResponseStatus::Complete
        } else {
            ResponseStatus::Partial
        }
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        100.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// JSON value stored for one answer.
pub fn typed_value(field: &FormField, answer: &FieldAnswer) -> Value {
    let FieldAnswer::Value(raw) = answer else {
        return Value::Null;
    };
    match field.field_type {
        FieldType::Number | FieldType::Currency => parse_number(raw)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.clone())),
        FieldType::Boolean => match raw.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw.clone()),
        },
        FieldType::Multiselect => Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect(),
        ),
        _ => Value::String(raw.clone()),
    }
}

fn parse_number(raw: &str) -> Option<Number> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '€' | '£' | '¥') && !c.is_whitespace())
        .collect();
    if let Ok(i) = cleaned.parse::<i64>() {
        return Some(Number::from(i));
    }
    cleaned.parse::<f64>().ok().and_then(Number::from_f64)
}

/// Build the record for the session's current form. Does not mutate.
pub fn build_record(template: &FormTemplate, session: &Session, now: DateTime<Utc>) -> FormResponseRecord {
    let stats = CompletionStats::compute(template, session);
    let responses: Map<String, Value> = template
        .fields
        .iter()
        .filter_map(|f| {
            let answer = session.responses.get(&f.field_id)?;
            Some((f.field_id.clone(), typed_value(f, answer)))
        })
        .collect();

    FormResponseRecord {
        id: uuid::Uuid::new_v4().to_string(),
        form_template_id: template.id.clone(),
        context_id: template.context_id.clone(),
        respondent_id: session.user_id.clone(),
        session_id: session.session_id.clone(),
        responses,
        status: stats.status(),
        completion_percentage: stats.completion_percentage(),
        required_completion_percentage: stats.required_completion_percentage(),
        submitted_at: now,
        metadata: ResponseMetadata {
            total_fields: stats.total_fields,
            completed_fields: stats.completed_fields,
            required_fields: stats.required_fields,
            completed_required_fields: stats.completed_required_fields,
            conversation_turns: session.user_turns(),
        },
    }
}

/// `fallback_{unix_seconds}_{first 8 chars of session id}`
pub fn fallback_reference(session_id: &str, now: DateTime<Utc>) -> String {
    let prefix: String = session_id.chars().take(8).collect();
    format!("fallback_{}_{prefix}", now.timestamp())
}

/// Result of a finalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub reference_id: String,
    /// False when the fallback reference was used.
    pub persisted: bool,
    pub message: String,
}

/// Complete the session's form: persist the record, invalidate the user's
/// forms cache and reset per-form progress.
pub fn finalize(
    session: &mut Session,
    template: &FormTemplate,
    repo: &dyn FormRepository,
    cache: &FormsCache,
    now: DateTime<Utc>,
) -> Result<Submission, AgentError> {
    // Only a confirmed summary can be submitted, and only once.
    if session.state != SessionState::Confirmation || session.form_id.is_none() {
        return Err(AgentError::InvalidTransition {
            from: session.state,
            to: SessionState::Completed,
        });
    }
    let record = build_record(template, session, now);
    session.transition_to(SessionState::Completed)?;
    session.completed_at = Some(now);

    let (reference_id, persisted) = match repo.insert_response(&record) {
        Ok(id) => (id, true),
        Err(e) => {
            let fallback = fallback_reference(&session.session_id, now);
            tracing::error!(
                session_id = %session.session_id,
                form_id = %template.id,
                error = %e,
                reference = %fallback,
                "failed to persist form response, using fallback reference"
            );
            (fallback, false)
        }
    };

    cache.invalidate(&session.user_id);
    session.clear_form();
    session.last_submission_id = Some(reference_id.clone());

    tracing::info!(
        session_id = %session.session_id,
        form_id = %template.id,
        reference = %reference_id,
        status = record.status.as_str(),
        completion = record.completion_percentage,
        "form submitted"
    );

    let mut message = format!(
        "Your **{}** has been submitted. Reference: {reference_id}\n{} of {} fields completed ({:.0}%).",
        template.title,
        record.metadata.completed_fields,
        record.metadata.total_fields,
        record.completion_percentage
    );
    if record.status == ResponseStatus::Partial {
        message.push_str("\nSome required fields were left empty, so it was saved as partial.");
    }
    message.push_str("\n\nIs there anything else I can help you with?");

    Ok(Submission {
        reference_id,
        persisted,
        message,
    })
}
