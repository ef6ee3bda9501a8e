//! Form templates, access contexts, and persisted response records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Templates ──────────────────────────────────────────────────────────────

/// Input type of a form field; drives validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Text,
    Textarea,
    Email,
    Phone,
    Number,
    Currency,
    Date,
    Url,
    Select,
    Multiselect,
    Boolean,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Textarea => "textarea",
            FieldType::Email => "email",
            FieldType::Phone => "phone",
            FieldType::Number => "number",
            FieldType::Currency => "currency",
            FieldType::Date => "date",
            FieldType::Url => "url",
            FieldType::Select => "select",
            FieldType::Multiselect => "multiselect",
            FieldType::Boolean => "boolean",
        }
    }
}

/// One question in a form template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub field_id: String,
    pub label: String,
    #[serde(default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Choices for select/multiselect.
    #[serde(default)]
    pub options: Vec<String>,
    /// Field that must be answered before this one is asked.
    #[serde(default)]
    pub depends_on: Option<String>,
    /// Regex the (text) answer must match.
    #[serde(default)]
    pub validation_pattern: Option<String>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub help_text: Option<String>,
}

/// A fillable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormTemplate {
    pub id: String,
    pub context_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Words that suggest this form when they appear in a request.
    #[serde(default)]
    pub match_keywords: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FormField>,
    #[serde(default)]
    pub archived: bool,
}

impl FormTemplate {
    pub fn field(&self, field_id: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.field_id == field_id)
    }

    pub fn required_count(&self) -> usize {
        self.fields.iter().filter(|f| f.required).count()
    }
}

// ─── Contexts & Access ──────────────────────────────────────────────────────

/// A workspace grouping forms and the people allowed to fill them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormContext {
    pub id: String,
    pub title: String,
    pub created_by: String,
    #[serde(default)]
    pub assigned_professionals: Vec<String>,
    #[serde(default)]
    pub assigned_users: Vec<String>,
    #[serde(default)]
    pub archived: bool,
}

/// How a user relates to a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Owner,
    Professional,
    User,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Owner => "owner",
            AccessLevel::Professional => "professional",
            AccessLevel::User => "user",
        }
    }
}

impl FormContext {
    /// Access level of `user_id`, owner first.
    pub fn access_for(&self, user_id: &str) -> Option<AccessLevel> {
        if self.created_by == user_id {
            Some(AccessLevel::Owner)
        } else if self.assigned_professionals.iter().any(|u| u == user_id) {
            Some(AccessLevel::Professional)
        } else if self.assigned_users.iter().any(|u| u == user_id) {
            Some(AccessLevel::User)
        } else {
            None
        }
    }
}

/// A form the user may fill, as offered to the predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableForm {
    pub id: String,
    pub title: String,
    pub description: String,
    pub match_keywords: Vec<String>,
    pub context_id: String,
    pub context_title: String,
    pub access_level: AccessLevel,
    pub field_count: usize,
    pub required_count: usize,
}

// ─── Response Records ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Complete,
    Partial,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Complete => "complete",
            ResponseStatus::Partial => "partial",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "complete" => ResponseStatus::Complete,
            _ => ResponseStatus::Partial,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub total_fields: usize,
    pub completed_fields: usize,
    pub required_fields: usize,
    pub completed_required_fields: usize,
    pub conversation_turns: usize,
}

/// A submitted form, as written to the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormResponseRecord {
    pub id: String,
    pub form_template_id: String,
    pub context_id: String,
    pub respondent_id: String,
    pub session_id: String,
    /// Typed values keyed by field id.
    pub responses: serde_json::Map<String, serde_json::Value>,
    pub status: ResponseStatus,
    pub completion_percentage: f64,
    pub required_completion_percentage: f64,
    pub submitted_at: DateTime<Utc>,
    pub metadata: ResponseMetadata,
}

/// Filter for listing stored responses.
#[derive(Debug, Clone, Default)]
pub struct ResponseQuery {
    pub respondent_id: String,
    /// Matched against template titles and response values.
    pub keywords: Vec<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: usize,
}

/// A stored response joined with its template title.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSummary {
    pub id: String,
    pub form_template_id: String,
    pub form_title: String,
    pub status: ResponseStatus,
    pub completion_percentage: f64,
    pub submitted_at: DateTime<Utc>,
    pub responses: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> FormContext {
        FormContext {
            id: "c1".into(),
            title: "Clinic".into(),
            created_by: "owner".into(),
            assigned_professionals: vec!["doc".into(), "owner".into()],
            assigned_users: vec!["pat".into()],
            archived: false,
        }
    }

    #[test]
    fn test_access_precedence() {
        let ctx = context();
        assert_eq!(ctx.access_for("owner"), Some(AccessLevel::Owner));
        assert_eq!(ctx.access_for("doc"), Some(AccessLevel::Professional));
        assert_eq!(ctx.access_for("pat"), Some(AccessLevel::User));
        assert_eq!(ctx.access_for("stranger"), None);
    }

    #[test]
    fn test_field_defaults_from_yaml() {
        let yaml = "field_id: name\nlabel: Name\n";
        let field: FormField = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(field.field_type, FieldType::Text);
        assert!(!field.required);
        assert!(field.options.is_empty());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(ResponseStatus::parse("complete"), ResponseStatus::Complete);
        assert_eq!(ResponseStatus::parse("anything"), ResponseStatus::Partial);
    }
}
