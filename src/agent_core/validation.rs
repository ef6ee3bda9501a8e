//! Answer validation, dispatched on field type.
//!
//! Every answer is trimmed first. Empty answers fail for required fields,
//! length limits apply to every type, and then the type-specific rule runs.
//! A successful validation returns the normalized value to store (cleaned
//! phone digits, ISO dates, canonical option spelling).

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use thiserror::Error;

use super::forms::{FieldType, FormField};

static EMAIL_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$"));

static URL_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^https?://[^\s/?#]+([/?#]\S*)?$"));

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"];
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const MIN_PHONE_DIGITS: usize = 7;

const BOOLEAN_TRUE: &[&str] = &[
    "yes", "y", "true", "1", "ok", "correct", "right", "sim", "s", "verdadeiro", "certo", "correto",
];
const BOOLEAN_FALSE: &[&str] = &[
    "no", "n", "false", "0", "wrong", "incorrect", "não", "nao", "falso", "errado", "incorreto",
];

/// An accepted answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    /// Normalized value to store. Empty for a blank optional answer.
    pub value: String,
    /// Set when the input was interpreted loosely (partial option match).
    pub warning: Option<String>,
}

impl Validated {
    fn clean(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            warning: None,
        }
    }
}

/// A rejected answer, with hints to show the user.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    pub suggestions: Vec<String>,
}

impl ValidationError {
    fn new(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestions: vec![suggestion.into()],
        }
    }
}

/// Validate `input` as an answer to `field`.
pub fn validate_answer(field: &FormField, input: &str) -> Result<Validated, ValidationError> {
    let value = input.trim();

    if value.is_empty() {
        if field.required {
            return Err(ValidationError::new(
                format!("'{}' is required.", field.label),
                "Please provide an answer, or type 'help' to see your options.",
            ));
        }
        return Ok(Validated::clean(""));
    }

    check_length(field, value)?;

    match field.field_type {
        FieldType::Email => validate_email(value),
        FieldType::Phone => validate_phone(value),
        FieldType::Number => validate_number(value),
        FieldType::Currency => validate_currency(value),
        FieldType::Date => validate_date(value),
        FieldType::Url => validate_url(value),
        FieldType::Select => resolve_option(&field.options, value),
        FieldType::Multiselect => validate_multiselect(&field.options, value),
        FieldType::Boolean => validate_boolean(value),
        FieldType::Text | FieldType::Textarea => validate_text(field, value),
    }
}

fn check_length(field: &FormField, value: &str) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if let Some(min) = field.min_length {
        if len < min {
            return Err(ValidationError::new(
                format!("Answer is too short ({len} characters)."),
                format!("Please use at least {min} characters."),
            ));
        }
    }
    if let Some(max) = field.max_length {
        if len > max {
            return Err(ValidationError::new(
                format!("Answer is too long ({len} characters)."),
                format!("Please keep it under {max} characters."),
            ));
        }
    }
    Ok(())
}

fn validate_email(value: &str) -> Result<Validated, ValidationError> {
    let ok = EMAIL_RE.as_ref().map(|re| re.is_match(value)).unwrap_or(false);
    if ok {
        Ok(Validated::clean(value))
    } else {
        Err(ValidationError::new(
            "That doesn't look like an email address.",
            "Please provide a valid email address (e.g., user@example.com)",
        ))
    }
}

fn validate_phone(value: &str) -> Result<Validated, ValidationError> {
    let cleaned: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')' | '+'))
        .collect();
    if cleaned.len() >= MIN_PHONE_DIGITS && cleaned.chars().all(|c| c.is_ascii_digit()) {
        Ok(Validated::clean(cleaned))
    } else {
        Err(ValidationError::new(
            "That doesn't look like a phone number.",
            "Please provide a valid phone number (e.g., +1-555-123-4567)",
        ))
    }
}

fn validate_number(value: &str) -> Result<Validated, ValidationError> {
    match value.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(Validated::clean(value)),
        _ => Err(ValidationError::new(
            "That isn't a number.",
            "Please provide a valid number",
        )),
    }
}

fn validate_currency(value: &str) -> Result<Validated, ValidationError> {
    let cleaned: String = value
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '€' | '£' | '¥'))
        .collect();
    let cleaned = cleaned.trim();
    match cleaned.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(Validated::clean(cleaned)),
        _ => Err(ValidationError::new(
            "That isn't an amount.",
            "Please provide an amount (e.g., 1,250.00)",
        )),
    }
}

/// Parse a date in any accepted format, returning `YYYY-MM-DD`.
pub fn normalize_date(value: &str) -> Option<String> {
    let parsed = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, DATETIME_FORMAT)
                .ok()
                .map(|dt| dt.date())
        })?;
    Some(parsed.format("%Y-%m-%d").to_string())
}

fn validate_date(value: &str) -> Result<Validated, ValidationError> {
    normalize_date(value).map(Validated::clean).ok_or_else(|| {
        ValidationError::new(
            "I couldn't read that date.",
            "Please provide a date in YYYY-MM-DD format (e.g., 2024-03-15)",
        )
    })
}

fn validate_url(value: &str) -> Result<Validated, ValidationError> {
    let ok = URL_RE.as_ref().map(|re| re.is_match(value)).unwrap_or(false);
    if ok {
        Ok(Validated::clean(value))
    } else {
        Err(ValidationError::new(
            "That doesn't look like a web address.",
            "Please provide a full URL starting with http:// or https://",
        ))
    }
}

/// Resolve one answer against a list of options.
///
/// Exact (case-insensitive) match first; a single partial match is accepted
/// with a warning; several partial matches or none are rejected.
fn resolve_option(options: &[String], value: &str) -> Result<Validated, ValidationError> {
    if options.is_empty() {
        return Ok(Validated::clean(value));
    }
    let needle = value.to_lowercase();

    if let Some(exact) = options.iter().find(|o| o.to_lowercase() == needle) {
        return Ok(Validated::clean(exact.clone()));
    }

    let partial: Vec<&String> = options
        .iter()
        .filter(|o| {
            let opt = o.to_lowercase();
            opt.contains(&needle) || needle.contains(&opt)
        })
        .collect();

    match partial.as_slice() {
        [only] => Ok(Validated {
            value: (*only).clone(),
            warning: Some(format!(
                "I interpreted your answer as '{only}'. Is this correct?"
            )),
        }),
        [] => Err(ValidationError::new(
            format!("'{value}' is not one of the options."),
            format!("Please choose from: {}", join(options.iter())),
        )),
        many => Err(ValidationError::new(
            format!("'{value}' matches more than one option."),
            format!("Did you mean one of these? {}", join(many.iter().copied())),
        )),
    }
}

fn validate_multiselect(options: &[String], value: &str) -> Result<Validated, ValidationError> {
    let mut chosen = Vec::new();
    let mut warnings = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let resolved = resolve_option(options, part)?;
        if let Some(w) = resolved.warning {
            warnings.push(w);
        }
        if !chosen.contains(&resolved.value) {
            chosen.push(resolved.value);
        }
    }
    if chosen.is_empty() {
        return Err(ValidationError::new(
            "No options selected.",
            format!("Please choose one or more of: {}", join(options.iter())),
        ));
    }
    Ok(Validated {
        value: chosen.join(", "),
        warning: (!warnings.is_empty()).then(|| warnings.join(" ")),
    })
}

fn validate_boolean(value: &str) -> Result<Validated, ValidationError> {
    let lower = value.to_lowercase();
    if BOOLEAN_TRUE.contains(&lower.as_str()) {
        Ok(Validated::clean("true"))
    } else if BOOLEAN_FALSE.contains(&lower.as_str()) {
        Ok(Validated::clean("false"))
    } else {
        Err(ValidationError::new(
            "Please answer yes or no.",
            "Por favor, responda 'sim' ou 'não' (yes/no)",
        ))
    }
}

fn validate_text(field: &FormField, value: &str) -> Result<Validated, ValidationError> {
    let Some(pattern) = field.validation_pattern.as_deref() else {
        return Ok(Validated::clean(value));
    };
    match Regex::new(pattern) {
        Ok(re) if re.is_match(value) => Ok(Validated::clean(value)),
        Ok(_) => Err(ValidationError::new(
            format!("'{}' is not in the expected format.", field.label),
            field
                .help_text
                .clone()
                .unwrap_or_else(|| "Please check the format and try again.".to_string()),
        )),
        Err(e) => {
            // A broken template pattern must not block the user.
            tracing::warn!(field_id = %field.field_id, error = %e, "invalid validation_pattern");
            Ok(Validated::clean(value))
        }
    }
}

fn join<'a>(items: impl Iterator<Item = &'a String>) -> String {
    items.map(String::as_str).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(field_type: FieldType) -> FormField {
        FormField {
            field_id: "f".into(),
            label: "Field".into(),
            field_type,
            required: true,
            options: vec![],
            depends_on: None,
            validation_pattern: None,
            min_length: None,
            max_length: None,
            help_text: None,
        }
    }

    fn select(field_type: FieldType, options: &[&str]) -> FormField {
        FormField {
            options: options.iter().map(|s| s.to_string()).collect(),
            ..field(field_type)
        }
    }

    #[test]
    fn test_required_empty_rejected_optional_empty_accepted() {
        assert!(validate_answer(&field(FieldType::Text), "   ").is_err());
        let optional = FormField {
            required: false,
            ..field(FieldType::Email)
        };
        assert_eq!(validate_answer(&optional, "").unwrap().value, "");
    }

    #[test]
    fn test_email() {
        let f = field(FieldType::Email);
        assert!(validate_answer(&f, " ana@example.com ").is_ok());
        let err = validate_answer(&f, "ana@example").unwrap_err();
        assert!(err.suggestions[0].contains("user@example.com"));
    }

    #[test]
    fn test_phone_is_cleaned() {
        let f = field(FieldType::Phone);
        assert_eq!(validate_answer(&f, "+1 (555) 123-4567").unwrap().value, "15551234567");
        assert!(validate_answer(&f, "12345").is_err());
        assert!(validate_answer(&f, "555-CALL-NOW").is_err());
    }

    #[test]
    fn test_number_and_currency() {
        assert!(validate_answer(&field(FieldType::Number), "3.5").is_ok());
        assert!(validate_answer(&field(FieldType::Number), "three").is_err());
        let cur = field(FieldType::Currency);
        assert_eq!(validate_answer(&cur, "$1,250.50").unwrap().value, "1250.50");
        assert_eq!(validate_answer(&cur, "€ 20").unwrap().value, "20");
        assert!(validate_answer(&cur, "lots").is_err());
    }

    #[test]
    fn test_date_formats_normalized() {
        let f = field(FieldType::Date);
        assert_eq!(validate_answer(&f, "2024-03-15").unwrap().value, "2024-03-15");
        assert_eq!(validate_answer(&f, "03/15/2024").unwrap().value, "2024-03-15");
        assert_eq!(validate_answer(&f, "15/03/2024").unwrap().value, "2024-03-15");
        assert_eq!(
            validate_answer(&f, "2024-03-15 10:30:00").unwrap().value,
            "2024-03-15"
        );
        assert!(validate_answer(&f, "next tuesday").is_err());
    }

    #[test]
    fn test_url() {
        let f = field(FieldType::Url);
        assert!(validate_answer(&f, "https://example.com/path?q=1").is_ok());
        assert!(validate_answer(&f, "example.com").is_err());
        assert!(validate_answer(&f, "https://").is_err());
    }

    #[test]
    fn test_select_exact_partial_ambiguous_none() {
        let f = select(FieldType::Select, &["Small", "Medium", "Large", "Extra Large"]);
        assert_eq!(validate_answer(&f, "medium").unwrap().value, "Medium");

        let partial = validate_answer(&f, "med").unwrap();
        assert_eq!(partial.value, "Medium");
        assert!(partial.warning.is_some());

        let ambiguous = validate_answer(&f, "larg").unwrap_err();
        assert!(ambiguous.suggestions[0].starts_with("Did you mean"));

        let none = validate_answer(&f, "huge").unwrap_err();
        assert!(none.suggestions[0].contains("Small, Medium, Large, Extra Large"));
    }

    #[test]
    fn test_multiselect() {
        let f = select(FieldType::Multiselect, &["Email", "Phone", "SMS"]);
        assert_eq!(validate_answer(&f, "email, sms, email").unwrap().value, "Email, SMS");
        assert!(validate_answer(&f, "email, fax").is_err());
    }

    #[test]
    fn test_boolean() {
        let f = field(FieldType::Boolean);
        assert_eq!(validate_answer(&f, "Sim").unwrap().value, "true");
        assert_eq!(validate_answer(&f, "nao").unwrap().value, "false");
        assert!(validate_answer(&f, "perhaps").is_err());
    }

    #[test]
    fn test_text_pattern_and_lengths() {
        let f = FormField {
            validation_pattern: Some(r"^[A-Z]{2}\d{4}$".into()),
            help_text: Some("Two letters and four digits".into()),
            ..field(FieldType::Text)
        };
        assert!(validate_answer(&f, "AB1234").is_ok());
        let err = validate_answer(&f, "ab12").unwrap_err();
        assert_eq!(err.suggestions[0], "Two letters and four digits");

        let bounded = FormField {
            min_length: Some(3),
            max_length: Some(5),
            ..field(FieldType::Number)
        };
        assert!(validate_answer(&bounded, "12").is_err());
        assert!(validate_answer(&bounded, "123456").is_err());
        assert!(validate_answer(&bounded, "1234").is_ok());
    }

    #[test]
    fn test_broken_pattern_accepts() {
        let f = FormField {
            validation_pattern: Some("([".into()),
            ..field(FieldType::Text)
        };
        assert!(validate_answer(&f, "anything").is_ok());
    }
}
