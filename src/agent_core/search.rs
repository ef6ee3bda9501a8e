//! Form searcher: find the user's own submitted responses.
//!
//! The model turns the request into search parameters; when it is
//! unreachable or replies with something unparsable, a keyword heuristic
//! takes over. Either way the query only ever covers the caller's records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use super::errors::AgentError;
use super::forms::{ResponseQuery, ResponseSummary};
use super::keywords::tokenize;
use super::periods::{DateRange, RelativePeriod};
use super::reply_parser::parse_json_reply;
use super::store::FormRepository;
use super::types::Session;
use crate::config::AssistantSettings;
use crate::inference::{CompletionRequest, LanguageModel};

const SEARCH_SYSTEM_PROMPT: &str = r#"You parse requests to search previously submitted forms.

Reply with JSON only:
{
  "search_type": "recent|by_date|by_form_type|by_keyword|general",
  "keywords": ["words", "to", "match"],
  "date_range": {
    "relative": "today|yesterday|this_week|last_week|this_month|last_month or null",
    "start_date": "YYYY-MM-DD or null",
    "end_date": "YYYY-MM-DD or null"
  },
  "limit": 10
}

Keywords are form names or values the user mentions, never verbs like "show"
or "find" and never the date words."#;

/// Words that carry no search meaning.
const SEARCH_STOPWORDS: &[&str] = &[
    "a", "an", "the", "my", "me", "i", "of", "in", "on", "for", "from", "to", "all", "any", "that",
    "which", "what", "with", "did", "do", "have", "has", "were", "was", "is", "are", "please",
    "can", "you", "show", "find", "search", "list", "see", "look", "get", "give", "query",
    "submitted", "sent", "filled", "form", "forms", "response", "responses", "submission",
    "submissions", "last", "this", "past", "week", "month", "today", "yesterday", "recent",
    "buscar", "encontrar", "mostrar", "ver", "consultar", "meus", "minhas", "os", "as", "de", "do",
    "da", "dos", "das", "formulário", "formulários", "hoje", "ontem", "semana", "mês", "passado",
    "passada", "esta", "este", "essa", "esse",
];

#[derive(Debug, Default, Deserialize)]
struct RawDateRange {
    #[serde(default)]
    relative: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSearchParams {
    #[serde(default)]
    search_type: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    date_range: Option<RawDateRange>,
    #[serde(default)]
    limit: Option<serde_json::Value>,
}

/// Resolved search parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub search_type: String,
    pub keywords: Vec<String>,
    pub range: Option<DateRange>,
    pub limit: usize,
}

impl SearchParams {
    pub fn to_query(&self, user_id: &str) -> ResponseQuery {
        let (from, to) = match self.range.map(|r| r.utc_bounds()) {
            Some((from, to)) => (Some(from), Some(to)),
            None => (None, None),
        };
        ResponseQuery {
            respondent_id: user_id.to_string(),
            keywords: self.keywords.clone(),
            from,
            to,
            limit: self.limit,
        }
    }
}

fn clamp_limit(requested: Option<usize>, settings: &AssistantSettings) -> usize {
    requested
        .filter(|n| *n > 0)
        .unwrap_or(settings.search_default_limit)
        .min(settings.search_max_limit)
}

const LIMIT_BEFORE: &[&str] = &["top", "last", "first", "latest", "recent", "últimos", "ultimos", "primeiros"];
const LIMIT_AFTER: &[&str] = &[
    "results", "responses", "submissions", "entries", "forms", "resultados", "respostas",
];

/// Numbers like "top 5", "last 20" or "10 results". A bare number ("from
/// 2024") is not a limit.
fn limit_in_message(message: &str) -> Option<usize> {
    let tokens = tokenize(message);
    tokens.iter().enumerate().find_map(|(i, t)| {
        let n = t.parse::<usize>().ok()?;
        let before = i
            .checked_sub(1)
            .and_then(|j| tokens.get(j))
            .is_some_and(|w| LIMIT_BEFORE.contains(&w.as_str()));
        let after = tokens
            .get(i + 1)
            .is_some_and(|w| LIMIT_AFTER.contains(&w.as_str()));
        (before || after).then_some(n)
    })
}

/// Search parameters without the model.
pub fn heuristic_params(message: &str, today: NaiveDate, settings: &AssistantSettings) -> SearchParams {
    let range = RelativePeriod::detect(message).map(|p| p.resolve(today));
    let mut keywords: Vec<String> = Vec::new();
    for token in tokenize(message) {
        let meaningful = token.chars().count() >= 3
            && !token.chars().all(|c| c.is_ascii_digit())
            && !SEARCH_STOPWORDS.contains(&token.as_str());
        if meaningful && !keywords.contains(&token) {
            keywords.push(token);
        }
    }
    let search_type = match (range.is_some(), keywords.is_empty()) {
        (true, true) => "by_date",
        (_, false) => "by_keyword",
        (false, true) => "recent",
    };
    SearchParams {
        search_type: search_type.to_string(),
        keywords,
        range,
        limit: clamp_limit(limit_in_message(message), settings),
    }
}

fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    value
        .filter(|v| !v.eq_ignore_ascii_case("null"))
        .and_then(|v| NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d").ok())
}

/// Turn the model's reply into parameters.
pub fn parse_search_params(
    reply: &str,
    today: NaiveDate,
    settings: &AssistantSettings,
) -> Result<SearchParams, AgentError> {
    let raw: RawSearchParams = parse_json_reply(reply)?;
    let range = raw.date_range.and_then(|dr| {
        if let Some(period) = dr.relative.as_deref().and_then(RelativePeriod::parse) {
            return Some(period.resolve(today));
        }
        match (parse_date(dr.start_date.as_deref()), parse_date(dr.end_date.as_deref())) {
            (Some(start), Some(end)) if start <= end => Some(DateRange { start, end }),
            (Some(start), None) => Some(DateRange { start, end: today }),
            (None, Some(end)) => Some(DateRange { start: end, end }),
            _ => None,
        }
    });
    let limit = match raw.limit {
        Some(serde_json::Value::Number(n)) => n.as_u64().map(|n| n as usize),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    let keywords = raw
        .keywords
        .into_iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    Ok(SearchParams {
        search_type: raw.search_type.unwrap_or_else(|| "general".to_string()),
        keywords,
        range,
        limit: clamp_limit(limit, settings),
    })
}

/// Numbered result list.
pub fn render_results(results: &[ResponseSummary], params: &SearchParams) -> String {
    if results.is_empty() {
        let mut out = String::from("I couldn't find any submitted forms matching your search.");
        if let Some(range) = params.range {
            out.push_str(&format!("\nPeriod searched: {}", range.label()));
        }
        if !params.keywords.is_empty() {
            out.push_str(&format!("\nKeywords: {}", params.keywords.join(", ")));
        }
        out.push_str("\nTry a wider date range or different keywords.");
        return out;
    }
    let mut out = format!(
        "Found {} submitted form{}:",
        results.len(),
        if results.len() == 1 { "" } else { "s" }
    );
    for (i, r) in results.iter().enumerate() {
        out.push_str(&format!(
            "\n{}. {} | {} | {} | {:.0}% complete",
            i + 1,
            r.form_title,
            r.submitted_at.format("%Y-%m-%d %H:%M"),
            r.status.as_str(),
            r.completion_percentage
        ));
    }
    out
}

/// The searcher node.
pub struct FormSearcher<'a> {
    pub llm: &'a dyn LanguageModel,
    pub repo: &'a dyn FormRepository,
    pub settings: &'a AssistantSettings,
}

impl FormSearcher<'_> {
    pub async fn params_for(&self, message: &str, today: NaiveDate) -> SearchParams {
        let request = CompletionRequest::new(
            SEARCH_SYSTEM_PROMPT,
            format!("Today is {today}.\nRequest: \"{message}\""),
        )
        .json();
        let parsed = match self.llm.complete(request).await {
            Ok(reply) => parse_search_params(&reply, today, self.settings),
            Err(e) => Err(e.into()),
        };
        parsed.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "search parameter parsing failed, using heuristic");
            heuristic_params(message, today, self.settings)
        })
    }

    pub async fn run(
        &self,
        session: &Session,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<String, AgentError> {
        let params = self.params_for(message, now.date_naive()).await;
        let results = self.repo.search_responses(&params.to_query(&session.user_id))?;
        tracing::info!(
            session_id = %session.session_id,
            search_type = %params.search_type,
            keywords = params.keywords.len(),
            results = results.len(),
            "form search"
        );
        Ok(render_results(&results, &params))
    }
}
