//! Report generator: per-form tallies of the user's submissions over a
//! period.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::errors::AgentError;
use super::forms::{ResponseQuery, ResponseStatus, ResponseSummary};
use super::periods::{DateRange, RelativePeriod};
use super::store::FormRepository;
use super::types::Session;
use crate::config::AssistantSettings;

const FOLLOW_UPS: &str = "You could also ask me:
  • \"Show my forms from last week\"
  • \"Report for this month\"
  • \"I need to fill out a new form\"";

/// Submissions of one form template within the period.
#[derive(Debug, Clone, PartialEq)]
pub struct FormTally {
    pub form_title: String,
    pub total: usize,
    pub complete: usize,
    pub partial: usize,
    pub average_completion: f64,
}

/// Group by template id. Sorted by volume, then title.
pub fn tally(responses: &[ResponseSummary]) -> Vec<FormTally> {
    let mut groups: BTreeMap<&str, (String, Vec<&ResponseSummary>)> = BTreeMap::new();
    for r in responses {
        groups
            .entry(r.form_template_id.as_str())
            .or_insert_with(|| (r.form_title.clone(), Vec::new()))
            .1
            .push(r);
    }
    let mut tallies: Vec<FormTally> = groups
        .into_values()
        .map(|(form_title, rows)| {
            let complete = rows
                .iter()
                .filter(|r| r.status == ResponseStatus::Complete)
                .count();
            let sum: f64 = rows.iter().map(|r| r.completion_percentage).sum();
            FormTally {
                form_title,
                total: rows.len(),
                complete,
                partial: rows.len() - complete,
                average_completion: sum / rows.len() as f64,
            }
        })
        .collect();
    tallies.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.form_title.cmp(&b.form_title)));
    tallies
}

pub fn render_report(range: &DateRange, tallies: &[FormTally]) -> String {
    let mut out = format!("Form submissions report ({})", range.label());
    if tallies.is_empty() {
        out.push_str("\n\nNo forms were submitted in this period.");
    } else {
        let total: usize = tallies.iter().map(|t| t.total).sum();
        let complete: usize = tallies.iter().map(|t| t.complete).sum();
        out.push_str(&format!(
            "\n\nTotal submissions: {total}\nComplete: {complete}  Partial: {}\n",
            total - complete
        ));
        for t in tallies {
            out.push_str(&format!(
                "\n  • {}: {} submitted ({} complete, {} partial), average completion {:.0}%",
                t.form_title, t.total, t.complete, t.partial, t.average_completion
            ));
        }
    }
    out.push_str(&format!("\n\n{FOLLOW_UPS}"));
    out
}

/// The report node.
pub struct ReportGenerator<'a> {
    pub repo: &'a dyn FormRepository,
    pub settings: &'a AssistantSettings,
}

impl ReportGenerator<'_> {
    /// A period named in the message, or the configured trailing window.
    pub fn period_for(&self, message: &str, now: DateTime<Utc>) -> DateRange {
        let today = now.date_naive();
        RelativePeriod::detect(message)
            .map(|p| p.resolve(today))
            .unwrap_or_else(|| {
                let days = u64::try_from(self.settings.report_default_days).unwrap_or(30);
                DateRange::last_days(today, days)
            })
    }

    pub fn run(&self, session: &Session, message: &str, now: DateTime<Utc>) -> Result<String, AgentError> {
        let range = self.period_for(message, now);
        let (from, to) = range.utc_bounds();
        let responses = self.repo.search_responses(&ResponseQuery {
            respondent_id: session.user_id.clone(),
            keywords: Vec::new(),
            from: Some(from),
            to: Some(to),
            limit: 0,
        })?;
        let tallies = tally(&responses);
        tracing::info!(
            session_id = %session.session_id,
            period = %range.label(),
            submissions = responses.len(),
            forms = tallies.len(),
            "report generated"
        );
        Ok(render_report(&range, &tallies))
    }
}
