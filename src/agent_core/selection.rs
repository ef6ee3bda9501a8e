//! Resolving the user's answer to the alternative-form menu.

use super::keywords::Tokens;
use super::types::SelectionOption;

const REJECTION_KEYWORDS: &[&str] = &["nenhuma", "nenhum", "não", "nao", "none", "cancel", "cancelar"];

/// Minimum input length for "title contains input" matching.
const MIN_TITLE_FRAGMENT: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    Selected(SelectionOption),
    /// None of the options fit.
    RejectedAll,
    /// A number outside the menu.
    InvalidSelection { choice: String },
    Unclear,
}

impl SelectionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionOutcome::Selected(_) => "form_selected",
            SelectionOutcome::RejectedAll => "rejected_all",
            SelectionOutcome::InvalidSelection { .. } => "invalid_selection",
            SelectionOutcome::Unclear => "unclear_selection",
        }
    }
}

/// Interpret `input` against the menu. First matching rule wins:
/// number, rejection word, title or keyword mention.
pub fn resolve_selection(input: &str, options: &[SelectionOption]) -> SelectionOutcome {
    let input = input.trim();
    let lower = input.to_lowercase();

    if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
        return match input.parse::<usize>() {
            Ok(n) if (1..=options.len()).contains(&n) => {
                SelectionOutcome::Selected(options[n - 1].clone())
            }
            _ => SelectionOutcome::InvalidSelection {
                choice: input.to_string(),
            },
        };
    }

    let tokens = Tokens::new(input);
    if tokens.has_any(REJECTION_KEYWORDS) {
        return SelectionOutcome::RejectedAll;
    }

    for option in options {
        let title = option.title.to_lowercase();
        let mentions_title = !title.is_empty() && lower.contains(&title);
        let fragment_of_title =
            lower.chars().count() >= MIN_TITLE_FRAGMENT && title.contains(&lower);
        let mentions_keyword = option
            .match_keywords
            .iter()
            .any(|kw| tokens.has(kw));
        if mentions_title || fragment_of_title || mentions_keyword {
            return SelectionOutcome::Selected(option.clone());
        }
    }

    SelectionOutcome::Unclear
}
