//! Keyword classifiers for yes/no style answers.
//!
//! Two places ask the user to confirm something: the final summary
//! (CONFIRMATION) and the low-confidence "is this the right form?" question
//! (AWAITING_FORM_CONFIRMATION). Lists are checked in a fixed order and the
//! first list with a hit wins.

use super::keywords::Tokens;

const CONFIRM_KEYWORDS: &[&str] = &[
    "yes", "y", "submit", "correct", "ok", "confirm", "sure", "right", "good", "looks good",
    "perfect", "sim", "s", "enviar", "submeter", "correto", "certo", "confirmar", "confirma",
    "perfeito", "bom",
];

const REVIEW_KEYWORDS: &[&str] = &[
    "review", "show", "check", "look", "see", "summary", "revisar", "mostrar", "verificar", "ver",
    "resumo",
];

const REJECT_KEYWORDS: &[&str] = &[
    "no", "n", "wrong", "incorrect", "change", "edit", "fix", "not right", "modify", "não", "nao",
    "errado", "incorreto", "mudar", "alterar", "editar", "modificar",
];

const FORM_YES_KEYWORDS: &[&str] = &[
    "yes", "y", "ok", "correct", "right", "proceed", "continue", "sim",
];

const FORM_NO_KEYWORDS: &[&str] = &["no", "n", "wrong", "different", "other", "não", "nao"];

/// What the user meant in reply to the confirmation summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationIntent {
    Confirm,
    Reject,
    Review,
    Unclear,
}

impl ConfirmationIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationIntent::Confirm => "confirm",
            ConfirmationIntent::Reject => "reject",
            ConfirmationIntent::Review => "review",
            ConfirmationIntent::Unclear => "unclear",
        }
    }
}

/// Classify a reply to the summary. Order: confirm, review, reject.
pub fn classify_confirmation(message: &str) -> ConfirmationIntent {
    let tokens = Tokens::new(message);
    if tokens.has_any(CONFIRM_KEYWORDS) {
        ConfirmationIntent::Confirm
    } else if tokens.has_any(REVIEW_KEYWORDS) {
        ConfirmationIntent::Review
    } else if tokens.has_any(REJECT_KEYWORDS) {
        ConfirmationIntent::Reject
    } else {
        ConfirmationIntent::Unclear
    }
}

/// Reply to "is this the right form?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormConfirmation {
    Yes,
    No,
    Unclear,
}

pub fn classify_form_confirmation(message: &str) -> FormConfirmation {
    let tokens = Tokens::new(message);
    if tokens.has_any(FORM_YES_KEYWORDS) {
        FormConfirmation::Yes
    } else if tokens.has_any(FORM_NO_KEYWORDS) {
        FormConfirmation::No
    } else {
        FormConfirmation::Unclear
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirm_words() {
        for msg in ["yes", "Looks good!", "ok, submit it", "Sim", "pode enviar"] {
            assert_eq!(classify_confirmation(msg), ConfirmationIntent::Confirm, "{msg}");
        }
    }

    #[test]
    fn test_review_words() {
        for msg in ["show me again", "Review", "quero ver o resumo"] {
            assert_eq!(classify_confirmation(msg), ConfirmationIntent::Review, "{msg}");
        }
    }

    #[test]
    fn test_reject_words() {
        for msg in ["no", "I want to change the email", "não", "errado"] {
            assert_eq!(classify_confirmation(msg), ConfirmationIntent::Reject, "{msg}");
        }
    }

    #[test]
    fn test_confirm_wins_over_later_lists() {
        assert_eq!(classify_confirmation("yes, but show it"), ConfirmationIntent::Confirm);
        assert_eq!(classify_confirmation("no, show it"), ConfirmationIntent::Review);
    }

    #[test]
    fn test_unclear_and_no_substring_hits() {
        assert_eq!(classify_confirmation("hmm"), ConfirmationIntent::Unclear);
        assert_eq!(classify_confirmation(""), ConfirmationIntent::Unclear);
        // "nothing" contains "no", "what's" contains "s"
        assert_eq!(classify_confirmation("nothing"), ConfirmationIntent::Unclear);
        assert_eq!(classify_confirmation("what's that"), ConfirmationIntent::Unclear);
    }

    #[test]
    fn test_form_confirmation() {
        assert_eq!(classify_form_confirmation("yes please"), FormConfirmation::Yes);
        assert_eq!(classify_form_confirmation("proceed"), FormConfirmation::Yes);
        assert_eq!(classify_form_confirmation("no, a different one"), FormConfirmation::No);
        assert_eq!(classify_form_confirmation("maybe"), FormConfirmation::Unclear);
    }
}
