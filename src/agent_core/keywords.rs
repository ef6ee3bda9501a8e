//! Whole-word keyword matching for user messages.
//!
//! Messages are lowercased and split on anything that is not alphanumeric or
//! an inner apostrophe (Unicode-aware, so "não" and "relatório" stay whole,
//! and "what's" never yields a stray "s"). Single-word
//! keywords must equal a token; multi-word keywords must appear as a
//! contiguous token sequence.

/// Lowercased alphanumeric tokens of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// A tokenized message, reusable across several keyword lists.
pub struct Tokens {
    tokens: Vec<String>,
    padded: String,
}

impl Tokens {
    pub fn new(text: &str) -> Self {
        let tokens = tokenize(text);
        let padded = format!(" {} ", tokens.join(" "));
        Self { tokens, padded }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.tokens
    }

    /// Whether `keyword` (a word or phrase) occurs.
    pub fn has(&self, keyword: &str) -> bool {
        let kw = tokenize(keyword);
        match kw.len() {
            0 => false,
            1 => self.tokens.iter().any(|t| *t == kw[0]),
            _ => self.padded.contains(&format!(" {} ", kw.join(" "))),
        }
    }

    /// First keyword from `keywords` that occurs.
    pub fn first_of<'a>(&self, keywords: &[&'a str]) -> Option<&'a str> {
        keywords.iter().copied().find(|k| self.has(k))
    }

    pub fn has_any(&self, keywords: &[&str]) -> bool {
        self.first_of(keywords).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_unicode() {
        assert_eq!(tokenize("Não, o Relatório!"), vec!["não", "o", "relatório"]);
    }

    #[test]
    fn test_apostrophes_stay_inside_words() {
        assert_eq!(tokenize("what's 'this'"), vec!["what's", "this"]);
    }

    #[test]
    fn test_whole_word_only() {
        let t = Tokens::new("please update my details");
        assert!(!t.has("data"), "'update' must not match 'data'");
        assert!(t.has("update"));
    }

    #[test]
    fn test_phrase_match() {
        let t = Tokens::new("That looks good to me");
        assert!(t.has("looks good"));
        assert!(!t.has("good looks"));
        assert!(!Tokens::new("not righteous").has("not right"));
    }

    #[test]
    fn test_first_of_respects_list_order() {
        let t = Tokens::new("yes but review first");
        assert_eq!(t.first_of(&["review", "yes"]), Some("review"));
        assert_eq!(t.first_of(&["nope"]), None);
    }

    #[test]
    fn test_has_any() {
        assert!(Tokens::new("Show me last week's forms").has_any(&["show"]));
        assert!(!Tokens::new("").has_any(&["show"]));
    }
}
