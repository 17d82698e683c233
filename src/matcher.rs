//! Pattern lists for label, title, author, and repository matching.
//!
//! Policy entries are both literals and regexes at the same time: a string
//! matches an entry if it equals the entry under case folding, or if the
//! entry compiled as a regex matches it. This is what lets a plain `merge`
//! label coexist with entries like `chore:.+` in the same list.

use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Error returned when a pattern entry is not a valid regex.
#[derive(Debug, Error)]
#[error("`{text}' is not a valid regex: {source}")]
pub struct InvalidPattern {
    text: String,
    #[source]
    source: regex::Error,
}

/// A single matcher entry: the configured text plus its compiled regex.
#[derive(Debug, Clone)]
pub struct Pattern {
    text: String,
    regex: Regex,
}

impl Pattern {
    /// Compiles a pattern entry.
    pub fn new(text: impl Into<String>) -> Result<Self, InvalidPattern> {
        let text = text.into();
        match Regex::new(&text) {
            Ok(regex) => Ok(Pattern { text, regex }),
            Err(source) => Err(InvalidPattern { text, source }),
        }
    }

    /// The configured text of this entry.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Case-folded equality or regex match.
    pub fn matches(&self, s: &str) -> bool {
        if s.to_lowercase() == self.text.to_lowercase() {
            return true;
        }
        self.regex.is_match(s)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for Pattern {}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Pattern::new(text).map_err(D::Error::custom)
    }
}

/// An ordered list of patterns.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternList(pub Vec<Pattern>);

impl PatternList {
    /// Builds a list from already-compiled entries.
    pub fn new(patterns: Vec<Pattern>) -> Self {
        PatternList(patterns)
    }

    /// Parses the environment-variable form: comma-separated entries, empty
    /// segments skipped.
    pub fn from_comma_separated(s: &str) -> Result<Self, InvalidPattern> {
        let mut patterns = Vec::new();
        for item in s.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            patterns.push(Pattern::new(item)?);
        }
        Ok(PatternList(patterns))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pattern> {
        self.0.iter()
    }

    /// Returns the text of the first entry matching any of the given items.
    pub fn matches_any<I, S>(&self, items: I) -> Option<&str>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for item in items {
            for pattern in &self.0 {
                if pattern.matches(item.as_ref()) {
                    return Some(&pattern.text);
                }
            }
        }
        None
    }

    /// Convenience form of [`matches_any`](Self::matches_any) for one item.
    pub fn matches_one(&self, item: &str) -> Option<&str> {
        self.matches_any([item])
    }

    /// The entry texts, for building GitHub search queries.
    pub fn texts(&self) -> Vec<String> {
        self.0.iter().map(|p| p.text.clone()).collect()
    }
}

impl fmt::Display for PatternList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let texts: Vec<&str> = self.0.iter().map(|p| p.text.as_str()).collect();
        write!(f, "{}", texts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[&str]) -> PatternList {
        PatternList::new(entries.iter().map(|e| Pattern::new(*e).unwrap()).collect())
    }

    // ─── Pattern matching ───

    #[test]
    fn literal_matches_case_insensitively() {
        let pattern = Pattern::new("Merge").unwrap();
        assert!(pattern.matches("merge"));
        assert!(pattern.matches("MERGE"));
        assert!(!pattern.matches("merge-me"));
    }

    #[test]
    fn regex_entries_match() {
        let pattern = Pattern::new("chore:.+").unwrap();
        assert!(pattern.matches("chore: bump deps"));
        assert!(!pattern.matches("fix: bug"));
    }

    #[test]
    fn equality_wins_over_regex_semantics() {
        // `c++` is not a valid regex-free literal match target via the regex
        // branch, but a literal entry still matches itself by case folding.
        let pattern = Pattern::new("release").unwrap();
        assert!(pattern.matches("RELEASE"));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        assert!(Pattern::new("[").is_err());
    }

    #[test]
    fn unicode_case_folding() {
        let pattern = Pattern::new("Größe").unwrap();
        assert!(pattern.matches("grÖße"));
    }

    // ─── PatternList ───

    #[test]
    fn matches_any_returns_entry_text() {
        let patterns = list(&["merge", "ship-it"]);
        assert_eq!(patterns.matches_any(["other", "Ship-It"]), Some("ship-it"));
        assert_eq!(patterns.matches_any(["nope"]), None);
    }

    #[test]
    fn from_comma_separated_skips_empty_segments() {
        let patterns = PatternList::from_comma_separated(" acme/.* , , octo/repo ").unwrap();
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns.matches_one("acme/svc"), Some("acme/.*"));
        assert_eq!(patterns.matches_one("octo/repo"), Some("octo/repo"));
    }

    #[test]
    fn from_comma_separated_rejects_bad_entry() {
        assert!(PatternList::from_comma_separated("good, [").is_err());
    }

    #[test]
    fn display_joins_texts() {
        let patterns = list(&["a", "b"]);
        assert_eq!(patterns.to_string(), "a, b");
    }

    // ─── Serde ───

    #[test]
    fn deserializes_from_yaml_strings() {
        let patterns: PatternList = serde_yaml::from_str("[merge, 'chore:.+']").unwrap();
        assert_eq!(patterns.len(), 2);
        assert!(patterns.0[1].matches("chore: x"));
    }

    #[test]
    fn deserialize_fails_on_invalid_regex() {
        let result: Result<PatternList, _> = serde_yaml::from_str("['[']");
        assert!(result.is_err());
    }

    #[test]
    fn serializes_back_to_text() {
        let patterns = list(&["merge"]);
        assert_eq!(serde_json::to_string(&patterns).unwrap(), r#"["merge"]"#);
    }

    // ─── Properties ───

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Any regex-safe literal entry matches itself.
            #[test]
            fn literal_matches_itself(s in "[a-zA-Z][a-zA-Z0-9 _-]{0,20}") {
                let pattern = Pattern::new(&s).unwrap();
                prop_assert!(pattern.matches(&s));
            }

            /// Case changes never break literal matching.
            #[test]
            fn literal_matches_case_variants(s in "[a-z][a-z0-9-]{0,20}") {
                let pattern = Pattern::new(&s).unwrap();
                prop_assert!(pattern.matches(&s.to_uppercase()));
            }

            /// Serde round-trips preserve the entry text.
            #[test]
            fn serde_roundtrip(s in "[a-zA-Z][a-zA-Z0-9 _-]{0,20}") {
                let patterns = list(&[s.as_str()]);
                let json = serde_json::to_string(&patterns).unwrap();
                let parsed: PatternList = serde_json::from_str(&json).unwrap();
                prop_assert_eq!(patterns, parsed);
            }
        }
    }
}
