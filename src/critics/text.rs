//! Phrase matching over free-text rationales.

use regex::Regex;

/// Case-insensitive, word-bounded alternation of literal phrases. Longer
/// phrases are tried first so "most recent" wins over "recent".
pub(crate) fn phrase_regex(phrases: &[&str]) -> Regex {
    let mut sorted: Vec<&str> = phrases.to_vec();
    sorted.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    let alternation = sorted
        .iter()
        .map(|p| regex::escape(p))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).expect("escaped literal phrases always compile")
}

/// All matched phrases, lowercased, in order of appearance.
pub(crate) fn matches(re: &Regex, text: &str) -> Vec<String> {
    re.find_iter(text).map(|m| m.as_str().to_lowercase()).collect()
}

/// Distinct matched phrases, in order of first appearance.
pub(crate) fn distinct(found: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for f in found {
        if !out.contains(f) {
            out.push(f.clone());
        }
    }
    out
}

/// Whether free text mentions a snake_case identifier, either verbatim or
/// with underscores read as spaces.
pub(crate) fn mentions_identifier(text: &str, ident: &str) -> bool {
    let text = text.to_lowercase();
    let ident = ident.to_lowercase();
    text.contains(&ident) || text.contains(&ident.replace('_', " "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_boundaries() {
        let re = phrase_regex(&["due"]);
        assert!(matches(&re, "this procedure is fine").is_empty());
        assert_eq!(matches(&re, "He is DUE a win"), vec!["due"]);
    }

    #[test]
    fn test_longest_phrase_first() {
        let re = phrase_regex(&["recent", "most recent"]);
        assert_eq!(matches(&re, "the most recent run"), vec!["most recent"]);
    }

    #[test]
    fn test_distinct_keeps_order() {
        let found = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(distinct(&found), vec!["b", "a"]);
    }

    #[test]
    fn test_mentions_identifier() {
        assert!(mentions_identifier("Chaos level is modest", "chaos_level"));
        assert!(mentions_identifier("field_size=9", "field_size"));
        assert!(!mentions_identifier("nothing here", "field_size"));
    }
}
