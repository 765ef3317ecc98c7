//! Glob-style user@host mask sets for ban/except/invite lists.

use crate::name::fold_rfc1459;
use regex::Regex;
use std::collections::BTreeMap;

/// An ordered set of glob patterns (`*` and `?`) matched against
/// `nick!user@host` or `user@host` strings. Masks are stored in their
/// original external form; matching and ordering are case-folded.
#[derive(Debug, Default)]
pub struct UserMaskSet {
    // folded mask -> original mask, so Serialize() is deterministic.
    masks: BTreeMap<String, String>,
}

impl UserMaskSet {
    pub fn new() -> Self {
        UserMaskSet::default()
    }

    /// Inserts `mask`. Returns `true` if it was not already present.
    pub fn add(&mut self, mask: &str) -> bool {
        let folded = fold_rfc1459(mask);
        self.masks.insert(folded, mask.to_string()).is_none()
    }

    /// Removes `mask`. Returns `true` if it was present.
    pub fn remove(&mut self, mask: &str) -> bool {
        let folded = fold_rfc1459(mask);
        self.masks.remove(&folded).is_some()
    }

    /// True if any stored mask glob-matches `host`.
    pub fn matches(&self, host: &str) -> bool {
        let folded_host = fold_rfc1459(host);
        self.masks
            .keys()
            .any(|folded_mask| glob_match(folded_mask, &folded_host))
    }

    /// Stable, space-joined, sorted-by-folded-form serialization.
    pub fn serialize(&self) -> String {
        self.masks.values().cloned().collect::<Vec<_>>().join(" ")
    }

    /// Rebuilds a mask set from its `serialize()` form.
    pub fn from_serialized(s: &str) -> Self {
        let mut set = UserMaskSet::new();
        for mask in s.split_whitespace() {
            set.add(mask);
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.masks.values().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }
}

/// Compiles an IRC wildcard pattern (`*` zero-or-more, `?` exactly one) into
/// a regex, escaping everything else literally, and matches it anchored
/// against `text`. Both inputs are expected already case-folded.
fn glob_match(pattern: &str, text: &str) -> bool {
    let mut regex_pattern = String::with_capacity(pattern.len() * 2 + 2);
    regex_pattern.push('^');
    for segment in split_on_wildcards(pattern) {
        match segment {
            Segment::Literal(lit) => regex_pattern.push_str(&regex::escape(lit)),
            Segment::Star => regex_pattern.push_str(".*"),
            Segment::Question => regex_pattern.push('.'),
        }
    }
    regex_pattern.push('$');

    match Regex::new(&regex_pattern) {
        Ok(re) => re.is_match(text),
        Err(_) => pattern.eq_ignore_ascii_case(text),
    }
}

enum Segment<'a> {
    Literal(&'a str),
    Star,
    Question,
}

fn split_on_wildcards(pattern: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    for (idx, ch) in pattern.char_indices() {
        if ch == '*' || ch == '?' {
            if start < idx {
                out.push(Segment::Literal(&pattern[start..idx]));
            }
            out.push(if ch == '*' {
                Segment::Star
            } else {
                Segment::Question
            });
            start = idx + ch.len_utf8();
        }
    }
    if start < pattern.len() {
        out.push(Segment::Literal(&pattern[start..]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_reports_newly_inserted() {
        let mut set = UserMaskSet::new();
        assert!(set.add("*!*@evil.example"));
        assert!(!set.add("*!*@evil.example"));
    }

    #[test]
    fn remove_reports_previously_present() {
        let mut set = UserMaskSet::new();
        set.add("*!*@evil.example");
        assert!(set.remove("*!*@evil.example"));
        assert!(!set.remove("*!*@evil.example"));
    }

    #[test]
    fn matches_glob_wildcards() {
        let mut set = UserMaskSet::new();
        set.add("*!*@evil.example");
        assert!(set.matches("bad!u@evil.example"));
        assert!(!set.matches("good!u@good.example"));
    }

    #[test]
    fn matches_is_case_folded() {
        let mut set = UserMaskSet::new();
        set.add("*!*@Evil.Example");
        assert!(set.matches("bad!u@EVIL.EXAMPLE"));
    }

    #[test]
    fn add_remove_add_matches_pure_set_semantics() {
        let mut set = UserMaskSet::new();
        let before = set.matches("bad!u@evil.example");
        set.add("*!*@evil.example");
        set.remove("*!*@evil.example");
        assert_eq!(before, set.matches("bad!u@evil.example"));
    }

    #[test]
    fn serialize_is_sorted_and_round_trips() {
        let mut set = UserMaskSet::new();
        set.add("zeta!*@*");
        set.add("alpha!*@*");
        let serialized = set.serialize();
        let reconstructed = UserMaskSet::from_serialized(&serialized);
        assert_eq!(reconstructed.serialize(), serialized);
        assert_eq!(set.len(), reconstructed.len());
    }

    #[test]
    fn question_mark_matches_exactly_one_char() {
        let mut set = UserMaskSet::new();
        set.add("user?!*@*");
        assert!(set.matches("user1!u@h"));
        assert!(!set.matches("user12!u@h"));
    }
}
