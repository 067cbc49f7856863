//! Package name globs (`acme/*`, `symfony/polyfill-?`).

use regex::{Regex, RegexBuilder};

/// Translate a glob into an anchored regex source.
///
/// `*` matches any run of characters (including `/`), `?` matches exactly one.
/// Everything else is matched literally.
#[must_use]
pub fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    out.push('$');
    out
}

/// A compiled set of globs matched case-insensitively.
#[derive(Debug, Clone)]
pub struct GlobSet {
    patterns: Vec<String>,
    regex: Option<Regex>,
}

impl GlobSet {
    /// Compile a set of globs. An empty set matches nothing.
    ///
    /// # Errors
    /// Returns the regex error if the combined pattern is too large.
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let regex = if patterns.is_empty() {
            None
        } else {
            let source = patterns
                .iter()
                .map(|p| format!("(?:{})", glob_to_regex(p)))
                .collect::<Vec<_>>()
                .join("|");
            Some(RegexBuilder::new(&source).case_insensitive(true).build()?)
        };
        Ok(Self { patterns, regex })
    }

    /// Whether any glob matches the name.
    #[must_use]
    pub fn is_match(&self, name: &str) -> bool {
        self.regex.as_ref().is_some_and(|r| r.is_match(name))
    }

    /// Whether the set has no globs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The original glob strings.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// The compiled regex, if any.
    #[must_use]
    pub fn regex(&self) -> Option<&Regex> {
        self.regex.as_ref()
    }
}

impl Default for GlobSet {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            regex: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("acme/*", "acme/foo", true)]
    #[case("acme/*", "ACME/Foo", true)]
    #[case("acme/*", "other/foo", false)]
    #[case("symfony/polyfill-?", "symfony/polyfill-a", true)]
    #[case("symfony/polyfill-?", "symfony/polyfill-ab", false)]
    #[case("a.b/c", "axb/c", false)]
    #[case("*", "anything/at-all", true)]
    fn test_glob_matching(#[case] glob: &str, #[case] name: &str, #[case] expected: bool) {
        let set = GlobSet::new([glob]).unwrap();
        assert_eq!(set.is_match(name), expected);
    }

    #[test]
    fn test_empty_set_matches_nothing() {
        let set = GlobSet::default();
        assert!(set.is_empty());
        assert!(!set.is_match("acme/foo"));
    }

    #[test]
    fn test_glob_to_regex_escapes() {
        assert_eq!(glob_to_regex("a+b/*"), r"^a\+b/.*$");
    }
}
