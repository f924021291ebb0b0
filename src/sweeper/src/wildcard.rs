//! Translation of hierarchical wildcard patterns into path regular expressions.
//!
//! The produced expression uses the subset of syntax shared by the index's
//! regexp query and the `regex` crate. It matches whole paths: the index
//! anchors regexp queries to the entire term, and [`PathRegex::compile`]
//! adds explicit anchors for local matching.

use regex::Regex;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("Wildcard pattern cannot be empty")]
    Empty,

    #[error("Unclosed '{{' at position {position}")]
    UnclosedBrace { position: usize },

    #[error("Unmatched '}}' at position {position}")]
    UnmatchedBrace { position: usize },

    #[error("Nested '{{' at position {position}; brace groups cannot nest")]
    NestedBrace { position: usize },

    #[error("Pattern translates to an invalid expression: {0}")]
    InvalidExpression(String),
}

/// A whole-path regular expression produced by [`translate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRegex(String);

impl PathRegex {
    /// Expression in the form sent to the index.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compile an anchored matcher with the same semantics as the index.
    pub fn compile(&self) -> Result<Regex, PatternError> {
        Regex::new(&format!("^(?:{})$", self.0))
            .map_err(|e| PatternError::InvalidExpression(e.to_string()))
    }
}

impl fmt::Display for PathRegex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Translate a wildcard pattern into a [`PathRegex`].
///
/// `.` matches a literal separator, `*` any sequence, `?` any single
/// character except the separator, and `{a,b}` either alternative. Every other
/// character matches itself.
pub fn translate(pattern: &str) -> Result<PathRegex, PatternError> {
    if pattern.is_empty() {
        return Err(PatternError::Empty);
    }

    let mut out = String::with_capacity(pattern.len() * 2);
    let mut open_brace: Option<usize> = None;

    for (position, c) in pattern.char_indices() {
        match c {
            '.' => out.push_str(r"\."),
            '*' => out.push_str(".*"),
            '?' => out.push_str(r"[^\.]"),
            '{' => {
                if open_brace.is_some() {
                    return Err(PatternError::NestedBrace { position });
                }
                open_brace = Some(position);
                out.push('(');
            }
            '}' => {
                if open_brace.take().is_none() {
                    return Err(PatternError::UnmatchedBrace { position });
                }
                out.push(')');
            }
            ',' if open_brace.is_some() => out.push('|'),
            // `<` and `>` escaped with a backslash are word boundaries in the
            // regex crate, a single-character class is literal in both dialects
            '<' | '>' => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            '+' | '|' | '(' | ')' | '[' | ']' | '"' | '\\' | '#' | '@' | '&' | '~' | '^'
            | '$' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    if let Some(position) = open_brace {
        return Err(PatternError::UnclosedBrace { position });
    }

    let regex = PathRegex(out);
    regex.compile()?;
    Ok(regex)
}

/// A validated wildcard pattern together with its translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardPattern {
    glob: String,
    regex: PathRegex,
}

impl WildcardPattern {
    pub fn parse(glob: impl Into<String>) -> Result<Self, PatternError> {
        let glob = glob.into();
        let regex = translate(&glob)?;
        Ok(Self { glob, regex })
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }

    pub fn regex(&self) -> &PathRegex {
        &self.regex
    }
}

impl std::str::FromStr for WildcardPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for WildcardPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.glob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(pattern: &str) -> Regex {
        translate(pattern).unwrap().compile().unwrap()
    }

    #[test]
    fn test_translation_rules() {
        assert_eq!(translate("a.b").unwrap().as_str(), r"a\.b");
        assert_eq!(translate("a.*").unwrap().as_str(), r"a\..*");
        assert_eq!(translate("{a,b}.x").unwrap().as_str(), r"(a|b)\.x");
        assert_eq!(translate("a?b").unwrap().as_str(), r"a[^\.]b");
    }

    #[test]
    fn test_star_matches_surrounding_segments() {
        let re = matcher("*.cpu.*");
        assert!(re.is_match("host1.cpu.user"));
        assert!(re.is_match("dc1.host1.cpu.load.avg"));
        assert!(!re.is_match("host1.cpuload.user"));
        assert!(!re.is_match("cpu.user"));
    }

    #[test]
    fn test_brace_alternation() {
        let re = matcher("{a,b}.x");
        assert!(re.is_match("a.x"));
        assert!(re.is_match("b.x"));
        assert!(!re.is_match("c.x"));
        assert!(!re.is_match("ab.x"));
    }

    #[test]
    fn test_question_mark_stops_at_separator() {
        let re = matcher("a?b");
        assert!(re.is_match("acb"));
        assert!(!re.is_match("a.b"));
        assert!(!re.is_match("ab"));
        assert!(!re.is_match("accb"));
    }

    #[test]
    fn test_plain_paths_only_escape_separators() {
        for path in ["servers.web-01.cpu_user", "a", "app.latency.p99"] {
            let translated = translate(path).unwrap();
            assert_eq!(translated.as_str(), path.replace('.', r"\."));
            assert!(translated.compile().unwrap().is_match(path));
        }
    }

    #[test]
    fn test_match_is_whole_path() {
        let re = matcher("app.*.latency");
        assert!(re.is_match("app.web.latency"));
        assert!(!re.is_match("app.web.latency.p99"));
        assert!(!re.is_match("myapp.web.latency"));
    }

    #[test]
    fn test_comma_outside_braces_is_literal() {
        let re = matcher("a,b");
        assert!(re.is_match("a,b"));
        assert!(!re.is_match("a"));
    }

    #[test]
    fn test_regex_operators_match_literally() {
        let re = matcher("a+b.(c)|d");
        assert!(re.is_match("a+b.(c)|d"));
        assert!(!re.is_match("aab.c"));

        let re = matcher("x<1>.y~z");
        assert!(re.is_match("x<1>.y~z"));
    }

    #[test]
    fn test_malformed_braces_are_rejected() {
        assert_eq!(
            translate("a.{b,c"),
            Err(PatternError::UnclosedBrace { position: 2 })
        );
        assert_eq!(
            translate("a.b}"),
            Err(PatternError::UnmatchedBrace { position: 3 })
        );
        assert_eq!(
            translate("{a,{b,c}}"),
            Err(PatternError::NestedBrace { position: 3 })
        );
        assert_eq!(translate(""), Err(PatternError::Empty));
    }

    #[test]
    fn test_translation_is_deterministic() {
        assert_eq!(translate("a.{b,c}.*").unwrap(), translate("a.{b,c}.*").unwrap());
    }

    #[test]
    fn test_wildcard_pattern_keeps_glob_and_regex() {
        let pattern: WildcardPattern = "app.*.latency".parse().unwrap();
        assert_eq!(pattern.as_str(), "app.*.latency");
        assert_eq!(pattern.regex().as_str(), r"app\..*\.latency");
        assert_eq!(pattern.to_string(), "app.*.latency");
    }
}
