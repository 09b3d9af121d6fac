//! Pattern matching for `lsearch`, `info` and `namespace children`.
//!
//! ## Match modes
//!
//! | Mode | Description |
//! |------|-------------|
//! | [`MatchMode::Glob`]   | `*`, `?`, `[a-z]` classes and `\x` escapes |
//! | [`MatchMode::Exact`]  | Byte-for-byte string equality |
//! | [`MatchMode::Regexp`] | [`regex`] crate syntax, unanchored |
//!
//! Globs are translated to an anchored regular expression once, at compile
//! time. Matching is case-sensitive in every mode.

use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

use crate::error::Exception;

// ── Public types ─────────────────────────────────────────────────────────────

/// Which matching algorithm a [`Pattern`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Glob,
    Exact,
    Regexp,
}

impl MatchMode {
    /// Parse an `lsearch`-style mode switch.
    pub fn from_switch(s: &str) -> Option<MatchMode> {
        match s {
            "-glob" => Some(MatchMode::Glob),
            "-exact" => Some(MatchMode::Exact),
            "-regexp" => Some(MatchMode::Regexp),
            _ => None,
        }
    }
}

/// Error returned when a pattern cannot be compiled.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("couldn't compile regular expression pattern: {0}")]
    InvalidRegex(#[from] regex::Error),
    #[error("couldn't compile glob pattern \"{0}\"")]
    InvalidGlob(String),
}

impl From<PatternError> for Exception {
    fn from(e: PatternError) -> Self {
        Exception::error(e.to_string())
    }
}

#[derive(Clone)]
enum Compiled {
    Regex(Arc<Regex>),
    Exact,
}

/// A compiled pattern ready for matching.
#[derive(Clone)]
pub struct Pattern {
    src: String,
    mode: MatchMode,
    compiled: Compiled,
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pattern")
            .field("src", &self.src)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Pattern {
    /// Compile `src` using `mode`.
    pub fn new(src: &str, mode: MatchMode) -> Result<Self, PatternError> {
        let compiled = match mode {
            MatchMode::Exact => Compiled::Exact,
            MatchMode::Regexp => Compiled::Regex(Arc::new(Regex::new(src)?)),
            MatchMode::Glob => {
                let re = Regex::new(&glob_to_regex(src))
                    .map_err(|_| PatternError::InvalidGlob(src.to_owned()))?;
                Compiled::Regex(Arc::new(re))
            }
        };
        Ok(Self { src: src.to_owned(), mode, compiled })
    }

    /// Shorthand for a glob pattern.
    pub fn glob(src: &str) -> Result<Self, PatternError> {
        Self::new(src, MatchMode::Glob)
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Returns `true` if this pattern matches `text`.
    pub fn matches(&self, text: &str) -> bool {
        match &self.compiled {
            Compiled::Regex(re) => re.is_match(text),
            Compiled::Exact => self.src == text,
        }
    }
}

// ── Glob translation ─────────────────────────────────────────────────────────

/// Translate a glob into an anchored regular expression.
///
/// Classes have no negation; ranges may be given in either order. An
/// unterminated `[` class runs to the end of the pattern and a trailing
/// lone `\` matches a literal backslash.
pub fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push_str("(?s)^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                while chars.peek() == Some(&'*') {
                    chars.next();
                }
                out.push_str(".*");
            }
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(esc) => push_literal(&mut out, esc),
                None => out.push_str(r"\\"),
            },
            '[' => {
                let mut class = String::new();
                while let Some(lo) = chars.next() {
                    if lo == ']' {
                        break;
                    }
                    if chars.peek() != Some(&'-') {
                        push_class_literal(&mut class, lo);
                        continue;
                    }
                    chars.next();
                    match chars.next() {
                        Some(hi) => {
                            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                            push_class_literal(&mut class, lo);
                            class.push('-');
                            push_class_literal(&mut class, hi);
                        }
                        None => {
                            push_class_literal(&mut class, lo);
                            push_class_literal(&mut class, '-');
                        }
                    }
                }
                if class.is_empty() {
                    // "[]" matches nothing.
                    out.push_str(r"[^\s\S]");
                } else {
                    out.push('[');
                    out.push_str(&class);
                    out.push(']');
                }
            }
            other => push_literal(&mut out, other),
        }
    }
    out.push('$');
    out
}

fn push_literal(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

fn push_class_literal(out: &mut String, c: char) {
    if matches!(c, '\\' | '[' | ']' | '^' | '-' | '&' | '~' | '|') {
        out.push('\\');
    }
    out.push(c);
}

/// One-shot glob match.
pub fn string_match(glob: &str, text: &str) -> bool {
    Pattern::glob(glob).is_ok_and(|p| p.matches(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_wildcards() {
        assert!(string_match("*", ""));
        assert!(string_match("*", "hello world"));
        assert!(string_match("h?llo", "hello"));
        assert!(!string_match("h?llo", "hllo"));
        assert!(string_match("a*c", "abbbc"));
        assert!(!string_match("a*c", "abbbd"));
        assert!(string_match("*.tcl", "init.tcl"));
    }

    #[test]
    fn glob_is_case_sensitive_and_anchored() {
        assert!(!string_match("abc", "ABC"));
        assert!(!string_match("b", "abc"));
        assert!(string_match("a\nb", "a\nb"));
        assert!(string_match("a?b", "a\nb"));
    }

    #[test]
    fn glob_classes() {
        assert!(string_match("[a-c]x", "bx"));
        assert!(!string_match("[a-c]x", "dx"));
        assert!(string_match("[abc]", "c"));
        assert!(string_match("x[-]y", "x-y"));
        assert!(string_match("[^]", "^"));
        assert!(string_match("[c-a]", "b"));
        assert!(!string_match("[]", "x"));
    }

    #[test]
    fn glob_escapes_and_metacharacters() {
        assert!(string_match(r"a\*b", "a*b"));
        assert!(!string_match(r"a\*b", "axb"));
        assert!(string_match("a.b", "a.b"));
        assert!(!string_match("a.b", "axb"));
        assert!(string_match("(x)+", "(x)+"));
        assert!(string_match("a\\", "a\\"));
    }

    #[test]
    fn exact_and_regexp_modes() {
        let p = Pattern::new("a*", MatchMode::Exact).unwrap();
        assert!(p.matches("a*"));
        assert!(!p.matches("ab"));
        let p = Pattern::new("b+", MatchMode::Regexp).unwrap();
        assert!(p.matches("abbc"));
        assert!(Pattern::new("(", MatchMode::Regexp).is_err());
    }

    #[test]
    fn mode_switches() {
        assert_eq!(MatchMode::from_switch("-glob"), Some(MatchMode::Glob));
        assert_eq!(MatchMode::from_switch("-exact"), Some(MatchMode::Exact));
        assert_eq!(MatchMode::from_switch("-regexp"), Some(MatchMode::Regexp));
        assert_eq!(MatchMode::from_switch("-sorted"), None);
    }
}
