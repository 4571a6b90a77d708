//! Deny-list matching for directory serving.
//!
//! A deny list is a comma separated list of shell globs. A path is denied
//! when any of its segments matches any of the globs in full.

use regex::Regex;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GlobError {
    #[error("unterminated character class")]
    UnterminatedClass,
    #[error("trailing backslash")]
    TrailingEscape,
    #[error("`{0}` must be escaped inside a character class")]
    UnescapedClassChar(char),
    #[error("invalid character range `{0}-{1}`")]
    InvalidRange(char, char),
    #[error("failed to compile: {0}")]
    Regex(String),
}

#[derive(Debug, Clone)]
struct Pattern {
    source: String,
    regex: Regex,
}

/// Compiled deny list. Malformed globs are reported once, at parse time,
/// and never match anything.
#[derive(Debug, Clone, Default)]
pub struct DenyList {
    raw: String,
    patterns: Vec<Pattern>,
}

impl DenyList {
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::default();
        }

        let patterns = raw
            .split(',')
            .map(str::trim)
            .filter_map(|source| match compile_glob(source) {
                Ok(regex) => Some(Pattern {
                    source: source.to_string(),
                    regex,
                }),
                Err(e) => {
                    log::warn!("Skipping deny pattern `{}`: {}", source, e);
                    None
                }
            })
            .collect();

        Self {
            raw: raw.to_string(),
            patterns,
        }
    }

    /// An empty list is an explicit opt-out: nothing is denied.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// `path` is matched segment by segment; bytes that are not UTF-8 only
    /// ever match wildcards.
    pub fn is_denied(&self, path: impl AsRef<[u8]>) -> bool {
        if self.patterns.is_empty() {
            return false;
        }

        segments(path.as_ref()).any(|segment| {
            let segment = String::from_utf8_lossy(segment);
            self.patterns.iter().any(|pattern| {
                let hit = pattern.regex.is_match(&segment);
                if hit {
                    log::debug!("Segment `{}` matches deny pattern `{}`", segment, pattern.source);
                }
                hit
            })
        })
    }
}

/// Re-parses `deny_list` on every call; prefer a cached [`DenyList`] on hot paths.
pub fn is_denied(path: impl AsRef<[u8]>, deny_list: &str) -> bool {
    DenyList::parse(deny_list).is_denied(path)
}

fn is_separator(b: &u8) -> bool {
    *b == b'/' || (b.is_ascii() && std::path::is_separator(char::from(*b)))
}

// Empty and `.` segments are skipped so that `*` does not deny the root.
fn segments(path: &[u8]) -> impl Iterator<Item = &[u8]> {
    path.split(is_separator)
        .filter(|segment| !segment.is_empty() && *segment != b".")
}

/// Translates a shell glob into an anchored regular expression.
pub fn compile_glob(pattern: &str) -> Result<Regex, GlobError> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            '[' => compile_class(&mut chars, &mut re)?,
            '\\' => {
                let escaped = chars.next().ok_or(GlobError::TrailingEscape)?;
                push_literal(&mut re, escaped);
            }
            _ => push_literal(&mut re, c),
        }
    }

    re.push('$');
    Regex::new(&re).map_err(|e| GlobError::Regex(e.to_string()))
}

fn compile_class(chars: &mut Peekable<Chars<'_>>, re: &mut String) -> Result<(), GlobError> {
    re.push('[');
    if chars.next_if_eq(&'^').is_some() {
        re.push('^');
    }

    let mut ranges = 0;
    loop {
        match chars.peek() {
            None => return Err(GlobError::UnterminatedClass),
            Some(']') if ranges > 0 => {
                chars.next();
                break;
            }
            _ => {}
        }

        let lo = class_char(chars)?;
        let hi = if chars.next_if_eq(&'-').is_some() {
            class_char(chars)?
        } else {
            lo
        };
        if lo > hi {
            return Err(GlobError::InvalidRange(lo, hi));
        }

        push_literal(re, lo);
        if hi != lo {
            re.push('-');
            push_literal(re, hi);
        }
        ranges += 1;
    }

    re.push(']');
    Ok(())
}

fn class_char(chars: &mut Peekable<Chars<'_>>) -> Result<char, GlobError> {
    match chars.next() {
        None => Err(GlobError::UnterminatedClass),
        Some(c @ ('-' | ']')) => Err(GlobError::UnescapedClassChar(c)),
        Some('\\') => chars.next().ok_or(GlobError::TrailingEscape),
        Some(c) => Ok(c),
    }
}

fn push_literal(re: &mut String, c: char) {
    let mut buf = [0u8; 4];
    re.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}
