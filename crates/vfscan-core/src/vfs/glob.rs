//! Shell-style address globs used by reset operations
//!
//! Same dialect as SQLite `GLOB`: `*`, `?` and `[...]` classes with ranges,
//! negated only by a leading `^`. A `]` right after the opening bracket (or
//! after `^`) is a member, not the end. There is no escape character, and an
//! unterminated class matches nothing. Case-sensitive, matched against the
//! whole printed address.

use regex::Regex;

use crate::error::{Result, ScanError};

use super::VirtualAddress;

#[derive(Debug, Clone)]
enum Matcher {
    Any,
    Never,
    Pattern(Regex),
}

#[derive(Debug, Clone)]
pub struct AddressGlob {
    pattern: String,
    matcher: Matcher,
}

impl AddressGlob {
    pub fn new(pattern: &str) -> Result<Self> {
        let matcher = match translate(pattern) {
            Some(source) => Matcher::Pattern(Regex::new(&source).map_err(|e| {
                ScanError::Config(format!("invalid address glob {:?}: {}", pattern, e))
            })?),
            None => Matcher::Never,
        };
        Ok(Self {
            pattern: pattern.to_string(),
            matcher,
        })
    }

    /// Matches every address
    pub fn any() -> Self {
        Self {
            pattern: "*".to_string(),
            matcher: Matcher::Any,
        }
    }

    pub fn matches(&self, address: &VirtualAddress) -> bool {
        match &self.matcher {
            Matcher::Any => true,
            Matcher::Never => false,
            Matcher::Pattern(regex) => regex.is_match(address.as_str()),
        }
    }

    /// The pattern as written, suitable for SQLite `GLOB`
    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

fn escaped(c: char) -> String {
    regex::escape(c.encode_utf8(&mut [0; 4]))
}

/// Regex source for a glob, or `None` when no string can match it
fn translate(pattern: &str) -> Option<String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^");
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str("(?s:.*)"),
            '?' => out.push_str("(?s:.)"),
            '[' => {
                let (class, next) = class(&chars, i + 1)?;
                out.push_str(&class);
                i = next;
                continue;
            }
            c => out.push_str(&escaped(c)),
        }
        i += 1;
    }
    out.push('$');
    Some(out)
}

/// Translate the class body starting at `start` (just past `[`). Returns the
/// regex for one character and the index after the closing `]`.
fn class(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut i = start;
    let negated = chars.get(i) == Some(&'^');
    if negated {
        i += 1;
    }

    let mut members = String::new();
    if chars.get(i) == Some(&']') {
        members.push_str(&escaped(']'));
        i += 1;
    }

    let mut prior: Option<char> = None;
    loop {
        let c = *chars.get(i)?;
        if c == ']' {
            break;
        }
        let next = chars.get(i + 1).copied();
        match (c, prior, next) {
            ('-', Some(lo), Some(hi)) if hi != ']' => {
                // the low end was already pushed as a member
                if lo < hi {
                    members.push_str(&format!("{}-{}", escaped(lo), escaped(hi)));
                }
                prior = None;
                i += 2;
            }
            _ => {
                members.push_str(&escaped(c));
                prior = Some(c);
                i += 1;
            }
        }
    }

    let regex = match (negated, members.is_empty()) {
        (false, true) => return None,
        (true, true) => "(?s:.)".to_string(),
        (false, false) => format!("[{}]", members),
        (true, false) => format!("[^{}]", members),
    };
    Some((regex, i + 1))
}
