/*
 * prefix.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tag grammar matching.
//!
//! A handler recognises its tags by a prefix: either a literal string
//! (`#`, `^`, `/`) or a regular expression whose capture groups carry the
//! directive and the expression (`-w:tr items`).

use regex::Regex;

/// The part of a tag a prefix recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    /// The expression to evaluate, passed through unevaluated.
    pub expression: String,
    /// Extra information carried by the tag, such as an element name.
    pub directive: Option<String>,
}

/// A way of recognising tags.
#[derive(Debug, Clone)]
pub enum Prefix {
    /// The tag starts with this string; the rest is the expression.
    Literal(&'static str),
    /// The tag matches this pattern. With two capture groups the first is
    /// the directive and the second the expression; with one group it is the
    /// expression.
    Pattern(Regex),
}

/// Normalise raw tag text before matching.
///
/// Word processors like to insert non-breaking spaces; they are read as
/// plain spaces. Nothing is trimmed.
pub fn normalize(raw: &str) -> String {
    raw.replace('\u{a0}', " ")
}

impl Prefix {
    pub fn matches(&self, raw: &str) -> bool {
        self.extract(raw).is_some()
    }

    pub fn extract(&self, raw: &str) -> Option<Extracted> {
        let raw = normalize(raw);
        match self {
            Prefix::Literal(prefix) => raw.strip_prefix(prefix).map(|rest| Extracted {
                expression: rest.to_string(),
                directive: None,
            }),
            Prefix::Pattern(regex) => {
                let captures = regex.captures(&raw)?;
                match captures.len() {
                    3 => Some(Extracted {
                        directive: captures.get(1).map(|m| m.as_str().to_string()),
                        expression: captures.get(2)?.as_str().to_string(),
                    }),
                    2 => Some(Extracted {
                        directive: None,
                        expression: captures.get(1)?.as_str().to_string(),
                    }),
                    _ => Some(Extracted {
                        directive: None,
                        expression: raw.clone(),
                    }),
                }
            }
        }
    }
}

/// Try each prefix in order and return the first match with its index.
pub fn match_first<'p>(
    prefixes: impl IntoIterator<Item = &'p Prefix>,
    raw: &str,
) -> Option<(usize, Extracted)> {
    prefixes
        .into_iter()
        .enumerate()
        .find_map(|(index, prefix)| prefix.extract(raw).map(|e| (index, e)))
}
