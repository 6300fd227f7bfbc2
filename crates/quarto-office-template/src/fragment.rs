/*
 * fragment.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The part model: a document split into an ordered sequence of fragments.
//!
//! Fragments are produced by a lexer (see [`crate::lexer`]) and never change
//! afterwards. Emitting the output text of every fragment in order reproduces
//! the source document.

use serde::Serialize;

/// Whether a markup tag opens, closes, or opens and closes an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TagPosition {
    Start,
    End,
    SelfClosing,
}

/// One piece of a lexed document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Fragment {
    /// The start tag of a paragraph element.
    ParagraphStart {
        name: String,
        markup: String,
        offset: usize,
    },

    /// The end tag of a paragraph element.
    ParagraphEnd {
        name: String,
        markup: String,
        offset: usize,
    },

    /// Any other markup tag.
    Tag {
        name: String,
        position: TagPosition,
        markup: String,
        offset: usize,
    },

    /// Character data inside a text-bearing element.
    Content { text: String, offset: usize },

    /// Any other character data, emitted verbatim.
    Text { text: String, offset: usize },

    /// The raw text between delimiters.
    Placeholder { raw: String, offset: usize },
}

impl Fragment {
    pub fn offset(&self) -> usize {
        match self {
            Fragment::ParagraphStart { offset, .. }
            | Fragment::ParagraphEnd { offset, .. }
            | Fragment::Tag { offset, .. }
            | Fragment::Content { offset, .. }
            | Fragment::Text { offset, .. }
            | Fragment::Placeholder { offset, .. } => *offset,
        }
    }

    /// Element name for markup fragments.
    pub fn tag_name(&self) -> Option<&str> {
        match self {
            Fragment::ParagraphStart { name, .. }
            | Fragment::ParagraphEnd { name, .. }
            | Fragment::Tag { name, .. } => Some(name),
            _ => None,
        }
    }

    /// The opening/closing role of a markup fragment.
    pub fn position(&self) -> Option<TagPosition> {
        match self {
            Fragment::ParagraphStart { .. } => Some(TagPosition::Start),
            Fragment::ParagraphEnd { .. } => Some(TagPosition::End),
            Fragment::Tag { position, .. } => Some(*position),
            _ => None,
        }
    }

    /// Whether this fragment carries document content.
    pub fn is_content(&self) -> bool {
        matches!(
            self,
            Fragment::Content { .. } | Fragment::Placeholder { .. }
        )
    }

    /// The text this fragment contributes to the output.
    ///
    /// Placeholders have no output of their own; they are replaced by a
    /// handler at render time.
    pub fn output(&self) -> Option<&str> {
        match self {
            Fragment::ParagraphStart { markup, .. }
            | Fragment::ParagraphEnd { markup, .. }
            | Fragment::Tag { markup, .. } => Some(markup),
            Fragment::Content { text, .. } | Fragment::Text { text, .. } => Some(text),
            Fragment::Placeholder { .. } => None,
        }
    }

    /// Short name of the fragment kind, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Fragment::ParagraphStart { .. } => "paragraph start",
            Fragment::ParagraphEnd { .. } => "paragraph end",
            Fragment::Tag { .. } => "tag",
            Fragment::Content { .. } => "content",
            Fragment::Text { .. } => "text",
            Fragment::Placeholder { .. } => "placeholder",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let start = Fragment::ParagraphStart {
            name: "w:p".to_string(),
            markup: "<w:p>".to_string(),
            offset: 4,
        };
        assert_eq!(start.offset(), 4);
        assert_eq!(start.tag_name(), Some("w:p"));
        assert_eq!(start.position(), Some(TagPosition::Start));
        assert_eq!(start.output(), Some("<w:p>"));
        assert!(!start.is_content());

        let placeholder = Fragment::Placeholder {
            raw: "name".to_string(),
            offset: 9,
        };
        assert!(placeholder.is_content());
        assert_eq!(placeholder.output(), None);
        assert_eq!(placeholder.tag_name(), None);
    }
}
