/*
 * ast.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Parsed template types.
//!
//! Handlers turn placeholders into [`TagNode`]s. The balancer then pairs loop
//! tags and nests their bodies, producing a [`ParsedTree`] in which every pair
//! has become one [`Block`]. Each node keeps the byte offset of its source for
//! error reporting.

use crate::fragment::Fragment;
use serde::Serialize;

/// Where a loop expands to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ExpandTo {
    /// Decided by the file type's auto-expansion rules.
    Auto,
    /// The nearest enclosing element with this name, as in `{-w:tr rows}`.
    Tag(String),
}

/// The opening half of a loop: `{#items}`, `{^items}` or `{-w:p items}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopStart {
    /// Expression the loop iterates over.
    pub expression: String,
    /// `true` for `{^items}`: render once when the value is falsy.
    pub inverted: bool,
    pub expand_to: ExpandTo,
    /// Set by postparse when a trailing page break was trimmed from the body.
    pub has_page_break: bool,
    /// Output of a loop that does not execute. `None` means empty.
    pub empty_value: Option<String>,
}

impl LoopStart {
    pub fn new(expression: impl Into<String>) -> Self {
        LoopStart {
            expression: expression.into(),
            inverted: false,
            expand_to: ExpandTo::Auto,
            has_page_break: false,
            empty_value: None,
        }
    }

    pub fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }

    pub fn with_expand_to(mut self, tag: impl Into<String>) -> Self {
        self.expand_to = ExpandTo::Tag(tag.into());
        self
    }

    pub fn with_empty_value(mut self, value: Option<String>) -> Self {
        self.empty_value = value;
        self
    }
}

/// Role of a tag in pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PairLocation {
    Start,
    End,
}

/// What a tag means.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TagKind {
    LoopStart(LoopStart),
    LoopEnd { expression: String },
    /// Plain substitution: `{name}`.
    Value { expression: String },
    /// A tag claimed by a third-party handler.
    Custom {
        name: String,
        expression: String,
        location: Option<PairLocation>,
    },
}

/// A placeholder claimed by a handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagNode {
    /// Name of the handler that claimed the placeholder.
    pub module: String,
    /// The placeholder text as written.
    pub raw: String,
    pub offset: usize,
    pub kind: TagKind,
}

impl TagNode {
    /// The expression this tag evaluates, if any.
    pub fn expression(&self) -> Option<&str> {
        match &self.kind {
            TagKind::LoopStart(start) => Some(&start.expression),
            TagKind::LoopEnd { expression }
            | TagKind::Value { expression }
            | TagKind::Custom { expression, .. } => Some(expression),
        }
    }

    pub fn pair_location(&self) -> Option<PairLocation> {
        match &self.kind {
            TagKind::LoopStart(_) => Some(PairLocation::Start),
            TagKind::LoopEnd { .. } => Some(PairLocation::End),
            TagKind::Custom { location, .. } => *location,
            TagKind::Value { .. } => None,
        }
    }

    pub fn as_loop_start(&self) -> Option<&LoopStart> {
        match &self.kind {
            TagKind::LoopStart(start) => Some(start),
            _ => None,
        }
    }

    /// Short name of the tag kind, used in diagnostics.
    pub fn kind_name(&self) -> &str {
        match &self.kind {
            TagKind::LoopStart(_) => "loop start",
            TagKind::LoopEnd { .. } => "loop end",
            TagKind::Value { .. } => "value",
            TagKind::Custom { name, .. } => name,
        }
    }
}

/// A paired loop with its body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    /// The opening tag. Its `has_page_break` flag reflects postparse.
    pub tag: TagNode,
    /// Offset of the closing tag.
    pub end_offset: usize,
    /// Element the loop was expanded to, `None` when it stayed in place.
    pub expanded_to: Option<String>,
    pub body: Vec<TreeNode>,
}

/// A node of a parsed template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TreeNode {
    /// Part of the document copied to the output.
    Fragment(Fragment),
    /// A claimed placeholder.
    Tag(TagNode),
    /// A loop and its body.
    Block(Block),
}

impl TreeNode {
    pub fn offset(&self) -> usize {
        match self {
            TreeNode::Fragment(fragment) => fragment.offset(),
            TreeNode::Tag(tag) => tag.offset,
            TreeNode::Block(block) => block.tag.offset,
        }
    }

    pub fn as_fragment(&self) -> Option<&Fragment> {
        match self {
            TreeNode::Fragment(fragment) => Some(fragment),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> Option<&TagNode> {
        match self {
            TreeNode::Tag(tag) => Some(tag),
            _ => None,
        }
    }

    /// Whether this node carries document content.
    ///
    /// Every claimed tag counts as content, as do blocks.
    pub fn is_content(&self) -> bool {
        match self {
            TreeNode::Fragment(fragment) => fragment.is_content(),
            TreeNode::Tag(_) | TreeNode::Block(_) => true,
        }
    }
}

/// A template after balancing.
pub type ParsedTree = Vec<TreeNode>;

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(kind: TagKind) -> TagNode {
        TagNode {
            module: "loop".to_string(),
            raw: "#items".to_string(),
            offset: 7,
            kind,
        }
    }

    #[test]
    fn test_pair_locations() {
        assert_eq!(
            tag(TagKind::LoopStart(LoopStart::new("items"))).pair_location(),
            Some(PairLocation::Start)
        );
        assert_eq!(
            tag(TagKind::LoopEnd {
                expression: String::new()
            })
            .pair_location(),
            Some(PairLocation::End)
        );
        assert_eq!(
            tag(TagKind::Value {
                expression: "x".to_string()
            })
            .pair_location(),
            None
        );
    }

    #[test]
    fn test_loop_start_builders() {
        let start = LoopStart::new("rows").inverted().with_expand_to("w:tr");
        assert!(start.inverted);
        assert_eq!(start.expand_to, ExpandTo::Tag("w:tr".to_string()));
        assert!(!start.has_page_break);
    }

    #[test]
    fn test_tree_node_content() {
        let node = TreeNode::Tag(tag(TagKind::Value {
            expression: "x".to_string(),
        }));
        assert!(node.is_content());
        assert_eq!(node.offset(), 7);
        let text = TreeNode::Fragment(Fragment::Text {
            text: "\n".to_string(),
            offset: 0,
        });
        assert!(!text.is_content());
    }
}
