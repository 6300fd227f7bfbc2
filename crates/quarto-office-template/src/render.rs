/*
 * render.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Synchronous rendering.
//!
//! Walks a balanced tree against a scope. Fragments are copied to the output;
//! tags and blocks are rendered by the handler that claims them. Errors from
//! handlers are collected next to the output unless they are fatal, in which
//! case rendering stops.

use crate::ast::TreeNode;
use crate::error::{TemplateError, TemplateResult};
use crate::file_type::{FileTypeConfig, TagShouldContain};
use crate::fragment::Fragment;
use crate::module::ModuleRegistry;
use crate::options::TemplateOptions;
use crate::scope::ScopeManager;

/// Everything a handler may need while rendering or resolving.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub registry: &'a ModuleRegistry,
    pub config: &'a FileTypeConfig,
    pub options: &'a TemplateOptions,
}

/// What a handler produced for one node.
#[derive(Debug, Clone, Default)]
pub struct RenderedNode {
    pub value: String,
    pub errors: Vec<TemplateError>,
}

impl RenderedNode {
    pub fn new(value: impl Into<String>) -> Self {
        RenderedNode {
            value: value.into(),
            errors: Vec::new(),
        }
    }

    /// A node that produced nothing but errors.
    pub fn failed(errors: Vec<TemplateError>) -> Self {
        RenderedNode {
            value: String::new(),
            errors,
        }
    }
}

/// Output of a render: the rendered parts in document order, plus the
/// non-fatal errors met along the way.
#[derive(Debug, Clone, Default)]
pub struct RenderOutput {
    pub parts: Vec<String>,
    pub errors: Vec<TemplateError>,
}

impl RenderOutput {
    /// The rendered document.
    pub fn to_xml(&self) -> String {
        self.parts.concat()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// The collected errors as one error, if any.
    pub fn error(&self) -> Option<TemplateError> {
        TemplateError::aggregate(self.errors.clone())
    }

    /// The rendered document, or the collected errors.
    pub fn into_result(self) -> TemplateResult<String> {
        let xml = self.to_xml();
        match TemplateError::aggregate(self.errors) {
            Some(err) => Err(err),
            None => Ok(xml),
        }
    }
}

/// Render one level of a balanced tree.
pub fn render_nodes(
    tree: &[TreeNode],
    scope: &ScopeManager<'_>,
    ctx: &RenderContext<'_>,
) -> TemplateResult<RenderOutput> {
    let mut output = RenderOutput::default();

    for (position, node) in tree.iter().enumerate() {
        match node {
            TreeNode::Fragment(Fragment::Placeholder { raw, offset }) => {
                return Err(TemplateError::UnimplementedTagType {
                    kind: "placeholder".to_string(),
                    raw: raw.clone(),
                    offset: *offset,
                });
            }
            TreeNode::Fragment(fragment) => {
                output
                    .parts
                    .push(fragment.output().unwrap_or_default().to_string());
            }
            TreeNode::Tag(tag) if tag.pair_location().is_some() => {
                return Err(TemplateError::MalformedXml {
                    part: tag.raw.clone(),
                    offset: tag.offset,
                });
            }
            TreeNode::Tag(_) | TreeNode::Block(_) => {
                match ctx.registry.render(node, position, scope, ctx) {
                    Ok(Some(rendered)) => {
                        output.parts.push(rendered.value);
                        output.errors.extend(rendered.errors);
                    }
                    Ok(None) => return Err(unimplemented(node)),
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => output.errors.push(err),
                }
            }
        }
    }

    Ok(output)
}

fn unimplemented(node: &TreeNode) -> TemplateError {
    let (kind, tag) = match node {
        TreeNode::Block(block) => ("loop".to_string(), &block.tag),
        TreeNode::Tag(tag) => (tag.kind_name().to_string(), tag),
        TreeNode::Fragment(fragment) => {
            return TemplateError::UnimplementedTagType {
                kind: fragment.kind_name().to_string(),
                raw: String::new(),
                offset: fragment.offset(),
            };
        }
    };
    TemplateError::UnimplementedTagType {
        kind,
        raw: tag.raw.clone(),
        offset: tag.offset,
    }
}

fn is_starting(part: &str, tag: &str) -> bool {
    part.strip_prefix('<')
        .and_then(|rest| rest.strip_prefix(tag))
        .is_some_and(|rest| rest.starts_with('>') || rest.starts_with(' '))
}

fn is_ending(part: &str, tag: &str) -> bool {
    part.strip_prefix("</")
        .and_then(|rest| rest.strip_prefix(tag))
        .is_some_and(|rest| rest == ">")
}

fn is_self_closing(part: &str) -> bool {
    part.ends_with("/>")
}

/// Concatenate rendered parts, repairing containers left without a child
/// they must contain.
///
/// When an element listed in `contains` closes without any of its required
/// children, its placeholder value is inserted before the closing tag, or
/// the whole element is dropped.
pub fn join_uncorrupt(parts: &[String], contains: &[TagShouldContain]) -> String {
    if contains.is_empty() {
        return parts.concat();
    }

    let mut full = String::new();
    let mut collecting = String::new();
    let mut current: Option<usize> = None;

    'parts: for part in parts {
        if let Some(i) = current {
            let rule = &contains[i];
            if is_ending(part, &rule.tag) {
                current = None;
                if !rule.drop {
                    full.push_str(&collecting);
                    full.push_str(&rule.value);
                    full.push_str(part);
                }
                collecting.clear();
                continue;
            }
            collecting.push_str(part);
            if rule.should_contain.iter().any(|child| is_starting(part, child)) {
                current = None;
                full.push_str(&collecting);
                collecting.clear();
            }
            continue;
        }

        for (i, rule) in contains.iter().enumerate() {
            if is_starting(part, &rule.tag) && !is_self_closing(part) {
                current = Some(i);
                collecting.push_str(part);
                continue 'parts;
            }
        }
        full.push_str(part);
    }

    full.push_str(&collecting);
    full
}
