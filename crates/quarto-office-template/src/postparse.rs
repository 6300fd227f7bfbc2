/*
 * postparse.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tree balancing.
//!
//! Turns the flat parsed sequence into a tree. Loop tags reported through
//! the `expandPair` trait are paired outermost first; each pair is widened to
//! the element it should repeat (a table row, a paragraph, or an explicitly
//! named element), and the parts between become the body of a [`Block`].
//! Bodies are balanced recursively.
//!
//! All structural problems of a level are collected before giving up, so a
//! template author sees every misplaced tag at once.

use crate::ast::{Block, ExpandTo, PairLocation, ParsedTree, TagNode, TreeNode};
use crate::error::{Diagnostic, Offset, Side, TemplateError};
use crate::file_type::ExpandRule;
use crate::fragment::{Fragment, TagPosition};
use crate::module::{EXPAND_PAIR_TRAIT, ModuleRegistry, PairTag, PostparseContext};

/// A paired start and end tag, by their indexes in the parsed sequence.
#[derive(Debug, Clone)]
struct Pair {
    start: PairTag,
    end: PairTag,
}

/// The parts a pair will replace, inclusive.
#[derive(Debug, Clone)]
struct Range {
    left: usize,
    right: usize,
    expanded_to: Option<String>,
    pair: Pair,
}

/// Balance a flat parsed sequence.
///
/// Errors are returned in document order.
pub fn postparse(
    parsed: Vec<TreeNode>,
    registry: &ModuleRegistry,
    ctx: &PostparseContext<'_>,
) -> Result<ParsedTree, Vec<TemplateError>> {
    balance(parsed, registry, ctx).map_err(|mut errors| {
        errors.sort_by_key(|e| match e.offset() {
            Some(Offset::At(o) | Offset::Range(o, _)) => o,
            None => usize::MAX,
        });
        errors
    })
}

fn balance(
    parsed: Vec<TreeNode>,
    registry: &ModuleRegistry,
    ctx: &PostparseContext<'_>,
) -> Result<ParsedTree, Vec<TemplateError>> {
    let traits = registry.traits(EXPAND_PAIR_TRAIT, &parsed);
    if traits.is_empty() {
        return Ok(parsed);
    }

    let (pairs, mut errors) = get_pairs(&traits).map_err(|e| vec![e])?;
    let ranges = expansion_ranges(&parsed, pairs, ctx, &mut errors);
    if !errors.is_empty() {
        return Err(errors);
    }

    tracing::debug!(pairs = ranges.len(), "balancing loop tags");
    build(parsed, ranges, registry, ctx)
}

/// Pair start and end tags, outermost first.
fn get_pairs(traits: &[PairTag]) -> Result<(Vec<Pair>, Vec<TemplateError>), TemplateError> {
    let locations = traits
        .iter()
        .map(|t| t.location())
        .collect::<Result<Vec<_>, _>>()?;

    let mut pairs = Vec::new();
    let mut errors = Vec::new();
    let mut i = 0;
    while i < traits.len() {
        let first = &traits[i];
        if locations[i] == PairLocation::End {
            errors.push(TemplateError::UnopenedLoop {
                xtag: expression_of(&first.tag),
                offset: first.tag.offset,
            });
            i += 1;
            continue;
        }

        let mut open = 1i32;
        let close = (i + 1..traits.len()).find(|&j| {
            open += match locations[j] {
                PairLocation::Start => 1,
                PairLocation::End => -1,
            };
            open == 0
        });

        match close {
            Some(j) => {
                let last = &traits[j];
                let opening = expression_of(&first.tag);
                let closing = expression_of(&last.tag);
                if !closing.is_empty() && closing != opening {
                    errors.push(TemplateError::ClosingTagMismatch {
                        opening_tag: opening,
                        closing_tag: closing,
                        offset: (first.tag.offset, last.tag.offset),
                    });
                }
                pairs.push(Pair {
                    start: first.clone(),
                    end: last.clone(),
                });
                i = j + 1;
            }
            None => {
                errors.push(TemplateError::UnclosedLoop {
                    xtag: expression_of(&first.tag),
                    offset: first.tag.offset,
                });
                i += 1;
            }
        }
    }
    Ok((pairs, errors))
}

fn expression_of(tag: &TagNode) -> String {
    tag.expression().unwrap_or_default().to_string()
}

fn is_element(node: &TreeNode, element: &str, position: TagPosition) -> bool {
    match node.as_fragment() {
        Some(fragment) => {
            fragment.tag_name() == Some(element) && fragment.position() == Some(position)
        }
        None => false,
    }
}

/// Index of the nearest opening `element` enclosing `index`.
fn get_left_or_none(parsed: &[TreeNode], element: &str, index: usize) -> Option<usize> {
    let mut level = 0usize;
    for i in (0..=index.min(parsed.len().saturating_sub(1))).rev() {
        let node = &parsed[i];
        if is_element(node, element, TagPosition::Start) {
            if level == 0 {
                return Some(i);
            }
            level -= 1;
        } else if is_element(node, element, TagPosition::End) {
            level += 1;
        }
    }
    None
}

/// Index of the nearest closing `element` enclosing `index`.
fn get_right_or_none(parsed: &[TreeNode], element: &str, index: usize) -> Option<usize> {
    let mut level = 0usize;
    for (i, node) in parsed.iter().enumerate().skip(index) {
        if is_element(node, element, TagPosition::End) {
            if level == 0 {
                return Some(i);
            }
            level -= 1;
        } else if is_element(node, element, TagPosition::Start) {
            level += 1;
        }
    }
    None
}

/// Markup elements left unbalanced within `parts`: unmatched closings, then
/// unmatched openings.
fn unbalanced_elements(parts: &[TreeNode]) -> (Vec<&str>, Vec<&str>) {
    let mut opened: Vec<&str> = Vec::new();
    let mut closed: Vec<&str> = Vec::new();
    for fragment in parts.iter().filter_map(|p| p.as_fragment()) {
        let (Some(name), Some(position)) = (fragment.tag_name(), fragment.position()) else {
            continue;
        };
        match position {
            TagPosition::Start => opened.push(name),
            TagPosition::End => {
                if opened.last() == Some(&name) {
                    opened.pop();
                } else {
                    closed.push(name);
                }
            }
            TagPosition::SelfClosing => {}
        }
    }
    (closed, opened)
}

/// Split `parts` into chunks starting at each opening `element` and ending
/// after each closing one.
fn chunk_by_element<'p>(parts: &'p [TreeNode], element: &str) -> Vec<&'p [TreeNode]> {
    let mut chunks = Vec::new();
    let mut begin = 0;
    for (i, part) in parts.iter().enumerate() {
        if is_element(part, element, TagPosition::Start) && i > begin {
            chunks.push(&parts[begin..i]);
            begin = i;
        } else if is_element(part, element, TagPosition::End) {
            chunks.push(&parts[begin..=i]);
            begin = i + 1;
        }
    }
    if begin < parts.len() {
        chunks.push(&parts[begin..]);
    }
    chunks
}

fn content_count(parts: &[TreeNode]) -> usize {
    parts.iter().filter(|p| p.is_content()).count()
}

/// Decide where a loop with automatic expansion expands to.
fn expand_to_default(
    parsed: &[TreeNode],
    pair: &Pair,
    rules: &[&ExpandRule],
) -> Result<Option<String>, TemplateError> {
    let (closed, opened) = unbalanced_elements(&parsed[pair.start.index..pair.end.index]);
    if closed.len() != opened.len() {
        return Err(TemplateError::LoopPositionInvalid {
            tag: expression_of(&pair.start.tag),
            offset: (pair.start.tag.offset, pair.end.tag.offset),
        });
    }

    for rule in rules {
        let contains = rule.contains.as_str();
        if !closed.contains(&contains) && !opened.contains(&contains) {
            continue;
        }
        if rule.only_text_in_tag {
            let left = get_left_or_none(parsed, contains, pair.start.index);
            let right = get_right_or_none(parsed, contains, pair.end.index);
            let (Some(left), Some(right)) = (left, right) else {
                continue;
            };
            let chunks = chunk_by_element(&parsed[left..right], contains);
            // nothing between the paragraphs holding the tags
            if chunks.len() <= 2 {
                continue;
            }
            let (Some(first), Some(last)) = (chunks.first(), chunks.last()) else {
                continue;
            };
            if content_count(first) != 1 || content_count(last) != 1 {
                continue;
            }
        }
        return Ok(Some(rule.expand.clone()));
    }
    Ok(None)
}

/// Compute the replaced range of every pair.
fn expansion_ranges(
    parsed: &[TreeNode],
    pairs: Vec<Pair>,
    ctx: &PostparseContext<'_>,
    errors: &mut Vec<TemplateError>,
) -> Vec<Range> {
    let rules = ctx.config.active_expand_rules(ctx.options.paragraph_loop);
    let mut ranges: Vec<Range> = Vec::with_capacity(pairs.len());

    for pair in pairs {
        let expand_to = match pair.start.tag.as_loop_start().map(|s| &s.expand_to) {
            Some(ExpandTo::Tag(name)) => Some(name.clone()),
            Some(ExpandTo::Auto) => match expand_to_default(parsed, &pair, &rules) {
                Ok(target) => target,
                Err(err) => {
                    errors.push(err);
                    continue;
                }
            },
            None => None,
        };

        let (left, right) = match &expand_to {
            None => (pair.start.index, pair.end.index),
            Some(element) => {
                let left = get_left_or_none(parsed, element, pair.start.index);
                let right = get_right_or_none(parsed, element, pair.end.index);
                match (left, right) {
                    (Some(left), Some(right)) => (left, right),
                    (None, _) => {
                        errors.push(TemplateError::XmlTagNotFound {
                            element: element.clone(),
                            side: Side::Left,
                            offset: pair.start.tag.offset,
                        });
                        continue;
                    }
                    (_, None) => {
                        errors.push(TemplateError::XmlTagNotFound {
                            element: element.clone(),
                            side: Side::Right,
                            offset: pair.end.tag.offset,
                        });
                        continue;
                    }
                }
            }
        };

        if let Some(last) = ranges.last() {
            if left <= last.right {
                errors.push(TemplateError::UnbalancedLoop {
                    last_pair: (
                        expression_of(&last.pair.start.tag),
                        expression_of(&last.pair.end.tag),
                    ),
                    pair: (
                        expression_of(&pair.start.tag),
                        expression_of(&pair.end.tag),
                    ),
                    offset: (last.pair.start.tag.offset, pair.end.tag.offset),
                });
                continue;
            }
        }

        ranges.push(Range {
            left,
            right,
            expanded_to: expand_to,
            pair,
        });
    }
    ranges
}

/// Replace every range by a block and balance the bodies.
fn build(
    parsed: Vec<TreeNode>,
    ranges: Vec<Range>,
    registry: &ModuleRegistry,
    ctx: &PostparseContext<'_>,
) -> Result<ParsedTree, Vec<TemplateError>> {
    let mut tree = Vec::with_capacity(parsed.len());
    let mut errors = Vec::new();
    let mut nodes = parsed.into_iter().enumerate().peekable();

    for range in ranges {
        while let Some((_, node)) = nodes.next_if(|(i, _)| *i < range.left) {
            tree.push(node);
        }

        let mut body = Vec::new();
        while let Some((i, node)) = nodes.next_if(|(i, _)| *i <= range.right) {
            if i != range.pair.start.index && i != range.pair.end.index {
                body.push(node);
            }
        }

        let (body, base) = match registry.postparse(&body, &range.pair.start.tag, ctx) {
            Some(rewritten) => rewritten,
            None => (body, range.pair.start.tag.clone()),
        };

        match balance(body, registry, ctx) {
            Ok(body) => tree.push(TreeNode::Block(Block {
                tag: base,
                end_offset: range.pair.end.tag.offset,
                expanded_to: range.expanded_to,
                body,
            })),
            Err(inner) => errors.extend(inner),
        }
    }
    tree.extend(nodes.map(|(_, node)| node));

    if errors.is_empty() {
        Ok(tree)
    } else {
        Err(errors)
    }
}

pub(crate) fn is_paragraph_start(node: &TreeNode) -> bool {
    matches!(node, TreeNode::Fragment(Fragment::ParagraphStart { .. }))
}

pub(crate) fn is_paragraph_end(node: &TreeNode) -> bool {
    matches!(node, TreeNode::Fragment(Fragment::ParagraphEnd { .. }))
}
