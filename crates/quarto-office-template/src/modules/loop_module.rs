/*
 * modules/loop_module.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The loop handler.
//!
//! Claims `{#items}`, `{^items}`, `{/items}` and `{-w:tr items}` tags, reports
//! them for pairing, trims the paragraphs holding the tags of a paragraph
//! loop, and renders or resolves the resulting blocks.

use crate::ast::{Block, ExpandTo, LoopStart, TagKind, TagNode, TreeNode};
use crate::error::{TemplateError, TemplateResult};
use crate::module::{EXPAND_PAIR_TRAIT, PairTag, PostparseContext, TagModule};
use crate::postparse::{is_paragraph_end, is_paragraph_start};
use crate::prefix::{Prefix, match_first};
use crate::render::{RenderContext, RenderOutput, RenderedNode, join_uncorrupt, render_nodes};
use crate::resolve::{ResolvedEntry, ResolvedIteration, resolve_nodes};
use crate::scope::ScopeManager;
use crate::value::TemplateValue;
use async_trait::async_trait;
use futures::future::try_join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

pub const LOOP_MODULE: &str = "loop";

static DASH_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-([^\s]+)\s(.+)$").expect("dash prefix pattern is valid"));

/// Which tag a prefix introduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopTag {
    Start,
    Inverted,
    End,
    Dash,
}

/// Handler for loop tags.
#[derive(Debug, Clone)]
pub struct LoopModule {
    prefixes: Vec<(LoopTag, Prefix)>,
    empty_value: Option<String>,
}

impl Default for LoopModule {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopModule {
    pub fn new() -> Self {
        LoopModule {
            prefixes: vec![
                (LoopTag::Start, Prefix::Literal("#")),
                (LoopTag::Inverted, Prefix::Literal("^")),
                (LoopTag::End, Prefix::Literal("/")),
                (LoopTag::Dash, Prefix::Pattern(DASH_PREFIX.clone())),
            ],
            empty_value: None,
        }
    }

    /// Output of loops that do not execute, instead of nothing.
    pub fn with_empty_value(mut self, value: impl Into<String>) -> Self {
        self.empty_value = Some(value.into());
        self
    }

    fn start(&self, expression: String) -> LoopStart {
        LoopStart::new(expression).with_empty_value(self.empty_value.clone())
    }

    fn claims<'n>(&self, node: &'n TreeNode) -> Option<(&'n Block, &'n LoopStart)> {
        match node {
            TreeNode::Block(block) if block.tag.module == LOOP_MODULE => {
                block.tag.as_loop_start().map(|start| (block, start))
            }
            _ => None,
        }
    }

    /// Render the body once for `sub`, inserting the trimmed page break into
    /// the last iteration.
    fn render_iteration(
        &self,
        block: &Block,
        start: &LoopStart,
        sub: &ScopeManager<'_>,
        is_last: bool,
        ctx: &RenderContext<'_>,
        total: &mut RenderOutput,
    ) -> TemplateResult<()> {
        let mut rendered = render_nodes(&block.body, sub, ctx)?;
        if start.has_page_break && is_last {
            let paragraph_end = format!("</{}>", ctx.config.paragraph_tag);
            match rendered.parts.iter().rposition(|p| *p == paragraph_end) {
                Some(index) => rendered
                    .parts
                    .insert(index, ctx.config.page_break_run.clone()),
                None => rendered.parts.push(ctx.config.page_break_paragraph()),
            }
        }
        total.parts.extend(rendered.parts);
        total.errors.extend(rendered.errors);
        Ok(())
    }
}

#[async_trait]
impl TagModule for LoopModule {
    fn name(&self) -> &str {
        LOOP_MODULE
    }

    fn parse(&self, raw: &str, offset: usize) -> TemplateResult<Option<TagNode>> {
        let Some((index, extracted)) = match_first(self.prefixes.iter().map(|(_, p)| p), raw)
        else {
            return Ok(None);
        };
        let expression = extracted.expression;
        let kind = match self.prefixes[index].0 {
            LoopTag::Start => TagKind::LoopStart(self.start(expression)),
            LoopTag::Inverted => TagKind::LoopStart(self.start(expression).inverted()),
            LoopTag::End => TagKind::LoopEnd { expression },
            LoopTag::Dash => {
                let start = self.start(expression);
                TagKind::LoopStart(match extracted.directive {
                    Some(tag) => start.with_expand_to(tag),
                    None => start,
                })
            }
        };
        Ok(Some(TagNode {
            module: LOOP_MODULE.to_string(),
            raw: raw.to_string(),
            offset,
            kind,
        }))
    }

    fn traits(&self, name: &str, parsed: &[TreeNode]) -> Option<Vec<PairTag>> {
        if name != EXPAND_PAIR_TRAIT {
            return None;
        }
        Some(
            parsed
                .iter()
                .enumerate()
                .filter_map(|(index, node)| match node {
                    TreeNode::Tag(tag)
                        if tag.module == LOOP_MODULE && tag.pair_location().is_some() =>
                    {
                        Some(PairTag {
                            index,
                            tag: tag.clone(),
                        })
                    }
                    _ => None,
                })
                .collect(),
        )
    }

    fn postparse(
        &self,
        body: &[TreeNode],
        base: &TagNode,
        ctx: &PostparseContext<'_>,
    ) -> Option<(Vec<TreeNode>, TagNode)> {
        let (Some(first), Some(last)) = (body.first(), body.last()) else {
            return None;
        };
        if !is_paragraph_start(first) || !is_paragraph_end(last) {
            return None;
        }
        let start = base.as_loop_start()?;
        if base.module != LOOP_MODULE || start.expand_to != ExpandTo::Auto {
            return None;
        }

        let chunks = paragraph_chunks(body);
        if chunks.len() <= 2 {
            return None;
        }
        let first_chunk = chunks[0];
        let last_chunk = chunks[chunks.len() - 1];
        if has_content(first_chunk) || has_content(last_chunk) {
            return None;
        }

        let has_page_break = last_chunk.iter().any(|node| {
            node.as_fragment()
                .is_some_and(|fragment| ctx.config.is_page_break(fragment))
        });

        let mut start = start.clone();
        start.has_page_break = start.has_page_break || has_page_break;
        let base = TagNode {
            kind: TagKind::LoopStart(start),
            ..base.clone()
        };
        let trimmed = body[first_chunk.len()..body.len() - last_chunk.len()].to_vec();
        Some((trimmed, base))
    }

    fn render(
        &self,
        node: &TreeNode,
        position: usize,
        scope: &ScopeManager<'_>,
        ctx: &RenderContext<'_>,
    ) -> TemplateResult<Option<RenderedNode>> {
        let Some((block, start)) = self.claims(node) else {
            return Ok(None);
        };

        let mut total = RenderOutput::default();
        let executed = match scope.resolved_entry(position) {
            Some(ResolvedEntry::Loop(iterations)) => {
                for iteration in iterations {
                    let sub = scope
                        .create_sub_scope_manager(
                            &iteration.scope,
                            &start.expression,
                            iteration.index,
                            iteration.length,
                        )
                        .with_resolved(iteration.tree.clone());
                    let is_last = iteration.index + 1 == iteration.length;
                    self.render_iteration(block, start, &sub, is_last, ctx, &mut total)?;
                }
                !iterations.is_empty()
            }
            _ => {
                let result = scope.loop_over(
                    &start.expression,
                    block.tag.offset,
                    start.inverted,
                    |value, index, length| {
                        let sub = scope.create_sub_scope_manager(
                            value,
                            &start.expression,
                            index,
                            length,
                        );
                        let is_last = index + 1 == length;
                        self.render_iteration(block, start, &sub, is_last, ctx, &mut total)
                    },
                );
                match result {
                    Ok(executed) => executed,
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        total.errors.push(err);
                        return Ok(Some(RenderedNode::failed(total.errors)));
                    }
                }
            }
        };

        if !executed {
            let value = if start.has_page_break {
                ctx.config.page_break_paragraph()
            } else {
                start.empty_value.clone().unwrap_or_default()
            };
            return Ok(Some(RenderedNode {
                value,
                errors: total.errors,
            }));
        }

        Ok(Some(RenderedNode {
            value: join_uncorrupt(&total.parts, &ctx.config.tag_should_contain),
            errors: total.errors,
        }))
    }

    async fn resolve(
        &self,
        node: &TreeNode,
        _position: usize,
        scope: &ScopeManager<'_>,
        ctx: &RenderContext<'_>,
    ) -> Option<TemplateResult<ResolvedEntry>> {
        let (block, start) = self.claims(node)?;
        Some(resolve_loop(block, start, scope, ctx).await)
    }
}

async fn resolve_loop(
    block: &Block,
    start: &LoopStart,
    scope: &ScopeManager<'_>,
    ctx: &RenderContext<'_>,
) -> TemplateResult<ResolvedEntry> {
    let value = scope
        .get_value_async(&start.expression, block.tag.offset)
        .await?;

    let mut iterations: Vec<(TemplateValue, usize, usize)> = Vec::new();
    scope.loop_over_value(&value, start.inverted, |item, index, length| {
        iterations.push((item.clone(), index, length));
        Ok::<(), TemplateError>(())
    })?;
    tracing::trace!(
        expression = %start.expression,
        iterations = iterations.len(),
        "resolving loop"
    );

    let managers: Vec<ScopeManager<'_>> = iterations
        .iter()
        .map(|(item, index, length)| {
            scope.create_sub_scope_manager(item, &start.expression, *index, *length)
        })
        .collect();
    let trees = try_join_all(
        managers
            .iter()
            .map(|manager| resolve_nodes(&block.body, manager, ctx)),
    )
    .await?;
    drop(managers);

    Ok(ResolvedEntry::Loop(
        iterations
            .into_iter()
            .zip(trees)
            .map(|((scope, index, length), tree)| ResolvedIteration {
                scope,
                index,
                length,
                tree: Arc::new(tree),
            })
            .collect(),
    ))
}

/// Split a body at its top-level paragraph boundaries.
fn paragraph_chunks(body: &[TreeNode]) -> Vec<&[TreeNode]> {
    let mut chunks = Vec::new();
    let mut level = 0usize;
    let mut begin = 0;
    for (i, node) in body.iter().enumerate() {
        if is_paragraph_start(node) {
            level += 1;
            if level == 1 && i > begin {
                chunks.push(&body[begin..i]);
                begin = i;
            }
        }
        if is_paragraph_end(node) {
            level = level.saturating_sub(1);
            if level == 0 {
                chunks.push(&body[begin..=i]);
                begin = i + 1;
            }
        }
    }
    if begin < body.len() {
        chunks.push(&body[begin..]);
    }
    chunks
}

fn has_content(parts: &[TreeNode]) -> bool {
    parts.iter().any(|part| part.is_content())
}
