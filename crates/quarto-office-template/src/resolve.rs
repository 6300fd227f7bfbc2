/*
 * resolve.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Asynchronous resolution.
//!
//! Before rendering data that arrives asynchronously, every tag and loop of
//! the tree is resolved: all nodes of a level are started together and their
//! results gathered in document order, whatever order they complete in. The
//! resulting [`ResolvedTree`] mirrors the balanced tree and is replayed by a
//! synchronous render afterwards.

use crate::ast::TreeNode;
use crate::error::TemplateResult;
use crate::render::RenderContext;
use crate::scope::ScopeManager;
use crate::value::TemplateValue;
use futures::future::{BoxFuture, FutureExt, try_join_all};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Resolved values of one level, keyed by node position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedTree {
    pub entries: BTreeMap<usize, ResolvedEntry>,
}

impl ResolvedTree {
    pub fn get(&self, position: usize) -> Option<&ResolvedEntry> {
        self.entries.get(&position)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What a node resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedEntry {
    /// The fully awaited value of a tag.
    Value(TemplateValue),
    /// The iterations a loop will render, with inversion already applied.
    Loop(Vec<ResolvedIteration>),
}

/// One iteration of a resolved loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedIteration {
    /// The scope value of the iteration.
    pub scope: TemplateValue,
    pub index: usize,
    pub length: usize,
    /// Resolved values of the loop body for this iteration.
    pub tree: Arc<ResolvedTree>,
}

/// Resolve one level of a balanced tree.
///
/// Fails with the first error any node reports.
pub fn resolve_nodes<'a>(
    tree: &'a [TreeNode],
    scope: &'a ScopeManager<'a>,
    ctx: &'a RenderContext<'a>,
) -> BoxFuture<'a, TemplateResult<ResolvedTree>> {
    async move {
        let tasks = tree
            .iter()
            .enumerate()
            .filter(|(_, node)| matches!(node, TreeNode::Tag(_) | TreeNode::Block(_)))
            .map(|(position, node)| async move {
                let entry = ctx.registry.resolve(node, position, scope, ctx).await;
                entry
                    .transpose()
                    .map(|entry| entry.map(|entry| (position, entry)))
            });

        let entries = try_join_all(tasks).await?;
        let tree = ResolvedTree {
            entries: entries.into_iter().flatten().collect(),
        };
        tracing::trace!(
            entries = tree.len(),
            depth = scope.depth(),
            "resolved level"
        );
        Ok(tree)
    }
    .boxed()
}
