/*
 * module.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tag handlers and their registry.
//!
//! A handler ([`TagModule`]) claims placeholders, takes part in balancing and
//! renders or resolves the nodes it claimed. Every capability has a default
//! that declines, so a handler only implements what it needs.
//!
//! The [`ModuleRegistry`] keeps handlers in attachment order and dispatches
//! each capability to them in that order; the first handler that claims a
//! node wins. There is no global registry: each template owns its own.

use crate::ast::{PairLocation, TagNode, TreeNode};
use crate::error::{TemplateError, TemplateResult};
use crate::file_type::FileTypeConfig;
use crate::fragment::Fragment;
use crate::modules::{LoopModule, ValueModule};
use crate::options::TemplateOptions;
use crate::render::{RenderContext, RenderedNode};
use crate::resolve::ResolvedEntry;
use crate::scope::ScopeManager;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Version of the handler interface offered by this crate.
pub const API_VERSION: [u32; 3] = [1, 0, 0];

/// Trait through which handlers report the tags that pair up into loops.
pub const EXPAND_PAIR_TRAIT: &str = "expandPair";

/// A tag taking part in pairing, with its index in the parsed sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct PairTag {
    pub index: usize,
    pub tag: TagNode,
}

impl PairTag {
    pub fn location(&self) -> TemplateResult<PairLocation> {
        self.tag
            .pair_location()
            .ok_or_else(|| TemplateError::InvalidLocation {
                tag: self.tag.raw.clone(),
                location: "none".to_string(),
                offset: self.tag.offset,
            })
    }
}

/// Settings available while balancing.
#[derive(Debug, Clone, Copy)]
pub struct PostparseContext<'a> {
    pub config: &'a FileTypeConfig,
    pub options: &'a TemplateOptions,
}

/// A tag handler.
#[async_trait]
pub trait TagModule: Send + Sync {
    /// Name recorded on the nodes this handler claims.
    fn name(&self) -> &str;

    /// Interface version this handler was written against.
    fn required_api_version(&self) -> Option<Vec<u32>> {
        None
    }

    /// Claim a placeholder.
    fn parse(&self, _raw: &str, _offset: usize) -> TemplateResult<Option<TagNode>> {
        Ok(None)
    }

    /// Report the nodes of `parsed` taking part in trait `name`.
    fn traits(&self, _name: &str, _parsed: &[TreeNode]) -> Option<Vec<PairTag>> {
        None
    }

    /// Rewrite the body of a freshly paired loop started by `base`.
    ///
    /// Returns the new body and the rebuilt start tag.
    fn postparse(
        &self,
        _body: &[TreeNode],
        _base: &TagNode,
        _ctx: &PostparseContext<'_>,
    ) -> Option<(Vec<TreeNode>, TagNode)> {
        None
    }

    /// Render a node of the balanced tree found at `position` of its level.
    fn render(
        &self,
        _node: &TreeNode,
        _position: usize,
        _scope: &ScopeManager<'_>,
        _ctx: &RenderContext<'_>,
    ) -> TemplateResult<Option<RenderedNode>> {
        Ok(None)
    }

    /// Fetch the data a node needs before rendering.
    async fn resolve(
        &self,
        _node: &TreeNode,
        _position: usize,
        _scope: &ScopeManager<'_>,
        _ctx: &RenderContext<'_>,
    ) -> Option<TemplateResult<ResolvedEntry>> {
        None
    }
}

/// Check a handler's required interface version against [`API_VERSION`].
///
/// The major versions must be equal. The needed minor version must not
/// exceed ours, and when it is equal neither may the patch version.
pub fn check_api_version(needed: &[u32]) -> TemplateResult<()> {
    let part = |i: usize| needed.get(i).copied().unwrap_or(0);
    let error = |message: &str| TemplateError::ApiVersion {
        message: message.to_string(),
        current: API_VERSION,
        needed: needed.to_vec(),
    };

    if part(0) != API_VERSION[0] {
        return Err(error(
            "The major api version do not match, you probably have to update the template engine",
        ));
    }
    if part(1) > API_VERSION[1] {
        return Err(error(
            "The minor api version is not uptodate, you probably have to update the template engine",
        ));
    }
    if part(1) == API_VERSION[1] && part(2) > API_VERSION[2] {
        return Err(error(
            "The patch api version is not uptodate, you probably have to update the template engine",
        ));
    }
    Ok(())
}

/// Handlers of a template, in attachment order.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn TagModule>>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.modules.iter().map(|m| m.name().to_string()))
            .finish()
    }
}

impl ModuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The loop handler followed by the value handler.
    pub fn with_builtin() -> Self {
        ModuleRegistry {
            modules: vec![Arc::new(LoopModule::new()), Arc::new(ValueModule::new())],
        }
    }

    /// Add a handler after the ones already attached.
    pub fn attach(&mut self, module: Arc<dyn TagModule>) -> TemplateResult<()> {
        if self.modules.iter().any(|m| Arc::ptr_eq(m, &module)) {
            return Err(TemplateError::ModuleAlreadyAttached {
                name: module.name().to_string(),
            });
        }
        if let Some(needed) = module.required_api_version() {
            check_api_version(&needed)?;
        }
        tracing::debug!(module = module.name(), "attached module");
        self.modules.push(module);
        Ok(())
    }

    pub fn modules(&self) -> &[Arc<dyn TagModule>] {
        &self.modules
    }

    /// Offer a placeholder to each handler in turn.
    pub fn parse_placeholder(&self, raw: &str, offset: usize) -> TemplateResult<Option<TagNode>> {
        for module in &self.modules {
            if let Some(tag) = module.parse(raw, offset)? {
                return Ok(Some(tag));
            }
        }
        Ok(None)
    }

    /// Turn fragments into the flat parsed sequence.
    ///
    /// Claimed placeholders become tags; unclaimed ones stay fragments and
    /// are reported when rendered.
    pub fn parse(&self, fragments: Vec<Fragment>) -> TemplateResult<Vec<TreeNode>> {
        let mut parsed = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let claimed = match &fragment {
                Fragment::Placeholder { raw, offset } => self.parse_placeholder(raw, *offset)?,
                _ => None,
            };
            parsed.push(match claimed {
                Some(tag) => TreeNode::Tag(tag),
                None => TreeNode::Fragment(fragment),
            });
        }
        Ok(parsed)
    }

    /// Entries of trait `name` from every handler, sorted by index.
    pub fn traits(&self, name: &str, parsed: &[TreeNode]) -> Vec<PairTag> {
        let mut entries: Vec<PairTag> = self
            .modules
            .iter()
            .filter_map(|m| m.traits(name, parsed))
            .flatten()
            .collect();
        entries.sort_by_key(|entry| entry.index);
        entries
    }

    pub fn postparse(
        &self,
        body: &[TreeNode],
        base: &TagNode,
        ctx: &PostparseContext<'_>,
    ) -> Option<(Vec<TreeNode>, TagNode)> {
        self.modules
            .iter()
            .find_map(|m| m.postparse(body, base, ctx))
    }

    pub fn render(
        &self,
        node: &TreeNode,
        position: usize,
        scope: &ScopeManager<'_>,
        ctx: &RenderContext<'_>,
    ) -> TemplateResult<Option<RenderedNode>> {
        for module in &self.modules {
            if let Some(rendered) = module.render(node, position, scope, ctx)? {
                return Ok(Some(rendered));
            }
        }
        Ok(None)
    }

    pub async fn resolve(
        &self,
        node: &TreeNode,
        position: usize,
        scope: &ScopeManager<'_>,
        ctx: &RenderContext<'_>,
    ) -> Option<TemplateResult<ResolvedEntry>> {
        for module in &self.modules {
            if let Some(entry) = module.resolve(node, position, scope, ctx).await {
                return Some(entry);
            }
        }
        None
    }
}
