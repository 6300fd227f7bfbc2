/*
 * scope.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Scopes and expression evaluation.
//!
//! A [`ScopeManager`] is one frame of the scope chain: the value tags are
//! evaluated against, plus a link to the manager of the enclosing loop.
//! Lookups that find nothing fall through to enclosing frames, so a loop body
//! can still read `{title}` from the root data.
//!
//! Expressions are compiled by a pluggable [`ScopeParser`]. The default
//! parser understands `.`/`this`, dotted paths (`user.name`, `items.0`),
//! `../` prefixes and `$index`.

use crate::error::{TemplateError, TemplateResult};
use crate::resolve::{ResolvedEntry, ResolvedTree};
use crate::value::TemplateValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A compiled expression.
pub trait Expression: Send + Sync {
    /// Evaluate against `scope`, the value of `manager`'s frame.
    ///
    /// `Ok(None)` means "not found here"; the caller may then retry in the
    /// enclosing frame.
    fn get(
        &self,
        scope: &TemplateValue,
        manager: &ScopeManager<'_>,
    ) -> Result<Option<TemplateValue>, String>;

    /// Whether a missing result should be looked up in enclosing frames.
    fn falls_through(&self) -> bool {
        true
    }
}

/// Compiles tag text into expressions.
pub trait ScopeParser: Send + Sync {
    fn compile(&self, tag: &str) -> Result<Arc<dyn Expression>, String>;
}

/// The built-in expression grammar.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultScopeParser;

/// `../../a.b`: go up `up` frames, then follow `segments`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PathExpression {
    up: usize,
    segments: Vec<String>,
}

/// `$index`: position of the innermost iteration.
#[derive(Debug, Clone, Copy)]
struct IndexExpression;

impl ScopeParser for DefaultScopeParser {
    fn compile(&self, tag: &str) -> Result<Arc<dyn Expression>, String> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err("the expression is empty".to_string());
        }
        if tag == "$index" {
            return Ok(Arc::new(IndexExpression));
        }

        let mut rest = tag;
        let mut up = 0;
        while let Some(stripped) = rest.strip_prefix("../") {
            up += 1;
            rest = stripped.trim_start();
        }
        if rest == ".." {
            up += 1;
            rest = "";
        }

        let segments = if rest.is_empty() || rest == "." || rest == "this" {
            Vec::new()
        } else {
            rest.split('.')
                .map(|segment| {
                    let segment = segment.trim();
                    if segment.is_empty() {
                        Err(format!("empty path segment in \"{}\"", tag))
                    } else {
                        Ok(segment.to_string())
                    }
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Arc::new(PathExpression { up, segments }))
    }
}

impl Expression for PathExpression {
    fn get(
        &self,
        scope: &TemplateValue,
        manager: &ScopeManager<'_>,
    ) -> Result<Option<TemplateValue>, String> {
        let base = if self.up == 0 {
            scope
        } else {
            match manager.ancestor(self.up) {
                Some(ancestor) => ancestor.frame.value,
                None => return Ok(None),
            }
        };

        let mut current = base;
        for segment in &self.segments {
            current = match current {
                TemplateValue::Map(map) => match map.get(segment) {
                    Some(next) => next,
                    None => return Ok(None),
                },
                TemplateValue::List(items) => {
                    match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                        Some(next) => next,
                        None => return Ok(None),
                    }
                }
                TemplateValue::Deferred(_) => {
                    return Err(format!(
                        "cannot read \"{}\" from a value that has not been resolved",
                        segment
                    ));
                }
                _ => return Ok(None),
            };
        }
        Ok(Some(current.clone()))
    }

    fn falls_through(&self) -> bool {
        self.up == 0 && !self.segments.is_empty()
    }
}

impl Expression for IndexExpression {
    fn get(
        &self,
        _scope: &TemplateValue,
        manager: &ScopeManager<'_>,
    ) -> Result<Option<TemplateValue>, String> {
        Ok(manager
            .frame
            .position
            .map(|p| TemplateValue::Number(p.index as f64)))
    }

    fn falls_through(&self) -> bool {
        false
    }
}

/// Expressions compiled ahead of rendering, keyed by tag text.
#[derive(Clone, Default)]
pub struct ExpressionCache {
    compiled: HashMap<String, Arc<dyn Expression>>,
}

impl fmt::Debug for ExpressionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.compiled.keys().collect();
        keys.sort();
        f.debug_struct("ExpressionCache")
            .field("expressions", &keys)
            .finish()
    }
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `tag` unless it is already cached.
    pub fn compile(
        &mut self,
        parser: &dyn ScopeParser,
        tag: &str,
        offset: usize,
    ) -> TemplateResult<()> {
        if self.compiled.contains_key(tag) {
            return Ok(());
        }
        let expression = compile_expression(parser, tag, offset)?;
        self.compiled.insert(tag.to_string(), expression);
        Ok(())
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn Expression>> {
        self.compiled.get(tag).cloned()
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

fn compile_expression(
    parser: &dyn ScopeParser,
    tag: &str,
    offset: usize,
) -> TemplateResult<Arc<dyn Expression>> {
    parser
        .compile(tag)
        .map_err(|root_error| TemplateError::ScopeCompilation {
            tag: tag.to_string(),
            offset,
            root_error,
        })
}

/// Position of an iteration within its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopPosition {
    pub index: usize,
    pub length: usize,
}

/// The data of one scope level.
#[derive(Debug, Clone)]
pub struct ScopeFrame<'a> {
    pub value: &'a TemplateValue,
    /// The loop expression that produced this frame; `None` for the root.
    pub expression: Option<String>,
    pub position: Option<LoopPosition>,
}

/// One level of the scope chain.
///
/// Managers for loop iterations are created with
/// [`ScopeManager::create_sub_scope_manager`] and dropped when the iteration
/// is done; the parent is never modified.
#[derive(Clone)]
pub struct ScopeManager<'a> {
    pub frame: ScopeFrame<'a>,
    parent: Option<&'a ScopeManager<'a>>,
    parser: Arc<dyn ScopeParser>,
    cache: Arc<ExpressionCache>,
    resolved: Option<Arc<ResolvedTree>>,
}

impl fmt::Debug for ScopeManager<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeManager")
            .field("frame", &self.frame)
            .field("depth", &self.depth())
            .field("resolved", &self.resolved.is_some())
            .finish()
    }
}

impl<'a> ScopeManager<'a> {
    pub fn new(
        root: &'a TemplateValue,
        parser: Arc<dyn ScopeParser>,
        cache: Arc<ExpressionCache>,
    ) -> Self {
        ScopeManager {
            frame: ScopeFrame {
                value: root,
                expression: None,
                position: None,
            },
            parent: None,
            parser,
            cache,
            resolved: None,
        }
    }

    /// A root manager using [`DefaultScopeParser`] and no precompiled
    /// expressions.
    pub fn with_default_parser(root: &'a TemplateValue) -> Self {
        Self::new(
            root,
            Arc::new(DefaultScopeParser),
            Arc::new(ExpressionCache::new()),
        )
    }

    /// Attach the resolved values of this level.
    pub fn with_resolved(mut self, resolved: Arc<ResolvedTree>) -> Self {
        self.resolved = Some(resolved);
        self
    }

    pub fn parent(&self) -> Option<&'a ScopeManager<'a>> {
        self.parent
    }

    /// The manager `levels` frames up, `self` for zero.
    pub fn ancestor(&self, levels: usize) -> Option<&ScopeManager<'a>> {
        let mut current = self;
        for _ in 0..levels {
            current = current.parent?;
        }
        Some(current)
    }

    /// Number of enclosing frames.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent;
        while let Some(manager) = current {
            depth += 1;
            current = manager.parent;
        }
        depth
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    /// The pre-fetched entry of the node at `position` of this level.
    pub fn resolved_entry(&self, position: usize) -> Option<&ResolvedEntry> {
        self.resolved.as_ref()?.entries.get(&position)
    }

    fn expression(&self, tag: &str, offset: usize) -> TemplateResult<Arc<dyn Expression>> {
        match self.cache.get(tag) {
            Some(expression) => Ok(expression),
            None => compile_expression(self.parser.as_ref(), tag, offset),
        }
    }

    /// Evaluate `tag`, falling through to enclosing frames while the result
    /// is missing or null. Missing values are [`TemplateValue::Null`].
    ///
    /// The result may still contain deferred values; see
    /// [`ScopeManager::get_value`] and [`ScopeManager::get_value_async`].
    pub fn get_raw_value(&self, tag: &str, offset: usize) -> TemplateResult<TemplateValue> {
        let expression = self.expression(tag, offset)?;
        let mut manager = self;
        loop {
            let result = expression.get(manager.frame.value, manager).map_err(|root_error| {
                TemplateError::ScopeExecution {
                    tag: tag.to_string(),
                    offset,
                    scope: manager.frame.value.to_json(),
                    root_error,
                }
            })?;
            match result {
                Some(value) if !value.is_null() => return Ok(value),
                _ => match manager.parent {
                    Some(parent) if expression.falls_through() => manager = parent,
                    _ => return Ok(TemplateValue::Null),
                },
            }
        }
    }

    /// Evaluate `tag` for synchronous rendering.
    ///
    /// A deferred value is an execution error: asynchronous data must go
    /// through the resolve pipeline first.
    pub fn get_value(&self, tag: &str, offset: usize) -> TemplateResult<TemplateValue> {
        let value = self.get_raw_value(tag, offset)?;
        if value.contains_deferred() {
            return Err(TemplateError::ScopeExecution {
                tag: tag.to_string(),
                offset,
                scope: self.frame.value.to_json(),
                root_error: "the value is asynchronous, resolve the template before rendering"
                    .to_string(),
            });
        }
        Ok(value)
    }

    /// Evaluate `tag` and await every deferred value in the result.
    pub async fn get_value_async(&self, tag: &str, offset: usize) -> TemplateResult<TemplateValue> {
        let value = self.get_raw_value(tag, offset)?;
        if !value.contains_deferred() {
            return Ok(value);
        }
        value
            .resolve_deep()
            .await
            .map_err(|root_error| TemplateError::ScopeExecution {
                tag: tag.to_string(),
                offset,
                scope: self.frame.value.to_json(),
                root_error,
            })
    }

    /// Iterate `value` the way a loop tag does.
    ///
    /// - falsy: inverted loops visit the current scope once, others not at all
    /// - list: each element (inverted loops skip non-empty lists)
    /// - map: the map itself, once
    /// - any other truthy value: the current scope, once
    ///
    /// Returns whether `visit` was called.
    pub fn loop_over_value<E>(
        &self,
        value: &TemplateValue,
        inverted: bool,
        mut visit: impl FnMut(&TemplateValue, usize, usize) -> Result<(), E>,
    ) -> Result<bool, E> {
        if !value.is_truthy() {
            if inverted {
                visit(self.frame.value, 0, 1)?;
                return Ok(true);
            }
            return Ok(false);
        }
        if inverted {
            return Ok(false);
        }
        match value {
            TemplateValue::List(items) => {
                let length = items.len();
                for (index, item) in items.iter().enumerate() {
                    tracing::trace!(index, length, "loop iteration");
                    visit(item, index, length)?;
                }
            }
            TemplateValue::Map(_) => visit(value, 0, 1)?,
            _ => visit(self.frame.value, 0, 1)?,
        }
        Ok(true)
    }

    /// Evaluate `tag` and iterate over its value.
    pub fn loop_over(
        &self,
        tag: &str,
        offset: usize,
        inverted: bool,
        visit: impl FnMut(&TemplateValue, usize, usize) -> TemplateResult<()>,
    ) -> TemplateResult<bool> {
        let value = self.get_value(tag, offset)?;
        self.loop_over_value(&value, inverted, visit)
    }

    /// A manager for one iteration of a loop over `expression`.
    pub fn create_sub_scope_manager<'s>(
        &'s self,
        value: &'s TemplateValue,
        expression: &str,
        index: usize,
        length: usize,
    ) -> ScopeManager<'s> {
        ScopeManager {
            frame: ScopeFrame {
                value,
                expression: Some(expression.to_string()),
                position: Some(LoopPosition { index, length }),
            },
            parent: Some(self),
            parser: self.parser.clone(),
            cache: self.cache.clone(),
            resolved: None,
        }
    }
}
