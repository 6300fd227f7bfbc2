/*
 * template.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compiled templates.

use crate::ast::{ParsedTree, TagKind, TreeNode};
use crate::error::{Diagnostic, Offset, TemplateError, TemplateResult};
use crate::file_type::FileTypeConfig;
use crate::fragment::Fragment;
use crate::lexer::lex;
use crate::module::{ModuleRegistry, PostparseContext};
use crate::options::TemplateOptions;
use crate::postparse::postparse;
use crate::render::{RenderContext, RenderOutput, render_nodes};
use crate::resolve::{ResolvedTree, resolve_nodes};
use crate::scope::{DefaultScopeParser, ExpressionCache, ScopeManager, ScopeParser};
use crate::value::TemplateValue;
use std::fmt;
use std::sync::Arc;

/// A balanced template ready for rendering.
///
/// Compiling collects every structural and expression problem of the
/// document; a template that compiled can be rendered any number of times
/// and always produces the same output for the same data.
pub struct Template {
    tree: ParsedTree,
    registry: ModuleRegistry,
    options: TemplateOptions,
    config: FileTypeConfig,
    parser: Arc<dyn ScopeParser>,
    cache: Arc<ExpressionCache>,
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("tree", &self.tree)
            .field("registry", &self.registry)
            .field("options", &self.options)
            .field("cache", &self.cache)
            .finish()
    }
}

impl Template {
    /// Compile lexed fragments with the default expression parser.
    pub fn compile(
        fragments: Vec<Fragment>,
        registry: ModuleRegistry,
        options: TemplateOptions,
    ) -> TemplateResult<Self> {
        Self::compile_with_parser(fragments, registry, options, Arc::new(DefaultScopeParser))
    }

    /// Lex and compile an XML document.
    pub fn compile_xml(
        xml: &str,
        registry: ModuleRegistry,
        options: TemplateOptions,
    ) -> TemplateResult<Self> {
        let config = FileTypeConfig::for_file_type(options.file_type);
        let fragments = lex(xml, &config, &options.delimiters)?;
        Self::compile(fragments, registry, options)
    }

    /// Compile lexed fragments, evaluating tags with `parser`.
    pub fn compile_with_parser(
        fragments: Vec<Fragment>,
        registry: ModuleRegistry,
        options: TemplateOptions,
        parser: Arc<dyn ScopeParser>,
    ) -> TemplateResult<Self> {
        let config = FileTypeConfig::for_file_type(options.file_type);
        let parsed = registry.parse(fragments)?;

        let mut errors = Vec::new();
        let mut cache = ExpressionCache::new();
        for node in &parsed {
            let TreeNode::Tag(tag) = node else {
                continue;
            };
            let expression = match &tag.kind {
                TagKind::LoopStart(start) => &start.expression,
                TagKind::Value { expression } | TagKind::Custom { expression, .. } => expression,
                TagKind::LoopEnd { .. } => continue,
            };
            if let Err(err) = cache.compile(parser.as_ref(), expression, tag.offset) {
                errors.push(err);
            }
        }

        let ctx = PostparseContext {
            config: &config,
            options: &options,
        };
        let tree = match postparse(parsed, &registry, &ctx) {
            Ok(tree) => Some(tree),
            Err(structural) => {
                errors.extend(structural);
                None
            }
        };

        errors.sort_by_key(|e| match e.offset() {
            Some(Offset::At(o) | Offset::Range(o, _)) => o,
            None => usize::MAX,
        });
        tracing::debug!(
            file_type = %options.file_type,
            expressions = cache.len(),
            errors = errors.len(),
            "compiled template"
        );
        if let Some(err) = TemplateError::aggregate(errors) {
            return Err(err);
        }

        Ok(Template {
            tree: tree.unwrap_or_default(),
            registry,
            options,
            config,
            parser,
            cache: Arc::new(cache),
        })
    }

    pub fn tree(&self) -> &ParsedTree {
        &self.tree
    }

    pub fn options(&self) -> &TemplateOptions {
        &self.options
    }

    pub fn config(&self) -> &FileTypeConfig {
        &self.config
    }

    fn context(&self) -> RenderContext<'_> {
        RenderContext {
            registry: &self.registry,
            config: &self.config,
            options: &self.options,
        }
    }

    fn scope<'d>(&self, data: &'d TemplateValue) -> ScopeManager<'d> {
        ScopeManager::new(data, self.parser.clone(), self.cache.clone())
    }

    /// Render against data that is fully available.
    ///
    /// Deferred values are reported as errors; use [`Template::resolve`]
    /// followed by [`Template::render_resolved`] for them.
    pub fn render(&self, data: &TemplateValue) -> TemplateResult<RenderOutput> {
        let output = render_nodes(&self.tree, &self.scope(data), &self.context())?;
        tracing::debug!(
            parts = output.parts.len(),
            errors = output.errors.len(),
            "rendered template"
        );
        Ok(output)
    }

    /// Fetch every value the template needs, awaiting deferred data.
    pub async fn resolve(&self, data: &TemplateValue) -> TemplateResult<ResolvedTree> {
        let scope = self.scope(data);
        let ctx = self.context();
        let resolved = resolve_nodes(&self.tree, &scope, &ctx).await?;
        tracing::debug!(entries = resolved.len(), "resolved template");
        Ok(resolved)
    }

    /// Render with the values of a previous [`Template::resolve`].
    pub fn render_resolved(
        &self,
        data: &TemplateValue,
        resolved: &ResolvedTree,
    ) -> TemplateResult<RenderOutput> {
        let scope = self.scope(data).with_resolved(Arc::new(resolved.clone()));
        render_nodes(&self.tree, &scope, &self.context())
    }

    /// Resolve, then render.
    pub async fn render_async(&self, data: &TemplateValue) -> TemplateResult<RenderOutput> {
        let resolved = self.resolve(data).await?;
        self.render_resolved(data, &resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn compile(xml: &str) -> TemplateResult<Template> {
        Template::compile_xml(xml, ModuleRegistry::with_builtin(), TemplateOptions::default())
    }

    fn doc(body: &str) -> String {
        format!("<w:document><w:body>{}</w:body></w:document>", body)
    }

    fn para(text: &str) -> String {
        format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", text)
    }

    // ========================================================================
    // Compile
    // ========================================================================

    #[test]
    fn test_compile_precompiles_expressions() {
        let template = compile(&doc(&para("{a} {b.c} {a}"))).unwrap();
        assert_eq!(template.cache.len(), 2);
    }

    #[test]
    fn test_single_error_is_not_wrapped() {
        let err = compile(&doc(&para("{#items}x"))).unwrap_err();
        assert_eq!(err.id(), "unclosed_loop");
    }

    #[test]
    fn test_errors_are_aggregated_in_document_order() {
        let err = compile(&doc(&para("{a..b}{#items}"))).unwrap_err();
        assert_eq!(err.id(), "multi_error");
        let ids: Vec<_> = err.errors().iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec!["scopeparser_compilation_failed", "unclosed_loop"]);
    }

    // ========================================================================
    // Render
    // ========================================================================

    #[test]
    fn test_render_value() {
        let template = compile(&doc(&para("Hello {name}!"))).unwrap();
        let data = TemplateValue::from(json!({"name": "World"}));
        let output = template.render(&data).unwrap();
        assert_eq!(output.to_xml(), doc(&para("Hello World!")));
    }

    #[test]
    fn test_render_async_matches_render() {
        let template = compile(&doc(&para("{#items}[{name}]{/items}"))).unwrap();
        let data = TemplateValue::from(json!({"items": [{"name": "a"}, {"name": "b"}]}));
        let sync = template.render(&data).unwrap().to_xml();
        let resolved = pollster::block_on(template.render_async(&data)).unwrap().to_xml();
        assert_eq!(sync, resolved);
        assert_eq!(sync, doc(&para("[a][b]")));
    }

    #[test]
    fn test_deferred_value_needs_resolve() {
        let template = compile(&doc(&para("{name}"))).unwrap();
        let mut map = std::collections::HashMap::new();
        map.insert(
            "name".to_string(),
            TemplateValue::deferred(async { Ok(TemplateValue::from("late")) }),
        );
        let data = TemplateValue::Map(map);

        let output = template.render(&data).unwrap();
        assert_eq!(output.errors.len(), 1);
        assert_eq!(output.errors[0].id(), "scopeparser_execution_failed");

        let output = pollster::block_on(template.render_async(&data)).unwrap();
        assert!(output.errors.is_empty());
        assert_eq!(output.to_xml(), doc(&para("late")));
    }
}
