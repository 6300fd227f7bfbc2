/*
 * modules/value.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The value handler: `{name}`.
//!
//! Claims every placeholder no earlier handler claimed and renders it as
//! escaped text.

use crate::ast::{TagKind, TagNode, TreeNode};
use crate::error::{TemplateError, TemplateResult};
use crate::module::TagModule;
use crate::render::{RenderContext, RenderedNode};
use crate::resolve::ResolvedEntry;
use crate::scope::ScopeManager;
use crate::value::TemplateValue;
use async_trait::async_trait;
use quick_xml::escape::partial_escape;

pub const VALUE_MODULE: &str = "value";

/// Handler for plain value tags.
#[derive(Debug, Clone, Default)]
pub struct ValueModule;

impl ValueModule {
    pub fn new() -> Self {
        ValueModule
    }

    fn claims<'n>(&self, node: &'n TreeNode) -> Option<(&'n TagNode, &'n str)> {
        match node {
            TreeNode::Tag(
                tag @ TagNode {
                    kind: TagKind::Value { expression },
                    ..
                },
            ) if tag.module == VALUE_MODULE => Some((tag, expression.as_str())),
            _ => None,
        }
    }
}

/// Characters that are not allowed anywhere in an XML 1.0 document.
fn is_corrupt(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}')
}

/// Turn a value into the markup that replaces its tag.
fn to_markup(
    value: &TemplateValue,
    tag: &TagNode,
    ctx: &RenderContext<'_>,
) -> Result<String, TemplateError> {
    let text = match value {
        TemplateValue::Null => ctx.options.null_value.clone(),
        other => other.render(),
    };
    if text.chars().any(is_corrupt) {
        return Err(TemplateError::CorruptCharacters {
            xtag: tag.raw.clone(),
            value: text,
            offset: tag.offset,
        });
    }
    let escaped = partial_escape(text.as_str()).into_owned();
    if ctx.options.linebreaks {
        return Ok(escaped.replace('\n', &ctx.config.line_break));
    }
    Ok(escaped)
}

#[async_trait]
impl TagModule for ValueModule {
    fn name(&self) -> &str {
        VALUE_MODULE
    }

    fn parse(&self, raw: &str, offset: usize) -> TemplateResult<Option<TagNode>> {
        Ok(Some(TagNode {
            module: VALUE_MODULE.to_string(),
            raw: raw.to_string(),
            offset,
            kind: TagKind::Value {
                expression: raw.to_string(),
            },
        }))
    }

    fn render(
        &self,
        node: &TreeNode,
        position: usize,
        scope: &ScopeManager<'_>,
        ctx: &RenderContext<'_>,
    ) -> TemplateResult<Option<RenderedNode>> {
        let Some((tag, expression)) = self.claims(node) else {
            return Ok(None);
        };
        let value = match scope.resolved_entry(position) {
            Some(ResolvedEntry::Value(value)) => value.clone(),
            _ => match scope.get_value(expression, tag.offset) {
                Ok(value) => value,
                Err(err) => return Ok(Some(RenderedNode::failed(vec![err]))),
            },
        };
        Ok(Some(match to_markup(&value, tag, ctx) {
            Ok(markup) => RenderedNode::new(markup),
            Err(err) => RenderedNode::failed(vec![err]),
        }))
    }

    async fn resolve(
        &self,
        node: &TreeNode,
        _position: usize,
        scope: &ScopeManager<'_>,
        _ctx: &RenderContext<'_>,
    ) -> Option<TemplateResult<ResolvedEntry>> {
        let (tag, expression) = self.claims(node)?;
        Some(
            scope
                .get_value_async(expression, tag.offset)
                .await
                .map(ResolvedEntry::Value),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostic;
    use crate::file_type::FileTypeConfig;
    use crate::module::ModuleRegistry;
    use crate::options::TemplateOptions;
    use serde_json::json;

    fn render_with(
        expression: &str,
        data: serde_json::Value,
        options: &TemplateOptions,
    ) -> RenderedNode {
        let registry = ModuleRegistry::with_builtin();
        let config = FileTypeConfig::docx();
        let ctx = RenderContext {
            registry: &registry,
            config: &config,
            options,
        };
        let data = TemplateValue::from(data);
        let scope = ScopeManager::with_default_parser(&data);
        let node = TreeNode::Tag(ValueModule.parse(expression, 0).unwrap().unwrap());
        ValueModule
            .render(&node, 0, &scope, &ctx)
            .unwrap()
            .unwrap()
    }

    fn render(expression: &str, data: serde_json::Value) -> RenderedNode {
        render_with(expression, data, &TemplateOptions::default())
    }

    #[test]
    fn test_value_is_escaped() {
        let rendered = render("name", json!({"name": "Tom & <Jerry>"}));
        assert_eq!(rendered.value, "Tom &amp; &lt;Jerry&gt;");
        assert!(rendered.errors.is_empty());
    }

    #[test]
    fn test_missing_value_uses_null_value() {
        assert_eq!(render("missing", json!({})).value, "");
        let options = TemplateOptions::default().with_null_value("N/A");
        assert_eq!(render_with("missing", json!({}), &options).value, "N/A");
    }

    #[test]
    fn test_numbers_and_booleans() {
        assert_eq!(render("n", json!({"n": 3})).value, "3");
        assert_eq!(render("b", json!({"b": false})).value, "false");
    }

    #[test]
    fn test_corrupt_characters_are_reported() {
        let rendered = render("x", json!({"x": "a\u{1}b"}));
        assert_eq!(rendered.value, "");
        assert_eq!(rendered.errors.len(), 1);
        assert_eq!(rendered.errors[0].id(), "invalid_xml_characters");
        assert!(!rendered.errors[0].is_fatal());
    }

    #[test]
    fn test_linebreaks() {
        let data = json!({"x": "a\nb"});
        assert_eq!(render("x", data.clone()).value, "a\nb");
        let options = TemplateOptions::default().with_linebreaks(true);
        assert_eq!(
            render_with("x", data, &options).value,
            "a</w:t><w:br/><w:t xml:space=\"preserve\">b"
        );
    }

    #[test]
    fn test_compile_error_is_collected() {
        let rendered = render("a..b", json!({}));
        assert_eq!(rendered.errors.len(), 1);
        assert_eq!(rendered.errors[0].id(), "scopeparser_compilation_failed");
    }
}
