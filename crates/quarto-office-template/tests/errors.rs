/*
 * errors.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Diagnostics reported while compiling and rendering templates.
 */

use pretty_assertions::assert_eq;
use quarto_office_template::{
    Diagnostic, ErrorCategory, FileType, ModuleRegistry, RenderContext, RenderedNode,
    ScopeManager, TagKind, TagModule, TagNode, Template, TemplateError, TemplateOptions,
    TemplateResult, TemplateValue, TreeNode,
};
use serde_json::json;
use std::sync::Arc;

fn doc(body: &str) -> String {
    format!("<w:document><w:body>{}</w:body></w:document>", body)
}

fn para(text: &str) -> String {
    format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", text)
}

fn compile_err(xml: &str) -> TemplateError {
    Template::compile_xml(xml, ModuleRegistry::with_builtin(), TemplateOptions::default())
        .unwrap_err()
}

fn ids(err: &TemplateError) -> Vec<&'static str> {
    err.errors().iter().map(|e| e.id()).collect()
}

// ============================================================================
// Structural errors
// ============================================================================

#[test]
fn test_unclosed_loop_reports_start_offset() {
    let xml = para("{#items}text");
    let err = compile_err(&xml);
    assert_eq!(err.id(), "unclosed_loop");
    assert_eq!(err.category(), ErrorCategory::Template);
    // the placeholder starts right after "<w:p><w:r><w:t>"
    assert_eq!(err.properties()["offset"], 15);
    assert_eq!(err.properties()["xtag"], "items");
}

#[test]
fn test_unopened_loop() {
    let err = compile_err(&para("text{/items}"));
    assert_eq!(err.id(), "unopened_loop");
}

#[test]
fn test_closing_tag_mismatch() {
    let err = compile_err(&doc(&para("{#a}x{/b}")));
    assert_eq!(err.id(), "closing_tag_does_not_match_opening_tag");
    let props = err.properties();
    assert_eq!(props["openingtag"], "a");
    assert_eq!(props["closingtag"], "b");
}

#[test]
fn test_all_problems_are_reported_together() {
    let xml = doc(&format!(
        "{}{}{}",
        para("{#a}x{/b}"),
        para("{/c}"),
        para("{#d}")
    ));
    let err = compile_err(&xml);
    assert_eq!(err.id(), "multi_error");
    assert_eq!(
        ids(&err),
        vec![
            "closing_tag_does_not_match_opening_tag",
            "unopened_loop",
            "unclosed_loop"
        ]
    );
}

#[test]
fn test_loop_straddling_a_table_is_misplaced() {
    let xml = doc(&format!(
        "<w:tbl><w:tr><w:tc>{}</w:tc></w:tr></w:tbl>{}",
        para("{#rows}"),
        para("{/rows}")
    ));
    let err = compile_err(&xml);
    assert_eq!(err.id(), "loop_position_invalid");
    assert_eq!(err.properties()["offset"].as_array().map(Vec::len), Some(2));
}

#[test]
fn test_explicit_expansion_needs_the_element() {
    let err = compile_err(&doc(&para("{-w:tr rows}x{/rows}")));
    assert_eq!(err.id(), "no_xml_tag_found_at_left");
}

#[test]
fn test_delimiter_errors() {
    let err = compile_err(&para("a}b"));
    assert_eq!(err.id(), "unopened_tag");

    let err = compile_err(&para("a{b"));
    assert_eq!(err.id(), "unclosed_tag");
}

#[test]
fn test_invalid_xml_is_internal() {
    let err = compile_err("<w:p><w:r></w:p>");
    assert_eq!(err.id(), "file_has_invalid_xml");
    assert!(err.is_fatal());
}

#[test]
fn test_expression_compile_errors_are_collected() {
    let err = compile_err(&doc(&para("{a..b} {c.}")));
    assert_eq!(
        ids(&err),
        vec![
            "scopeparser_compilation_failed",
            "scopeparser_compilation_failed"
        ]
    );
    assert_eq!(err.errors()[0].properties()["tag"], "a..b");
}

// ============================================================================
// Rendering errors
// ============================================================================

#[test]
fn test_corrupt_characters_do_not_abort_rendering() {
    let template = Template::compile_xml(
        &doc(&para("{bad}|{good}")),
        ModuleRegistry::with_builtin(),
        TemplateOptions::default(),
    )
    .unwrap();
    let output = template
        .render(&TemplateValue::from(json!({"bad": "\u{1}", "good": "ok"})))
        .unwrap();

    assert_eq!(output.to_xml(), doc(&para("|ok")));
    assert_eq!(output.errors.len(), 1);
    assert_eq!(output.errors[0].id(), "invalid_xml_characters");
    assert_eq!(output.errors[0].category(), ErrorCategory::Rendering);
    assert!(output.into_result().is_err());
}

#[test]
fn test_failing_iteration_does_not_suppress_siblings() {
    let template = Template::compile_xml(
        &doc(&para("{#items}[{v}]{/items}")),
        ModuleRegistry::with_builtin(),
        TemplateOptions::default(),
    )
    .unwrap();
    let output = template
        .render(&TemplateValue::from(json!({"items": [
            {"v": "a"},
            {"v": "\u{2}"},
            {"v": "c"},
        ]})))
        .unwrap();

    assert_eq!(output.to_xml(), doc(&para("[a][][c]")));
    assert_eq!(output.errors.len(), 1);
}

// ============================================================================
// Handlers
// ============================================================================

/// Renders `{!name}` in upper case.
struct Upper {
    version: Vec<u32>,
}

impl TagModule for Upper {
    fn name(&self) -> &str {
        "upper"
    }

    fn required_api_version(&self) -> Option<Vec<u32>> {
        Some(self.version.clone())
    }

    fn parse(&self, raw: &str, offset: usize) -> TemplateResult<Option<TagNode>> {
        Ok(raw.strip_prefix('!').map(|expression| TagNode {
            module: "upper".to_string(),
            raw: raw.to_string(),
            offset,
            kind: TagKind::Custom {
                name: "upper".to_string(),
                expression: expression.to_string(),
                location: None,
            },
        }))
    }

    fn render(
        &self,
        node: &TreeNode,
        _position: usize,
        scope: &ScopeManager<'_>,
        _ctx: &RenderContext<'_>,
    ) -> TemplateResult<Option<RenderedNode>> {
        let Some(tag) = node.as_tag().filter(|tag| tag.module == "upper") else {
            return Ok(None);
        };
        let expression = tag.expression().unwrap_or_default();
        let value = scope.get_value(expression, tag.offset)?;
        Ok(Some(RenderedNode::new(value.render().to_uppercase())))
    }
}

fn upper(version: &[u32]) -> Arc<Upper> {
    Arc::new(Upper {
        version: version.to_vec(),
    })
}

#[test]
fn test_custom_handler_runs_before_builtins() {
    let mut registry = ModuleRegistry::new();
    registry.attach(upper(&[1, 0, 0])).unwrap();
    for module in ModuleRegistry::with_builtin().modules() {
        registry.attach(module.clone()).unwrap();
    }

    let template = Template::compile_xml(
        &doc(&para("{!name} {name}")),
        registry,
        TemplateOptions::default(),
    )
    .unwrap();
    let output = template
        .render(&TemplateValue::from(json!({"name": "quarto"})))
        .unwrap();
    assert_eq!(output.to_xml(), doc(&para("QUARTO quarto")));
}

#[test]
fn test_incompatible_handler_is_rejected() {
    let mut registry = ModuleRegistry::with_builtin();
    let err = registry.attach(upper(&[2, 0, 0])).unwrap_err();
    assert_eq!(err.id(), "api_version_error");
    assert_eq!(err.category(), ErrorCategory::ApiVersion);
    assert_eq!(err.properties()["neededVersion"], json!([2, 0, 0]));
    assert_eq!(registry.modules().len(), 2);
}

#[test]
fn test_handler_attached_twice_is_rejected() {
    let mut registry = ModuleRegistry::new();
    let module = upper(&[1, 0, 0]);
    registry.attach(module.clone()).unwrap();
    let err = registry.attach(module).unwrap_err();
    assert_eq!(err.id(), "module_already_attached");
    assert_eq!(err.category(), ErrorCategory::Generic);
}

#[test]
fn test_unclaimed_placeholder_is_fatal() {
    let mut registry = ModuleRegistry::new();
    registry.attach(upper(&[1, 0, 0])).unwrap();
    let template =
        Template::compile_xml(&para("{plain}"), registry, TemplateOptions::default()).unwrap();
    let err = template.render(&TemplateValue::Null).unwrap_err();
    assert_eq!(err.id(), "unimplemented_tag_type");
}

// ============================================================================
// File types
// ============================================================================

fn content_types(main: &str) -> String {
    format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
            "<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">",
            "<Default Extension=\"xml\" ContentType=\"application/xml\"/>",
            "<Override PartName=\"/main.xml\" ContentType=\"{}\"/>",
            "</Types>"
        ),
        main
    )
}

#[test]
fn test_file_type_detection() {
    let docx = content_types(
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml",
    );
    assert_eq!(FileType::detect(&docx).unwrap(), FileType::Docx);

    let pptx = content_types(
        "application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml",
    );
    assert_eq!(FileType::detect(&pptx).unwrap(), FileType::Pptx);

    let xlsx =
        content_types("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml");
    let err = FileType::detect(&xlsx).unwrap_err();
    assert_eq!(err.id(), "filetype_not_handled");
    assert_eq!(err.properties()["fileType"], "xlsx");

    let err = FileType::detect(&content_types("text/plain")).unwrap_err();
    assert_eq!(err.id(), "filetype_not_identified");
}
