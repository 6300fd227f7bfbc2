/*
 * file_type.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Document flavours and the markup facts the engine needs about them.
//!
//! WordprocessingML (docx) and PresentationML (pptx) differ in their element
//! names: which element is a paragraph, which one holds text, how a page
//! break or a line break is written, and which container elements must keep
//! at least one child to stay valid.

use crate::error::{TemplateError, TemplateResult};
use crate::fragment::Fragment;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A document flavour the engine can template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    #[default]
    Docx,
    Pptx,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::Docx => write!(f, "docx"),
            FileType::Pptx => write!(f, "pptx"),
        }
    }
}

const DOCX_MAIN_TYPES: &[&str] = &[
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml",
    "application/vnd.ms-word.document.macroEnabled.main+xml",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.template.main+xml",
    "application/vnd.ms-word.template.macroEnabledTemplate.main+xml",
];

const PPTX_MAIN_TYPES: &[&str] = &[
    "application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml",
    "application/vnd.ms-powerpoint.presentation.macroEnabled.main+xml",
    "application/vnd.openxmlformats-officedocument.presentationml.slide+xml",
];

/// Recognised packages that are not templated.
const UNHANDLED_MAIN_TYPES: &[(&str, &str)] = &[
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml",
        "xlsx",
    ),
    ("application/vnd.ms-excel.sheet.macroEnabled.main+xml", "xlsx"),
    ("application/vnd.oasis.opendocument.text", "odt"),
];

impl FileType {
    /// Identify the flavour of a package from its `[Content_Types].xml`.
    ///
    /// Errors with `filetype_not_handled` for known but unsupported packages
    /// (spreadsheets, OpenDocument) and `filetype_not_identified` otherwise.
    pub fn detect(content_types: &str) -> TemplateResult<FileType> {
        let declared = content_type_values(content_types)?;
        let has = |candidates: &[&str]| {
            declared
                .iter()
                .any(|value| candidates.contains(&value.as_str()))
        };

        if has(DOCX_MAIN_TYPES) {
            return Ok(FileType::Docx);
        }
        if has(PPTX_MAIN_TYPES) {
            return Ok(FileType::Pptx);
        }
        for (content_type, name) in UNHANDLED_MAIN_TYPES {
            if declared.iter().any(|value| value == content_type) {
                return Err(TemplateError::FileTypeNotHandled {
                    file_type: (*name).to_string(),
                });
            }
        }
        Err(TemplateError::FileTypeNotIdentified)
    }
}

/// Collect every `ContentType` attribute of a content types document.
fn content_type_values(xml: &str) -> TemplateResult<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut values = Vec::new();
    loop {
        let position = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"ContentType" {
                        let value = attr.unescape_value().map_err(|_| TemplateError::XmlInvalid {
                            content: xml.to_string(),
                            offset: position,
                        })?;
                        values.push(value.into_owned());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => {
                return Err(TemplateError::XmlInvalid {
                    content: xml.to_string(),
                    offset: position,
                });
            }
        }
    }
    Ok(values)
}

/// A container element that must keep at least one of some children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagShouldContain {
    pub tag: String,
    pub should_contain: Vec<String>,
    /// Markup inserted when none of the children is present.
    #[serde(default)]
    pub value: String,
    /// Drop the whole element instead of filling it.
    #[serde(default)]
    pub drop: bool,
}

/// An automatic loop expansion: a loop whose tags straddle `contains`
/// grows to the enclosing `expand` element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandRule {
    pub contains: String,
    pub expand: String,
    /// Only expand when the enclosing element holds nothing but the tags.
    #[serde(default)]
    pub only_text_in_tag: bool,
}

/// Markup facts about one document flavour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTypeConfig {
    pub file_type: FileType,
    pub paragraph_tag: String,
    /// Element whose character data may carry placeholders.
    pub text_tag: String,
    /// Break element that marks a page break when it carries
    /// `page_break_attribute`.
    pub page_break_tag: Option<String>,
    pub page_break_attribute: String,
    /// A run holding a page break.
    pub page_break_run: String,
    /// Replacement for `\n` in values when line breaks are enabled.
    pub line_break: String,
    pub tag_should_contain: Vec<TagShouldContain>,
    /// Always applied.
    pub expand_rules: Vec<ExpandRule>,
    /// Applied when paragraph loops are enabled.
    pub paragraph_loop_rules: Vec<ExpandRule>,
}

fn should_contain(tag: &str, children: &[&str], value: &str, drop: bool) -> TagShouldContain {
    TagShouldContain {
        tag: tag.to_string(),
        should_contain: children.iter().map(|c| (*c).to_string()).collect(),
        value: value.to_string(),
        drop,
    }
}

fn expand_rule(contains: &str, expand: &str, only_text_in_tag: bool) -> ExpandRule {
    ExpandRule {
        contains: contains.to_string(),
        expand: expand.to_string(),
        only_text_in_tag,
    }
}

impl FileTypeConfig {
    pub fn for_file_type(file_type: FileType) -> Self {
        match file_type {
            FileType::Docx => Self::docx(),
            FileType::Pptx => Self::pptx(),
        }
    }

    pub fn docx() -> Self {
        FileTypeConfig {
            file_type: FileType::Docx,
            paragraph_tag: "w:p".to_string(),
            text_tag: "w:t".to_string(),
            page_break_tag: Some("w:br".to_string()),
            page_break_attribute: "w:type=\"page\"".to_string(),
            page_break_run: "<w:r><w:br w:type=\"page\"/></w:r>".to_string(),
            line_break: "</w:t><w:br/><w:t xml:space=\"preserve\">".to_string(),
            tag_should_contain: vec![
                should_contain("w:tbl", &["w:tr"], "", true),
                should_contain("w:tc", &["w:p"], "<w:p></w:p>", false),
                should_contain(
                    "w:sdtContent",
                    &["w:p", "w:r", "w:commentRangeStart", "w:sdt"],
                    "<w:p></w:p>",
                    false,
                ),
            ],
            expand_rules: vec![expand_rule("w:tc", "w:tr", false)],
            paragraph_loop_rules: vec![expand_rule("w:p", "w:p", true)],
        }
    }

    pub fn pptx() -> Self {
        FileTypeConfig {
            file_type: FileType::Pptx,
            paragraph_tag: "a:p".to_string(),
            text_tag: "a:t".to_string(),
            page_break_tag: None,
            page_break_attribute: String::new(),
            page_break_run: String::new(),
            line_break: "</a:t></a:r><a:br/><a:r><a:t>".to_string(),
            tag_should_contain: vec![
                should_contain("p:txBody", &["a:p"], "<a:p></a:p>", false),
                should_contain("a:tbl", &["a:tr"], "", true),
            ],
            expand_rules: vec![expand_rule("a:tc", "a:tr", false)],
            paragraph_loop_rules: vec![expand_rule("a:p", "a:p", true)],
        }
    }

    /// The expansion rules in force, in the order they are tried.
    pub fn active_expand_rules(&self, paragraph_loop: bool) -> Vec<&ExpandRule> {
        let mut rules: Vec<&ExpandRule> = self.expand_rules.iter().collect();
        if paragraph_loop {
            rules.extend(self.paragraph_loop_rules.iter());
        }
        rules
    }

    pub fn is_page_break(&self, fragment: &Fragment) -> bool {
        let Some(break_tag) = &self.page_break_tag else {
            return false;
        };
        match fragment {
            Fragment::Tag { name, markup, .. } => {
                name == break_tag && markup.contains(&self.page_break_attribute)
            }
            _ => false,
        }
    }

    /// A paragraph containing only a page break.
    pub fn page_break_paragraph(&self) -> String {
        format!(
            "<{tag}>{run}</{tag}>",
            tag = self.paragraph_tag,
            run = self.page_break_run
        )
    }
}

impl Default for FileTypeConfig {
    fn default() -> Self {
        Self::docx()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::TagPosition;

    fn content_types(main: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/main.xml" ContentType="{}"/>
</Types>"#,
            main
        )
    }

    #[test]
    fn test_detect_docx_and_pptx() {
        assert_eq!(
            FileType::detect(&content_types(DOCX_MAIN_TYPES[0])).unwrap(),
            FileType::Docx
        );
        assert_eq!(
            FileType::detect(&content_types(PPTX_MAIN_TYPES[0])).unwrap(),
            FileType::Pptx
        );
    }

    #[test]
    fn test_detect_unhandled() {
        let err = FileType::detect(&content_types(UNHANDLED_MAIN_TYPES[0].0)).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::FileTypeNotHandled { ref file_type } if file_type == "xlsx"
        ));
    }

    #[test]
    fn test_detect_unidentified() {
        let err = FileType::detect(&content_types("text/plain")).unwrap_err();
        assert!(matches!(err, TemplateError::FileTypeNotIdentified));
    }

    #[test]
    fn test_page_break_detection() {
        let config = FileTypeConfig::docx();
        let page_break = Fragment::Tag {
            name: "w:br".to_string(),
            position: TagPosition::SelfClosing,
            markup: "<w:br w:type=\"page\"/>".to_string(),
            offset: 0,
        };
        let line_break = Fragment::Tag {
            name: "w:br".to_string(),
            position: TagPosition::SelfClosing,
            markup: "<w:br/>".to_string(),
            offset: 0,
        };
        assert!(config.is_page_break(&page_break));
        assert!(!config.is_page_break(&line_break));
        assert!(!FileTypeConfig::pptx().is_page_break(&page_break));
        assert_eq!(
            config.page_break_paragraph(),
            "<w:p><w:r><w:br w:type=\"page\"/></w:r></w:p>"
        );
    }

    #[test]
    fn test_active_expand_rules() {
        let config = FileTypeConfig::docx();
        assert_eq!(config.active_expand_rules(false).len(), 1);
        let rules = config.active_expand_rules(true);
        assert_eq!(rules[0].expand, "w:tr");
        assert_eq!(rules[1].expand, "w:p");
        assert!(rules[1].only_text_in_tag);
    }
}
