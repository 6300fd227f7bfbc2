/*
 * lexer.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Reference lexer: document markup to fragments.
//!
//! Every fragment keeps the exact source slice it came from, so emitting the
//! fragments in order reproduces the input byte for byte. Character data
//! inside the file type's text element is split on delimiters into
//! [`Fragment::Content`] and [`Fragment::Placeholder`] parts.
//!
//! Delimiters are only recognised within a single text node; a placeholder
//! spread over several runs is reported as unclosed.

use crate::error::{TemplateError, TemplateResult};
use crate::file_type::FileTypeConfig;
use crate::fragment::{Fragment, TagPosition};
use crate::options::Delimiters;
use quick_xml::escape::{escape, unescape};
use quick_xml::events::Event;
use quick_xml::reader::Reader;

/// Lex a document given as bytes. Non UTF-8 input is rejected.
pub fn lex_bytes(
    xml: &[u8],
    config: &FileTypeConfig,
    delimiters: &Delimiters,
) -> TemplateResult<Vec<Fragment>> {
    let text = std::str::from_utf8(xml).map_err(|e| TemplateError::ContentMustBeString {
        kind: format!("bytes that are not valid UTF-8 ({})", e),
    })?;
    lex(text, config, delimiters)
}

/// Lex a document into fragments.
///
/// Malformed markup fails immediately with `file_has_invalid_xml`. Delimiter
/// problems are collected over the whole document and reported together.
pub fn lex(
    xml: &str,
    config: &FileTypeConfig,
    delimiters: &Delimiters,
) -> TemplateResult<Vec<Fragment>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text_start = false;
    reader.config_mut().trim_text_end = false;

    let splitter = DelimiterSplitter::new(delimiters);
    let mut fragments = Vec::new();
    let mut errors = Vec::new();
    let mut depth = 0usize;
    let mut in_text_tag = false;

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader.read_event().map_err(|_| TemplateError::XmlInvalid {
            content: excerpt(xml, start),
            offset: start,
        })?;
        let end = reader.buffer_position() as usize;
        let markup = xml.get(start..end).unwrap_or_default().to_string();

        match event {
            Event::Start(e) => {
                depth += 1;
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                in_text_tag = name == config.text_tag;
                if name == config.paragraph_tag {
                    fragments.push(Fragment::ParagraphStart {
                        name,
                        markup,
                        offset: start,
                    });
                } else {
                    fragments.push(Fragment::Tag {
                        name,
                        position: TagPosition::Start,
                        markup,
                        offset: start,
                    });
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                in_text_tag = false;
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == config.paragraph_tag {
                    fragments.push(Fragment::ParagraphEnd {
                        name,
                        markup,
                        offset: start,
                    });
                } else {
                    fragments.push(Fragment::Tag {
                        name,
                        position: TagPosition::End,
                        markup,
                        offset: start,
                    });
                }
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                fragments.push(Fragment::Tag {
                    name,
                    position: TagPosition::SelfClosing,
                    markup,
                    offset: start,
                });
            }
            Event::Text(_) if in_text_tag => {
                splitter.split(&markup, start, &mut fragments, &mut errors)?;
            }
            Event::Eof => break,
            _ => fragments.push(Fragment::Text {
                text: markup,
                offset: start,
            }),
        }
    }

    if depth > 0 {
        return Err(TemplateError::XmlInvalid {
            content: excerpt(xml, xml.len().saturating_sub(40)),
            offset: xml.len(),
        });
    }

    tracing::debug!(
        fragments = fragments.len(),
        errors = errors.len(),
        "lexed document"
    );

    match TemplateError::aggregate(errors) {
        Some(err) => Err(err),
        None => Ok(fragments),
    }
}

/// A short piece of the source starting at `offset`, for diagnostics.
fn excerpt(xml: &str, offset: usize) -> String {
    xml.get(offset..)
        .unwrap_or_default()
        .chars()
        .take(40)
        .collect()
}

/// Splits escaped character data on escaped delimiters.
struct DelimiterSplitter {
    start: String,
    end: String,
}

impl DelimiterSplitter {
    fn new(delimiters: &Delimiters) -> Self {
        DelimiterSplitter {
            start: escape(delimiters.start.as_str()).into_owned(),
            end: escape(delimiters.end.as_str()).into_owned(),
        }
    }

    fn split(
        &self,
        raw: &str,
        base: usize,
        fragments: &mut Vec<Fragment>,
        errors: &mut Vec<TemplateError>,
    ) -> TemplateResult<()> {
        let mut pos = 0;
        let push_content = |fragments: &mut Vec<Fragment>, from: usize, to: usize| {
            if to > from {
                fragments.push(Fragment::Content {
                    text: raw[from..to].to_string(),
                    offset: base + from,
                });
            }
        };

        while pos < raw.len() {
            let rest = &raw[pos..];
            let next_start = rest.find(&self.start);
            let next_end = rest.find(&self.end);

            let unopened = match (next_start, next_end) {
                (_, None) => None,
                (None, Some(end)) => Some(end),
                (Some(start), Some(end)) => (end < start).then_some(end),
            };
            if let Some(end) = unopened {
                let tag_end = pos + end + self.end.len();
                errors.push(TemplateError::UnopenedTag {
                    xtag: raw[pos..pos + end].to_string(),
                    context: raw[pos..tag_end].to_string(),
                    offset: base + pos + end,
                });
                push_content(fragments, pos, tag_end);
                pos = tag_end;
                continue;
            }

            let Some(start) = next_start else {
                push_content(fragments, pos, raw.len());
                break;
            };
            let open = pos + start;
            let inner = open + self.start.len();
            push_content(fragments, pos, open);
            let Some(close) = raw[inner..].find(&self.end).map(|c| inner + c) else {
                errors.push(TemplateError::UnclosedTag {
                    xtag: raw[inner..].to_string(),
                    context: raw[open..].to_string(),
                    offset: base + open,
                });
                push_content(fragments, open, raw.len());
                break;
            };
            let placeholder =
                unescape(&raw[inner..close]).map_err(|_| TemplateError::XmlInvalid {
                    content: raw[open..].to_string(),
                    offset: base + open,
                })?;
            fragments.push(Fragment::Placeholder {
                raw: placeholder.into_owned(),
                offset: base + open,
            });
            pos = close + self.end.len();
        }
        Ok(())
    }
}

/// Concatenate the output of fragments, skipping placeholders.
pub fn join_fragments(fragments: &[Fragment]) -> String {
    fragments.iter().filter_map(|f| f.output()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostic;
    use pretty_assertions::assert_eq;

    fn lex_docx(xml: &str) -> TemplateResult<Vec<Fragment>> {
        lex(xml, &FileTypeConfig::docx(), &Delimiters::default())
    }

    fn placeholders(fragments: &[Fragment]) -> Vec<&str> {
        fragments
            .iter()
            .filter_map(|f| match f {
                Fragment::Placeholder { raw, .. } => Some(raw.as_str()),
                _ => None,
            })
            .collect()
    }

    // ========================================================================
    // Fragment kinds
    // ========================================================================

    #[test]
    fn test_paragraphs_and_placeholders() {
        let xml = r#"<w:body><w:p><w:r><w:t>Hello {name}!</w:t></w:r></w:p></w:body>"#;
        let fragments = lex_docx(xml).unwrap();

        assert!(matches!(&fragments[1], Fragment::ParagraphStart { name, .. } if name == "w:p"));
        assert_eq!(placeholders(&fragments), vec!["name"]);

        let contents: Vec<_> = fragments
            .iter()
            .filter_map(|f| match f {
                Fragment::Content { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(contents, vec!["Hello ", "!"]);
    }

    #[test]
    fn test_placeholder_offset_points_at_delimiter() {
        let xml = "<w:t>ab{x}</w:t>";
        let fragments = lex_docx(xml).unwrap();
        let offset = fragments
            .iter()
            .find(|f| matches!(f, Fragment::Placeholder { .. }))
            .map(|f| f.offset())
            .unwrap();
        assert_eq!(&xml[offset..offset + 3], "{x}");
    }

    #[test]
    fn test_text_outside_text_tag_is_not_split() {
        let fragments = lex_docx("<w:body><w:instr>{x}</w:instr></w:body>").unwrap();
        assert!(placeholders(&fragments).is_empty());
    }

    #[test]
    fn test_placeholder_is_unescaped() {
        let fragments = lex_docx("<w:t>{a &amp; b}</w:t>").unwrap();
        assert_eq!(placeholders(&fragments), vec!["a & b"]);
    }

    #[test]
    fn test_custom_delimiters() {
        let fragments = lex(
            "<w:t>[[name]] {kept}</w:t>",
            &FileTypeConfig::docx(),
            &Delimiters::new("[[", "]]"),
        )
        .unwrap();
        assert_eq!(placeholders(&fragments), vec!["name"]);
    }

    // ========================================================================
    // Round trip
    // ========================================================================

    #[test]
    fn test_round_trip_without_tags() {
        let xml = "<?xml version=\"1.0\"?>\n<w:document><!-- c --><w:p w:rsidR=\"1\">\n  <w:r><w:t xml:space=\"preserve\"> a &lt; b </w:t></w:r><w:br/></w:p></w:document>";
        let fragments = lex_docx(xml).unwrap();
        assert_eq!(join_fragments(&fragments), xml);
    }

    // ========================================================================
    // Errors
    // ========================================================================

    #[test]
    fn test_unopened_tag() {
        let err = lex_docx("<w:t>name}</w:t>").unwrap_err();
        assert_eq!(err.id(), "unopened_tag");
        assert_eq!(err.properties()["xtag"], "name");
    }

    #[test]
    fn test_unclosed_tag() {
        let err = lex_docx("<w:t>{name</w:t>").unwrap_err();
        assert_eq!(err.id(), "unclosed_tag");
        assert_eq!(err.properties()["context"], "{name");
    }

    #[test]
    fn test_delimiter_errors_are_collected() {
        let err = lex_docx("<w:p><w:t>a}</w:t></w:p><w:p><w:t>{b</w:t></w:p>").unwrap_err();
        assert_eq!(err.id(), "multi_error");
        let ids: Vec<_> = err.errors().iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec!["unopened_tag", "unclosed_tag"]);
    }

    #[test]
    fn test_invalid_xml() {
        let err = lex_docx("<w:p><w:t>x</w:p>").unwrap_err();
        assert_eq!(err.id(), "file_has_invalid_xml");
    }

    #[test]
    fn test_unterminated_document() {
        let err = lex_docx("<w:body><w:p>").unwrap_err();
        assert_eq!(err.id(), "file_has_invalid_xml");
    }

    #[test]
    fn test_non_utf8_bytes() {
        let err = lex_bytes(
            &[0x3c, 0xff, 0x3e],
            &FileTypeConfig::docx(),
            &Delimiters::default(),
        )
        .unwrap_err();
        assert_eq!(err.id(), "xmltemplater_content_must_be_string");
    }
}
