/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error taxonomy for template compilation and rendering.
//!
//! Every failure is one [`TemplateError`] variant with typed payload fields.
//! The [`Diagnostic`] trait exposes the stable, machine-matchable surface
//! (`id`, `explanation`, `offset`, and a JSON property bag) that callers and
//! UIs use instead of matching on message text.

use serde::Serialize;
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Position of a problem in the source document, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Offset {
    /// A single position.
    At(usize),
    /// A pair of positions, typically the opening and closing tag of a loop.
    Range(usize, usize),
}

/// Broad family of an error, mirroring how callers usually react to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCategory {
    /// Problems in the template itself; the author can fix them.
    Template,
    /// Problems with a value produced while rendering.
    Rendering,
    /// The expression grammar rejected a tag or failed while evaluating it.
    ScopeParser,
    /// Broken invariants in upstream collaborators or corrupted input.
    Internal,
    /// A handler requires a newer core.
    ApiVersion,
    /// Misuse of the registry.
    Generic,
}

/// Which side of a tag an expansion search ran towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// Errors that can occur while compiling or rendering a template.
#[derive(Debug, Clone, Error)]
pub enum TemplateError {
    /// A closing delimiter without an opening one.
    #[error("Unopened tag")]
    UnopenedTag {
        xtag: String,
        context: String,
        offset: usize,
    },

    /// An opening delimiter without a closing one.
    #[error("Unclosed tag")]
    UnclosedTag {
        xtag: String,
        context: String,
        offset: usize,
    },

    /// A loop end tag with no loop start before it.
    #[error("Unopened loop")]
    UnopenedLoop { xtag: String, offset: usize },

    /// A loop start tag that is never closed.
    #[error("Unclosed loop")]
    UnclosedLoop { xtag: String, offset: usize },

    /// `{#a}` closed by `{/b}`.
    #[error("Closing tag does not match opening tag")]
    ClosingTagMismatch {
        opening_tag: String,
        closing_tag: String,
        offset: (usize, usize),
    },

    /// Loop tags sitting at different structural levels.
    #[error("The position of the loop tags \"{tag}\" would produce invalid XML")]
    LoopPositionInvalid { tag: String, offset: (usize, usize) },

    /// Two expanded loops overlapping each other.
    #[error("Unbalanced loop tag")]
    UnbalancedLoop {
        last_pair: (String, String),
        pair: (String, String),
        offset: (usize, usize),
    },

    /// An explicit expansion target that does not enclose the tag.
    #[error("No tag \"{element}\" was found at the {side}")]
    XmlTagNotFound {
        element: String,
        side: Side,
        offset: usize,
    },

    /// A node that no registered handler knows how to render.
    #[error("Unimplemented tag type \"{kind}\"")]
    UnimplementedTagType {
        kind: String,
        raw: String,
        offset: usize,
    },

    /// Several independent problems reported together.
    #[error("Multi error")]
    Multi { errors: Vec<TemplateError> },

    /// A value containing characters that cannot appear in XML.
    #[error("There are some XML corrupt characters")]
    CorruptCharacters {
        xtag: String,
        value: String,
        offset: usize,
    },

    /// The expression grammar rejected a tag.
    #[error("Scope parser compilation failed")]
    ScopeCompilation {
        tag: String,
        offset: usize,
        root_error: String,
    },

    /// An expression failed while being evaluated.
    #[error("Scope parser execution failed")]
    ScopeExecution {
        tag: String,
        offset: usize,
        scope: serde_json::Value,
        root_error: String,
    },

    /// The parsed tree does not have the shape the renderer expects.
    #[error("Malformed xml")]
    MalformedXml { part: String, offset: usize },

    /// A pair trait entry without a start/end location.
    #[error("Location should be one of \"start\" or \"end\" (given : {location})")]
    InvalidLocation {
        tag: String,
        location: String,
        offset: usize,
    },

    /// Document content that is not text.
    #[error("Content must be a string")]
    ContentMustBeString { kind: String },

    /// A recognised package type this engine does not template.
    #[error("The filetype \"{file_type}\" is not handled by this template engine")]
    FileTypeNotHandled { file_type: String },

    /// A package whose type could not be recognised at all.
    #[error("The filetype for this file could not be identified, is this file corrupted ?")]
    FileTypeNotIdentified,

    /// Markup the lexer could not read.
    #[error("An XML file has invalid xml")]
    XmlInvalid { content: String, offset: usize },

    /// A handler requiring an incompatible core API version.
    #[error("{message}")]
    ApiVersion {
        message: String,
        current: [u32; 3],
        needed: Vec<u32>,
    },

    /// The same handler instance attached twice.
    #[error("Cannot attach a module that was already attached")]
    ModuleAlreadyAttached { name: String },
}

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Uniform, machine-readable view of an error.
pub trait Diagnostic {
    /// Stable identifier used for programmatic matching.
    fn id(&self) -> &'static str;

    /// Human-readable explanation of the problem.
    fn explanation(&self) -> String;

    /// Where the problem is, when it has a position.
    fn offset(&self) -> Option<Offset>;

    /// Every field of the diagnostic as a JSON object, including `id`,
    /// `explanation` and `offset`.
    fn properties(&self) -> serde_json::Value;
}

/// First characters of a tag, used in explanations.
fn excerpt(text: &str) -> String {
    text.chars().take(10).collect()
}

impl TemplateError {
    /// Collapse a list of errors into the error to report.
    ///
    /// Returns `None` for an empty list, the error itself for a single one,
    /// and a [`TemplateError::Multi`] otherwise.
    pub fn aggregate(mut errors: Vec<TemplateError>) -> Option<TemplateError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(TemplateError::Multi { errors }),
        }
    }

    /// The individual errors carried by this error.
    ///
    /// A multi error yields its members, anything else yields itself.
    pub fn errors(&self) -> &[TemplateError] {
        match self {
            TemplateError::Multi { errors } => errors,
            other => std::slice::from_ref(other),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            TemplateError::UnopenedTag { .. }
            | TemplateError::UnclosedTag { .. }
            | TemplateError::UnopenedLoop { .. }
            | TemplateError::UnclosedLoop { .. }
            | TemplateError::ClosingTagMismatch { .. }
            | TemplateError::LoopPositionInvalid { .. }
            | TemplateError::UnbalancedLoop { .. }
            | TemplateError::XmlTagNotFound { .. }
            | TemplateError::UnimplementedTagType { .. }
            | TemplateError::Multi { .. } => ErrorCategory::Template,
            TemplateError::CorruptCharacters { .. } => ErrorCategory::Rendering,
            TemplateError::ScopeCompilation { .. } | TemplateError::ScopeExecution { .. } => {
                ErrorCategory::ScopeParser
            }
            TemplateError::MalformedXml { .. }
            | TemplateError::InvalidLocation { .. }
            | TemplateError::ContentMustBeString { .. }
            | TemplateError::FileTypeNotHandled { .. }
            | TemplateError::FileTypeNotIdentified
            | TemplateError::XmlInvalid { .. } => ErrorCategory::Internal,
            TemplateError::ApiVersion { .. } => ErrorCategory::ApiVersion,
            TemplateError::ModuleAlreadyAttached { .. } => ErrorCategory::Generic,
        }
    }

    /// Whether this error must abort rendering instead of being collected.
    pub fn is_fatal(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
            || matches!(self, TemplateError::UnimplementedTagType { .. })
    }

    /// Kind-specific fields, merged into [`Diagnostic::properties`].
    fn kind_properties(&self) -> serde_json::Value {
        match self {
            TemplateError::UnopenedTag { xtag, context, .. }
            | TemplateError::UnclosedTag { xtag, context, .. } => {
                json!({ "xtag": xtag, "context": context })
            }
            TemplateError::UnopenedLoop { xtag, .. } | TemplateError::UnclosedLoop { xtag, .. } => {
                json!({ "xtag": xtag })
            }
            TemplateError::ClosingTagMismatch {
                opening_tag,
                closing_tag,
                ..
            } => json!({ "openingtag": opening_tag, "closingtag": closing_tag }),
            TemplateError::LoopPositionInvalid { tag, .. } => json!({ "tag": tag }),
            TemplateError::UnbalancedLoop {
                last_pair, pair, ..
            } => json!({
                "lastPair": { "left": last_pair.0, "right": last_pair.1 },
                "pair": { "left": pair.0, "right": pair.1 },
            }),
            TemplateError::XmlTagNotFound { element, side, .. } => {
                json!({ "element": element, "position": side })
            }
            TemplateError::UnimplementedTagType { kind, raw, .. } => {
                json!({ "type": kind, "xtag": raw })
            }
            TemplateError::Multi { errors } => json!({
                "errors": errors.iter().map(|e| e.properties()).collect::<Vec<_>>(),
            }),
            TemplateError::CorruptCharacters { xtag, value, .. } => {
                json!({ "xtag": xtag, "value": value })
            }
            TemplateError::ScopeCompilation {
                tag, root_error, ..
            } => json!({ "tag": tag, "rootError": root_error }),
            TemplateError::ScopeExecution {
                tag,
                scope,
                root_error,
                ..
            } => json!({ "tag": tag, "scope": scope, "rootError": root_error }),
            TemplateError::MalformedXml { part, .. } => json!({ "part": part }),
            TemplateError::InvalidLocation { tag, location, .. } => {
                json!({ "tag": tag, "location": location })
            }
            TemplateError::ContentMustBeString { kind } => json!({ "type": kind }),
            TemplateError::FileTypeNotHandled { file_type } => json!({ "fileType": file_type }),
            TemplateError::FileTypeNotIdentified => json!({}),
            TemplateError::XmlInvalid { content, .. } => json!({ "content": content }),
            TemplateError::ApiVersion {
                current, needed, ..
            } => json!({
                "currentModuleApiVersion": current,
                "neededVersion": needed,
            }),
            TemplateError::ModuleAlreadyAttached { name } => json!({ "module": name }),
        }
    }
}

impl Diagnostic for TemplateError {
    fn id(&self) -> &'static str {
        match self {
            TemplateError::UnopenedTag { .. } => "unopened_tag",
            TemplateError::UnclosedTag { .. } => "unclosed_tag",
            TemplateError::UnopenedLoop { .. } => "unopened_loop",
            TemplateError::UnclosedLoop { .. } => "unclosed_loop",
            TemplateError::ClosingTagMismatch { .. } => "closing_tag_does_not_match_opening_tag",
            TemplateError::LoopPositionInvalid { .. } => "loop_position_invalid",
            TemplateError::UnbalancedLoop { .. } => "unbalanced_loop_tags",
            TemplateError::XmlTagNotFound {
                side: Side::Left, ..
            } => "no_xml_tag_found_at_left",
            TemplateError::XmlTagNotFound {
                side: Side::Right, ..
            } => "no_xml_tag_found_at_right",
            TemplateError::UnimplementedTagType { .. } => "unimplemented_tag_type",
            TemplateError::Multi { .. } => "multi_error",
            TemplateError::CorruptCharacters { .. } => "invalid_xml_characters",
            TemplateError::ScopeCompilation { .. } => "scopeparser_compilation_failed",
            TemplateError::ScopeExecution { .. } => "scopeparser_execution_failed",
            TemplateError::MalformedXml { .. } => "malformed_xml",
            TemplateError::InvalidLocation { .. } => "invalid_location",
            TemplateError::ContentMustBeString { .. } => "xmltemplater_content_must_be_string",
            TemplateError::FileTypeNotHandled { .. } => "filetype_not_handled",
            TemplateError::FileTypeNotIdentified => "filetype_not_identified",
            TemplateError::XmlInvalid { .. } => "file_has_invalid_xml",
            TemplateError::ApiVersion { .. } => "api_version_error",
            TemplateError::ModuleAlreadyAttached { .. } => "module_already_attached",
        }
    }

    fn explanation(&self) -> String {
        match self {
            TemplateError::UnopenedTag { context, .. } => {
                format!("The tag beginning with \"{}\" is unopened", excerpt(context))
            }
            TemplateError::UnclosedTag { context, .. } => {
                format!("The tag beginning with \"{}\" is unclosed", excerpt(context))
            }
            TemplateError::UnopenedLoop { xtag, .. } => {
                format!("The loop with tag \"{}\" is unopened", xtag)
            }
            TemplateError::UnclosedLoop { xtag, .. } => {
                format!("The loop with tag \"{}\" is unclosed", xtag)
            }
            TemplateError::ClosingTagMismatch {
                opening_tag,
                closing_tag,
                ..
            } => format!(
                "The tag \"{}\" is closed by the tag \"{}\"",
                opening_tag, closing_tag
            ),
            TemplateError::LoopPositionInvalid { tag, .. } => format!(
                "The tags \"{}\" are misplaced in the document, for example one of them is in a table and the other one outside the table",
                tag
            ),
            TemplateError::UnbalancedLoop {
                last_pair, pair, ..
            } => format!(
                "Unbalanced loop tags {{#{}}}{{/{}}}{{#{}}}{{/{}}}",
                last_pair.0, last_pair.1, pair.0, pair.1
            ),
            TemplateError::XmlTagNotFound { element, side, .. } => {
                format!("No tag \"{}\" was found at the {}", element, side)
            }
            TemplateError::UnimplementedTagType { kind, raw, .. } => format!(
                "No module knows how to render the {} \"{}\"",
                kind, raw
            ),
            TemplateError::Multi { .. } => "The template has multiple errors".to_string(),
            TemplateError::CorruptCharacters { xtag, .. } => {
                format!("There are some corrupt characters for the field {}", xtag)
            }
            TemplateError::ScopeCompilation { tag, .. } => {
                format!("The scope parser for the tag \"{}\" failed to compile", tag)
            }
            TemplateError::ScopeExecution { tag, .. } => {
                format!("The scope parser for the tag {} failed to execute", tag)
            }
            TemplateError::MalformedXml { part, .. } => {
                format!("The part \"{}\" should not appear in a balanced tree", part)
            }
            TemplateError::InvalidLocation { tag, .. } => {
                format!("The tag \"{}\" takes part in pairing but has no location", tag)
            }
            TemplateError::ContentMustBeString { kind } => {
                format!("The document content must be a string, got {}", kind)
            }
            TemplateError::FileTypeNotHandled { file_type } => format!(
                "The file you are trying to generate is of type \"{}\", but only docx and pptx formats are handled",
                file_type
            ),
            TemplateError::FileTypeNotIdentified => {
                "The filetype for this file could not be identified".to_string()
            }
            TemplateError::XmlInvalid { .. } => {
                "The docx contains invalid XML, it is most likely corrupt".to_string()
            }
            TemplateError::ApiVersion { message, .. } => message.clone(),
            TemplateError::ModuleAlreadyAttached { name } => {
                format!("The module \"{}\" was already attached", name)
            }
        }
    }

    fn offset(&self) -> Option<Offset> {
        match self {
            TemplateError::UnopenedTag { offset, .. }
            | TemplateError::UnclosedTag { offset, .. }
            | TemplateError::UnopenedLoop { offset, .. }
            | TemplateError::UnclosedLoop { offset, .. }
            | TemplateError::XmlTagNotFound { offset, .. }
            | TemplateError::UnimplementedTagType { offset, .. }
            | TemplateError::CorruptCharacters { offset, .. }
            | TemplateError::ScopeCompilation { offset, .. }
            | TemplateError::ScopeExecution { offset, .. }
            | TemplateError::MalformedXml { offset, .. }
            | TemplateError::InvalidLocation { offset, .. }
            | TemplateError::XmlInvalid { offset, .. } => Some(Offset::At(*offset)),
            TemplateError::ClosingTagMismatch { offset, .. }
            | TemplateError::LoopPositionInvalid { offset, .. }
            | TemplateError::UnbalancedLoop { offset, .. } => {
                Some(Offset::Range(offset.0, offset.1))
            }
            TemplateError::Multi { .. }
            | TemplateError::ContentMustBeString { .. }
            | TemplateError::FileTypeNotHandled { .. }
            | TemplateError::FileTypeNotIdentified
            | TemplateError::ApiVersion { .. }
            | TemplateError::ModuleAlreadyAttached { .. } => None,
        }
    }

    fn properties(&self) -> serde_json::Value {
        let mut properties = self.kind_properties();
        if let Some(map) = properties.as_object_mut() {
            map.insert("id".to_string(), json!(self.id()));
            map.insert("explanation".to_string(), json!(self.explanation()));
            if let Some(offset) = self.offset() {
                map.insert("offset".to_string(), json!(offset));
            }
        }
        properties
    }
}
