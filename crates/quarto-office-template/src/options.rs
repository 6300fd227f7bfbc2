/*
 * options.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template configuration.
//!
//! Options deserialize from JSON with every field optional, so callers can
//! pass `{"paragraphLoop": false}` and get defaults for the rest.

use crate::file_type::FileType;
use serde::{Deserialize, Serialize};

/// The strings that open and close a placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delimiters {
    pub start: String,
    pub end: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Delimiters {
            start: "{".to_string(),
            end: "}".to_string(),
        }
    }
}

impl Delimiters {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Delimiters {
            start: start.into(),
            end: end.into(),
        }
    }
}

/// Options controlling compilation and rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TemplateOptions {
    pub file_type: FileType,
    pub delimiters: Delimiters,
    /// Expand loops whose tags sit alone in their paragraphs to those
    /// paragraphs.
    pub paragraph_loop: bool,
    /// Turn `\n` in values into line breaks.
    pub linebreaks: bool,
    /// Output for values that are null or missing.
    pub null_value: String,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        TemplateOptions {
            file_type: FileType::Docx,
            delimiters: Delimiters::default(),
            paragraph_loop: true,
            linebreaks: false,
            null_value: String::new(),
        }
    }
}

impl TemplateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file_type(mut self, file_type: FileType) -> Self {
        self.file_type = file_type;
        self
    }

    pub fn with_delimiters(mut self, delimiters: Delimiters) -> Self {
        self.delimiters = delimiters;
        self
    }

    pub fn with_paragraph_loop(mut self, paragraph_loop: bool) -> Self {
        self.paragraph_loop = paragraph_loop;
        self
    }

    pub fn with_linebreaks(mut self, linebreaks: bool) -> Self {
        self.linebreaks = linebreaks;
        self
    }

    pub fn with_null_value(mut self, null_value: impl Into<String>) -> Self {
        self.null_value = null_value.into();
        self
    }
}
