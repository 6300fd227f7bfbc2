/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template engine for Office Open XML documents.
//!
//! Placeholders such as `{name}` or `{#items}...{/items}` are written in the
//! text of a `.docx` or `.pptx` part. This crate turns the lexed part into a
//! balanced tree and renders it against data:
//!
//! - Substitution: `{name}`, `{customer.address.city}`, `{../title}`
//! - Loops: `{#items}...{/items}`, closed by `{/}` as well
//! - Inverted sections: `{^items}...{/items}` render when `items` is falsy
//! - Explicit expansion: `{-w:tr rows}...{/rows}` repeats the enclosing row
//!
//! Loops grow automatically to the table row or paragraph that holds their
//! tags, and page breaks trailing a paragraph loop are preserved.
//!
//! # Architecture
//!
//! Tags are claimed by handlers ([`TagModule`]) kept in a [`ModuleRegistry`].
//! The built-in handlers cover loops and plain values; further handlers can
//! be attached to a registry before compiling. Data is looked up through a
//! [`ScopeParser`], so the expression language is replaceable too.
//!
//! Data that is not available yet can be given as [`TemplateValue::Deferred`]
//! and fetched with [`Template::resolve`], which runs every lookup of a level
//! concurrently and keeps the results in document order.
//!
//! # Example
//!
//! ```ignore
//! use quarto_office_template::{ModuleRegistry, Template, TemplateOptions, TemplateValue};
//!
//! let xml = "<w:p><w:r><w:t>Hello {name}!</w:t></w:r></w:p>";
//! let template = Template::compile_xml(xml, ModuleRegistry::with_builtin(), TemplateOptions::default())?;
//!
//! let data = TemplateValue::from(serde_json::json!({"name": "World"}));
//! let output = template.render(&data)?;
//! assert_eq!(output.to_xml(), "<w:p><w:r><w:t>Hello World!</w:t></w:r></w:p>");
//! ```

pub mod ast;
pub mod error;
pub mod file_type;
pub mod fragment;
pub mod lexer;
pub mod module;
pub mod modules;
pub mod options;
pub mod postparse;
pub mod prefix;
pub mod render;
pub mod resolve;
pub mod scope;
pub mod template;
pub mod value;

// Re-export main types at crate root
pub use ast::{Block, ExpandTo, LoopStart, PairLocation, ParsedTree, TagKind, TagNode, TreeNode};
pub use error::{Diagnostic, ErrorCategory, Offset, TemplateError, TemplateResult};
pub use file_type::{FileType, FileTypeConfig};
pub use fragment::{Fragment, TagPosition};
pub use module::{API_VERSION, ModuleRegistry, TagModule};
pub use modules::{LoopModule, ValueModule};
pub use options::{Delimiters, TemplateOptions};
pub use render::{RenderContext, RenderOutput, RenderedNode};
pub use resolve::{ResolvedEntry, ResolvedTree};
pub use scope::{DefaultScopeParser, Expression, ScopeManager, ScopeParser};
pub use template::Template;
pub use value::TemplateValue;
