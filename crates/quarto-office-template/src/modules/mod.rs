/*
 * modules/mod.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Built-in tag handlers.

pub mod loop_module;
pub mod value;

pub use loop_module::LoopModule;
pub use value::ValueModule;
