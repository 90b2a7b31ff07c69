//! Structural indexing of Python sources.
//!
//! `code_parser` turns one file into elements, `index` keeps them addressable
//! by digest, `core` scans a whole project and `relevance` answers free-text
//! queries against the result.
pub mod code_parser;
pub mod core;
pub mod index;
pub mod languages;
pub mod relevance;

use thiserror::Error;

/// Errors raised while indexing a single file.
///
/// A project scan treats every variant as "skip this file".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("{path}: syntax error at line {line}, column {column}: {message}")]
    Syntax {
        path: String,
        message: String,
        line: usize,
        column: usize,
    },

    #[error("{path}: read failed: {message}")]
    Io { path: String, message: String },

    #[error("grammar setup failed: {0}")]
    Grammar(String),
}
