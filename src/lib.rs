//! # codemend — structural indexing and response reconciliation
//!
//! Locates the code a natural-language change request is about, ships it to a
//! text-generation service under a line-oriented file protocol, and
//! reassembles responses that arrive cut in two into one parseable file.
//!
//! ## Architecture
//!
//! - **[`indexer`]** — Tree-sitter parsing into functions, classes and methods; digest-keyed index; relevance search
//! - **[`codec`]** — `---FILE:` / `---END_FILE---` payloads with truncation marker and path safety
//! - **[`generation`]** — `Generator` trait, retry with backoff, two-phase continuation session, HTTP client
//! - **[`stitch`]** — Overlap merge, broken-literal repair and syntax-checked fallback truncation
//! - **[`repair`]** — One change request across a project, file by file
//! - **[`workspace`]** — Reading project files and writing results with backups
//! - **[`syntax`]** — Python syntax checking
//! - **[`config`]** — Configuration loading and validation

pub mod codec;
pub mod config;
pub mod generation;
pub mod indexer;
pub mod repair;
pub mod stitch;
pub mod syntax;
pub mod workspace;
