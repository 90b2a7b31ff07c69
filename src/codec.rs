//! Multi-file text payloads.
//!
//! ```text
//! ---FILE: relative/path/to/file.ext
//! <raw file content>
//! ---END_FILE---
//! ```
//!
//! Blocks are concatenated with nothing in between. Text outside blocks is
//! ignored, which lets the decoder skip chatter a generator wraps around its
//! answer.
use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

pub const FILE_HEADER: &str = "---FILE:";
pub const FILE_TERMINATOR: &str = "---END_FILE---";
pub const TRUNCATION_MARKER: &str = "---TRUNCATED---";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unsafe path {path:?}: {reason}")]
    UnsafePath { path: String, reason: &'static str },

    #[error("block {path:?} opened at line {line} has no ---END_FILE--- line")]
    Unterminated { path: String, line: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileBlock {
    pub path: String,
    pub content: String,
    pub truncated: bool,
}

/// How a missing terminator is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Every block must end with a terminator line.
    #[default]
    Strict,
    /// A block also ends at the next header or at end of text.
    Permissive,
}

/// Blocks that decoded cleanly plus the ones that were dropped.
#[derive(Debug, Default)]
pub struct DecodeReport {
    pub blocks: BTreeMap<String, FileBlock>,
    pub rejected: Vec<CodecError>,
}

#[derive(Debug, Clone)]
pub struct FileBlockCodec {
    pub mode: DecodeMode,
    pub truncation_marker: String,
}

impl Default for FileBlockCodec {
    fn default() -> Self {
        Self::new(DecodeMode::Strict)
    }
}

impl FileBlockCodec {
    #[must_use]
    pub fn new(mode: DecodeMode) -> Self {
        Self {
            mode,
            truncation_marker: TRUNCATION_MARKER.to_string(),
        }
    }

    /// Codec for generator output: permissive about the last terminator.
    #[must_use]
    pub fn permissive() -> Self {
        Self::new(DecodeMode::Permissive)
    }

    #[must_use]
    pub fn with_truncation_marker(mut self, marker: impl Into<String>) -> Self {
        self.truncation_marker = marker.into();
        self
    }

    /// Decode a payload, failing on the first unsafe or malformed block.
    pub fn decode(&self, text: &str) -> Result<BTreeMap<String, FileBlock>, CodecError> {
        let mut report = self.decode_partial(text);
        if report.rejected.is_empty() {
            Ok(report.blocks)
        } else {
            Err(report.rejected.swap_remove(0))
        }
    }

    /// Decode a payload, dropping only the blocks that fail validation.
    pub fn decode_partial(&self, text: &str) -> DecodeReport {
        let mut report = DecodeReport::default();
        let mut open: Option<OpenBlock> = None;

        for (idx, line) in text.split('\n').enumerate() {
            let bare = line.strip_suffix('\r').unwrap_or(line);

            if let Some(block) = open.as_mut() {
                if bare.trim_end() == FILE_TERMINATOR {
                    if let Some(block) = open.take() {
                        self.finish(block, &mut report);
                    }
                    continue;
                }
                if self.mode == DecodeMode::Permissive && header_path(bare).is_some() {
                    if let Some(block) = open.take() {
                        self.finish(block, &mut report);
                    }
                } else {
                    block.lines.push(line);
                    continue;
                }
            }

            if let Some(path) = header_path(bare) {
                open = Some(OpenBlock {
                    path: path.to_string(),
                    line: idx + 1,
                    lines: Vec::new(),
                });
            }
        }

        if let Some(block) = open {
            match self.mode {
                DecodeMode::Permissive => self.finish(block, &mut report),
                DecodeMode::Strict => report.rejected.push(CodecError::Unterminated {
                    path: block.path,
                    line: block.line,
                }),
            }
        }

        report
    }

    fn finish(&self, block: OpenBlock<'_>, report: &mut DecodeReport) {
        let path = match sanitize_path(&block.path) {
            Ok(p) => p,
            Err(e) => {
                warn!("Dropping block: {e}");
                report.rejected.push(e);
                return;
            }
        };

        let mut content = block.lines.join("\n");
        let truncated = !self.truncation_marker.is_empty() && content.contains(&self.truncation_marker);
        if truncated {
            content = content.replace(&self.truncation_marker, "");
            content.truncate(content.trim_end().len());
        }

        report.blocks.insert(
            path.clone(),
            FileBlock {
                path,
                content,
                truncated,
            },
        );
    }
}

struct OpenBlock<'a> {
    path: String,
    line: usize,
    lines: Vec<&'a str>,
}

fn header_path(line: &str) -> Option<&str> {
    let path = line.strip_prefix(FILE_HEADER)?.trim();
    (!path.is_empty()).then_some(path)
}

/// Encode `path -> content` pairs as a payload, one block per file.
pub fn encode(files: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (path, content) in files {
        out.push_str(FILE_HEADER);
        out.push(' ');
        out.push_str(path);
        out.push('\n');
        out.push_str(content);
        out.push('\n');
        out.push_str(FILE_TERMINATOR);
        out.push('\n');
    }
    out
}

/// Normalize a relative path and reject anything that could leave the base
/// directory.
///
/// Backslashes become `/`, empty and `.` segments are dropped. Absolute paths
/// (leading separator or a drive letter) and `..` segments are errors.
pub fn sanitize_path(raw: &str) -> Result<String, CodecError> {
    let unsafe_path = |reason| CodecError::UnsafePath {
        path: raw.to_string(),
        reason,
    };

    let candidate = raw.trim().replace('\\', "/");
    if candidate.is_empty() {
        return Err(unsafe_path("empty path"));
    }
    if candidate.starts_with('/') {
        return Err(unsafe_path("absolute path"));
    }
    let bytes = candidate.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Err(unsafe_path("absolute path"));
    }

    let mut segments = Vec::new();
    for segment in candidate.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(unsafe_path("parent-directory segment")),
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err(unsafe_path("empty path"));
    }

    Ok(segments.join("/"))
}
