//! Free-text relevance over a project index.
//!
//! Matching is plain case-folded containment: an element is relevant when any
//! query token appears in its qualified name or in its source text. There is
//! no scoring; results come back in index order.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::code_parser::CodeElement;
use super::index::ProjectIndex;
use crate::codec;

/// Tokens shorter than this (in chars) are ignored. Without a floor, a query
/// like "a fix" matches nearly every element.
pub const DEFAULT_MIN_TOKEN_CHARS: usize = 3;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}_]+").expect("valid token regex"));

/// A query split into case-folded tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelevanceQuery {
    tokens: Vec<String>,
}

impl RelevanceQuery {
    #[must_use]
    pub fn parse(query: &str, min_token_chars: usize) -> Self {
        let mut tokens: Vec<String> = Vec::new();
        for m in TOKEN_RE.find_iter(query) {
            let token = m.as_str().to_lowercase();
            if token.chars().count() >= min_token_chars && !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        Self { tokens }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    #[must_use]
    pub fn matches(&self, element: &CodeElement) -> bool {
        let name = element.qualified_name.to_lowercase();
        let body = element.text.to_lowercase();
        self.tokens
            .iter()
            .any(|t| name.contains(t.as_str()) || body.contains(t.as_str()))
    }
}

/// Files picked for a change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSelection {
    pub paths: Vec<String>,
    /// True when nothing matched and the allow-list fallback was used.
    pub fallback: bool,
}

#[derive(Debug, Clone)]
pub struct RelevanceSearch {
    pub min_token_chars: usize,
}

impl Default for RelevanceSearch {
    fn default() -> Self {
        Self {
            min_token_chars: DEFAULT_MIN_TOKEN_CHARS,
        }
    }
}

impl RelevanceSearch {
    #[must_use]
    pub fn new(min_token_chars: usize) -> Self {
        Self { min_token_chars }
    }

    /// Elements relevant to `query`, in index insertion order.
    pub fn find<'a>(&self, query: &str, index: &'a ProjectIndex) -> Vec<&'a CodeElement> {
        let query = RelevanceQuery::parse(query, self.min_token_chars);
        if query.is_empty() {
            return Vec::new();
        }
        index.elements().filter(|e| query.matches(e)).collect()
    }

    /// Files holding relevant elements, or every allow-listed file if none do.
    pub fn select_files(
        &self,
        query: &str,
        index: &ProjectIndex,
        files: &BTreeMap<String, String>,
        fallback_extensions: &[String],
    ) -> FileSelection {
        let mut paths: Vec<String> = Vec::new();
        for element in self.find(query, index) {
            if let Some(path) = element.file_path.as_deref() {
                if files.contains_key(path) && !paths.iter().any(|p| p == path) {
                    paths.push(path.to_string());
                }
            }
        }

        if !paths.is_empty() {
            return FileSelection {
                paths,
                fallback: false,
            };
        }

        FileSelection {
            paths: files
                .keys()
                .filter(|p| has_extension(p, fallback_extensions))
                .cloned()
                .collect(),
            fallback: true,
        }
    }

    /// Render the context shipped to the generator as a file-block payload.
    ///
    /// Matched files carry only their relevant elements padded by
    /// `context_lines` on each side; with no match the allow-listed files go
    /// in whole.
    pub fn context_payload(
        &self,
        query: &str,
        index: &ProjectIndex,
        files: &BTreeMap<String, String>,
        fallback_extensions: &[String],
        context_lines: usize,
    ) -> String {
        let mut wanted: BTreeMap<&str, BTreeSet<usize>> = BTreeMap::new();
        for element in self.find(query, index) {
            let Some(path) = element.file_path.as_deref() else {
                continue;
            };
            let Some(content) = files.get(path) else {
                continue;
            };
            let line_count = content.split('\n').count();
            let first = element.start_line.saturating_sub(context_lines).max(1);
            let last = (element.end_line + context_lines).min(line_count);
            wanted.entry(path).or_default().extend(first..=last);
        }

        let snippets: BTreeMap<String, String> = if wanted.is_empty() {
            files
                .iter()
                .filter(|(p, _)| has_extension(p, fallback_extensions))
                .map(|(p, c)| (p.clone(), c.clone()))
                .collect()
        } else {
            wanted
                .into_iter()
                .map(|(path, line_numbers)| {
                    let lines: Vec<&str> = files[path].split('\n').collect();
                    let snippet = line_numbers
                        .into_iter()
                        .filter_map(|n| lines.get(n - 1).copied())
                        .collect::<Vec<_>>()
                        .join("\n");
                    (path.to_string(), snippet)
                })
                .collect()
        };

        codec::encode(&snippets)
    }
}

/// Convenience wrapper using the default token floor.
pub fn find_relevant<'a>(query: &str, index: &'a ProjectIndex) -> Vec<&'a CodeElement> {
    RelevanceSearch::default().find(query, index)
}

/// Characters that mark a reply line as prose rather than a path.
const PROSE_CHARS: &[char] = &['：', '。', '?', '!', '“', '”', '{', '}'];

/// Paths named in a generator's file-selection reply, one per line.
///
/// Numbering, bullets and quoting around a path are tolerated. Only paths
/// present in `files` are kept, first mention first.
pub fn parse_selected_paths(reply: &str, files: &BTreeMap<String, String>) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for line in reply.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.contains(PROSE_CHARS) {
            continue;
        }
        let Some(token) = line.split_whitespace().last() else {
            continue;
        };
        let token = token
            .trim_matches(|c: char| matches!(c, '`' | '"' | '\'' | ',' | '*'))
            .replace('\\', "/");
        let path = token.strip_prefix("./").unwrap_or(&token);
        if files.contains_key(path) && !paths.iter().any(|p| p == path) {
            paths.push(path.to_string());
        }
    }
    paths
}

pub fn has_extension(path: &str, extensions: &[String]) -> bool {
    let lower = path.to_lowercase();
    extensions.iter().any(|ext| lower.ends_with(&ext.to_lowercase()))
}
