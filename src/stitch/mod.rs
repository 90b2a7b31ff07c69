//! Reassembling a file from two generated fragments.
//!
//! The first fragment is what the generator produced before it was cut off,
//! the second is its continuation. Strategies are tried in order: overlap
//! merge, repair of a literal broken across the seam, plain concatenation.
//! For Python the result is then parsed, and when it does not parse the first
//! fragment is cut back line by line until the combination does.
pub mod cleanup;

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::indexer::languages::LanguageConfig;
use crate::syntax;

/// Shortest overlap (in chars) treated as a repeated seam.
pub const MIN_OVERLAP: usize = 4;

static SPLIT_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\s*\n\s*/").expect("valid split path regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StitchMethod {
    Overlap,
    StringOrUrlRepair,
    SimpleConcat,
    /// Index (0-based) of the last kept line of the first fragment.
    FallbackTruncate(usize),
    OnlyFirstPart,
}

impl fmt::Display for StitchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StitchMethod::Overlap => write!(f, "overlap"),
            StitchMethod::StringOrUrlRepair => write!(f, "repair_string_or_url"),
            StitchMethod::SimpleConcat => write!(f, "simple_concat"),
            StitchMethod::FallbackTruncate(i) => write!(f, "fallback_truncate_a_to_line_{i}"),
            StitchMethod::OnlyFirstPart => write!(f, "only_first_part"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StitchResult {
    pub text: String,
    pub method: StitchMethod,
    /// Bytes of the second fragment dropped as a repeat of the first.
    pub overlap_len: usize,
    pub syntax_valid: bool,
    pub syntax_error: Option<String>,
}

/// What the stitched text is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TargetLanguage {
    #[default]
    Python,
    /// Anything without a grammar; always counts as valid.
    PlainText,
}

impl TargetLanguage {
    #[must_use]
    pub fn for_path(path: &str) -> Self {
        if LanguageConfig::supports_path(path) {
            TargetLanguage::Python
        } else {
            TargetLanguage::PlainText
        }
    }

    fn check(self, text: &str) -> Result<(), String> {
        match self {
            TargetLanguage::Python => syntax::check_python(text).map_err(|e| e.to_string()),
            TargetLanguage::PlainText => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StitchEngine {
    pub language: TargetLanguage,
}

impl StitchEngine {
    #[must_use]
    pub fn new(language: TargetLanguage) -> Self {
        Self { language }
    }

    pub fn stitch(&self, part_a: &str, part_b: &str) -> StitchResult {
        if part_b.trim().is_empty() {
            let check = self.language.check(part_a);
            return StitchResult {
                text: part_a.to_string(),
                method: StitchMethod::OnlyFirstPart,
                overlap_len: 0,
                syntax_valid: check.is_ok(),
                syntax_error: check.err(),
            };
        }

        let (text, method, overlap_len) = match longest_overlap(part_a, part_b, MIN_OVERLAP) {
            Some(k) => (
                format!("{part_a}{}", &part_b[k..]),
                StitchMethod::Overlap,
                k,
            ),
            None => match repair_broken_literal(part_a, part_b) {
                Some(repaired) => (repaired, StitchMethod::StringOrUrlRepair, 0),
                None => (format!("{part_a}{part_b}"), StitchMethod::SimpleConcat, 0),
            },
        };
        debug!("Stitched with {method} (overlap {overlap_len})");

        let error = match self.language.check(&text) {
            Ok(()) => {
                return StitchResult {
                    text,
                    method,
                    overlap_len,
                    syntax_valid: true,
                    syntax_error: None,
                };
            }
            Err(e) => e,
        };

        let lines: Vec<&str> = part_a.split_inclusive('\n').collect();
        for i in (0..lines.len()).rev() {
            let candidate = format!("{}{part_b}", lines[..=i].concat());
            if candidate == text {
                continue;
            }
            if self.language.check(&candidate).is_ok() {
                debug!("Fallback kept lines 0..={i} of the first fragment");
                return StitchResult {
                    text: candidate,
                    method: StitchMethod::FallbackTruncate(i),
                    overlap_len: 0,
                    syntax_valid: true,
                    syntax_error: None,
                };
            }
        }

        warn!("Stitched text does not parse: {error}");
        StitchResult {
            text,
            method,
            overlap_len,
            syntax_valid: false,
            syntax_error: Some(error),
        }
    }
}

/// Stitch two Python fragments.
pub fn stitch(part_a: &str, part_b: &str) -> StitchResult {
    StitchEngine::default().stitch(part_a, part_b)
}

/// Longest `k` (in bytes) such that `part_a` ends with `part_b[..k]` and
/// that prefix is at least `min_chars` chars long.
pub fn longest_overlap(part_a: &str, part_b: &str, min_chars: usize) -> Option<usize> {
    let max = part_a.len().min(part_b.len());
    let mut boundaries: Vec<usize> = part_b
        .char_indices()
        .map(|(i, _)| i)
        .skip(1)
        .chain(std::iter::once(part_b.len()))
        .filter(|&k| k <= max)
        .collect();
    boundaries.reverse();

    boundaries
        .into_iter()
        .find(|&k| part_a.ends_with(&part_b[..k]))
        .filter(|&k| part_b[..k].chars().count() >= min_chars)
}

fn balanced_quotes(text: &str) -> bool {
    text.matches('\'').count() % 2 == 0 && text.matches('"').count() % 2 == 0
}

/// The quote left open at the end of `line`, ignoring `#` comments.
///
/// A triple quote means a multi-line string, which may legally span lines,
/// so it never counts as open.
fn open_quote(line: &str) -> Option<char> {
    let mut open = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        let current = open;
        match current {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => open = None,
            Some(_) => {}
            None if c == '#' => break,
            None if c == '\'' || c == '"' => {
                if line[i..].starts_with(&c.to_string().repeat(3)) {
                    return None;
                }
                open = Some(c);
            }
            None => {}
        }
    }
    open
}

/// Last non-empty line of `text`, without its line break.
fn last_line(text: &str) -> &str {
    text.trim_end_matches(['\r', '\n'])
        .rsplit('\n')
        .next()
        .unwrap_or_default()
}

/// Remove the line breaks between the last `quote` before `seam` and the
/// first one after it.
fn collapse_across_seam(text: &str, seam: usize, quote: char) -> Option<String> {
    let open = text[..seam].rfind(quote)?;
    let close = seam + text[seam..].find(quote)?;

    let collapsed: String = text[open..close]
        .chars()
        .filter(|&c| c != '\n' && c != '\r')
        .collect();
    Some(format!("{}{collapsed}{}", &text[..open], &text[close..]))
}

/// Repair a string literal or URL path that the split broke across lines.
///
/// A literal only counts as broken when its opening quote is still open at
/// the end of the first fragment's last line. Returns `None` when no repair
/// applies or the repaired text still has unbalanced quotes.
pub fn repair_broken_literal(part_a: &str, part_b: &str) -> Option<String> {
    if let Some(quote) = open_quote(last_line(part_a)) {
        let joined = format!("{part_a}{part_b}");
        if let Some(repaired) = collapse_across_seam(&joined, part_a.len(), quote) {
            if repaired != joined && balanced_quotes(&repaired) {
                return Some(repaired);
            }
        }
    }

    let concatenated = format!("{part_a}{part_b}");
    if SPLIT_PATH_RE.is_match(&concatenated) {
        let compact = SPLIT_PATH_RE.replace_all(&concatenated, "/").into_owned();
        if balanced_quotes(&compact) {
            return Some(compact);
        }
    }

    None
}
