//! Python syntax checking on top of the tree-sitter grammar.
//!
//! tree-sitter never refuses input; it recovers and marks the damage with
//! `ERROR` and missing nodes. Indentation is not part of that recovery: a
//! misaligned statement still lands in some block without an error. A source
//! text counts as valid when the recovered tree carries no damaged node and
//! every block is indented consistently.
use std::fmt;

use serde::Serialize;
use tree_sitter::{Node, Parser, Tree};

use crate::indexer::languages::python_config;

/// Longest snippet quoted back in an error message.
const SNIPPET_CHARS: usize = 40;

/// First syntax problem found in a source text, 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntaxIssue {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {}, column {})", self.message, self.line, self.column)
    }
}

/// Parse Python source into a tree, returning the first syntax issue on failure.
pub fn parse_python(source: &str) -> Result<Tree, SyntaxIssue> {
    let config = python_config();
    let mut parser = Parser::new();
    parser
        .set_language(&config.language)
        .map_err(|e| SyntaxIssue {
            message: format!("grammar unavailable: {e}"),
            line: 1,
            column: 1,
        })?;

    let tree = parser.parse(source, None).ok_or_else(|| SyntaxIssue {
        message: "parser produced no tree".to_string(),
        line: 1,
        column: 1,
    })?;

    match find_issue(tree.root_node(), source.as_bytes()) {
        Some(issue) => Err(issue),
        None => Ok(tree),
    }
}

/// `Ok(())` when `source` is syntactically valid Python.
pub fn check_python(source: &str) -> Result<(), SyntaxIssue> {
    parse_python(source).map(|_| ())
}

/// First damaged node, or failing that the first indentation problem.
pub fn find_issue(root: Node, source: &[u8]) -> Option<SyntaxIssue> {
    first_issue(root, source).or_else(|| indentation_issue(root))
}

/// Depth-first search for the first `ERROR` or missing node under `node`.
pub fn first_issue(node: Node, source: &[u8]) -> Option<SyntaxIssue> {
    if !node.has_error() {
        return None;
    }
    if node.is_missing() {
        return Some(issue_at(node, format!("missing `{}`", node.kind())));
    }
    if node.is_error() {
        let snippet = node
            .utf8_text(source)
            .ok()
            .and_then(|t| t.lines().find(|l| !l.trim().is_empty()))
            .map(|l| l.trim().chars().take(SNIPPET_CHARS).collect::<String>())
            .unwrap_or_default();
        let message = if snippet.is_empty() {
            "invalid syntax".to_string()
        } else {
            format!("invalid syntax near `{snippet}`")
        };
        return Some(issue_at(node, message));
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(issue) = first_issue(child, source) {
            return Some(issue);
        }
    }

    Some(issue_at(node, "invalid syntax".to_string()))
}

/// Clauses that must line up with the statement they continue.
const CLAUSE_KINDS: &[&str] = &[
    "elif_clause",
    "else_clause",
    "except_clause",
    "except_group_clause",
    "finally_clause",
];

/// Indentation rules on an error-free tree: module statements start at
/// column 0, each block is non-empty, starts deeper than its header and keeps
/// one column throughout. A suite on the header line stays on that line.
pub fn indentation_issue(root: Node) -> Option<SyntaxIssue> {
    let statements = statements_of(root);
    if let Some(stray) = statements.iter().find(|s| s.start_position().column != 0) {
        return Some(issue_at(*stray, "unexpected indent".to_string()));
    }
    check_indentation(root)
}

fn check_indentation(node: Node) -> Option<SyntaxIssue> {
    if node.kind() == "block" {
        if let Some(issue) = check_block(node) {
            return Some(issue);
        }
    }
    if CLAUSE_KINDS.contains(&node.kind()) {
        if let Some(owner) = node.parent() {
            if node.start_position().column != owner.start_position().column {
                return Some(issue_at(node, UNINDENT_MISMATCH.to_string()));
            }
        }
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if let Some(issue) = check_indentation(child) {
            return Some(issue);
        }
    }
    None
}

const UNINDENT_MISMATCH: &str = "unindent does not match any outer indentation level";

fn check_block(block: Node) -> Option<SyntaxIssue> {
    let header = block.parent()?;
    let statements = statements_of(block);
    let Some(first) = statements.first().copied() else {
        return Some(issue_at(header, "expected an indented block".to_string()));
    };

    let colon_row = block
        .prev_sibling()
        .map_or(header.start_position().row, |colon| colon.end_position().row);
    let start = first.start_position();

    if start.row == colon_row {
        return statements
            .iter()
            .find(|s| s.start_position().row != colon_row)
            .map(|s| issue_at(*s, "unexpected indent".to_string()));
    }

    if start.column <= header.start_position().column {
        return Some(issue_at(first, "expected an indented block".to_string()));
    }

    statements
        .iter()
        .find(|s| s.start_position().column != start.column)
        .map(|s| {
            let message = if s.start_position().column > start.column {
                "unexpected indent"
            } else {
                UNINDENT_MISMATCH
            };
            issue_at(*s, message.to_string())
        })
}

/// Named children that are statements, skipping comments and other extras.
fn statements_of(node: Node) -> Vec<Node> {
    let mut cursor = node.walk();
    let statements = node
        .named_children(&mut cursor)
        .filter(|child| !child.is_extra())
        .collect();
    statements
}

fn issue_at(node: Node, message: String) -> SyntaxIssue {
    let pos = node.start_position();
    SyntaxIssue {
        message,
        line: pos.row + 1,
        column: pos.column + 1,
    }
}
