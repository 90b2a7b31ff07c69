use super::ParseError;
use super::languages::{LanguageConfig, python_config};
use crate::syntax;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tree_sitter::{Node, Parser, Query, QueryCursor, StreamingIterator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Function,
    Class,
    Method,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Function => "function",
            ElementKind::Class => "class",
            ElementKind::Method => "method",
        }
    }
}

/// One addressable declaration of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeElement {
    /// `Class.method` for methods, the bare name otherwise.
    pub qualified_name: String,
    pub name: String,
    pub kind: ElementKind,
    /// Verbatim source lines of the declaration, decorators included.
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
    pub enclosing_class: Option<String>,
    pub file_path: Option<String>,
}

impl CodeElement {
    /// Key used by project-wide indices to tell same-named elements apart.
    pub fn project_key(&self) -> String {
        format!(
            "{}:{}",
            self.file_path.as_deref().unwrap_or_default(),
            self.qualified_name
        )
    }
}

/// A declaration as matched by the query, before scope resolution.
struct Declaration {
    name: String,
    is_class: bool,
    start_byte: usize,
    end_byte: usize,
    start_line: usize,
    end_line: usize,
}

pub struct CodeParser {
    config: LanguageConfig,
    query: Query,
}

impl CodeParser {
    pub fn new() -> Result<Self, ParseError> {
        let config = python_config();
        let query = Query::new(&config.language, config.query)
            .map_err(|e| ParseError::Grammar(e.to_string()))?;
        Ok(Self { config, query })
    }

    pub fn parse_file<P: AsRef<Path>>(
        &mut self,
        filepath: P,
        relative_path: &str,
    ) -> Result<Vec<CodeElement>, ParseError> {
        let content = fs::read_to_string(filepath.as_ref()).map_err(|e| ParseError::Io {
            path: relative_path.to_string(),
            message: e.to_string(),
        })?;
        self.parse(&content, Some(relative_path))
    }

    /// Parse one file's text into its elements.
    ///
    /// Any syntax error fails the whole file; the caller decides whether to
    /// skip it. Element order follows the source.
    pub fn parse(
        &mut self,
        source: &str,
        file_path: Option<&str>,
    ) -> Result<Vec<CodeElement>, ParseError> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.config.language)
            .map_err(|e| ParseError::Grammar(e.to_string()))?;

        let bytes = source.as_bytes();
        let tree = parser
            .parse(bytes, None)
            .ok_or_else(|| ParseError::Grammar("failed to parse code".to_string()))?;
        let root = tree.root_node();

        if let Some(issue) = syntax::find_issue(root, bytes) {
            return Err(ParseError::Syntax {
                path: file_path.unwrap_or("<memory>").to_string(),
                message: issue.message,
                line: issue.line,
                column: issue.column,
            });
        }

        let mut declarations = self.collect_declarations(root, bytes);
        declarations.sort_by_key(|d| (d.start_byte, Reverse(d.end_byte)));

        Ok(resolve_scopes(declarations, source, file_path))
    }

    fn collect_declarations(&self, root: Node, source: &[u8]) -> Vec<Declaration> {
        let mut cursor = QueryCursor::new();
        let mut declarations = Vec::new();
        let mut seen = HashSet::new();

        let mut matches = cursor.matches(&self.query, root, source);
        while let Some(m) = matches.next() {
            let mut main_node = None;
            let mut is_class = false;
            let mut name = String::new();

            for cap in m.captures {
                let capture_name = self.query.capture_names()[cap.index as usize];
                match capture_name {
                    "name" => {
                        if let Ok(text) = cap.node.utf8_text(source) {
                            name = text.to_string();
                        }
                    }
                    "function" | "class" => {
                        main_node = Some(cap.node);
                        is_class = capture_name == "class";
                    }
                    _ => {}
                }
            }

            let Some(node) = main_node else { continue };
            if !seen.insert((node.start_byte(), node.end_byte())) {
                continue;
            }

            // Decorators belong to the declaration they wrap.
            let span_node = node
                .parent()
                .filter(|p| p.kind() == "decorated_definition")
                .unwrap_or(node);

            declarations.push(Declaration {
                name,
                is_class,
                start_byte: node.start_byte(),
                end_byte: node.end_byte(),
                start_line: span_node.start_position().row + 1,
                end_line: node.end_position().row + 1,
            });
        }

        declarations
    }
}

/// Single pass over declarations sorted by position. `open_classes` holds the
/// chain of classes whose span is still open, so its top is always the
/// innermost class enclosing the current declaration.
fn resolve_scopes(
    declarations: Vec<Declaration>,
    source: &str,
    file_path: Option<&str>,
) -> Vec<CodeElement> {
    let lines: Vec<&str> = source.split('\n').collect();
    let mut open_classes: Vec<(String, usize)> = Vec::new();
    let mut elements = Vec::with_capacity(declarations.len());

    for decl in declarations {
        while open_classes
            .last()
            .is_some_and(|(_, end)| *end <= decl.start_byte)
        {
            open_classes.pop();
        }
        let enclosing = open_classes.last().map(|(name, _)| name.clone());

        let (kind, qualified_name, enclosing_class) = if decl.is_class {
            (ElementKind::Class, decl.name.clone(), None)
        } else if let Some(class_name) = enclosing {
            (
                ElementKind::Method,
                format!("{class_name}.{}", decl.name),
                Some(class_name),
            )
        } else {
            (ElementKind::Function, decl.name.clone(), None)
        };

        if decl.is_class {
            open_classes.push((decl.name.clone(), decl.end_byte));
        }

        let end_line = decl.end_line.max(decl.start_line).min(lines.len());
        let text = lines
            .get(decl.start_line - 1..end_line)
            .map(|slice| slice.join("\n"))
            .unwrap_or_default();

        elements.push(CodeElement {
            qualified_name,
            name: decl.name,
            kind,
            text,
            start_line: decl.start_line,
            end_line,
            enclosing_class,
            file_path: file_path.map(str::to_string),
        });
    }

    elements
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Vec<CodeElement> {
        let mut parser = CodeParser::new().expect("Failed to initialize CodeParser");
        parser
            .parse(source, Some("app.py"))
            .expect("Failed to parse Python code")
    }

    fn find<'a>(elements: &'a [CodeElement], qualified: &str) -> &'a CodeElement {
        elements
            .iter()
            .find(|e| e.qualified_name == qualified)
            .unwrap_or_else(|| panic!("missing {qualified}"))
    }

    #[test]
    fn test_parse_python_code() {
        let source_code = r#"
class MyClass:
    def my_method(self):
        print("Hello")

def my_function():
    pass
"#;
        let elements = parse(source_code);
        assert_eq!(elements.len(), 3);

        let class = find(&elements, "MyClass");
        assert_eq!(class.kind, ElementKind::Class);
        assert_eq!((class.start_line, class.end_line), (2, 4));

        let method = find(&elements, "MyClass.my_method");
        assert_eq!(method.kind, ElementKind::Method);
        assert_eq!(method.name, "my_method");
        assert_eq!(method.enclosing_class.as_deref(), Some("MyClass"));
        assert_eq!(method.text, "    def my_method(self):\n        print(\"Hello\")");

        let function = find(&elements, "my_function");
        assert_eq!(function.kind, ElementKind::Function);
        assert!(function.enclosing_class.is_none());
        assert_eq!(function.file_path.as_deref(), Some("app.py"));
    }

    #[test]
    fn test_text_keeps_comments_and_decorators() {
        let source_code = "@app.route('/cart')\ndef cart():\n    # show the cart\n    return render()  # trailing\n";
        let elements = parse(source_code);
        let cart = find(&elements, "cart");
        assert_eq!(cart.start_line, 1);
        assert_eq!(cart.end_line, 4);
        assert!(cart.text.starts_with("@app.route('/cart')"));
        assert!(cart.text.contains("# show the cart"));
        assert!(cart.text.ends_with("# trailing"));
    }

    #[test]
    fn test_function_inside_method_is_a_method() {
        let source_code = r#"
class Cart:
    def total(self):
        def add(a, b):
            return a + b
        return add(1, 2)

def helper():
    def inner():
        pass
"#;
        let elements = parse(source_code);
        assert_eq!(find(&elements, "Cart.add").kind, ElementKind::Method);
        assert_eq!(find(&elements, "inner").kind, ElementKind::Function);
        assert_eq!(find(&elements, "helper").kind, ElementKind::Function);
    }

    #[test]
    fn test_nested_class_innermost_wins() {
        let source_code = r#"
class Outer:
    class Inner:
        def ping(self):
            pass

    def pong(self):
        pass
"#;
        let elements = parse(source_code);
        let ping = find(&elements, "Inner.ping");
        assert_eq!(ping.enclosing_class.as_deref(), Some("Inner"));
        let pong = find(&elements, "Outer.pong");
        assert_eq!(pong.enclosing_class.as_deref(), Some("Outer"));
        assert_eq!(find(&elements, "Inner").kind, ElementKind::Class);
    }

    #[test]
    fn test_methods_lie_within_their_class() {
        let source_code = "class A:\n    def a(self):\n        pass\n\nclass B:\n    def b(self):\n        pass\n";
        let elements = parse(source_code);
        for element in elements.iter().filter(|e| e.kind == ElementKind::Method) {
            let class = find(&elements, element.enclosing_class.as_deref().unwrap());
            assert!(class.start_line <= element.start_line);
            assert!(element.end_line <= class.end_line);
            assert!(element.end_line >= element.start_line);
        }
    }

    #[test]
    fn test_syntax_error_reports_position() {
        let mut parser = CodeParser::new().unwrap();
        let err = parser
            .parse("def broken(:\n    pass\n", Some("broken.py"))
            .unwrap_err();
        match err {
            ParseError::Syntax { path, line, .. } => {
                assert_eq!(path, "broken.py");
                assert_eq!(line, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_indentation_error_is_a_syntax_error() {
        let mut parser = CodeParser::new().unwrap();
        let err = parser
            .parse("def f():\n  x = 1\n    y = 2\n", Some("misaligned.py"))
            .unwrap_err();
        match err {
            ParseError::Syntax { path, line, .. } => {
                assert_eq!(path, "misaligned.py");
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_source_has_no_elements() {
        assert!(parse("").is_empty());
        assert!(parse("x = 1\n").is_empty());
    }

    #[test]
    fn test_parse_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shop.py");
        fs::write(&path, "def buy():\n    pass\n").unwrap();

        let mut parser = CodeParser::new().unwrap();
        let elements = parser.parse_file(&path, "shop.py").unwrap();
        assert_eq!(elements[0].qualified_name, "buy");
        assert_eq!(elements[0].file_path.as_deref(), Some("shop.py"));

        let missing = parser.parse_file(dir.path().join("nope.py"), "nope.py");
        assert!(matches!(missing, Err(ParseError::Io { .. })));
    }
}
