use tree_sitter::Language;

/// Grammar plus the declaration query used to pull elements out of it.
pub struct LanguageConfig {
    pub name: &'static str,
    pub language: Language,
    pub extensions: &'static [&'static str],
    pub query: &'static str,
}

impl LanguageConfig {
    pub fn get_all() -> Vec<LanguageConfig> {
        vec![python_config()]
    }

    pub fn get_by_extension(ext: &str) -> Option<LanguageConfig> {
        Self::get_all()
            .into_iter()
            .find(|c| c.extensions.contains(&ext))
    }

    /// Whether `path` carries an extension this grammar understands.
    pub fn supports_path(path: &str) -> bool {
        path.rsplit_once('.')
            .is_some_and(|(_, ext)| Self::get_by_extension(ext).is_some())
    }
}

pub fn python_config() -> LanguageConfig {
    LanguageConfig {
        name: "python",
        language: tree_sitter_python::LANGUAGE.into(),
        extensions: &["py", "pyw"],
        query: r#"
(function_definition
  name: (identifier) @name) @function

(class_definition
  name: (identifier) @name) @class
"#,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_extension() {
        assert_eq!(LanguageConfig::get_by_extension("py").map(|c| c.name), Some("python"));
        assert!(LanguageConfig::get_by_extension("rs").is_none());
    }

    #[test]
    fn test_supports_path() {
        assert!(LanguageConfig::supports_path("app/models.py"));
        assert!(!LanguageConfig::supports_path("static/js/main.js"));
        assert!(!LanguageConfig::supports_path("Makefile"));
    }
}
