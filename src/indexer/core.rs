use crate::config::Config;
use crate::indexer::ParseError;
use crate::indexer::code_parser::CodeParser;
use crate::indexer::index::ProjectIndex;
use crate::indexer::languages::LanguageConfig;
use crate::workspace;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub elements: usize,
    pub failures: Vec<ParseError>,
}

pub struct Indexer {
    parser: CodeParser,
}

impl Indexer {
    pub fn new() -> Result<Self, ParseError> {
        Ok(Self {
            parser: CodeParser::new()?,
        })
    }

    /// Index every parseable file of an in-memory project.
    ///
    /// Files the grammar does not cover are skipped; files that fail to parse
    /// are recorded in `failures` and the scan goes on.
    pub fn index_files(
        &mut self,
        files: &BTreeMap<String, String>,
        index: &mut ProjectIndex,
    ) -> ScanResult {
        let mut result = ScanResult::default();

        for (path, content) in files {
            if !LanguageConfig::supports_path(path) {
                result.skipped += 1;
                continue;
            }

            match self.parser.parse(content, Some(path.as_str())) {
                Ok(elements) => {
                    debug!("Indexed {path}: {} elements", elements.len());
                    result.elements += index.add_file(path, elements);
                    result.indexed += 1;
                }
                Err(e) => {
                    warn!("Skipping {path}: {e}");
                    index.remove_file(path);
                    result.failed += 1;
                    result.failures.push(e);
                }
            }
        }

        result
    }

    /// Read a project directory and index it.
    pub fn index_directory<P: AsRef<Path>>(
        &mut self,
        dir: P,
        config: &Config,
    ) -> anyhow::Result<(ProjectIndex, ScanResult)> {
        let files = workspace::read_project_files(dir.as_ref(), config)?;
        let mut index = ProjectIndex::new();
        let result = self.index_files(&files, &mut index);
        Ok((index, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_broken_file_does_not_abort_scan() {
        let mut files = BTreeMap::new();
        files.insert("good.py".to_string(), "def ok():\n    return 1\n".to_string());
        files.insert("bad.py".to_string(), "def broken(:\n    pass\n".to_string());
        files.insert("README.md".to_string(), "# readme\n".to_string());

        let mut indexer = Indexer::new().unwrap();
        let mut index = ProjectIndex::new();
        let result = indexer.index_files(&files, &mut index);

        assert_eq!(result.indexed, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.elements, 1);
        assert!(matches!(
            &result.failures[0],
            ParseError::Syntax { path, .. } if path == "bad.py"
        ));
        assert!(index.lookup_in_file("good.py", "ok").is_some());
    }

    #[test]
    fn test_index_directory() {
        let temp_dir = tempdir().unwrap();
        let dir_path = temp_dir.path();
        fs::create_dir_all(dir_path.join("shop")).unwrap();
        fs::write(
            dir_path.join("shop/cart.py"),
            "class Cart:\n    def checkout_cart(self):\n        pass\n",
        )
        .unwrap();
        fs::write(dir_path.join("app.py"), "def main():\n    pass\n").unwrap();

        let mut indexer = Indexer::new().unwrap();
        let (index, result) = indexer
            .index_directory(dir_path, &Config::default())
            .unwrap();

        assert_eq!(result.indexed, 2);
        assert_eq!(result.failed, 0);
        assert!(index.lookup_in_file("shop/cart.py", "Cart.checkout_cart").is_some());
        assert!(index.lookup_in_file("app.py", "main").is_some());
    }
}
