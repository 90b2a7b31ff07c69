//! Digest-addressed element lookups.
//!
//! Keys are truncated SHA-256 digests. Two elements hashing to the same key
//! are both kept, tagged with an insertion generation, so "last parse wins"
//! is a query (`latest`) rather than a silent overwrite.
use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::code_parser::CodeElement;

/// Hex characters kept from the SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 16;

/// Stable fixed-length digest of an index key.
#[must_use]
pub fn digest(key: &str) -> String {
    let hash = Sha256::digest(key.as_bytes());
    hash.iter()
        .take(DIGEST_HEX_LEN / 2)
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    pub hash: String,
    pub element: CodeElement,
    /// Insertion counter; higher means parsed later.
    pub generation: u64,
}

#[derive(Debug, Default, Clone)]
pub struct ElementIndex {
    entries: Vec<IndexEntry>,
    by_hash: HashMap<String, Vec<usize>>,
    next_generation: u64,
}

impl ElementIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a single file's elements by `digest(qualified_name)`.
    #[must_use]
    pub fn from_elements(elements: Vec<CodeElement>) -> Self {
        let mut index = Self::new();
        for element in elements {
            let hash = digest(&element.qualified_name);
            index.insert(hash, element);
        }
        index
    }

    pub fn insert(&mut self, hash: String, element: CodeElement) -> &IndexEntry {
        let generation = self.next_generation;
        self.next_generation += 1;

        let position = self.entries.len();
        self.by_hash.entry(hash.clone()).or_default().push(position);
        self.entries.push(IndexEntry {
            hash,
            element,
            generation,
        });
        &self.entries[position]
    }

    /// Every version stored under `hash`, oldest first.
    pub fn versions(&self, hash: &str) -> Vec<&IndexEntry> {
        self.by_hash
            .get(hash)
            .map(|positions| positions.iter().map(|&p| &self.entries[p]).collect())
            .unwrap_or_default()
    }

    /// The most recently inserted entry under `hash`.
    pub fn latest(&self, hash: &str) -> Option<&IndexEntry> {
        self.by_hash
            .get(hash)
            .and_then(|positions| positions.last())
            .map(|&p| &self.entries[p])
    }

    /// All versions of the element named `qualified_name`.
    pub fn lookup_name(&self, qualified_name: &str) -> Vec<&IndexEntry> {
        self.versions(&digest(qualified_name))
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter()
    }

    pub fn elements(&self) -> impl Iterator<Item = &CodeElement> {
        self.entries.iter().map(|e| &e.element)
    }

    /// Drop every entry matching `pred`, returning how many were removed.
    pub fn remove_where<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(&IndexEntry) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|e| !pred(e));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.rebuild_positions();
        }
        removed
    }

    fn rebuild_positions(&mut self) {
        self.by_hash.clear();
        for (position, entry) in self.entries.iter().enumerate() {
            self.by_hash
                .entry(entry.hash.clone())
                .or_default()
                .push(position);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Index over a whole project.
///
/// `by_name` answers "every `checkout` anywhere"; `by_location` keys on
/// `file_path:qualified_name` so same-named elements in different files stay
/// distinct.
#[derive(Debug, Default, Clone)]
pub struct ProjectIndex {
    by_name: ElementIndex,
    by_location: ElementIndex,
}

impl ProjectIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything known about `path` with a fresh parse result.
    pub fn add_file(&mut self, path: &str, elements: Vec<CodeElement>) -> usize {
        self.remove_file(path);
        let count = elements.len();
        for mut element in elements {
            element.file_path = Some(path.to_string());
            self.by_location
                .insert(digest(&element.project_key()), element.clone());
            self.by_name
                .insert(digest(&element.qualified_name), element);
        }
        count
    }

    pub fn remove_file(&mut self, path: &str) -> usize {
        let in_file = |e: &IndexEntry| e.element.file_path.as_deref() == Some(path);
        self.by_location.remove_where(in_file);
        self.by_name.remove_where(in_file)
    }

    /// Same-named elements across all files, in indexing order.
    pub fn lookup(&self, qualified_name: &str) -> Vec<&CodeElement> {
        self.by_name
            .lookup_name(qualified_name)
            .into_iter()
            .map(|e| &e.element)
            .collect()
    }

    pub fn lookup_in_file(&self, path: &str, qualified_name: &str) -> Option<&CodeElement> {
        self.by_location
            .latest(&digest(&format!("{path}:{qualified_name}")))
            .map(|e| &e.element)
    }

    pub fn elements(&self) -> impl Iterator<Item = &CodeElement> {
        self.by_name.elements()
    }

    pub fn files(&self) -> BTreeSet<&str> {
        self.elements()
            .filter_map(|e| e.file_path.as_deref())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::code_parser::ElementKind;

    fn element(name: &str, body: &str) -> CodeElement {
        CodeElement {
            qualified_name: name.to_string(),
            name: name.rsplit('.').next().unwrap_or(name).to_string(),
            kind: ElementKind::Function,
            text: body.to_string(),
            start_line: 1,
            end_line: 1,
            enclosing_class: None,
            file_path: None,
        }
    }

    #[test]
    fn test_digest_is_stable_and_fixed_length() {
        let a = digest("Cart.checkout");
        assert_eq!(a.len(), DIGEST_HEX_LEN);
        assert_eq!(a, digest("Cart.checkout"));
        assert_ne!(a, digest("Cart.checkin"));
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_collisions_are_versioned() {
        let mut index = ElementIndex::new();
        index.insert(digest("f"), element("f", "def f(): return 1"));
        index.insert(digest("f"), element("f", "def f(): return 2"));

        let versions = index.lookup_name("f");
        assert_eq!(versions.len(), 2);
        assert!(versions[0].generation < versions[1].generation);
        assert_eq!(
            index.latest(&digest("f")).map(|e| e.element.text.as_str()),
            Some("def f(): return 2")
        );
    }

    #[test]
    fn test_project_index_disambiguates_files() {
        let mut index = ProjectIndex::new();
        index.add_file("a.py", vec![element("main", "def main(): a()")]);
        index.add_file("b.py", vec![element("main", "def main(): b()")]);

        assert_eq!(index.lookup("main").len(), 2);
        assert_eq!(
            index.lookup_in_file("b.py", "main").map(|e| e.text.as_str()),
            Some("def main(): b()")
        );
        assert_eq!(index.files().into_iter().collect::<Vec<_>>(), vec!["a.py", "b.py"]);
    }

    #[test]
    fn test_reindexing_a_file_replaces_its_entries() {
        let mut index = ProjectIndex::new();
        index.add_file("a.py", vec![element("old", ""), element("keep", "")]);
        index.add_file("b.py", vec![element("other", "")]);
        index.add_file("a.py", vec![element("new", "")]);

        assert!(index.lookup("old").is_empty());
        assert!(index.lookup_in_file("a.py", "keep").is_none());
        assert_eq!(index.lookup("new").len(), 1);
        assert_eq!(index.len(), 2);

        let order: Vec<&str> = index.elements().map(|e| e.qualified_name.as_str()).collect();
        assert_eq!(order, vec!["other", "new"]);
    }

    #[test]
    fn test_single_file_index_from_parse() {
        let mut parser = crate::indexer::code_parser::CodeParser::new().unwrap();
        let elements = parser
            .parse("class Cart:\n    def checkout(self):\n        pass\n", None)
            .unwrap();
        let index = ElementIndex::from_elements(elements);

        assert_eq!(index.len(), 2);
        let versions = index.lookup_name("Cart.checkout");
        assert_eq!(versions[0].hash, digest("Cart.checkout"));
        let hashes: Vec<&str> = index.iter().map(|e| e.hash.as_str()).collect();
        assert_eq!(hashes, vec![digest("Cart").as_str(), digest("Cart.checkout").as_str()]);
    }
}
