pub mod javascript;
mod js_shared;
pub mod python;
pub mod rust_lang;
pub mod typescript;

use anyhow::Result;
use tree_sitter::Node;

use crate::types::{NewSymbol, RelationType};

/// Where a captured reference originates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefSource {
    /// The file itself (import statements).
    File,
    /// A symbol in the same file, identified by name.
    Symbol(String),
}

/// A name-based reference captured during parsing. References are resolved
/// against the stored graph after all files of a run are written; a name
/// that resolves nowhere produces no relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub source: RefSource,
    pub target_name: String,
    pub relation_type: RelationType,
}

impl Reference {
    pub fn import(module: impl Into<String>) -> Self {
        Self {
            source: RefSource::File,
            target_name: module.into(),
            relation_type: RelationType::Imports,
        }
    }

    pub fn call(from: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: RefSource::Symbol(from.into()),
            target_name: target.into(),
            relation_type: RelationType::Calls,
        }
    }

    pub fn extends(from: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: RefSource::Symbol(from.into()),
            target_name: target.into(),
            relation_type: RelationType::Extends,
        }
    }

    pub fn implements(from: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: RefSource::Symbol(from.into()),
            target_name: target.into(),
            relation_type: RelationType::Implements,
        }
    }
}

/// Result of extracting one source file.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub symbols: Vec<NewSymbol>,
    pub references: Vec<Reference>,
}

/// Trait implemented by each language extractor.
pub trait Extractor: Send {
    fn extract(&self, source: &str, file_path: &str) -> Result<Extraction>;
}

/// Extract the text of a tree-sitter node from the source.
/// Returns an empty string if byte offsets fall outside the source.
pub(crate) fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    source.get(node.start_byte()..node.end_byte()).unwrap_or("")
}

/// Map file extension to language name.
pub fn detect_language(path: &std::path::Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?;
    match ext {
        "py" | "pyi" => Some("python"),
        "ts" => Some("typescript"),
        "tsx" => Some("tsx"),
        "js" | "jsx" | "mjs" | "cjs" => Some("javascript"),
        "rs" => Some("rust"),
        _ => None,
    }
}

/// Get the extractor for a language name.
pub fn get_extractor(language: &str) -> Option<Box<dyn Extractor>> {
    match language {
        "python" => Some(Box::new(python::PythonExtractor::new())),
        "typescript" => Some(Box::new(typescript::TypeScriptExtractor::new())),
        "tsx" => Some(Box::new(typescript::TsxExtractor::new())),
        "javascript" => Some(Box::new(javascript::JavaScriptExtractor::new())),
        "rust" => Some(Box::new(rust_lang::RustExtractor::new())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language() {
        use std::path::Path;
        assert_eq!(detect_language(Path::new("src/main.py")), Some("python"));
        assert_eq!(detect_language(Path::new("lib.pyi")), Some("python"));
        assert_eq!(detect_language(Path::new("app.ts")), Some("typescript"));
        assert_eq!(detect_language(Path::new("App.tsx")), Some("tsx"));
        assert_eq!(detect_language(Path::new("index.js")), Some("javascript"));
        assert_eq!(detect_language(Path::new("util.mjs")), Some("javascript"));
        assert_eq!(detect_language(Path::new("main.rs")), Some("rust"));
        assert_eq!(detect_language(Path::new("README.md")), None);
        assert_eq!(detect_language(Path::new("Makefile")), None);
        assert_eq!(detect_language(Path::new("server.go")), None); // go not supported yet
    }

    #[test]
    fn test_get_extractor() {
        assert!(get_extractor("python").is_some());
        assert!(get_extractor("typescript").is_some());
        assert!(get_extractor("tsx").is_some());
        assert!(get_extractor("javascript").is_some());
        assert!(get_extractor("rust").is_some());
        assert!(get_extractor("go").is_none());
        assert!(get_extractor("unknown").is_none());
    }
}
