use anyhow::Result;
use tree_sitter::Language;

use super::{js_shared, Extraction, Extractor};

pub struct JavaScriptExtractor {
    language: Language,
}

impl JavaScriptExtractor {
    pub fn new() -> Self {
        Self {
            language: Language::new(tree_sitter_javascript::LANGUAGE),
        }
    }
}

impl Default for JavaScriptExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for JavaScriptExtractor {
    fn extract(&self, source: &str, file_path: &str) -> Result<Extraction> {
        js_shared::extract(&self.language, source, file_path)
    }
}
