use anyhow::Result;
use tree_sitter::{Language, Node, Parser};

use crate::types::{NewSymbol, SymbolType, Visibility};

use super::{node_text, Extraction, Extractor, Reference};

pub struct PythonExtractor {
    language: Language,
}

impl PythonExtractor {
    pub fn new() -> Self {
        Self {
            language: Language::new(tree_sitter_python::LANGUAGE),
        }
    }
}

impl Default for PythonExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for PythonExtractor {
    fn extract(&self, source: &str, file_path: &str) -> Result<Extraction> {
        let mut parser = Parser::new();
        parser.set_language(&self.language)?;

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| anyhow::anyhow!("Failed to parse {file_path}"))?;

        let mut out = Extraction::default();
        extract_node(tree.root_node(), source, true, &mut out);
        Ok(out)
    }
}

fn extract_node(node: Node, source: &str, top_level: bool, out: &mut Extraction) {
    match node.kind() {
        "function_definition" => {
            extract_function(node, source, out);
        }
        "class_definition" => {
            extract_class(node, source, out);
        }
        "decorated_definition" => {
            for child in node.named_children(&mut node.walk()) {
                if child.kind() == "function_definition" || child.kind() == "class_definition" {
                    extract_node(child, source, top_level, out);
                }
            }
        }
        "import_statement" | "import_from_statement" => {
            let module = extract_import_module(node, source);
            if !module.is_empty() {
                out.references.push(Reference::import(module));
            }
        }
        "expression_statement" => {
            if top_level {
                for child in node.named_children(&mut node.walk()) {
                    if child.kind() == "assignment" {
                        extract_assignment(child, source, out);
                    }
                }
            }
        }
        _ => {
            for child in node.named_children(&mut node.walk()) {
                extract_node(child, source, top_level, out);
            }
        }
    }
}

fn extract_function(node: Node, source: &str, out: &mut Extraction) {
    let name = match node.child_by_field_name("name") {
        Some(n) => node_text(n, source).to_string(),
        None => return,
    };

    let start_line = node.start_position().row as u32 + 1;
    let end_line = node.end_position().row as u32 + 1;
    let summary = extract_docstring(node, source);

    out.symbols.push(
        NewSymbol::new(&name, SymbolType::Function, start_line, end_line)
            .with_visibility(python_visibility(&name))
            .with_summary(summary),
    );

    if let Some(body) = node.child_by_field_name("body") {
        walk_for_calls(body, source, &name, out);
        // Nested definitions become their own symbols
        for child in body.named_children(&mut body.walk()) {
            match child.kind() {
                "function_definition" | "class_definition" | "decorated_definition" => {
                    extract_node(child, source, false, out);
                }
                _ => {}
            }
        }
    }
}

fn extract_class(node: Node, source: &str, out: &mut Extraction) {
    let name = match node.child_by_field_name("name") {
        Some(n) => node_text(n, source).to_string(),
        None => return,
    };

    let start_line = node.start_position().row as u32 + 1;
    let end_line = node.end_position().row as u32 + 1;
    let summary = extract_docstring(node, source);

    out.symbols.push(
        NewSymbol::new(&name, SymbolType::Class, start_line, end_line)
            .with_visibility(python_visibility(&name))
            .with_summary(summary),
    );

    // Base classes
    if let Some(args) = node.child_by_field_name("superclasses") {
        for child in args.named_children(&mut args.walk()) {
            let base = node_text(child, source);
            if !base.is_empty() && child.kind() != "keyword_argument" {
                out.references.push(Reference::extends(&name, base));
            }
        }
    }

    // Methods and nested classes
    if let Some(body) = node.child_by_field_name("body") {
        for child in body.named_children(&mut body.walk()) {
            extract_node(child, source, false, out);
        }
    }
}

fn extract_assignment(node: Node, source: &str, out: &mut Extraction) {
    // Only simple name = value assignments at module level
    let Some(left) = node.child_by_field_name("left") else {
        return;
    };
    if left.kind() != "identifier" {
        return;
    }
    let name = node_text(left, source).to_string();
    let start_line = node.start_position().row as u32 + 1;
    let end_line = node.end_position().row as u32 + 1;

    let symbol_type = if is_screaming_case(&name) {
        SymbolType::Constant
    } else {
        SymbolType::Variable
    };
    out.symbols.push(
        NewSymbol::new(&name, symbol_type, start_line, end_line)
            .with_visibility(python_visibility(&name)),
    );
}

/// Walk a function body for call expressions, without descending into
/// nested definitions (those attribute their own calls).
fn walk_for_calls(node: Node, source: &str, context: &str, out: &mut Extraction) {
    let mut cursor = node.walk();
    let mut did_visit_children = false;

    loop {
        let current = cursor.node();

        if !did_visit_children {
            match current.kind() {
                "call" => {
                    if let Some(func) = current.child_by_field_name("function") {
                        let callee = callee_name(func, source);
                        if !callee.is_empty() {
                            out.references.push(Reference::call(context, callee));
                        }
                    }
                }
                "function_definition" | "class_definition" => {
                    did_visit_children = true;
                    continue;
                }
                _ => {}
            }
        }

        if !did_visit_children && cursor.goto_first_child() {
            did_visit_children = false;
            continue;
        }
        did_visit_children = false;
        if cursor.goto_next_sibling() {
            continue;
        }
        loop {
            if !cursor.goto_parent() {
                return;
            }
            if cursor.goto_next_sibling() {
                break;
            }
        }
    }
}

/// `self.foo()` and `obj.foo()` resolve by the attribute name.
fn callee_name(node: Node, source: &str) -> String {
    match node.kind() {
        "attribute" => node
            .child_by_field_name("attribute")
            .map(|a| node_text(a, source).to_string())
            .unwrap_or_default(),
        _ => node_text(node, source).to_string(),
    }
}

// ── Helpers ──

fn python_visibility(name: &str) -> Visibility {
    if name.starts_with("__") && name.ends_with("__") {
        // Dunder methods like __init__ are public
        Visibility::Public
    } else if name.starts_with("__") {
        Visibility::Private
    } else if name.starts_with('_') {
        Visibility::Protected
    } else {
        Visibility::Public
    }
}

fn is_screaming_case(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_uppercase())
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn extract_docstring(node: Node, source: &str) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = first.named_child(0)?;
    if expr.kind() != "string" {
        return None;
    }

    let text = node_text(expr, source);
    let inner = text
        .strip_prefix("\"\"\"")
        .and_then(|s| s.strip_suffix("\"\"\""))
        .or_else(|| text.strip_prefix("'''").and_then(|s| s.strip_suffix("'''")))?;

    let trimmed = inner.trim();
    if trimmed.is_empty() {
        None
    } else {
        // First line only; full docstrings can run to paragraphs
        Some(trimmed.lines().next().unwrap_or("").trim().to_string())
    }
}

fn extract_import_module(node: Node, source: &str) -> String {
    match node.kind() {
        "import_statement" => {
            for child in node.named_children(&mut node.walk()) {
                if child.kind() == "dotted_name" {
                    return node_text(child, source).to_string();
                }
                if child.kind() == "aliased_import" {
                    if let Some(name) = child.child_by_field_name("name") {
                        return node_text(name, source).to_string();
                    }
                }
            }
            String::new()
        }
        "import_from_statement" => {
            if let Some(module) = node.child_by_field_name("module_name") {
                node_text(module, source).to_string()
            } else {
                for child in node.named_children(&mut node.walk()) {
                    if child.kind() == "dotted_name" || child.kind() == "relative_import" {
                        return node_text(child, source).to_string();
                    }
                }
                String::new()
            }
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RelationType;

    fn extract(source: &str) -> Extraction {
        let ext = PythonExtractor::new();
        ext.extract(source, "test.py").unwrap()
    }

    #[test]
    fn test_simple_function() {
        let result = extract(
            r#"
def hello(name: str) -> str:
    """Greet someone."""
    return f"Hello, {name}!"
"#,
        );
        assert_eq!(result.symbols.len(), 1);
        assert_eq!(result.symbols[0].name, "hello");
        assert_eq!(result.symbols[0].symbol_type, SymbolType::Function);
        assert_eq!(result.symbols[0].summary.as_deref(), Some("Greet someone."));
    }

    #[test]
    fn test_class_with_methods() {
        let result = extract(
            r#"
class UserService:
    """Manages users."""

    def __init__(self, db):
        self.db = db

    def get_user(self, user_id):
        return self.db.find(user_id)

    def _internal(self):
        pass
"#,
        );

        let class = result.symbols.iter().find(|s| s.name == "UserService").unwrap();
        assert_eq!(class.symbol_type, SymbolType::Class);
        assert_eq!(class.summary.as_deref(), Some("Manages users."));

        let init = result.symbols.iter().find(|s| s.name == "__init__").unwrap();
        assert_eq!(init.visibility, Visibility::Public);

        let internal = result.symbols.iter().find(|s| s.name == "_internal").unwrap();
        assert_eq!(internal.visibility, Visibility::Protected);
    }

    #[test]
    fn test_inheritance() {
        let result = extract(
            r#"
class AdminService(UserService, BaseService):
    pass
"#,
        );
        assert!(result.references.contains(&Reference::extends("AdminService", "UserService")));
        assert!(result.references.contains(&Reference::extends("AdminService", "BaseService")));
    }

    #[test]
    fn test_function_calls() {
        let result = extract(
            r#"
def process():
    data = fetch_data()
    result = transform(data)
    save(result)
"#,
        );
        let calls: Vec<&str> = result
            .references
            .iter()
            .filter(|r| r.relation_type == RelationType::Calls)
            .map(|r| r.target_name.as_str())
            .collect();
        assert_eq!(calls.len(), 3);
        assert!(calls.contains(&"fetch_data"));
    }

    #[test]
    fn test_method_call_resolves_by_attribute() {
        let result = extract(
            r#"
def run():
    service.process_all()
"#,
        );
        assert!(result.references.contains(&Reference::call("run", "process_all")));
    }

    #[test]
    fn test_imports() {
        let result = extract(
            r#"
import os
from pathlib import Path
from .utils import helper
"#,
        );
        let imports: Vec<&str> = result
            .references
            .iter()
            .filter(|r| r.relation_type == RelationType::Imports)
            .map(|r| r.target_name.as_str())
            .collect();
        assert_eq!(imports, vec!["os", "pathlib", ".utils"]);
    }

    #[test]
    fn test_module_constants() {
        let result = extract(
            r#"
MAX_RETRIES = 3
default_timeout = 30
"#,
        );
        let max = result.symbols.iter().find(|s| s.name == "MAX_RETRIES").unwrap();
        assert_eq!(max.symbol_type, SymbolType::Constant);
        let timeout = result.symbols.iter().find(|s| s.name == "default_timeout").unwrap();
        assert_eq!(timeout.symbol_type, SymbolType::Variable);
    }

    #[test]
    fn test_local_assignments_not_extracted() {
        let result = extract(
            r#"
def compute():
    local_value = 42
    return local_value
"#,
        );
        assert!(result.symbols.iter().all(|s| s.name != "local_value"));
    }

    #[test]
    fn test_empty_file() {
        let result = extract("");
        assert!(result.symbols.is_empty());
        assert!(result.references.is_empty());
    }

    #[test]
    fn test_syntax_error_partial_parse() {
        // Tree-sitter is error-tolerant; must not panic
        let result = extract("def broken(:\n    pass");
        let _ = result.symbols.len();
    }
}
