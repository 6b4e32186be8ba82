use anyhow::Result;
use tree_sitter::{Language, Node, Parser};

use crate::types::{NewSymbol, SymbolType, Visibility};

use super::{node_text, Extraction, Extractor, Reference};

pub struct RustExtractor {
    language: Language,
}

impl RustExtractor {
    pub fn new() -> Self {
        Self {
            language: Language::new(tree_sitter_rust::LANGUAGE),
        }
    }
}

impl Default for RustExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for RustExtractor {
    fn extract(&self, source: &str, file_path: &str) -> Result<Extraction> {
        let mut parser = Parser::new();
        parser.set_language(&self.language)?;

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| anyhow::anyhow!("Failed to parse {file_path}"))?;

        let mut out = Extraction::default();
        extract_node(tree.root_node(), source, &mut out);
        Ok(out)
    }
}

fn extract_node(node: Node, source: &str, out: &mut Extraction) {
    match node.kind() {
        "function_item" => extract_function(node, source, out),
        "struct_item" => extract_named(node, source, SymbolType::Class, out),
        "enum_item" => extract_named(node, source, SymbolType::Type, out),
        "trait_item" => extract_trait(node, source, out),
        "type_item" => extract_named(node, source, SymbolType::Type, out),
        "const_item" | "static_item" => extract_named(node, source, SymbolType::Constant, out),
        "use_declaration" => {
            if let Some(arg) = node.named_child(0) {
                let path = use_root(arg, source);
                if !path.is_empty() {
                    out.references.push(Reference::import(path));
                }
            }
        }
        "impl_item" => extract_impl(node, source, out),
        "mod_item" => {
            // Inline modules: recurse into the body
            if let Some(body) = node.child_by_field_name("body") {
                for child in body.named_children(&mut body.walk()) {
                    extract_node(child, source, out);
                }
            }
        }
        _ => {
            for child in node.named_children(&mut node.walk()) {
                extract_node(child, source, out);
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

    out.symbols.push(
        NewSymbol::new(&name, SymbolType::Function, start_line, end_line)
            .with_visibility(rust_visibility(node, source))
            .with_summary(extract_doc_comment(node, source)),
    );

    if let Some(body) = node.child_by_field_name("body") {
        walk_for_calls(body, source, &name, out);
    }
}

fn extract_named(node: Node, source: &str, symbol_type: SymbolType, out: &mut Extraction) {
    let name = match node.child_by_field_name("name") {
        Some(n) => node_text(n, source).to_string(),
        None => return,
    };

    let start_line = node.start_position().row as u32 + 1;
    let end_line = node.end_position().row as u32 + 1;

    out.symbols.push(
        NewSymbol::new(&name, symbol_type, start_line, end_line)
            .with_visibility(rust_visibility(node, source))
            .with_summary(extract_doc_comment(node, source)),
    );
}

fn extract_trait(node: Node, source: &str, out: &mut Extraction) {
    let name = match node.child_by_field_name("name") {
        Some(n) => node_text(n, source).to_string(),
        None => return,
    };

    let start_line = node.start_position().row as u32 + 1;
    let end_line = node.end_position().row as u32 + 1;

    out.symbols.push(
        NewSymbol::new(&name, SymbolType::Interface, start_line, end_line)
            .with_visibility(rust_visibility(node, source))
            .with_summary(extract_doc_comment(node, source)),
    );

    // Supertraits: trait Foo: Bar + Baz
    if let Some(bounds) = node.child_by_field_name("bounds") {
        for child in bounds.named_children(&mut bounds.walk()) {
            let base = type_base_name(child, source);
            if !base.is_empty() {
                out.references.push(Reference::extends(&name, base));
            }
        }
    }
}

fn extract_impl(node: Node, source: &str, out: &mut Extraction) {
    let type_name = node
        .child_by_field_name("type")
        .map(|t| type_base_name(t, source))
        .unwrap_or_default();

    // impl Trait for Type
    if let Some(trait_node) = node.child_by_field_name("trait") {
        let trait_name = type_base_name(trait_node, source);
        if !type_name.is_empty() && !trait_name.is_empty() {
            out.references
                .push(Reference::implements(&type_name, trait_name));
        }
    }

    // Associated functions become function symbols
    if let Some(body) = node.child_by_field_name("body") {
        for child in body.named_children(&mut body.walk()) {
            if child.kind() == "function_item" {
                extract_function(child, source, out);
            }
        }
    }
}

fn walk_for_calls(node: Node, source: &str, context: &str, out: &mut Extraction) {
    let mut cursor = node.walk();
    let mut did_visit_children = false;

    loop {
        let current = cursor.node();

        if !did_visit_children {
            match current.kind() {
                "call_expression" => {
                    if let Some(func) = current.child_by_field_name("function") {
                        let callee = callee_name(func, source);
                        if !callee.is_empty() {
                            out.references.push(Reference::call(context, callee));
                        }
                    }
                }
                "function_item" | "closure_expression" => {
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

/// `module::func()`, `Type::new()`, and `self.step()` all resolve by the
/// last segment.
fn callee_name(node: Node, source: &str) -> String {
    match node.kind() {
        "scoped_identifier" => node
            .child_by_field_name("name")
            .map(|n| node_text(n, source).to_string())
            .unwrap_or_default(),
        "field_expression" => node
            .child_by_field_name("field")
            .map(|f| node_text(f, source).to_string())
            .unwrap_or_default(),
        _ => node_text(node, source).to_string(),
    }
}

// ── Helpers ──

fn rust_visibility(node: Node, source: &str) -> Visibility {
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if child.kind() == "visibility_modifier" {
                let text = node_text(child, source);
                return if text == "pub" {
                    Visibility::Public
                } else {
                    // pub(crate), pub(super), pub(in ...)
                    Visibility::Internal
                };
            }
        }
    }
    Visibility::Private
}

/// Base name of a type, stripping generics: `Vec<T>` resolves as `Vec`.
fn type_base_name(node: Node, source: &str) -> String {
    match node.kind() {
        "generic_type" => node
            .child_by_field_name("type")
            .map(|t| type_base_name(t, source))
            .unwrap_or_default(),
        "scoped_type_identifier" | "scoped_identifier" => node
            .child_by_field_name("name")
            .map(|n| node_text(n, source).to_string())
            .unwrap_or_default(),
        _ => node_text(node, source).to_string(),
    }
}

/// Root of a use path: `use crate::store::Store` keeps `crate::store::Store`.
fn use_root(node: Node, source: &str) -> String {
    match node.kind() {
        // use foo::bar::{Baz, Qux} keeps the path before the brace list
        "scoped_use_list" => node
            .child_by_field_name("path")
            .map(|p| node_text(p, source).to_string())
            .unwrap_or_default(),
        "use_as_clause" => node
            .child_by_field_name("path")
            .map(|p| node_text(p, source).to_string())
            .unwrap_or_default(),
        _ => node_text(node, source).to_string(),
    }
}

/// Leading /// doc comment lines, condensed to the first sentence line.
fn extract_doc_comment(node: Node, source: &str) -> Option<String> {
    let mut lines = Vec::new();
    let mut prev = node.prev_sibling();
    while let Some(p) = prev {
        if p.kind() == "line_comment" {
            let text = node_text(p, source);
            if let Some(doc) = text.strip_prefix("///") {
                lines.push(doc.trim().to_string());
                prev = p.prev_sibling();
                continue;
            }
        }
        break;
    }
    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    lines.first().cloned().filter(|l| !l.is_empty())
}
