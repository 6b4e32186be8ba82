//! Shared extraction logic for JavaScript and TypeScript.
//!
//! Both languages share the same CST node structure for the constructs
//! we care about. TypeScript adds type annotations and interfaces, but the
//! named node kinds for functions, classes, imports, and calls are identical.

use anyhow::Result;
use tree_sitter::{Language, Node, Parser};

use crate::types::{NewSymbol, SymbolType, Visibility};

use super::{node_text, Extraction, Reference};

/// Parse source and extract symbols + references. Works for JS, TS, and TSX.
pub fn extract(language: &Language, source: &str, file_path: &str) -> Result<Extraction> {
    let mut parser = Parser::new();
    parser.set_language(language)?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| anyhow::anyhow!("Failed to parse {file_path}"))?;

    let mut out = Extraction::default();
    extract_node(tree.root_node(), source, &mut out);
    Ok(out)
}

fn extract_node(node: Node, source: &str, out: &mut Extraction) {
    match node.kind() {
        "function_declaration" => {
            extract_function(node, source, out);
        }
        // Arrow functions and function expressions assigned to variables
        "lexical_declaration" | "variable_declaration" => {
            extract_variable_declaration(node, source, out);
        }
        "class_declaration" => {
            extract_class(node, source, out);
        }
        "import_statement" => {
            let module = extract_import_source(node, source);
            if !module.is_empty() {
                out.references.push(Reference::import(module));
            }
        }
        // Exports wrap declarations
        "export_statement" => {
            for child in node.named_children(&mut node.walk()) {
                extract_node(child, source, out);
            }
        }
        // TypeScript-specific
        "interface_declaration" => {
            extract_interface(node, source, out);
        }
        "type_alias_declaration" | "enum_declaration" => {
            extract_named(node, source, SymbolType::Type, out);
        }
        _ => {
            for child in node.named_children(&mut node.walk()) {
                extract_node(child, source, out);
            }
        }
    }
}

// ── Functions ──

fn extract_function(node: Node, source: &str, out: &mut Extraction) {
    let name = match node.child_by_field_name("name") {
        Some(n) => node_text(n, source).to_string(),
        None => return,
    };

    let start_line = node.start_position().row as u32 + 1;
    let end_line = node.end_position().row as u32 + 1;
    let summary = extract_jsdoc(node, source);

    out.symbols.push(
        NewSymbol::new(&name, SymbolType::Function, start_line, end_line).with_summary(summary),
    );

    if let Some(body) = node.child_by_field_name("body") {
        walk_for_calls(body, source, &name, out);
    }
}

// ── Variable declarations (const foo = () => {}, const BAR = 1) ──

fn extract_variable_declaration(node: Node, source: &str, out: &mut Extraction) {
    for child in node.named_children(&mut node.walk()) {
        if child.kind() != "variable_declarator" {
            continue;
        }
        let name_node = match child.child_by_field_name("name") {
            Some(n) if n.kind() == "identifier" => n,
            _ => continue,
        };
        let name = node_text(name_node, source).to_string();
        let start_line = node.start_position().row as u32 + 1;
        let end_line = node.end_position().row as u32 + 1;
        let summary = extract_jsdoc(node, source);

        let value = child.child_by_field_name("value");
        let is_function = value.as_ref().is_some_and(|v| is_function_like(v.kind()));

        if is_function {
            out.symbols.push(
                NewSymbol::new(&name, SymbolType::Function, start_line, end_line)
                    .with_summary(summary),
            );
            if let Some(body) = value.and_then(|v| v.child_by_field_name("body")) {
                walk_for_calls(body, source, &name, out);
            }
        } else {
            // SCREAMING_CASE const bindings are constants, the rest variables
            let symbol_type = if is_const_declaration(node, source) && is_screaming_case(&name) {
                SymbolType::Constant
            } else {
                SymbolType::Variable
            };
            out.symbols.push(
                NewSymbol::new(&name, symbol_type, start_line, end_line).with_summary(summary),
            );
        }
    }
}

// ── Classes ──

fn extract_class(node: Node, source: &str, out: &mut Extraction) {
    let name = match node.child_by_field_name("name") {
        Some(n) => node_text(n, source).to_string(),
        None => return,
    };

    let start_line = node.start_position().row as u32 + 1;
    let end_line = node.end_position().row as u32 + 1;
    let summary = extract_jsdoc(node, source);

    out.symbols.push(
        NewSymbol::new(&name, SymbolType::Class, start_line, end_line).with_summary(summary),
    );

    // class_heritage holds extends_clause / implements_clause (TS) or the
    // superclass identifier directly (JS)
    for i in 0..node.child_count() {
        let Some(child) = node.child(i) else { continue };
        if child.kind() != "class_heritage" {
            continue;
        }
        for clause in child.named_children(&mut child.walk()) {
            match clause.kind() {
                "extends_clause" => {
                    if let Some(val) = clause.child_by_field_name("value") {
                        let base = extract_type_name(val, source);
                        if !base.is_empty() {
                            out.references.push(Reference::extends(&name, base));
                        }
                    }
                }
                "implements_clause" => {
                    for tc in clause.named_children(&mut clause.walk()) {
                        let iface = extract_type_name(tc, source);
                        if !iface.is_empty() {
                            out.references.push(Reference::implements(&name, iface));
                        }
                    }
                }
                "identifier" | "member_expression" => {
                    let base = extract_type_name(clause, source);
                    if !base.is_empty() {
                        out.references.push(Reference::extends(&name, base));
                    }
                }
                _ => {}
            }
        }
    }

    // Methods become function symbols; calls in their bodies are attributed
    // to the method, not the class
    if let Some(body) = node.child_by_field_name("body") {
        for child in body.named_children(&mut body.walk()) {
            if child.kind() == "method_definition" {
                extract_method(child, source, out);
            }
        }
    }
}

fn extract_method(node: Node, source: &str, out: &mut Extraction) {
    let name = match node.child_by_field_name("name") {
        Some(n) => node_text(n, source).to_string(),
        None => return,
    };

    let start_line = node.start_position().row as u32 + 1;
    let end_line = node.end_position().row as u32 + 1;
    let summary = extract_jsdoc(node, source);
    let visibility = js_visibility_from_node(node, source, &name);

    out.symbols.push(
        NewSymbol::new(&name, SymbolType::Function, start_line, end_line)
            .with_visibility(visibility)
            .with_summary(summary),
    );

    if let Some(body) = node.child_by_field_name("body") {
        walk_for_calls(body, source, &name, out);
    }
}

// ── TypeScript interfaces ──

fn extract_interface(node: Node, source: &str, out: &mut Extraction) {
    let name = match node.child_by_field_name("name") {
        Some(n) => node_text(n, source).to_string(),
        None => return,
    };

    let start_line = node.start_position().row as u32 + 1;
    let end_line = node.end_position().row as u32 + 1;
    let summary = extract_jsdoc(node, source);

    out.symbols.push(
        NewSymbol::new(&name, SymbolType::Interface, start_line, end_line).with_summary(summary),
    );

    // interface Foo extends Bar, Baz
    for i in 0..node.child_count() {
        let Some(child) = node.child(i) else { continue };
        if child.kind() == "extends_type_clause" {
            for tc in child.named_children(&mut child.walk()) {
                let base = extract_type_name(tc, source);
                if !base.is_empty() {
                    out.references.push(Reference::extends(&name, base));
                }
            }
        }
    }
}

fn extract_named(node: Node, source: &str, symbol_type: SymbolType, out: &mut Extraction) {
    let name = match node.child_by_field_name("name") {
        Some(n) => node_text(n, source).to_string(),
        None => return,
    };
    let start_line = node.start_position().row as u32 + 1;
    let end_line = node.end_position().row as u32 + 1;
    let summary = extract_jsdoc(node, source);
    out.symbols
        .push(NewSymbol::new(&name, symbol_type, start_line, end_line).with_summary(summary));
}

// ── Call walking ──

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
                // Don't descend into nested function/class scopes
                "function_declaration"
                | "class_declaration"
                | "arrow_function"
                | "function_expression" => {
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

/// Callee as stored for later resolution. `this.foo()` becomes `foo`; other
/// member expressions keep the last segment (the resolvable part).
fn callee_name(node: Node, source: &str) -> String {
    match node.kind() {
        "member_expression" => node
            .child_by_field_name("property")
            .map(|p| node_text(p, source).to_string())
            .unwrap_or_default(),
        _ => node_text(node, source).to_string(),
    }
}

// ── Helpers ──

fn is_function_like(kind: &str) -> bool {
    matches!(kind, "arrow_function" | "function_expression" | "function")
}

fn is_const_declaration(node: Node, source: &str) -> bool {
    node.child(0)
        .is_some_and(|c| node_text(c, source) == "const")
}

fn is_screaming_case(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_uppercase())
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn extract_import_source(node: Node, source: &str) -> String {
    // import ... from 'module': the source is a string child
    node.child_by_field_name("source")
        .map(|s| {
            node_text(s, source)
                .trim_matches('\'')
                .trim_matches('"')
                .trim_matches('`')
                .to_string()
        })
        .unwrap_or_default()
}

/// Base type name from an heritage clause entry. Strips generic arguments
/// so `Base<T>` resolves against the symbol `Base`.
fn extract_type_name(node: Node, source: &str) -> String {
    match node.kind() {
        "generic_type" => node
            .named_child(0)
            .map(|n| node_text(n, source).to_string())
            .unwrap_or_default(),
        _ => node_text(node, source).to_string(),
    }
}

/// JSDoc comment preceding a node, condensed to one line.
fn extract_jsdoc(node: Node, source: &str) -> Option<String> {
    let mut prev = node.prev_sibling();
    while let Some(p) = prev {
        if p.kind() == "comment" {
            let text = node_text(p, source);
            if text.starts_with("/**") {
                return parse_jsdoc(text);
            }
            return None;
        }
        if p.is_named() {
            return None;
        }
        prev = p.prev_sibling();
    }
    None
}

fn parse_jsdoc(text: &str) -> Option<String> {
    let inner = text.strip_prefix("/**")?.strip_suffix("*/")?;
    let cleaned: Vec<&str> = inner
        .lines()
        .map(|l| l.trim().trim_start_matches('*').trim())
        .filter(|l| !l.is_empty() && !l.starts_with('@'))
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.join(" "))
    }
}

fn js_visibility_from_node(node: Node, source: &str, name: &str) -> Visibility {
    // TS accessibility modifiers, then #private field syntax
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if child.kind() == "accessibility_modifier" {
                return match node_text(child, source) {
                    "private" => Visibility::Private,
                    "protected" => Visibility::Protected,
                    _ => Visibility::Public,
                };
            }
        }
    }
    if name.starts_with('#') {
        Visibility::Private
    } else {
        Visibility::Public
    }
}
