use anyhow::Result;
use tree_sitter::Language;

use super::{js_shared, Extraction, Extractor};

pub struct TypeScriptExtractor {
    language: Language,
}

impl TypeScriptExtractor {
    pub fn new() -> Self {
        Self {
            language: Language::new(tree_sitter_typescript::LANGUAGE_TYPESCRIPT),
        }
    }
}

impl Default for TypeScriptExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for TypeScriptExtractor {
    fn extract(&self, source: &str, file_path: &str) -> Result<Extraction> {
        js_shared::extract(&self.language, source, file_path)
    }
}

pub struct TsxExtractor {
    language: Language,
}

impl TsxExtractor {
    pub fn new() -> Self {
        Self {
            language: Language::new(tree_sitter_typescript::LANGUAGE_TSX),
        }
    }
}

impl Default for TsxExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for TsxExtractor {
    fn extract(&self, source: &str, file_path: &str) -> Result<Extraction> {
        js_shared::extract(&self.language, source, file_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{RefSource, Reference};
    use crate::types::{RelationType, SymbolType, Visibility};

    fn extract_ts(source: &str) -> Extraction {
        let ext = TypeScriptExtractor::new();
        ext.extract(source, "test.ts").unwrap()
    }

    #[test]
    fn test_function_declaration() {
        let result = extract_ts(
            r#"
function greet(name: string): string {
    return `Hello, ${name}!`;
}
"#,
        );
        assert_eq!(result.symbols.len(), 1);
        assert_eq!(result.symbols[0].name, "greet");
        assert_eq!(result.symbols[0].symbol_type, SymbolType::Function);
        assert_eq!(result.symbols[0].line_start, 2);
    }

    #[test]
    fn test_arrow_function() {
        let result = extract_ts(
            r#"
const add = (a: number, b: number): number => a + b;
"#,
        );
        let func = result.symbols.iter().find(|s| s.name == "add").unwrap();
        assert_eq!(func.symbol_type, SymbolType::Function);
    }

    #[test]
    fn test_class_with_methods() {
        let result = extract_ts(
            r#"
class UserService {
    constructor(db: Database) {
        this.db = db;
    }

    async getUser(id: number): Promise<User> {
        return this.db.find(id);
    }

    private validate(user: User): boolean {
        return user.isActive;
    }
}
"#,
        );

        let class = result.symbols.iter().find(|s| s.name == "UserService").unwrap();
        assert_eq!(class.symbol_type, SymbolType::Class);

        let get_user = result.symbols.iter().find(|s| s.name == "getUser").unwrap();
        assert_eq!(get_user.symbol_type, SymbolType::Function);

        let validate = result.symbols.iter().find(|s| s.name == "validate").unwrap();
        assert_eq!(validate.visibility, Visibility::Private);
    }

    #[test]
    fn test_inheritance_and_implements() {
        let result = extract_ts(
            r#"
class AdminService extends UserService implements Loggable {
    impersonate(userId: number): void {}
}
"#,
        );

        assert!(result.references.contains(&Reference::extends("AdminService", "UserService")));
        assert!(result.references.contains(&Reference::implements("AdminService", "Loggable")));
    }

    #[test]
    fn test_interface_and_extends() {
        let result = extract_ts(
            r#"
interface Serializable extends Readable {
    serialize(): string;
}
"#,
        );

        let iface = result.symbols.iter().find(|s| s.name == "Serializable").unwrap();
        assert_eq!(iface.symbol_type, SymbolType::Interface);
        assert!(result.references.contains(&Reference::extends("Serializable", "Readable")));
    }

    #[test]
    fn test_imports() {
        let result = extract_ts(
            r#"
import { Router } from 'express';
import * as path from 'path';
import { helper } from './utils';
"#,
        );

        let imports: Vec<&str> = result
            .references
            .iter()
            .filter(|r| r.relation_type == RelationType::Imports)
            .map(|r| r.target_name.as_str())
            .collect();
        assert_eq!(imports, vec!["express", "path", "./utils"]);
        assert!(result
            .references
            .iter()
            .filter(|r| r.relation_type == RelationType::Imports)
            .all(|r| r.source == RefSource::File));
    }

    #[test]
    fn test_function_calls() {
        let result = extract_ts(
            r#"
function process() {
    const data = fetchData();
    const result = transform(data);
    save(result);
}
"#,
        );

        let calls: Vec<&str> = result
            .references
            .iter()
            .filter(|r| r.relation_type == RelationType::Calls)
            .map(|r| r.target_name.as_str())
            .collect();
        assert_eq!(calls.len(), 3);
        assert!(calls.contains(&"fetchData"));
        assert!(calls.contains(&"transform"));
        assert!(calls.contains(&"save"));
    }

    #[test]
    fn test_method_call_attributed_to_method() {
        let result = extract_ts(
            r#"
class Worker {
    run() {
        this.step();
    }
    step() {}
}
"#,
        );

        assert!(result.references.contains(&Reference::call("run", "step")));
    }

    #[test]
    fn test_enum_and_type_alias() {
        let result = extract_ts(
            r#"
enum Status {
    Active,
    Inactive,
}
type UserId = string;
"#,
        );

        let e = result.symbols.iter().find(|s| s.name == "Status").unwrap();
        assert_eq!(e.symbol_type, SymbolType::Type);
        let t = result.symbols.iter().find(|s| s.name == "UserId").unwrap();
        assert_eq!(t.symbol_type, SymbolType::Type);
    }

    #[test]
    fn test_constants_vs_variables() {
        let result = extract_ts(
            r#"
const MAX_RETRIES = 3;
const config = loadConfig();
let counter = 0;
"#,
        );

        let max = result.symbols.iter().find(|s| s.name == "MAX_RETRIES").unwrap();
        assert_eq!(max.symbol_type, SymbolType::Constant);
        let cfg = result.symbols.iter().find(|s| s.name == "config").unwrap();
        assert_eq!(cfg.symbol_type, SymbolType::Variable);
        let counter = result.symbols.iter().find(|s| s.name == "counter").unwrap();
        assert_eq!(counter.symbol_type, SymbolType::Variable);
    }

    #[test]
    fn test_jsdoc_becomes_summary() {
        let result = extract_ts(
            r#"
/**
 * Fetches a user by id.
 * @param id the user id
 */
function getUser(id: number) {}
"#,
        );

        let func = result.symbols.iter().find(|s| s.name == "getUser").unwrap();
        assert_eq!(func.summary.as_deref(), Some("Fetches a user by id."));
    }

    #[test]
    fn test_generic_base_stripped() {
        let result = extract_ts(
            r#"
class Repo extends Base<User> {}
"#,
        );
        assert!(result.references.contains(&Reference::extends("Repo", "Base")));
    }

    #[test]
    fn test_tsx_component() {
        let ext = TsxExtractor::new();
        let result = ext
            .extract(
                r#"
export function App() {
    return <div>hello</div>;
}
"#,
                "App.tsx",
            )
            .unwrap();
        let app = result.symbols.iter().find(|s| s.name == "App").unwrap();
        assert_eq!(app.symbol_type, SymbolType::Function);
    }

    #[test]
    fn test_empty_file() {
        let result = extract_ts("");
        assert!(result.symbols.is_empty());
        assert!(result.references.is_empty());
    }
}
