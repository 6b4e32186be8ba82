//! Context assembly for queries.
//!
//! Two retrieval channels feed the prompt. The structural channel follows
//! explicit hints (named files and symbols) plus their one-hop relations and
//! is never truncated; anything the caller pointed at is in the prompt. The
//! semantic channel ranks embeddings against the query and fills the
//! remaining budget.

use std::collections::HashSet;

use anyhow::Result;

use crate::config::Config;
use crate::embedding::rank;
use crate::protocol::AgentContext;
use crate::store::Store;
use crate::types::{EntityRef, EntityType, FileRecord, Relation, Standard, SymbolRecord};

/// How an entry got into the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Hint,
    Related,
    Semantic,
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub record: FileRecord,
    pub origin: Origin,
}

#[derive(Debug, Clone)]
pub struct SymbolEntry {
    pub record: SymbolRecord,
    pub file_path: String,
    pub origin: Origin,
}

/// Everything retrieved for one query, ready to render into a prompt.
#[derive(Debug, Clone, Default)]
pub struct ContextBundle {
    pub files: Vec<FileEntry>,
    pub symbols: Vec<SymbolEntry>,
    pub standards: Vec<Standard>,
    pub relations: Vec<String>,
}

impl ContextBundle {
    /// A bundle with nothing retrieved cannot ground an answer.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.symbols.is_empty() && self.standards.is_empty()
    }

    /// Render the bundle as prompt sections.
    pub fn render(&self) -> String {
        let mut out = String::new();

        if !self.files.is_empty() {
            out.push_str("## Files\n");
            for entry in &self.files {
                let f = &entry.record;
                out.push_str(&format!(
                    "- {} ({}, {}, {}): {}\n",
                    f.path,
                    f.language,
                    f.role.as_str(),
                    f.stability,
                    f.summary.as_deref().unwrap_or("no summary")
                ));
            }
        }
        if !self.symbols.is_empty() {
            out.push_str("\n## Symbols\n");
            for entry in &self.symbols {
                let s = &entry.record;
                out.push_str(&format!(
                    "- {} {} in {} (lines {}-{}, {}): {}\n",
                    s.symbol_type.as_str(),
                    s.name,
                    entry.file_path,
                    s.line_start,
                    s.line_end,
                    s.visibility,
                    s.summary.as_deref().unwrap_or("no summary")
                ));
            }
        }
        if !self.relations.is_empty() {
            out.push_str("\n## Relations\n");
            for line in &self.relations {
                out.push_str(&format!("- {line}\n"));
            }
        }
        if !self.standards.is_empty() {
            out.push_str("\n## Standards\n");
            for std_rule in &self.standards {
                out.push_str(&format!(
                    "- [{}] {}",
                    std_rule.category.as_str(),
                    std_rule.rule_text
                ));
                if let Some(examples) = &std_rule.examples {
                    out.push_str(&format!(" (e.g. {examples})"));
                }
                out.push('\n');
            }
        }
        out
    }
}

/// Assemble the context bundle for a query.
///
/// `query_vector` is the embedded task text; `None` (embedding backend down
/// or no vectors stored) disables the semantic channel, leaving the
/// structural channel intact.
pub fn assemble(
    store: &Store,
    hints: &AgentContext,
    query_vector: Option<&[f32]>,
    model_name: &str,
    config: &Config,
) -> Result<ContextBundle> {
    let mut bundle = ContextBundle::default();
    let mut seen_files: HashSet<i64> = HashSet::new();
    let mut seen_symbols: HashSet<i64> = HashSet::new();
    let mut seen_standards: HashSet<i64> = HashSet::new();
    let mut hinted: Vec<EntityRef> = Vec::new();

    // ── Structural channel: explicit hints ──

    let mut hint_paths: Vec<&str> = hints.files.iter().flatten().map(String::as_str).collect();
    if let Some(current) = hints.current_file.as_deref() {
        hint_paths.push(current);
    }
    for path in hint_paths {
        if let Some(file) = store.get_file(path)? {
            if seen_files.insert(file.id) {
                hinted.push(EntityRef::file(file.id));
                bundle.files.push(FileEntry {
                    record: file,
                    origin: Origin::Hint,
                });
            }
        }
    }

    let mut hint_symbols: Vec<&str> =
        hints.symbols.iter().flatten().map(String::as_str).collect();
    if let Some(current) = hints.current_symbol.as_deref() {
        hint_symbols.push(current);
    }
    for name in hint_symbols {
        for (symbol, path) in store.find_symbols_by_name(name)? {
            if seen_symbols.insert(symbol.id) {
                hinted.push(EntityRef::symbol(symbol.id));
                let owning_file = EntityRef::file(symbol.file_id);
                bundle.symbols.push(SymbolEntry {
                    record: symbol,
                    file_path: path,
                    origin: Origin::Hint,
                });
                // The owning file is direct context for a hinted symbol
                add_entity(
                    store,
                    owning_file,
                    Origin::Related,
                    &mut bundle,
                    &mut seen_files,
                    &mut seen_symbols,
                    &mut seen_standards,
                )?;
            }
        }
    }

    // One-hop neighbors of every hinted entity
    for entity in hinted.clone() {
        for relation in store.list_relations(entity)? {
            bundle.relations.push(render_relation(store, &relation)?);
            let other = if relation.source == entity {
                relation.target
            } else {
                relation.source
            };
            add_entity(
                store,
                other,
                Origin::Related,
                &mut bundle,
                &mut seen_files,
                &mut seen_symbols,
                &mut seen_standards,
            )?;
        }
    }
    bundle.relations.sort();
    bundle.relations.dedup();

    // ── Semantic channel: fills up to the budget ──

    if let Some(query) = query_vector {
        let structural_len = bundle.files.len() + bundle.symbols.len() + bundle.standards.len();
        let mut budget = config.context_budget.saturating_sub(structural_len);

        for entity_type in [EntityType::File, EntityType::Symbol, EntityType::Standard] {
            if budget == 0 {
                break;
            }
            let rows = store.load_embeddings(model_name, Some(entity_type))?;
            let take = config.semantic_top_n.min(budget);
            for hit in rank(query, &rows, take + structural_len) {
                if budget == 0 {
                    break;
                }
                let added = add_entity(
                    store,
                    hit.entity,
                    Origin::Semantic,
                    &mut bundle,
                    &mut seen_files,
                    &mut seen_symbols,
                    &mut seen_standards,
                )?;
                if added {
                    budget -= 1;
                }
            }
        }
    }

    Ok(bundle)
}

/// Add an entity by reference if not already present. Returns whether a new
/// entry was added.
fn add_entity(
    store: &Store,
    entity: EntityRef,
    origin: Origin,
    bundle: &mut ContextBundle,
    seen_files: &mut HashSet<i64>,
    seen_symbols: &mut HashSet<i64>,
    seen_standards: &mut HashSet<i64>,
) -> Result<bool> {
    match entity.entity_type {
        EntityType::File => {
            if let Some(file) = store.get_file_by_id(entity.entity_id)? {
                if seen_files.insert(file.id) {
                    bundle.files.push(FileEntry {
                        record: file,
                        origin,
                    });
                    return Ok(true);
                }
            }
        }
        EntityType::Symbol => {
            if let Some(symbol) = store.get_symbol(entity.entity_id)? {
                if seen_symbols.insert(symbol.id) {
                    let path = store
                        .get_file_by_id(symbol.file_id)?
                        .map(|f| f.path)
                        .unwrap_or_default();
                    bundle.symbols.push(SymbolEntry {
                        record: symbol,
                        file_path: path,
                        origin,
                    });
                    return Ok(true);
                }
            }
        }
        EntityType::Standard => {
            if let Some(standard) = store.get_standard(entity.entity_id)? {
                if seen_standards.insert(standard.id) {
                    bundle.standards.push(standard);
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

fn render_relation(store: &Store, relation: &Relation) -> Result<String> {
    Ok(format!(
        "{} {} {}",
        entity_label(store, relation.source)?,
        relation.relation_type.as_str(),
        entity_label(store, relation.target)?
    ))
}

fn entity_label(store: &Store, entity: EntityRef) -> Result<String> {
    match entity.entity_type {
        EntityType::File => Ok(store
            .get_file_by_id(entity.entity_id)?
            .map(|f| f.path)
            .unwrap_or_else(|| format!("file#{}", entity.entity_id))),
        EntityType::Symbol => Ok(store
            .get_symbol(entity.entity_id)?
            .map(|s| s.name)
            .unwrap_or_else(|| format!("symbol#{}", entity.entity_id))),
        EntityType::Standard => Ok(format!("standard#{}", entity.entity_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::embedding_to_bytes;
    use crate::store::NewFile;
    use crate::types::{FileRole, NewSymbol, RelationType, Stability, StandardCategory, SymbolType};

    fn seed(store: &Store) -> (i64, i64) {
        let (fa, sa) = store
            .index_file(
                &NewFile {
                    path: "src/auth.ts".to_string(),
                    language: "typescript".to_string(),
                    role: FileRole::Core,
                    summary: Some("login and session handling".to_string()),
                    stability: Stability::Stable,
                    hash: "h1".to_string(),
                },
                &[NewSymbol::new("login", SymbolType::Function, 1, 20)],
            )
            .unwrap();
        let (fb, _) = store
            .index_file(
                &NewFile {
                    path: "src/db.ts".to_string(),
                    language: "typescript".to_string(),
                    role: FileRole::Core,
                    summary: Some("database access".to_string()),
                    stability: Stability::Stable,
                    hash: "h2".to_string(),
                },
                &[],
            )
            .unwrap();
        store
            .insert_relations(&[(
                EntityRef::file(fa.id),
                EntityRef::file(fb.id),
                RelationType::Imports,
            )])
            .unwrap();
        (fa.id, sa[0].id)
    }

    fn hints(files: &[&str], symbols: &[&str]) -> AgentContext {
        AgentContext {
            files: Some(files.iter().map(|s| s.to_string()).collect()),
            symbols: Some(symbols.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn test_hinted_file_and_neighbors_included() {
        let store = Store::open_memory().unwrap();
        seed(&store);
        let cfg = Config::for_project(std::path::Path::new("."));

        let bundle = assemble(&store, &hints(&["src/auth.ts"], &[]), None, "m", &cfg).unwrap();

        let paths: Vec<&str> = bundle.files.iter().map(|f| f.record.path.as_str()).collect();
        assert!(paths.contains(&"src/auth.ts"));
        // One-hop neighbor pulled in through the imports relation
        assert!(paths.contains(&"src/db.ts"));
        assert_eq!(bundle.relations, vec!["src/auth.ts imports src/db.ts"]);
    }

    #[test]
    fn test_hinted_symbol_included() {
        let store = Store::open_memory().unwrap();
        seed(&store);
        let cfg = Config::for_project(std::path::Path::new("."));

        let bundle = assemble(&store, &hints(&[], &["login"]), None, "m", &cfg).unwrap();
        assert_eq!(bundle.symbols.len(), 1);
        assert_eq!(bundle.symbols[0].record.name, "login");
        assert_eq!(bundle.symbols[0].file_path, "src/auth.ts");
        assert_eq!(bundle.symbols[0].origin, Origin::Hint);

        // The owning file rides along even without a file hint
        let auth = bundle
            .files
            .iter()
            .find(|f| f.record.path == "src/auth.ts")
            .unwrap();
        assert_eq!(auth.origin, Origin::Related);
    }

    #[test]
    fn test_unknown_hints_yield_empty_bundle() {
        let store = Store::open_memory().unwrap();
        seed(&store);
        let cfg = Config::for_project(std::path::Path::new("."));

        let bundle = assemble(&store, &hints(&["no/such.ts"], &["nothing"]), None, "m", &cfg).unwrap();
        assert!(bundle.is_empty());
    }

    #[test]
    fn test_semantic_channel_fills_and_dedups() {
        let store = Store::open_memory().unwrap();
        let (file_id, _) = seed(&store);
        let cfg = Config::for_project(std::path::Path::new("."));

        let db = store.get_file("src/db.ts").unwrap().unwrap();
        store
            .upsert_embedding(EntityRef::file(file_id), &embedding_to_bytes(&[1.0, 0.0]), "m")
            .unwrap();
        store
            .upsert_embedding(EntityRef::file(db.id), &embedding_to_bytes(&[0.9, 0.1]), "m")
            .unwrap();

        // auth.ts arrives via hint; the semantic channel must not add it twice
        let bundle = assemble(
            &store,
            &hints(&["src/auth.ts"], &[]),
            Some(&[1.0, 0.0]),
            "m",
            &cfg,
        )
        .unwrap();
        let auth_count = bundle
            .files
            .iter()
            .filter(|f| f.record.path == "src/auth.ts")
            .count();
        assert_eq!(auth_count, 1);
        assert!(bundle.files.iter().any(|f| f.record.path == "src/db.ts"));
    }

    #[test]
    fn test_semantic_only_query() {
        let store = Store::open_memory().unwrap();
        let (file_id, _) = seed(&store);
        let cfg = Config::for_project(std::path::Path::new("."));
        store
            .upsert_embedding(EntityRef::file(file_id), &embedding_to_bytes(&[1.0, 0.0]), "m")
            .unwrap();

        let bundle = assemble(
            &store,
            &AgentContext::default(),
            Some(&[1.0, 0.0]),
            "m",
            &cfg,
        )
        .unwrap();
        assert_eq!(bundle.files.len(), 1);
        assert_eq!(bundle.files[0].origin, Origin::Semantic);
    }

    #[test]
    fn test_budget_caps_semantic_not_structural() {
        let store = Store::open_memory().unwrap();
        let cfg = Config {
            context_budget: 2,
            semantic_top_n: 5,
            ..Config::for_project(std::path::Path::new("."))
        };

        // Three hinted files, three more only reachable semantically
        for i in 0..6 {
            let (file, _) = store
                .index_file(
                    &NewFile {
                        path: format!("f{i}.ts"),
                        language: "typescript".to_string(),
                        role: FileRole::Core,
                        summary: None,
                        stability: Stability::Stable,
                        hash: format!("h{i}"),
                    },
                    &[],
                )
                .unwrap();
            store
                .upsert_embedding(EntityRef::file(file.id), &embedding_to_bytes(&[1.0, 0.0]), "m")
                .unwrap();
        }

        let bundle = assemble(
            &store,
            &hints(&["f0.ts", "f1.ts", "f2.ts"], &[]),
            Some(&[1.0, 0.0]),
            "m",
            &cfg,
        )
        .unwrap();

        // All three hints survive even though they exceed the budget alone;
        // no semantic entries fit on top
        assert_eq!(bundle.files.len(), 3);
        assert!(bundle.files.iter().all(|f| f.origin == Origin::Hint));
    }

    #[test]
    fn test_standards_retrieved_semantically() {
        let store = Store::open_memory().unwrap();
        let cfg = Config::for_project(std::path::Path::new("."));
        let rule = store
            .upsert_standard(StandardCategory::Naming, "functions are camelCase", None)
            .unwrap();
        store
            .upsert_embedding(
                EntityRef::standard(rule.id),
                &embedding_to_bytes(&[1.0, 0.0]),
                "m",
            )
            .unwrap();

        let bundle = assemble(
            &store,
            &AgentContext::default(),
            Some(&[1.0, 0.0]),
            "m",
            &cfg,
        )
        .unwrap();
        assert_eq!(bundle.standards.len(), 1);
        assert!(bundle.render().contains("functions are camelCase"));
    }

    #[test]
    fn test_render_sections() {
        let store = Store::open_memory().unwrap();
        seed(&store);
        let cfg = Config::for_project(std::path::Path::new("."));

        let bundle = assemble(&store, &hints(&["src/auth.ts"], &["login"]), None, "m", &cfg).unwrap();
        let text = bundle.render();
        assert!(text.contains("## Files"));
        assert!(text.contains("## Symbols"));
        assert!(text.contains("## Relations"));
        assert!(text.contains("src/auth.ts"));
        assert!(text.contains("function login"));
    }
}
