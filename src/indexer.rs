use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::extract::{detect_language, get_extractor, RefSource, Reference};
use crate::ollama::OllamaClient;
use crate::store::{NewFile, Store};
use crate::types::{EntityRef, FileRole, RelationType, Stability, StandardCategory};

/// Summary of an indexing run. The embedding counts are zero until a caller
/// runs the embedding pass and folds its result in.
#[derive(Debug, Default, serde::Serialize)]
pub struct IndexOutcome {
    pub files_indexed: u32,
    pub files_failed: u32,
    pub files_skipped: u32,
    pub files_removed: u32,
    pub symbols_added: u32,
    pub relations_resolved: u32,
    pub entities_embedded: u32,
    pub embed_failures: u32,
}

/// References captured for one file, awaiting resolution.
struct PendingRefs {
    file_path: String,
    references: Vec<Reference>,
}

fn lock(store: &Mutex<Store>) -> std::sync::MutexGuard<'_, Store> {
    store.lock().expect("store mutex poisoned")
}

/// Index a project directory, updating the store incrementally.
///
/// A full run (`files = None`) walks the tree, re-parses changed files, and
/// prunes rows for files that no longer exist on disk. A partial run indexes
/// only the named paths and never prunes. Either way each file is written
/// atomically: a file that fails to parse leaves its previous rows intact.
///
/// The store lock is taken per file, around the hash check and the write;
/// parsing runs without it, and readers interleave between files.
pub fn index_project(
    store: &Mutex<Store>,
    root: &Path,
    files: Option<&[String]>,
    force: bool,
) -> Result<IndexOutcome> {
    let mut outcome = IndexOutcome::default();
    let root = root.canonicalize().context("Failed to resolve root path")?;

    let targets: Vec<String> = match files {
        Some(list) => list.to_vec(),
        None => collect_source_files(&root),
    };
    let full_run = files.is_none();
    let current: HashSet<String> = targets.iter().cloned().collect();

    let mut pending: Vec<PendingRefs> = Vec::new();

    for rel_path in &targets {
        let abs = root.join(rel_path);
        let Some(language) = detect_language(Path::new(rel_path)) else {
            debug!(file = %rel_path, "unsupported language, skipping");
            outcome.files_skipped += 1;
            continue;
        };

        let source = match std::fs::read_to_string(&abs) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                // Not valid UTF-8. The file is recorded so the failure stays
                // visible, with nothing to extract from it.
                let bytes = std::fs::read(&abs).unwrap_or_default();
                let hash = bytes_hash(&bytes);
                let store = lock(store);
                if !force {
                    if let Ok(Some(existing)) = store.get_file(rel_path) {
                        if existing.hash == hash {
                            outcome.files_skipped += 1;
                            continue;
                        }
                    }
                }
                warn!(file = %rel_path, "not valid UTF-8, storing stub row");
                store
                    .index_file(&stub_file(rel_path, hash), &[])
                    .with_context(|| format!("Failed to store {rel_path}"))?;
                outcome.files_failed += 1;
                continue;
            }
            Err(e) => {
                warn!(file = %rel_path, error = %e, "cannot read file");
                outcome.files_failed += 1;
                continue;
            }
        };

        let hash = file_hash(&source);
        if !force {
            let unchanged = lock(store)
                .get_file(rel_path)
                .ok()
                .flatten()
                .map_or(false, |existing| existing.hash == hash);
            if unchanged {
                outcome.files_skipped += 1;
                continue;
            }
        }

        let Some(extractor) = get_extractor(language) else {
            outcome.files_skipped += 1;
            continue;
        };
        let extraction = match extractor.extract(&source, rel_path) {
            Ok(e) => e,
            Err(e) => {
                warn!(file = %rel_path, error = %e, "extraction failed, storing stub row");
                lock(store)
                    .index_file(&stub_file(rel_path, hash), &[])
                    .with_context(|| format!("Failed to store {rel_path}"))?;
                outcome.files_failed += 1;
                continue;
            }
        };

        let meta = NewFile {
            path: rel_path.clone(),
            language: language.to_string(),
            role: file_role(rel_path),
            summary: Some(file_summary(&extraction.symbols)),
            stability: file_stability(rel_path),
            hash,
        };

        let symbols_added = extraction.symbols.len() as u32;
        lock(store)
            .index_file(&meta, &extraction.symbols)
            .with_context(|| format!("Failed to store {rel_path}"))?;

        pending.push(PendingRefs {
            file_path: rel_path.clone(),
            references: extraction.references,
        });
        outcome.files_indexed += 1;
        outcome.symbols_added += symbols_added;
    }

    // Prune rows for deleted files on full runs only. A partial run has no
    // view of the whole tree and must not guess at deletions.
    {
        let store = lock(store);
        if full_run {
            for indexed in store.all_files()? {
                if !current.contains(&indexed) {
                    store.remove_file(&indexed)?;
                    outcome.files_removed += 1;
                }
            }
        }
        outcome.relations_resolved = resolve_references(&store, &pending)?;
        outcome.relations_resolved += link_mirrors(&store)?;
    }

    info!(
        indexed = outcome.files_indexed,
        failed = outcome.files_failed,
        skipped = outcome.files_skipped,
        removed = outcome.files_removed,
        relations = outcome.relations_resolved,
        "index run complete"
    );
    Ok(outcome)
}

fn collect_source_files(root: &Path) -> Vec<String> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !is_ignored(e))
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "directory walk error");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if detect_language(path).is_none() {
            continue;
        }
        if let Ok(rel) = path.strip_prefix(root) {
            files.push(rel.to_string_lossy().to_string());
        }
    }
    files.sort();
    files
}

fn is_ignored(entry: &walkdir::DirEntry) -> bool {
    // The walk root is never filtered; a project may itself live in a
    // dot-prefixed directory. Only entries inside the tree are judged.
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() {
        return matches!(
            name.as_ref(),
            ".git"
                | ".hg"
                | ".svn"
                | "node_modules"
                | "__pycache__"
                | ".mypy_cache"
                | ".pytest_cache"
                | ".venv"
                | "venv"
                | "target"
                | "dist"
                | "build"
                | ".next"
                | "vendor"
        ) || name.starts_with('.');
    }
    false
}

fn file_hash(content: &str) -> String {
    bytes_hash(content.as_bytes())
}

fn bytes_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Row for a file the pipeline could not parse. The path stays visible in the
/// index with nothing attached to it.
fn stub_file(path: &str, hash: String) -> NewFile {
    NewFile {
        path: path.to_string(),
        language: "unknown".to_string(),
        role: FileRole::Other,
        summary: None,
        stability: Stability::Experimental,
        hash,
    }
}

// ── File metadata heuristics ──

fn file_role(path: &str) -> FileRole {
    let lower = path.to_ascii_lowercase();
    let stem = Path::new(&lower)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    if lower.contains("__tests__")
        || lower.contains("/tests/")
        || lower.starts_with("tests/")
        || stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with(".test")
        || stem.ends_with(".spec")
    {
        FileRole::Test
    } else if stem.contains("config") || stem.contains("settings") {
        FileRole::Config
    } else if lower.contains("/docs/") || lower.starts_with("docs/") {
        FileRole::Docs
    } else {
        FileRole::Core
    }
}

fn file_stability(path: &str) -> Stability {
    let lower = path.to_ascii_lowercase();
    if lower.contains("experimental") || lower.contains("/wip/") || lower.contains("draft") {
        Stability::Experimental
    } else {
        Stability::Stable
    }
}

/// A one-line structural digest used until something better is available.
fn file_summary(symbols: &[crate::types::NewSymbol]) -> String {
    use crate::types::SymbolType;
    if symbols.is_empty() {
        return "no top-level symbols".to_string();
    }
    let mut counts: Vec<(SymbolType, usize)> = Vec::new();
    for sym in symbols {
        match counts.iter_mut().find(|(t, _)| *t == sym.symbol_type) {
            Some((_, n)) => *n += 1,
            None => counts.push((sym.symbol_type, 1)),
        }
    }
    let parts: Vec<String> = counts
        .iter()
        .map(|(t, n)| {
            if *n == 1 {
                format!("1 {}", t.as_str())
            } else {
                format!("{n} {}s", t.as_str())
            }
        })
        .collect();
    let names: Vec<&str> = symbols.iter().take(5).map(|s| s.name.as_str()).collect();
    format!("{}: {}", parts.join(", "), names.join(", "))
}

// ── Reference resolution ──

/// Resolve captured name references into stored relations.
///
/// Resolution priority for symbol targets: same file, then same directory,
/// then a unique project-wide match. A name that resolves nowhere (or
/// ambiguously at the final tier) produces no relation.
fn resolve_references(store: &Store, pending: &[PendingRefs]) -> Result<u32> {
    let mut relations: Vec<(EntityRef, EntityRef, RelationType)> = Vec::new();

    for batch in pending {
        let Some(file) = store.get_file(&batch.file_path)? else {
            continue;
        };
        let file_symbols = store.list_symbols(file.id)?;
        let by_name: HashMap<&str, i64> = file_symbols
            .iter()
            .map(|s| (s.name.as_str(), s.id))
            .collect();
        let dir = parent_dir(&batch.file_path);

        for reference in &batch.references {
            let source = match &reference.source {
                RefSource::File => EntityRef::file(file.id),
                RefSource::Symbol(name) => match by_name.get(name.as_str()) {
                    Some(id) => EntityRef::symbol(*id),
                    None => continue,
                },
            };

            let target = match reference.relation_type {
                RelationType::Imports => {
                    resolve_import(store, &batch.file_path, &reference.target_name)?
                }
                _ => resolve_symbol_target(store, &by_name, &dir, &reference.target_name)?,
            };

            if let Some(target) = target {
                if source != target {
                    relations.push((source, target, reference.relation_type));
                }
            } else {
                debug!(
                    file = %batch.file_path,
                    target = %reference.target_name,
                    kind = %reference.relation_type.as_str(),
                    "reference did not resolve, dropping"
                );
            }
        }
    }

    store.insert_relations(&relations)
}

fn resolve_symbol_target(
    store: &Store,
    same_file: &HashMap<&str, i64>,
    dir: &str,
    name: &str,
) -> Result<Option<EntityRef>> {
    if let Some(id) = same_file.get(name) {
        return Ok(Some(EntityRef::symbol(*id)));
    }

    let candidates = store.find_symbols_by_name(name)?;
    if candidates.is_empty() {
        return Ok(None);
    }

    let in_dir: Vec<_> = candidates
        .iter()
        .filter(|(_, path)| parent_dir(path) == dir)
        .collect();
    if in_dir.len() == 1 {
        return Ok(Some(EntityRef::symbol(in_dir[0].0.id)));
    }
    if candidates.len() == 1 {
        return Ok(Some(EntityRef::symbol(candidates[0].0.id)));
    }
    Ok(None)
}

/// Resolve an import specifier to an indexed file.
///
/// Relative specifiers are joined lexically against the importing file's
/// directory, trying extension and index-file candidates. Bare specifiers
/// match a unique indexed file whose stem equals the last path segment,
/// which covers project-internal modules; external packages match nothing
/// and drop out.
fn resolve_import(store: &Store, from: &str, specifier: &str) -> Result<Option<EntityRef>> {
    if specifier.starts_with('.') {
        let base = normalize_path(&parent_dir(from), specifier);
        let candidates = [
            base.clone(),
            format!("{base}.ts"),
            format!("{base}.tsx"),
            format!("{base}.js"),
            format!("{base}.py"),
            format!("{base}.rs"),
            format!("{base}/index.ts"),
            format!("{base}/index.js"),
            format!("{base}/__init__.py"),
        ];
        for candidate in &candidates {
            if let Some(file) = store.get_file(candidate)? {
                return Ok(Some(EntityRef::file(file.id)));
            }
        }
        return Ok(None);
    }

    let last = specifier
        .rsplit(|c| c == '/' || c == '.' || c == ':')
        .find(|s| !s.is_empty())
        .unwrap_or(specifier);
    let matches: Vec<String> = store
        .all_files()?
        .into_iter()
        .filter(|p| {
            Path::new(p)
                .file_stem()
                .is_some_and(|s| s.to_string_lossy() == last)
        })
        .collect();
    if matches.len() == 1 {
        if let Some(file) = store.get_file(&matches[0])? {
            return Ok(Some(EntityRef::file(file.id)));
        }
    }
    Ok(None)
}

fn parent_dir(path: &str) -> String {
    Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Lexical join of a relative specifier against a directory, resolving
/// `.` and `..` without touching the filesystem.
fn normalize_path(dir: &str, specifier: &str) -> String {
    let mut parts: Vec<&str> = if dir.is_empty() {
        Vec::new()
    } else {
        dir.split('/').collect()
    };
    for segment in specifier.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

// ── Test mirroring ──

/// Link each test file to the implementation file it exercises, judged by
/// naming convention (`test_auth.py` mirrors `auth.py`, `user.test.ts`
/// mirrors `user.ts`). Ambiguous stems are left unlinked.
fn link_mirrors(store: &Store) -> Result<u32> {
    let all = store.all_files()?;
    let mut relations = Vec::new();

    for path in &all {
        if file_role(path) != FileRole::Test {
            continue;
        }
        let Some(target_stem) = mirrored_stem(path) else {
            continue;
        };

        let matches: Vec<&String> = all
            .iter()
            .filter(|p| {
                file_role(p) != FileRole::Test
                    && Path::new(p.as_str())
                        .file_stem()
                        .is_some_and(|s| s.to_string_lossy() == target_stem)
            })
            .collect();
        if matches.len() != 1 {
            continue;
        }
        let (Some(test_file), Some(impl_file)) =
            (store.get_file(path)?, store.get_file(matches[0])?)
        else {
            continue;
        };
        relations.push((
            EntityRef::file(test_file.id),
            EntityRef::file(impl_file.id),
            RelationType::Mirrors,
        ));
    }

    store.insert_relations(&relations)
}

fn mirrored_stem(path: &str) -> Option<String> {
    let stem = Path::new(path).file_stem()?.to_string_lossy().to_string();
    for suffix in [".test", ".spec", "_test", "_spec"] {
        if let Some(base) = stem.strip_suffix(suffix) {
            return Some(base.to_string());
        }
    }
    stem.strip_prefix("test_").map(str::to_string)
}

// ── Embedding pass ──

/// Text fed to the embedding model for each entity kind.
fn file_embed_text(file: &crate::types::FileRecord) -> String {
    format!(
        "{} ({}, {}): {}",
        file.path,
        file.language,
        file.role.as_str(),
        file.summary.as_deref().unwrap_or("")
    )
}

fn symbol_embed_text(symbol: &crate::types::SymbolRecord, file_path: &str) -> String {
    format!(
        "{} {} in {}: {}",
        symbol.symbol_type.as_str(),
        symbol.name,
        file_path,
        symbol.summary.as_deref().unwrap_or("")
    )
}

fn standard_embed_text(category: StandardCategory, rule_text: &str) -> String {
    format!("{}: {rule_text}", category.as_str())
}

/// Embed every entity that lacks a vector under the active model.
///
/// Entity texts are gathered under the lock, then the slow HTTP calls run
/// without it. A failed embedding is logged and skipped; the entity stays
/// retrievable structurally and picks up a vector on the next pass.
pub async fn embed_pending(store: &Mutex<Store>, client: &OllamaClient) -> Result<(u32, u32)> {
    let model = client.embedding_model().to_string();
    let work: Vec<(EntityRef, String)> = {
        let store = lock(store);
        let mut work = Vec::new();

        for path in store.all_files()? {
            let Some(file) = store.get_file(&path)? else {
                continue;
            };
            let entity = EntityRef::file(file.id);
            if !store.embedding_exists(entity, &model)? {
                work.push((entity, file_embed_text(&file)));
            }
            for symbol in store.list_symbols(file.id)? {
                let entity = EntityRef::symbol(symbol.id);
                if !store.embedding_exists(entity, &model)? {
                    work.push((entity, symbol_embed_text(&symbol, &path)));
                }
            }
        }
        for standard in store.list_standards()? {
            let entity = EntityRef::standard(standard.id);
            if !store.embedding_exists(entity, &model)? {
                work.push((entity, standard_embed_text(standard.category, &standard.rule_text)));
            }
        }
        work
    };

    let mut embedded = 0u32;
    let mut failed = 0u32;
    for (entity, text) in work {
        match client.embed(&text).await {
            Ok(vector) => {
                let bytes = crate::embedding::embedding_to_bytes(&vector);
                lock(store).upsert_embedding(entity, &bytes, &model)?;
                embedded += 1;
            }
            Err(e) => {
                warn!(
                    entity_type = %entity.entity_type.as_str(),
                    entity_id = entity.entity_id,
                    error = %e,
                    "embedding failed, entity left without vector"
                );
                failed += 1;
            }
        }
    }
    if embedded > 0 || failed > 0 {
        info!(embedded, failed, "embedding pass complete");
    }
    Ok((embedded, failed))
}
