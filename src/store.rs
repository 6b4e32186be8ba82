use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use crate::protocol::DbStatsResponse;
use crate::types::{
    EntityRef, EntityType, FileRecord, FileRole, NewSymbol, Relation, RelationType, Stability,
    Standard, StandardCategory, SymbolRecord, SymbolType, Visibility,
};

const SQL_INSERT_SYMBOL: &str = "INSERT INTO symbols
     (file_id, name, symbol_type, visibility, summary, line_start, line_end)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

const SQL_INSERT_RELATION: &str = "INSERT OR IGNORE INTO relations
     (source_type, source_id, target_type, target_id, relation_type)
     VALUES (?1, ?2, ?3, ?4, ?5)";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    language TEXT NOT NULL,
    role TEXT NOT NULL,
    summary TEXT,
    stability TEXT NOT NULL,
    hash TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS symbols (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    symbol_type TEXT NOT NULL,
    visibility TEXT NOT NULL,
    summary TEXT,
    line_start INTEGER NOT NULL,
    line_end INTEGER NOT NULL,
    FOREIGN KEY (file_id) REFERENCES files(id)
);

CREATE TABLE IF NOT EXISTS relations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_type TEXT NOT NULL,
    source_id INTEGER NOT NULL,
    target_type TEXT NOT NULL,
    target_id INTEGER NOT NULL,
    relation_type TEXT NOT NULL,
    UNIQUE (source_type, source_id, target_type, target_id, relation_type)
);

CREATE TABLE IF NOT EXISTS standards (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category TEXT NOT NULL,
    rule_text TEXT NOT NULL,
    examples TEXT
);

CREATE TABLE IF NOT EXISTS embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    vector BLOB NOT NULL,
    model_name TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (entity_type, entity_id, model_name)
);

CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_id);
CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
CREATE INDEX IF NOT EXISTS idx_relations_source ON relations(source_type, source_id);
CREATE INDEX IF NOT EXISTS idx_relations_target ON relations(target_type, target_id);
CREATE INDEX IF NOT EXISTS idx_embeddings_entity ON embeddings(entity_type, entity_id);
CREATE INDEX IF NOT EXISTS idx_embeddings_model ON embeddings(model_name);
"#;

/// File metadata going into the store; ids and timestamps are assigned here.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub path: String,
    pub language: String,
    pub role: FileRole,
    pub summary: Option<String>,
    pub stability: Stability,
    pub hash: String,
}

/// A stored embedding row, as loaded for similarity search.
#[derive(Debug, Clone)]
pub struct EmbeddingRow {
    pub entity: EntityRef,
    pub vector: Vec<u8>,
    pub updated_at: i64,
}

/// Single source of truth for all persisted rows. The store exclusively owns
/// row lifetime; no other component deletes rows directly.
pub struct Store {
    conn: Connection,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open or create the database at the given path.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).context("Failed to open database")?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA synchronous=NORMAL;
             PRAGMA cache_size=-65536;
             PRAGMA temp_store=MEMORY;",
        )
        .context("Failed to set pragmas")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to create schema")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for tests).
    #[doc(hidden)]
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // ── Files ──

    /// Insert or update a file row keyed by path. The id and created_at of an
    /// existing row are preserved; updated_at is bumped.
    pub fn upsert_file(&self, file: &NewFile) -> Result<FileRecord> {
        let now = now_secs();
        self.conn.execute(
            "INSERT INTO files (path, language, role, summary, stability, hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(path) DO UPDATE SET
                 language = excluded.language,
                 role = excluded.role,
                 summary = excluded.summary,
                 stability = excluded.stability,
                 hash = excluded.hash,
                 updated_at = excluded.updated_at",
            params![
                file.path,
                file.language,
                file.role.as_str(),
                file.summary,
                file.stability.as_str(),
                file.hash,
                now,
            ],
        )?;
        self.get_file(&file.path)?
            .context("file row missing after upsert")
    }

    /// Look up a file by path.
    pub fn get_file(&self, path: &str) -> Result<Option<FileRecord>> {
        self.conn
            .query_row(
                "SELECT id, path, language, role, summary, stability, hash, created_at, updated_at
                 FROM files WHERE path = ?1",
                params![path],
                row_to_file,
            )
            .optional()
            .context("Failed to query file")
    }

    pub fn get_file_by_id(&self, id: i64) -> Result<Option<FileRecord>> {
        self.conn
            .query_row(
                "SELECT id, path, language, role, summary, stability, hash, created_at, updated_at
                 FROM files WHERE id = ?1",
                params![id],
                row_to_file,
            )
            .optional()
            .context("Failed to query file")
    }

    /// All indexed file paths, sorted alphabetically.
    pub fn all_files(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT path FROM files ORDER BY path")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// One indexing unit: upsert the file row and atomically replace its full
    /// symbol set. Relations touching the old symbols and the file's outgoing
    /// relations are dropped in the same transaction, so no dangling edge is
    /// ever visible. Incoming file-level relations survive (the file id is
    /// stable across re-indexing). A content change also drops the file's
    /// embeddings; the next embedding pass recomputes them, so a stale vector
    /// is never served against the new content.
    pub fn index_file(&self, file: &NewFile, symbols: &[NewSymbol]) -> Result<(FileRecord, Vec<SymbolRecord>)> {
        let tx = self.conn.unchecked_transaction()?;
        let prior_hash = self.get_file(&file.path)?.map(|f| f.hash);
        let record = self.upsert_file(file)?;

        if prior_hash.is_some_and(|h| h != record.hash) {
            self.remove_embeddings_for(EntityRef::file(record.id))?;
        }
        self.delete_symbol_graph(record.id)?;
        self.conn.execute(
            "DELETE FROM relations WHERE source_type = 'file' AND source_id = ?1",
            params![record.id],
        )?;

        let mut stmt = self.conn.prepare_cached(SQL_INSERT_SYMBOL)?;
        let mut records = Vec::with_capacity(symbols.len());
        for sym in symbols {
            stmt.execute(params![
                record.id,
                sym.name,
                sym.symbol_type.as_str(),
                sym.visibility.as_str(),
                sym.summary,
                sym.line_start,
                sym.line_end,
            ])?;
            let id = self.conn.last_insert_rowid();
            records.push(SymbolRecord {
                id,
                file_id: record.id,
                name: sym.name.clone(),
                symbol_type: sym.symbol_type,
                visibility: sym.visibility,
                summary: sym.summary.clone(),
                line_start: sym.line_start,
                line_end: sym.line_end,
            });
        }
        tx.commit()?;
        Ok((record, records))
    }

    /// Remove a file together with its symbols, every relation touching the
    /// file or its symbols, and every embedding they own.
    pub fn remove_file(&self, path: &str) -> Result<()> {
        let Some(file) = self.get_file(path)? else {
            return Ok(());
        };
        let tx = self.conn.unchecked_transaction()?;
        self.delete_symbol_graph(file.id)?;
        self.conn.execute(
            "DELETE FROM relations
             WHERE (source_type = 'file' AND source_id = ?1)
                OR (target_type = 'file' AND target_id = ?1)",
            params![file.id],
        )?;
        self.remove_embeddings_for(EntityRef::file(file.id))?;
        self.conn
            .execute("DELETE FROM symbols WHERE file_id = ?1", params![file.id])?;
        self.conn
            .execute("DELETE FROM files WHERE id = ?1", params![file.id])?;
        tx.commit()?;
        Ok(())
    }

    /// Drop relations and embeddings owned by a file's current symbols, then
    /// the symbols themselves. Caller must be inside a transaction.
    fn delete_symbol_graph(&self, file_id: i64) -> Result<()> {
        self.conn.execute(
            "DELETE FROM relations
             WHERE (source_type = 'symbol' AND source_id IN (SELECT id FROM symbols WHERE file_id = ?1))
                OR (target_type = 'symbol' AND target_id IN (SELECT id FROM symbols WHERE file_id = ?1))",
            params![file_id],
        )?;
        self.conn.execute(
            "DELETE FROM embeddings
             WHERE entity_type = 'symbol'
               AND entity_id IN (SELECT id FROM symbols WHERE file_id = ?1)",
            params![file_id],
        )?;
        self.conn
            .execute("DELETE FROM symbols WHERE file_id = ?1", params![file_id])?;
        Ok(())
    }

    // ── Symbols ──

    /// All symbols of a file, ordered by line.
    pub fn list_symbols(&self, file_id: i64) -> Result<Vec<SymbolRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, file_id, name, symbol_type, visibility, summary, line_start, line_end
             FROM symbols WHERE file_id = ?1 ORDER BY line_start",
        )?;
        let rows = stmt
            .query_map(params![file_id], row_to_symbol)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_symbol(&self, id: i64) -> Result<Option<SymbolRecord>> {
        self.conn
            .query_row(
                "SELECT id, file_id, name, symbol_type, visibility, summary, line_start, line_end
                 FROM symbols WHERE id = ?1",
                params![id],
                row_to_symbol,
            )
            .optional()
            .context("Failed to query symbol")
    }

    /// All symbols with the given name, with their owning file path.
    pub fn find_symbols_by_name(&self, name: &str) -> Result<Vec<(SymbolRecord, String)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT s.id, s.file_id, s.name, s.symbol_type, s.visibility, s.summary,
                    s.line_start, s.line_end, f.path
             FROM symbols s JOIN files f ON s.file_id = f.id
             WHERE s.name = ?1
             ORDER BY f.path, s.line_start",
        )?;
        let rows = stmt
            .query_map(params![name], |row| {
                Ok((row_to_symbol(row)?, row.get::<_, String>(8)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Relations ──

    /// Insert relations, idempotent on the full (source, target, type) key.
    /// Returns the number of rows actually inserted.
    pub fn insert_relations(&self, relations: &[(EntityRef, EntityRef, RelationType)]) -> Result<u32> {
        let tx = self.conn.unchecked_transaction()?;
        let mut stmt = self.conn.prepare_cached(SQL_INSERT_RELATION)?;
        let mut inserted = 0u32;
        for (source, target, rel_type) in relations {
            inserted += stmt.execute(params![
                source.entity_type.as_str(),
                source.entity_id,
                target.entity_type.as_str(),
                target.entity_id,
                rel_type.as_str(),
            ])? as u32;
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// All relations where the entity appears as source or target.
    pub fn list_relations(&self, entity: EntityRef) -> Result<Vec<Relation>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, source_type, source_id, target_type, target_id, relation_type
             FROM relations
             WHERE (source_type = ?1 AND source_id = ?2)
                OR (target_type = ?1 AND target_id = ?2)
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(
                params![entity.entity_type.as_str(), entity.entity_id],
                row_to_relation,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Standards ──

    /// Insert a standard. Standards persist across file re-indexing and are
    /// only rewritten by an explicit extraction pass.
    pub fn upsert_standard(
        &self,
        category: StandardCategory,
        rule_text: &str,
        examples: Option<&str>,
    ) -> Result<Standard> {
        anyhow::ensure!(!rule_text.trim().is_empty(), "rule_text cannot be empty");
        self.conn.execute(
            "INSERT INTO standards (category, rule_text, examples) VALUES (?1, ?2, ?3)",
            params![category.as_str(), rule_text, examples],
        )?;
        Ok(Standard {
            id: self.conn.last_insert_rowid(),
            category,
            rule_text: rule_text.to_string(),
            examples: examples.map(str::to_string),
        })
    }

    pub fn list_standards(&self) -> Result<Vec<Standard>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, category, rule_text, examples FROM standards ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                let cat: String = row.get(1)?;
                Ok(Standard {
                    id: row.get(0)?,
                    category: StandardCategory::from_str_lossy(&cat),
                    rule_text: row.get(2)?,
                    examples: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_standard(&self, id: i64) -> Result<Option<Standard>> {
        self.conn
            .query_row(
                "SELECT id, category, rule_text, examples FROM standards WHERE id = ?1",
                params![id],
                |row| {
                    let cat: String = row.get(1)?;
                    Ok(Standard {
                        id: row.get(0)?,
                        category: StandardCategory::from_str_lossy(&cat),
                        rule_text: row.get(2)?,
                        examples: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("Failed to query standard")
    }

    /// Wipe all standards and their embeddings (regeneration only).
    pub fn clear_standards(&self) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        self.conn
            .execute("DELETE FROM embeddings WHERE entity_type = 'standard'", [])?;
        self.conn.execute("DELETE FROM standards", [])?;
        tx.commit()?;
        Ok(())
    }

    // ── Embeddings ──

    /// Insert or replace the embedding for (entity, model). One active row
    /// per key; a replace is how stale vectors get recomputed.
    pub fn upsert_embedding(&self, entity: EntityRef, vector: &[u8], model_name: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO embeddings (entity_type, entity_id, vector, model_name, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(entity_type, entity_id, model_name) DO UPDATE SET
                 vector = excluded.vector,
                 updated_at = excluded.updated_at",
            params![
                entity.entity_type.as_str(),
                entity.entity_id,
                vector,
                model_name,
                now_secs(),
            ],
        )?;
        Ok(())
    }

    /// Drop every embedding owned by one entity, across models.
    pub fn remove_embeddings_for(&self, entity: EntityRef) -> Result<()> {
        self.conn.execute(
            "DELETE FROM embeddings WHERE entity_type = ?1 AND entity_id = ?2",
            params![entity.entity_type.as_str(), entity.entity_id],
        )?;
        Ok(())
    }

    /// True if the entity has an embedding under the given model.
    pub fn embedding_exists(&self, entity: EntityRef, model_name: &str) -> Result<bool> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM embeddings
                 WHERE entity_type = ?1 AND entity_id = ?2 AND model_name = ?3",
                params![entity.entity_type.as_str(), entity.entity_id, model_name],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    /// Load all embeddings for one model, optionally filtered by entity type.
    /// Rows from other models are excluded from search, never served stale.
    pub fn load_embeddings(
        &self,
        model_name: &str,
        type_filter: Option<EntityType>,
    ) -> Result<Vec<EmbeddingRow>> {
        let filter = type_filter.map(|t| t.as_str());
        let mut stmt = self.conn.prepare_cached(
            "SELECT entity_type, entity_id, vector, updated_at
             FROM embeddings
             WHERE model_name = ?1 AND (?2 IS NULL OR entity_type = ?2)",
        )?;
        let rows = stmt
            .query_map(params![model_name, filter], |row| {
                let type_str: String = row.get(0)?;
                Ok((type_str, row.get::<_, i64>(1)?, row.get::<_, Vec<u8>>(2)?, row.get::<_, i64>(3)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (type_str, entity_id, vector, updated_at) in rows {
            let entity_type = match type_str.parse::<EntityType>() {
                Ok(t) => t,
                Err(_) => {
                    warn!(entity_type = %type_str, "unknown entity type in embeddings table, skipping");
                    continue;
                }
            };
            out.push(EmbeddingRow {
                entity: EntityRef {
                    entity_type,
                    entity_id,
                },
                vector,
                updated_at,
            });
        }
        Ok(out)
    }

    // ── Stats ──

    /// Row counts per table.
    pub fn stats(&self) -> Result<DbStatsResponse> {
        let count = |table: &str| -> Result<u32> {
            Ok(self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?)
        };
        Ok(DbStatsResponse {
            files_count: count("files")?,
            symbols_count: count("symbols")?,
            relations_count: count("relations")?,
            standards_count: count("standards")?,
            embeddings_count: count("embeddings")?,
        })
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ── Row Mapping Helpers ──

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    let role: String = row.get(3)?;
    let stability: String = row.get(5)?;
    Ok(FileRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        language: row.get(2)?,
        role: FileRole::from_str_lossy(&role),
        summary: row.get(4)?,
        stability: Stability::from_str_lossy(&stability),
        hash: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn row_to_symbol(row: &rusqlite::Row<'_>) -> rusqlite::Result<SymbolRecord> {
    let type_str: String = row.get(3)?;
    let symbol_type = type_str.parse().unwrap_or_else(|_| {
        warn!(symbol_type = %type_str, "unknown symbol type, defaulting to variable");
        SymbolType::Variable
    });
    let vis: String = row.get(4)?;
    Ok(SymbolRecord {
        id: row.get(0)?,
        file_id: row.get(1)?,
        name: row.get(2)?,
        symbol_type,
        visibility: Visibility::from_str_lossy(&vis),
        summary: row.get(5)?,
        line_start: row.get(6)?,
        line_end: row.get(7)?,
    })
}

fn row_to_relation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Relation> {
    let source_type: String = row.get(1)?;
    let target_type: String = row.get(3)?;
    let rel_type: String = row.get(5)?;
    Ok(Relation {
        id: row.get(0)?,
        source: EntityRef {
            entity_type: source_type.parse().unwrap_or(EntityType::File),
            entity_id: row.get(2)?,
        },
        target: EntityRef {
            entity_type: target_type.parse().unwrap_or(EntityType::File),
            entity_id: row.get(4)?,
        },
        relation_type: rel_type.parse().unwrap_or(RelationType::Imports),
    })
}
