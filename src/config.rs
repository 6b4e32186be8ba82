//! Daemon configuration, read once at startup.
//!
//! Everything comes from the environment with sensible local defaults; the
//! editor extension sets these variables when it spawns the daemon.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Database filename, stored in the project root.
pub const DB_FILE: &str = ".codelore.db";

/// Default HTTP port the daemon listens on.
pub const DEFAULT_PORT: u16 = 3001;

#[derive(Debug, Clone)]
pub struct Config {
    /// Listening port for the HTTP server.
    pub port: u16,
    /// Base URL of the Ollama backend serving both models.
    pub ollama_base_url: String,
    /// Model used for embeddings.
    pub embedding_model: String,
    /// Model used for generation.
    pub generation_model: String,
    /// Path of the SQLite database.
    pub db_path: PathBuf,
    /// Timeout for one embedding request.
    pub embed_timeout_secs: u64,
    /// Timeout for one generation request.
    pub generate_timeout_secs: u64,
    /// Hard cap on items in an assembled context bundle.
    pub context_budget: usize,
    /// Top-N semantic matches requested per entity type.
    pub semantic_top_n: usize,
}

impl Config {
    /// Build a config for the given project root from the environment.
    ///
    /// Recognized variables: `PORT`, `OLLAMA_BASE_URL`,
    /// `OLLAMA_EMBEDDING_MODEL`, `OLLAMA_GENERATION_MODEL`, `CODELORE_DB`.
    pub fn from_env(project_root: &Path) -> Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(v) => v
                .parse::<u16>()
                .with_context(|| format!("invalid PORT value '{v}'"))?,
            Err(_) => DEFAULT_PORT,
        };

        let db_path = std::env::var("CODELORE_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| project_root.join(DB_FILE));

        Ok(Self {
            port,
            ollama_base_url: env_or("OLLAMA_BASE_URL", "http://localhost:11434"),
            embedding_model: env_or("OLLAMA_EMBEDDING_MODEL", "nomic-embed-text"),
            generation_model: env_or("OLLAMA_GENERATION_MODEL", "llama3.2:3b"),
            db_path,
            embed_timeout_secs: 30,
            generate_timeout_secs: 120,
            context_budget: 12,
            semantic_top_n: 5,
        })
    }

    /// Defaults without touching the environment (tests, one-shot commands).
    pub fn for_project(project_root: &Path) -> Self {
        Self {
            port: DEFAULT_PORT,
            ollama_base_url: "http://localhost:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            generation_model: "llama3.2:3b".to_string(),
            db_path: project_root.join(DB_FILE),
            embed_timeout_secs: 30,
            generate_timeout_secs: 120,
            context_budget: 12,
            semantic_top_n: 5,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_project() {
        let cfg = Config::for_project(Path::new("/tmp/proj"));
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.db_path, Path::new("/tmp/proj").join(DB_FILE));
        assert_eq!(cfg.embedding_model, "nomic-embed-text");
        assert!(cfg.context_budget > 0);
    }
}
