//! codelore: local, private code intelligence.
//!
//! Indexes a project into a SQLite graph of files, symbols, and typed
//! relations, embeds every entity with a local Ollama model, and answers
//! natural-language tasks by assembling graph plus semantic context and making
//! exactly one local generation call. Nothing leaves the machine.
//!
//! The binary exposes the daemon (`codelore serve`) and one-shot commands
//! (`index`, `query`, `standards`, `stats`); this library is what the
//! integration tests drive directly.

pub mod agent;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod embedding;
pub mod extract;
pub mod indexer;
pub mod ollama;
pub mod protocol;
pub mod server;
pub mod standards;
pub mod store;
pub mod types;
