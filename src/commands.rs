use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use crate::agent::{self, AgentError};
use crate::config::Config;
use crate::context;
use crate::indexer;
use crate::ollama::OllamaClient;
use crate::protocol::{AgentContext, AgentData};
use crate::server;
use crate::standards;
use crate::store::Store;

fn project_root(path: &str) -> Result<PathBuf> {
    let root = Path::new(path)
        .canonicalize()
        .with_context(|| format!("Project path not found: {path}"))?;
    anyhow::ensure!(root.is_dir(), "Project path is not a directory: {path}");
    Ok(root)
}

fn open_store(config: &Config) -> Result<Store> {
    Store::open(&config.db_path).context("Failed to open codelore database")
}

/// Print `data` as pretty JSON if `json` is true, otherwise call `human_fmt`.
fn output<T: Serialize>(data: &T, json: bool, human_fmt: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(data)?);
    } else {
        human_fmt(data);
    }
    Ok(())
}

/// Run the HTTP daemon for a project.
pub async fn cmd_serve(path: &str) -> Result<()> {
    let root = project_root(path)?;
    let config = Config::from_env(&root)?;
    server::run_server(config, root).await
}

/// Index a project into the local database, no daemon needed.
pub async fn cmd_index(
    path: &str,
    files: &[String],
    force: bool,
    no_embed: bool,
    json: bool,
) -> Result<()> {
    let root = project_root(path)?;
    let config = Config::from_env(&root)?;
    let store = Mutex::new(open_store(&config)?);

    let file_filter = if files.is_empty() { None } else { Some(files) };
    let mut outcome = indexer::index_project(&store, &root, file_filter, force)?;

    if !no_embed {
        let client = OllamaClient::new(&config)?;
        match indexer::embed_pending(&store, &client).await {
            Ok((embedded, failed)) => {
                outcome.entities_embedded = embedded;
                outcome.embed_failures = failed;
            }
            Err(e) => warn!(error = %format!("{e:#}"), "embedding pass aborted"),
        }
    }

    output(&outcome, json, |o| {
        println!(
            "Indexed {} files ({} skipped, {} failed, {} removed)",
            o.files_indexed, o.files_skipped, o.files_failed, o.files_removed
        );
        println!(
            "  {} symbols, {} relations resolved, {} embeddings ({} failed)",
            o.symbols_added, o.relations_resolved, o.entities_embedded, o.embed_failures
        );
    })
}

/// Run one query against the indexed project.
#[allow(clippy::too_many_arguments)]
pub async fn cmd_query(
    task: &str,
    path: &str,
    files: &[String],
    symbols: &[String],
    current_file: Option<&str>,
    current_symbol: Option<&str>,
    json: bool,
) -> Result<()> {
    anyhow::ensure!(!task.trim().is_empty(), "Task must not be empty");
    let root = project_root(path)?;
    let config = Config::from_env(&root)?;
    let store = open_store(&config)?;
    let client = OllamaClient::new(&config)?;

    let hints = AgentContext {
        task: Some(task.to_string()),
        files: (!files.is_empty()).then(|| files.to_vec()),
        symbols: (!symbols.is_empty()).then(|| symbols.to_vec()),
        current_file: current_file.map(str::to_string),
        current_symbol: current_symbol.map(str::to_string),
        ..Default::default()
    };

    let query_vector = match client.embed(task).await {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "query embedding failed, semantic channel disabled");
            None
        }
    };
    let bundle = context::assemble(
        &store,
        &hints,
        query_vector.as_deref(),
        client.embedding_model(),
        &config,
    )?;

    let result = match agent::run(&client, task, &bundle, Some(&hints)).await {
        Ok(result) => result,
        Err(AgentError::InsufficientContext) => anyhow::bail!(
            "No indexed context matches the task; run `codelore index` or add --file/--symbol hints"
        ),
        Err(AgentError::Llm(e)) => return Err(e.context("Generation backend failed")),
    };

    output(&result, json, |r| match &r.data {
        Some(AgentData::Report(report)) => {
            if let Some(analysis) = &report.analysis {
                println!("Analysis: {analysis}");
            }
            if let Some(explanation) = &report.explanation {
                println!("{explanation}");
            }
            if let Some(diffs) = &report.diffs {
                for (file, diff) in diffs {
                    println!("\n--- {file}\n{diff}");
                }
            }
            if let Some(standards) = &report.standards {
                println!(
                    "Standards: {}",
                    serde_json::to_string_pretty(standards).unwrap_or_default()
                );
            }
        }
        Some(AgentData::Raw { text }) => println!("{text}"),
        None => println!("(no reply)"),
    })
}

/// Extract coding standards from the indexed project.
pub async fn cmd_standards(path: &str, json: bool) -> Result<()> {
    let root = project_root(path)?;
    let config = Config::from_env(&root)?;
    let client = OllamaClient::new(&config)?;
    let store = Mutex::new(open_store(&config)?);

    let rules = standards::extract_standards(&store, &client).await?;
    if let Err(e) = indexer::embed_pending(&store, &client).await {
        warn!(error = %format!("{e:#}"), "embedding pass aborted");
    }

    let listed = store
        .lock()
        .expect("store mutex poisoned")
        .list_standards()?;
    output(&listed, json, |standards| {
        println!("Extracted {rules} standards:");
        for standard in standards {
            println!("  [{}] {}", standard.category, standard.rule_text);
        }
    })
}

/// Print database row counts.
pub fn cmd_stats(path: &str, json: bool) -> Result<()> {
    let root = project_root(path)?;
    let config = Config::from_env(&root)?;
    let store = open_store(&config)?;
    let stats = store.stats()?;

    output(&stats, json, |s| {
        println!("files:      {}", s.files_count);
        println!("symbols:    {}", s.symbols_count);
        println!("relations:  {}", s.relations_count);
        println!("standards:  {}", s.standards_count);
        println!("embeddings: {}", s.embeddings_count);
    })
}
