//! Coding-standards extraction.
//!
//! Prompts the generation backend with a digest of what the index knows about
//! the project and parses a JSON array of rules back. The standards table is
//! rewritten only by this pass; file re-indexing never touches it.

use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::ollama::OllamaClient;
use crate::store::Store;
use crate::types::StandardCategory;

/// Keep the digest bounded for small local models.
const DIGEST_FILE_CAP: usize = 200;

/// One rule as the backend reports it. `category` is matched lossily against
/// the closed category set; `examples` accepts a string or an array of
/// strings.
#[derive(Debug, Deserialize)]
struct ReportedRule {
    #[serde(default)]
    category: String,
    rule_text: String,
    #[serde(default)]
    examples: Option<Value>,
}

/// Run the full pass: digest, generate, parse, replace. Returns the number of
/// rules stored. Embeddings for the new rows are picked up by the next
/// embedding pass.
pub async fn extract_standards(store: &Mutex<Store>, client: &OllamaClient) -> Result<u32> {
    let digest = {
        let store = store.lock().expect("store mutex poisoned");
        build_digest(&store)?
    };
    if digest.is_empty() {
        bail!("No indexed files to extract standards from; run an index pass first");
    }

    let reply = client
        .generate(&build_prompt(&digest))
        .await
        .context("Standards generation request failed")?;
    let rules = parse_rules(&reply)?;
    if rules.is_empty() {
        bail!("Backend reply contained no usable rules");
    }

    let store = store.lock().expect("store mutex poisoned");
    store.clear_standards()?;
    let mut inserted = 0u32;
    for rule in &rules {
        if rule.rule_text.trim().is_empty() {
            debug!("skipping rule with empty text");
            continue;
        }
        let category = StandardCategory::from_str_lossy(&rule.category);
        let examples = rule.examples.as_ref().and_then(examples_text);
        store.upsert_standard(category, rule.rule_text.trim(), examples.as_deref())?;
        inserted += 1;
    }
    info!(rules = inserted, "standards table rewritten");
    Ok(inserted)
}

/// One line per indexed file, capped so the prompt stays within a small
/// model's context window.
fn build_digest(store: &Store) -> Result<String> {
    let mut lines = Vec::new();
    for path in store.all_files()? {
        if lines.len() >= DIGEST_FILE_CAP {
            warn!(cap = DIGEST_FILE_CAP, "digest truncated");
            break;
        }
        let Some(file) = store.get_file(&path)? else {
            continue;
        };
        lines.push(format!(
            "- {} ({}, {}): {}",
            file.path,
            file.language,
            file.role.as_str(),
            file.summary.as_deref().unwrap_or("")
        ));
    }
    Ok(lines.join("\n"))
}

fn build_prompt(digest: &str) -> String {
    let categories = "naming, error_handling, logging, architecture, testing, other";
    format!(
        "You are a code reviewer. Below is a summary of every file in a project.\n\
         Infer the coding standards and conventions this project follows.\n\n\
         # Files\n{digest}\n\n\
         Respond with a JSON array only. Each element must be an object with\n\
         \"category\" (one of: {categories}), \"rule_text\" (one sentence), and\n\
         optionally \"examples\" (a short string). No prose outside the JSON."
    )
}

/// Parse the reply as a JSON array of rules, tolerating markdown fences and
/// surrounding prose.
fn parse_rules(reply: &str) -> Result<Vec<ReportedRule>> {
    for candidate in array_candidates(reply) {
        if let Ok(rules) = serde_json::from_str::<Vec<ReportedRule>>(candidate) {
            return Ok(rules);
        }
    }
    bail!("Backend reply is not a JSON array of rules: {reply:.120}");
}

fn array_candidates(text: &str) -> Vec<&str> {
    let mut candidates = vec![text.trim()];
    if let Some(inner) = fenced_block(text, "```json").or_else(|| fenced_block(text, "```")) {
        candidates.push(inner);
    }
    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
        if start < end {
            candidates.push(&text[start..=end]);
        }
    }
    candidates
}

fn fenced_block<'a>(text: &'a str, fence: &str) -> Option<&'a str> {
    let start = text.find(fence)? + fence.len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

/// Condense the examples value to one display string.
fn examples_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(items) => {
            let parts: Vec<&str> = items
                .iter()
                .filter_map(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }
        _ => None,
    }
}
