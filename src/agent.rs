//! Query execution: one prompt, one generation call, best-effort parsing.
//!
//! The task text selects an instruction frame; the assembled context bundle
//! becomes the prompt's retrieval sections. Whatever the model returns is
//! wrapped, never rejected: a parseable report becomes structured data, and
//! anything else is passed through as raw text.

use anyhow::Result;

use crate::context::ContextBundle;
use crate::ollama::OllamaClient;
use crate::protocol::{AgentContext, AgentData, AgentReport, AgentResult};

/// Why a query could not produce a result.
#[derive(Debug)]
pub enum AgentError {
    /// Nothing was retrieved for the task; no generation call is made.
    InsufficientContext,
    /// The generation backend failed (unreachable, timeout, HTTP error).
    Llm(anyhow::Error),
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientContext => {
                write!(f, "no indexed context matches the task")
            }
            Self::Llm(e) => write!(f, "{e:#}"),
        }
    }
}

/// Instruction frame chosen from the task wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFrame {
    Explain,
    Refactor,
    Debug,
    Standards,
    General,
}

impl TaskFrame {
    pub fn detect(task: &str) -> Self {
        let lower = task.to_ascii_lowercase();
        if lower.contains("refactor") || lower.contains("rewrite") || lower.contains("rename") {
            Self::Refactor
        } else if lower.contains("fail") || lower.contains("bug") || lower.contains("debug")
            || lower.contains("error") || lower.contains("broken")
        {
            Self::Debug
        } else if lower.contains("standard") || lower.contains("convention") {
            Self::Standards
        } else if lower.contains("explain") || lower.contains("why") || lower.contains("how")
            || lower.contains("what")
        {
            Self::Explain
        } else {
            Self::General
        }
    }

    fn instructions(self) -> &'static str {
        match self {
            Self::Explain => {
                "Explain the code in question using only the context above. \
                 Reply with a JSON object: {\"explanation\": \"...\"}."
            }
            Self::Refactor => {
                "Propose a refactoring for the task using only the context above. \
                 Reply with a JSON object: {\"analysis\": \"...\", \
                 \"diffs\": {\"path/to/file\": \"suggested change\"}}."
            }
            Self::Debug => {
                "Diagnose the failure described in the task using only the context \
                 above. Reply with a JSON object: {\"analysis\": \"...\", \
                 \"explanation\": \"...\"}."
            }
            Self::Standards => {
                "Summarize the project conventions relevant to the task from the \
                 standards and code above. Reply with a JSON object: \
                 {\"standards\": [{\"category\": \"...\", \"rule_text\": \"...\"}]}."
            }
            Self::General => {
                "Answer the task using only the context above. Reply with a JSON \
                 object: {\"analysis\": \"...\"}."
            }
        }
    }
}

/// Hard cap on the rendered context section. Local models have small context
/// windows and the assembler's item budget does not bound line lengths.
const CONTEXT_CHAR_LIMIT: usize = 24_000;

/// Build the single prompt sent to the generation model.
pub fn build_prompt(task: &str, bundle: &ContextBundle) -> String {
    let frame = TaskFrame::detect(task);
    let mut rendered = bundle.render();
    if rendered.len() > CONTEXT_CHAR_LIMIT {
        let cut = (0..=CONTEXT_CHAR_LIMIT)
            .rev()
            .find(|i| rendered.is_char_boundary(*i))
            .unwrap_or(0);
        rendered.truncate(cut);
        rendered.push_str("\n(context truncated)\n");
    }
    format!(
        "You are a code assistant working from an index of a local project. \
         Use only the context below; do not invent files or symbols.\n\n\
         # Context\n{rendered}\n# Task\n{task}\n\n{}",
        frame.instructions()
    )
}

/// Run one query end to end against an already assembled bundle.
///
/// An empty bundle short-circuits before any generation call. A backend
/// failure surfaces as `AgentError::Llm`; a reply that fails to parse does
/// not, the raw text is simply wrapped.
pub async fn run(
    client: &OllamaClient,
    task: &str,
    bundle: &ContextBundle,
    hints: Option<&AgentContext>,
) -> Result<AgentResult, AgentError> {
    if bundle.is_empty() {
        return Err(AgentError::InsufficientContext);
    }

    let prompt = build_prompt(task, bundle);
    let reply = client.generate(&prompt).await.map_err(AgentError::Llm)?;
    let data = parse_reply(&reply);

    Ok(AgentResult {
        success: true,
        data: Some(data),
        error: None,
        context: hints.cloned(),
    })
}

/// Best-effort parse of the model reply into a report.
///
/// Tries the whole reply as JSON, then a fenced ```json block, then the
/// outermost brace span. Anything that yields no report fields falls back to
/// the raw text.
pub fn parse_reply(reply: &str) -> AgentData {
    for candidate in json_candidates(reply) {
        if let Ok(report) = serde_json::from_str::<AgentReport>(candidate) {
            if !report.is_empty() {
                return AgentData::Report(report);
            }
        }
    }
    AgentData::Raw {
        text: reply.trim().to_string(),
    }
}

fn json_candidates(reply: &str) -> Vec<&str> {
    let mut candidates = vec![reply.trim()];

    if let Some(start) = reply.find("```json") {
        let rest = &reply[start + 7..];
        if let Some(end) = rest.find("```") {
            candidates.push(rest[..end].trim());
        }
    } else if let Some(start) = reply.find("```") {
        let rest = &reply[start + 3..];
        if let Some(end) = rest.find("```") {
            candidates.push(rest[..end].trim());
        }
    }

    if let (Some(open), Some(close)) = (reply.find('{'), reply.rfind('}')) {
        if open < close {
            candidates.push(reply[open..=close].trim());
        }
    }
    candidates
}
