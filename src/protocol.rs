//! Wire contract between the daemon and its clients (CLI, editor extension).
//!
//! Every response uses the `{success, data}` / `{success, error}` envelope and
//! the closed [`ErrorCode`] set. Clients send an optional `x-protocol-version`
//! header; the daemon rejects mismatches instead of silently ignoring them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version string both sides must agree on.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Closed set of error codes crossing the wire. The HTTP layer never invents
/// its own classification; it forwards what the pipelines produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    DaemonNotRunning,
    InvalidRequest,
    IndexingFailed,
    QueryFailed,
    InsufficientContext,
    DatabaseError,
    LlmError,
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DaemonNotRunning => "DAEMON_NOT_RUNNING",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::IndexingFailed => "INDEXING_FAILED",
            Self::QueryFailed => "QUERY_FAILED",
            Self::InsufficientContext => "INSUFFICIENT_CONTEXT",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::LlmError => "LLM_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ProtocolError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// The response envelope. Serialized as `{"success": true, "data": ...}` or
/// `{"success": false, "error": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiResponse<T> {
    Ok { success: bool, data: T },
    Err { success: bool, error: ProtocolError },
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self::Ok {
            success: true,
            data,
        }
    }

    pub fn err(error: ProtocolError) -> Self {
        Self::Err {
            success: false,
            error,
        }
    }
}

// ── Requests / responses ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRequest {
    pub project_path: String,
    /// When present, index exactly these paths (relative to the project root)
    /// and leave every other store row untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexResponse {
    pub files_indexed: u32,
    pub files_failed: u32,
    pub entities_embedded: u32,
    pub embed_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<AgentContext>,
}

/// Caller-supplied task context. Known fields are validated strictly; anything
/// else lands in `extra` and is passed through opaquely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Forward-compatible escape hatch for fields this version does not know.
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl AgentContext {
    /// True when the context carries no usable retrieval hints at all.
    pub fn is_empty_hints(&self) -> bool {
        self.current_file.is_none()
            && self.current_symbol.is_none()
            && self.files.as_ref().map_or(true, |f| f.is_empty())
            && self.symbols.as_ref().map_or(true, |s| s.is_empty())
    }
}

/// Structured payload of a successful query, parsed from the generation
/// backend's reply on a best-effort basis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentData {
    /// The shapes the instruction frames ask for.
    Report(AgentReport),
    /// Fallback: the backend replied with something unstructured; wrap it
    /// rather than reject it.
    Raw { text: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Suggested edits keyed by file path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diffs: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standards: Option<Value>,
}

impl AgentReport {
    pub fn is_empty(&self) -> bool {
        self.analysis.is_none()
            && self.explanation.is_none()
            && self.diffs.is_none()
            && self.standards.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<AgentData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The context actually used, echoed back for caller transparency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<AgentContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub result: AgentResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub version: String,
    pub protocol_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbStatsResponse {
    pub files_count: u32,
    pub symbols_count: u32,
    pub relations_count: u32,
    pub standards_count: u32,
    pub embeddings_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shapes() {
        let ok = ApiResponse::ok(IndexResponse {
            files_indexed: 3,
            files_failed: 1,
            entities_embedded: 5,
            embed_failures: 0,
        });
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["files_indexed"], 3);
        assert_eq!(json["data"]["entities_embedded"], 5);

        let err: ApiResponse<IndexResponse> =
            ApiResponse::err(ProtocolError::new(ErrorCode::LlmError, "backend timed out"));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "LLM_ERROR");
        assert!(json["error"].get("details").is_none());
    }

    #[test]
    fn test_error_code_wire_names() {
        assert_eq!(
            serde_json::to_value(ErrorCode::InsufficientContext).unwrap(),
            "INSUFFICIENT_CONTEXT"
        );
        assert_eq!(
            serde_json::to_value(ErrorCode::DaemonNotRunning).unwrap(),
            "DAEMON_NOT_RUNNING"
        );
    }

    #[test]
    fn test_agent_context_unknown_fields_pass_through() {
        let raw = r#"{
            "task": "explain foo",
            "current_symbol": "foo",
            "editor_line": 42,
            "selection": "const x = 1;"
        }"#;
        let ctx: AgentContext = serde_json::from_str(raw).unwrap();
        assert_eq!(ctx.current_symbol.as_deref(), Some("foo"));
        assert_eq!(ctx.extra.len(), 2);
        assert_eq!(ctx.extra["editor_line"], 42);

        // Round-trips with the extras intact
        let back = serde_json::to_value(&ctx).unwrap();
        assert_eq!(back["selection"], "const x = 1;");
    }

    #[test]
    fn test_agent_context_empty_hints() {
        let ctx = AgentContext::default();
        assert!(ctx.is_empty_hints());

        let ctx = AgentContext {
            current_file: Some("a.ts".into()),
            ..Default::default()
        };
        assert!(!ctx.is_empty_hints());

        // Empty vecs count as no hints
        let ctx = AgentContext {
            files: Some(vec![]),
            ..Default::default()
        };
        assert!(ctx.is_empty_hints());
    }

    #[test]
    fn test_agent_data_report_vs_raw() {
        let report: AgentData = serde_json::from_str(
            r#"{"analysis": "the test asserts on stale state", "diffs": {"a.ts": "..."}}"#,
        )
        .unwrap();
        match report {
            AgentData::Report(r) => {
                assert!(r.analysis.is_some());
                assert_eq!(r.diffs.unwrap().len(), 1);
            }
            AgentData::Raw { .. } => panic!("expected report variant"),
        }

        let raw = AgentData::Raw {
            text: "plain prose".into(),
        };
        let json = serde_json::to_value(&raw).unwrap();
        assert_eq!(json["text"], "plain prose");
    }
}
