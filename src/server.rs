//! HTTP daemon exposing the index and query pipelines.
//!
//! # Endpoints
//!
//! | Method | Path        | Description                                |
//! |--------|-------------|--------------------------------------------|
//! | `POST` | `/index`    | Run an indexing pass (full or partial)     |
//! | `POST` | `/query`    | Assemble context and run one LLM query     |
//! | `GET`  | `/status`   | Daemon liveness, versions, database path   |
//! | `GET`  | `/db/stats` | Row counts per table                       |
//!
//! Every body uses the `{success, data}` / `{success, error}` envelope from
//! the protocol module. Indexing runs are serialized through an async mutex;
//! the store lock itself is taken per file inside the pipeline, so query
//! reads interleave with a running index. All store access happens on
//! blocking threads, never on a tokio worker.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, warn};

use crate::agent::{self, AgentError};
use crate::config::Config;
use crate::context;
use crate::indexer;
use crate::ollama::OllamaClient;
use crate::protocol::{
    ApiResponse, DbStatsResponse, ErrorCode, IndexRequest, IndexResponse, ProtocolError,
    QueryRequest, QueryResponse, StatusResponse, PROTOCOL_VERSION,
};
use crate::store::Store;

/// Shared state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// The store is behind a blocking mutex, never held across an await.
    store: Arc<Mutex<Store>>,
    client: OllamaClient,
    config: Arc<Config>,
    project_root: Arc<PathBuf>,
    /// Serializes whole indexing runs; queries do not take it.
    index_lock: Arc<tokio::sync::Mutex<()>>,
}

impl AppState {
    pub fn new(store: Store, config: Config, project_root: PathBuf) -> Result<Self> {
        let client = OllamaClient::new(&config)?;
        Ok(Self {
            store: Arc::new(Mutex::new(store)),
            client,
            config: Arc::new(config),
            project_root: Arc::new(project_root),
            index_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }
}

/// Build the router; split out so tests can bind to an ephemeral port.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/index", post(handle_index))
        .route("/query", post(handle_query))
        .route("/status", get(handle_status))
        .route("/db/stats", get(handle_db_stats))
        .with_state(state)
}

/// Run the daemon until ctrl-c.
pub async fn run_server(config: Config, project_root: PathBuf) -> Result<()> {
    let store = Store::open(&config.db_path)?;
    let port = config.port;
    let state = AppState::new(store, config, project_root)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("Failed to bind 127.0.0.1:{port}"))?;
    info!(addr = %listener.local_addr()?, "daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

// ── Error mapping ──

/// A protocol error plus the HTTP status it travels with.
struct AppError {
    status: StatusCode,
    error: ProtocolError,
}

impl AppError {
    fn new(status: StatusCode, error: ProtocolError) -> Self {
        Self { status, error }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ProtocolError::new(ErrorCode::InvalidRequest, message),
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body: ApiResponse<()> = ApiResponse::err(self.error);
        (self.status, Json(body)).into_response()
    }
}

fn database_error(e: anyhow::Error) -> AppError {
    error!(error = %format!("{e:#}"), "database operation failed");
    AppError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        ProtocolError::new(ErrorCode::DatabaseError, format!("{e:#}")),
    )
}

/// Reject requests carrying a mismatched protocol version. A missing header
/// is accepted (curl and tests).
fn check_protocol(headers: &HeaderMap) -> Result<(), AppError> {
    let Some(value) = headers.get("x-protocol-version") else {
        return Ok(());
    };
    let sent = value.to_str().unwrap_or("");
    if sent != PROTOCOL_VERSION {
        return Err(AppError::invalid_request(format!(
            "protocol version mismatch: client sent {sent:?}, daemon speaks {PROTOCOL_VERSION}"
        )));
    }
    Ok(())
}

// ── POST /index ──

async fn handle_index(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<IndexRequest>,
) -> Result<Json<ApiResponse<IndexResponse>>, AppError> {
    check_protocol(&headers)?;

    let root = if request.project_path.is_empty() {
        state.project_root.as_ref().clone()
    } else {
        PathBuf::from(&request.project_path)
    };
    if !root.is_dir() {
        return Err(AppError::invalid_request(format!(
            "project_path is not a directory: {}",
            root.display()
        )));
    }

    // One indexing run at a time; a second request waits rather than
    // interleaving writes. Queries do not take this lock, and the pipeline
    // locks the store per file, so reads keep flowing during the run.
    let _guard = state.index_lock.lock().await;

    let store = state.store.clone();
    let files = request.files.clone();
    let mut outcome =
        tokio::task::spawn_blocking(move || indexer::index_project(&store, &root, files.as_deref(), false))
            .await
            .map_err(|e| {
                AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ProtocolError::new(ErrorCode::IndexingFailed, e.to_string()),
                )
            })?
            .map_err(|e| {
                AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ProtocolError::new(ErrorCode::IndexingFailed, format!("{e:#}")),
                )
            })?;

    // Embedding failures do not fail the run; entities stay retrievable
    // structurally. The counts travel in the response either way.
    match indexer::embed_pending(&state.store, &state.client).await {
        Ok((embedded, failed)) => {
            outcome.entities_embedded = embedded;
            outcome.embed_failures = failed;
        }
        Err(e) => warn!(error = %format!("{e:#}"), "embedding pass aborted"),
    }

    Ok(Json(ApiResponse::ok(IndexResponse {
        files_indexed: outcome.files_indexed,
        files_failed: outcome.files_failed,
        entities_embedded: outcome.entities_embedded,
        embed_failures: outcome.embed_failures,
    })))
}

// ── POST /query ──

async fn handle_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Result<Json<ApiResponse<QueryResponse>>, AppError> {
    check_protocol(&headers)?;

    if request.task.trim().is_empty() {
        return Err(AppError::invalid_request("task must not be empty"));
    }
    let hints = request.context.clone().unwrap_or_default();

    // Semantic channel: embed the task text. An unreachable embedding
    // backend degrades to structural-only retrieval.
    let embed_input = match hints.query.as_deref() {
        Some(query) if !query.trim().is_empty() => format!("{} {query}", request.task),
        _ => request.task.clone(),
    };
    let query_vector = match state.client.embed(&embed_input).await {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "query embedding failed, semantic channel disabled");
            None
        }
    };

    let bundle = {
        let store = state.store.clone();
        let config = state.config.clone();
        let hints = hints.clone();
        let vector = query_vector.clone();
        let model = state.client.embedding_model().to_string();
        tokio::task::spawn_blocking(move || {
            let store = store.lock().expect("store mutex poisoned");
            context::assemble(&store, &hints, vector.as_deref(), &model, &config)
        })
        .await
        .map_err(|e| database_error(anyhow::Error::new(e)))?
        .map_err(database_error)?
    };

    match agent::run(&state.client, &request.task, &bundle, request.context.as_ref()).await {
        Ok(result) => Ok(Json(ApiResponse::ok(QueryResponse { result }))),
        Err(AgentError::InsufficientContext) => Err(AppError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            ProtocolError::new(
                ErrorCode::InsufficientContext,
                "no indexed context matches the task; index the project or add hints",
            ),
        )),
        Err(AgentError::Llm(e)) => Err(AppError::new(
            StatusCode::BAD_GATEWAY,
            ProtocolError::new(ErrorCode::LlmError, format!("{e:#}"))
                .with_details(serde_json::json!({ "context": bundle.render() })),
        )),
    }
}

// ── GET /status ──

async fn handle_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<StatusResponse>>, AppError> {
    check_protocol(&headers)?;
    Ok(Json(ApiResponse::ok(StatusResponse {
        running: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        protocol_version: PROTOCOL_VERSION.to_string(),
        db_path: Some(state.config.db_path.display().to_string()),
    })))
}

// ── GET /db/stats ──

async fn handle_db_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<DbStatsResponse>>, AppError> {
    check_protocol(&headers)?;
    let store = state.store.clone();
    let stats = tokio::task::spawn_blocking(move || {
        store.lock().expect("store mutex poisoned").stats()
    })
    .await
    .map_err(|e| database_error(anyhow::Error::new(e)))?
    .map_err(database_error)?;
    Ok(Json(ApiResponse::ok(stats)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_header_check() {
        let mut headers = HeaderMap::new();
        assert!(check_protocol(&headers).is_ok());

        headers.insert("x-protocol-version", PROTOCOL_VERSION.parse().unwrap());
        assert!(check_protocol(&headers).is_ok());

        headers.insert("x-protocol-version", "0.9.0".parse().unwrap());
        let err = check_protocol(&headers).unwrap_err();
        assert_eq!(err.error.code, ErrorCode::InvalidRequest);
    }
}
