//! End-to-end tests for the daemon HTTP surface.
//!
//! Each test binds the router on an ephemeral port and drives it with a plain
//! reqwest client. The Ollama backend is never running here: the base URL
//! points at a port nothing listens on, so embedding falls back to the
//! structural channel and generation surfaces LLM_ERROR.

use std::path::Path;

use serde_json::{json, Value};

use codelore::config::Config;
use codelore::protocol::PROTOCOL_VERSION;
use codelore::server::{build_router, AppState};
use codelore::store::Store;

/// Config pointing at a backend that refuses connections immediately.
fn test_config(project_root: &Path) -> Config {
    let mut config = Config::for_project(project_root);
    config.ollama_base_url = "http://127.0.0.1:1".to_string();
    config.embed_timeout_secs = 2;
    config.generate_timeout_secs = 2;
    config
}

/// Serve the router on 127.0.0.1:0 and return its base URL.
async fn spawn_daemon(project_root: &Path) -> String {
    let config = test_config(project_root);
    let store = Store::open(&config.db_path).unwrap();
    let state = AppState::new(store, config, project_root.to_path_buf()).unwrap();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// A small TypeScript project with one import relation.
fn fixture_project(dir: &Path) {
    write(
        dir,
        "src/db.ts",
        "export function connect(url: string) {\n  return url;\n}\n",
    );
    write(
        dir,
        "src/auth.ts",
        "import { connect } from './db';\n\nexport function login(user: string) {\n  return connect(user);\n}\n",
    );
}

async fn get(base: &str, path: &str) -> (u16, Value) {
    let response = reqwest::get(format!("{base}{path}")).await.unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

async fn post(base: &str, path: &str, body: Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(format!("{base}{path}"))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_status_reports_versions() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_daemon(dir.path()).await;

    let (status, body) = get(&base, "/status").await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["running"], true);
    assert_eq!(body["data"]["protocol_version"], PROTOCOL_VERSION);
    assert!(body["data"]["db_path"].as_str().unwrap().ends_with(".codelore.db"));
}

#[tokio::test]
async fn test_stats_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_daemon(dir.path()).await;

    let (status, body) = get(&base, "/db/stats").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["files_count"], 0);
    assert_eq!(body["data"]["embeddings_count"], 0);
}

#[tokio::test]
async fn test_protocol_version_mismatch_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_daemon(dir.path()).await;

    let response = reqwest::Client::new()
        .get(format!("{base}/status"))
        .header("x-protocol-version", "0.0.1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("protocol version"));

    // Matching version passes
    let response = reqwest::Client::new()
        .get(format!("{base}/status"))
        .header("x-protocol-version", PROTOCOL_VERSION)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn test_index_populates_store() {
    let dir = tempfile::tempdir().unwrap();
    fixture_project(dir.path());
    let base = spawn_daemon(dir.path()).await;

    let (status, body) = post(
        &base,
        "/index",
        json!({ "project_path": dir.path().to_str().unwrap() }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["files_indexed"], 2);
    assert_eq!(body["data"]["files_failed"], 0);
    // The dead backend shows up in the response counts, not as a failure
    assert_eq!(body["data"]["entities_embedded"], 0);
    assert!(body["data"]["embed_failures"].as_u64().unwrap() >= 1);

    let (_, stats) = get(&base, "/db/stats").await;
    assert_eq!(stats["data"]["files_count"], 2);
    assert_eq!(stats["data"]["symbols_count"], 2);
    // connect is imported and called across files
    assert!(stats["data"]["relations_count"].as_u64().unwrap() >= 1);
    // Backend is down, so nothing got a vector
    assert_eq!(stats["data"]["embeddings_count"], 0);
}

#[tokio::test]
async fn test_index_rejects_bad_path() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_daemon(dir.path()).await;

    let (status, body) = post(
        &base,
        "/index",
        json!({ "project_path": "/nonexistent/project" }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn test_query_rejects_empty_task() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_daemon(dir.path()).await;

    let (status, body) = post(&base, "/query", json!({ "task": "   " })).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn test_query_on_empty_store_is_insufficient_context() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_daemon(dir.path()).await;

    // Embedding fails (backend down) and there are no hints to match, so the
    // bundle is empty and no generation call is attempted.
    let (status, body) = post(&base, "/query", json!({ "task": "explain the auth flow" })).await;
    assert_eq!(status, 422);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "INSUFFICIENT_CONTEXT");
}

#[tokio::test]
async fn test_query_llm_failure_carries_context_in_error() {
    let dir = tempfile::tempdir().unwrap();
    fixture_project(dir.path());
    let base = spawn_daemon(dir.path()).await;

    let (status, _) = post(
        &base,
        "/index",
        json!({ "project_path": dir.path().to_str().unwrap() }),
    )
    .await;
    assert_eq!(status, 200);

    // The hint fills the structural channel, so assembly succeeds; the
    // generation call then fails against the dead backend.
    let (status, body) = post(
        &base,
        "/query",
        json!({
            "task": "explain the auth flow",
            "context": { "current_file": "src/auth.ts" }
        }),
    )
    .await;
    assert_eq!(status, 502);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "LLM_ERROR");
    let rendered = body["error"]["details"]["context"].as_str().unwrap();
    assert!(rendered.contains("src/auth.ts"));
    assert!(rendered.contains("## Files"));
}

#[tokio::test]
async fn test_reads_served_alongside_an_index_run() {
    let dir = tempfile::tempdir().unwrap();
    fixture_project(dir.path());
    let base = spawn_daemon(dir.path()).await;

    // Fire the index run and reads at the same time; the store lock is per
    // file, so neither side may error or hang behind the other.
    let root = dir.path().to_str().unwrap();
    let (index, stats, status) = tokio::join!(
        post(&base, "/index", json!({ "project_path": root })),
        get(&base, "/db/stats"),
        get(&base, "/status"),
    );
    assert_eq!(index.0, 200);
    assert_eq!(index.1["data"]["files_indexed"], 2);
    assert_eq!(stats.0, 200);
    assert_eq!(status.0, 200);
}

#[tokio::test]
async fn test_partial_index_leaves_other_files_alone() {
    let dir = tempfile::tempdir().unwrap();
    fixture_project(dir.path());
    let base = spawn_daemon(dir.path()).await;

    let root = dir.path().to_str().unwrap();
    let (_, body) = post(&base, "/index", json!({ "project_path": root })).await;
    assert_eq!(body["data"]["files_indexed"], 2);

    // Delete one file on disk, then re-index only the other. The deleted
    // file's rows must survive a partial run.
    std::fs::remove_file(dir.path().join("src/db.ts")).unwrap();
    let (_, body) = post(
        &base,
        "/index",
        json!({ "project_path": root, "files": ["src/auth.ts"] }),
    )
    .await;
    assert_eq!(body["success"], true);

    let (_, stats) = get(&base, "/db/stats").await;
    assert_eq!(stats["data"]["files_count"], 2);
}
