//! HTTP client for a local Ollama server.
//!
//! Exposes exactly two round-trips: one embedding call and one generation
//! call. All Ollama wire types are private to this module; callers get a
//! `Vec<f32>` or a `String` and never see the JSON shapes.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::Config;

/// One client per daemon, cheaply cloneable (`reqwest::Client` is an `Arc`
/// internally). Embedding and generation use separate timeouts since a
/// generation pass legitimately takes much longer.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    embedding_model: String,
    generation_model: String,
    embed_timeout: Duration,
    generate_timeout: Duration,
}

impl OllamaClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: config.ollama_base_url.trim_end_matches('/').to_string(),
            embedding_model: config.embedding_model.clone(),
            generation_model: config.generation_model.clone(),
            embed_timeout: Duration::from_secs(config.embed_timeout_secs),
            generate_timeout: Duration::from_secs(config.generate_timeout_secs),
        })
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// Embed one text under the configured embedding model.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let payload = EmbeddingRequest {
            model: &self.embedding_model,
            prompt: text,
        };
        debug!(model = %self.embedding_model, text_len = text.len(), "requesting embedding");

        let response = self
            .client
            .post(&url)
            .timeout(self.embed_timeout)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Embedding request to {url} failed"))?;
        let response = check_status(response)
            .await
            .context("Embedding request rejected")?;

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;
        if parsed.embedding.is_empty() {
            bail!("Embedding model returned an empty vector");
        }
        Ok(parsed.embedding)
    }

    /// One non-streaming generation round-trip. Prompt assembly and response
    /// parsing are the agent's responsibility.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let payload = GenerateRequest {
            model: &self.generation_model,
            prompt,
            stream: false,
        };
        debug!(
            model = %self.generation_model,
            prompt_len = prompt.len(),
            "requesting generation"
        );

        let response = self
            .client
            .post(&url)
            .timeout(self.generate_timeout)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Generation request to {url} failed"))?;
        let response = check_status(response)
            .await
            .context("Generation request rejected")?;

        let parsed: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse generation response")?;
        debug!(response_len = parsed.response.len(), "received generation");
        Ok(parsed.response)
    }
}

// ── Private wire types ──

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: String,
}

/// Consume the response and return it if successful, or a structured error
/// carrying whatever detail the server sent.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());
    let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(env) => format!("HTTP {status}: {}", env.error),
        Err(_) => format!("HTTP {status}: {body}"),
    };
    error!(%status, %message, "Ollama request returned HTTP error");
    bail!(message)
}
