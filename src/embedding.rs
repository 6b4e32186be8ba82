//! Vector storage codec and in-process similarity search.
//!
//! Vectors are stored as little-endian f32 blobs. Search is a linear scan
//! over the rows of one model with cosine similarity; at the scale of a
//! single project index this comfortably beats shipping a vector extension.

use anyhow::{bail, Result};

use crate::store::EmbeddingRow;
use crate::types::EntityRef;

/// A scored search hit, ordered best first.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub entity: EntityRef,
    pub score: f32,
    pub updated_at: i64,
}

/// Serialize an f32 vector to little-endian bytes for BLOB storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Deserialize a BLOB back to an f32 vector.
pub fn bytes_to_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        bail!("embedding blob length {} is not a multiple of 4", bytes.len());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Cosine similarity between two vectors. Mismatched dimensions or a zero
/// vector score 0.0 rather than erroring; such rows simply rank last.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Rank stored rows against a query vector and keep the top `limit`.
///
/// Ordering is total: score descending, then updated_at descending (recent
/// rows win ties), then entity id ascending. Equal inputs always produce the
/// same ranking.
pub fn rank(query: &[f32], rows: &[EmbeddingRow], limit: usize) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = rows
        .iter()
        .filter_map(|row| {
            let vector = bytes_to_embedding(&row.vector).ok()?;
            Some(SearchHit {
                entity: row.entity,
                score: cosine_similarity(query, &vector),
                updated_at: row.updated_at,
            })
        })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.updated_at.cmp(&a.updated_at))
            .then(a.entity.entity_id.cmp(&b.entity.entity_id))
    });
    hits.truncate(limit);
    hits
}
