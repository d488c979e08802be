//! Vector index for kihub.
//!
//! An exact, in-memory index over chunk embeddings with SQLite persistence.

mod memory;
mod sqlite;

pub use memory::VectorIndex;
pub use sqlite::{IndexHandle, FORMAT_VERSION};

use crate::chunking::Chunk;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Similarity metric, fixed when an index is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity.
    #[default]
    Cosine,
    /// Negated euclidean distance, so that higher is still better.
    L2,
}

impl Metric {
    /// Score a stored vector against a query. Higher is better.
    pub fn score(&self, query: &[f32], vector: &[f32]) -> f32 {
        match self {
            Metric::Cosine => cosine_similarity(query, vector),
            Metric::L2 => -l2_distance(query, vector),
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "l2" | "euclidean" => Ok(Metric::L2),
            _ => Err(format!("Unknown metric: {}", s)),
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::Cosine => write!(f, "cosine"),
            Metric::L2 => write!(f, "l2"),
        }
    }
}

/// Parameters an index is created with. A persisted index only loads under the same spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub dimension: usize,
    pub metric: Metric,
    /// Embedding model identity, e.g. `openai:text-embedding-3-small`.
    pub embedding_model: String,
}

/// One indexed chunk.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub indexed_at: DateTime<Utc>,
}

/// A search result with score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// The matched chunk.
    pub chunk: Chunk,
    /// Similarity score (higher is better).
    pub score: f32,
}

/// Summary information about an indexed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub document_id: String,
    pub source_name: String,
    /// Number of indexed chunks.
    pub chunk_count: usize,
    /// Length of the document text in characters.
    pub char_count: usize,
    /// When the document was indexed.
    pub indexed_at: DateTime<Utc>,
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Compute the euclidean distance between two vectors of equal length.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
