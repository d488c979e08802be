//! In-memory exact vector index.

use super::{IndexEntry, IndexSpec, IndexedDocument, ScoredChunk};
use crate::chunking::Chunk;
use crate::error::{KihubError, Result};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, instrument};

/// Exact brute-force vector index.
///
/// Searches hold the read lock for the whole scan; mutations take the write
/// lock once and either apply completely or not at all.
pub struct VectorIndex {
    spec: IndexSpec,
    entries: RwLock<Vec<IndexEntry>>,
}

impl VectorIndex {
    /// Create an empty index.
    pub fn new(spec: IndexSpec) -> Self {
        Self::from_entries(spec, Vec::new())
    }

    pub(super) fn from_entries(spec: IndexSpec, entries: Vec<IndexEntry>) -> Self {
        Self {
            spec,
            entries: RwLock::new(entries),
        }
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    pub(super) fn read(&self) -> Result<RwLockReadGuard<'_, Vec<IndexEntry>>> {
        self.entries
            .read()
            .map_err(|e| KihubError::VectorStore(format!("Failed to acquire lock: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<IndexEntry>>> {
        self.entries
            .write()
            .map_err(|e| KihubError::VectorStore(format!("Failed to acquire lock: {}", e)))
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.spec.dimension {
            return Err(KihubError::DimensionMismatch {
                expected: self.spec.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Validate a batch and pair chunks with their vectors.
    fn prepare(&self, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Vec<IndexEntry>> {
        if chunks.len() != vectors.len() {
            return Err(KihubError::InvalidArgument(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        for vector in &vectors {
            self.check_dimension(vector)?;
        }

        let mut ids = HashSet::new();
        if let Some(dup) = chunks.iter().find(|c| !ids.insert(c.id.as_str())) {
            return Err(KihubError::InvalidArgument(format!("Duplicate chunk id {}", dup.id)));
        }

        let indexed_at = Utc::now();
        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                chunk,
                vector,
                indexed_at,
            })
            .collect())
    }

    /// Add the chunks of new documents. Nothing is inserted if any check fails.
    #[instrument(skip_all, fields(count = chunks.len()))]
    pub fn insert(&self, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<usize> {
        let new_entries = self.prepare(chunks, vectors)?;
        let mut entries = self.write()?;

        let present: HashSet<&str> = entries.iter().map(|e| e.chunk.document_id.as_str()).collect();
        if let Some(entry) = new_entries
            .iter()
            .find(|e| present.contains(e.chunk.document_id.as_str()))
        {
            return Err(KihubError::InvalidArgument(format!(
                "Document {} is already indexed",
                entry.chunk.document_id
            )));
        }

        let count = new_entries.len();
        entries.extend(new_entries);
        debug!("Inserted {} chunks", count);
        Ok(count)
    }

    /// Replace every chunk of a document in one step.
    #[instrument(skip(self, chunks, vectors), fields(count = chunks.len()))]
    pub fn replace_document(
        &self,
        document_id: &str,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<usize> {
        if let Some(other) = chunks.iter().find(|c| c.document_id != document_id) {
            return Err(KihubError::InvalidArgument(format!(
                "Chunk {} does not belong to document {}",
                other.id, document_id
            )));
        }
        let new_entries = self.prepare(chunks, vectors)?;
        let mut entries = self.write()?;

        let before = entries.len();
        entries.retain(|e| e.chunk.document_id != document_id);
        let removed = before - entries.len();

        let count = new_entries.len();
        entries.extend(new_entries);
        info!(removed, inserted = count, "Replaced document {}", document_id);
        Ok(count)
    }

    /// Remove every chunk of a document. Returns the number of chunks removed.
    #[instrument(skip(self))]
    pub fn remove(&self, document_id: &str) -> Result<usize> {
        let mut entries = self.write()?;
        let before = entries.len();
        entries.retain(|e| e.chunk.document_id != document_id);
        let removed = before - entries.len();
        info!("Removed {} chunks for document {}", removed, document_id);
        Ok(removed)
    }

    /// Return the `k` chunks most similar to `query`, best first.
    ///
    /// Equal scores keep insertion order.
    #[instrument(skip(self, query))]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Err(KihubError::InvalidArgument("k must be at least 1".to_string()));
        }
        self.check_dimension(query)?;

        let entries = self.read()?;
        let mut results: Vec<(usize, f32)> = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, self.spec.metric.score(query, &entry.vector)))
            .collect();

        results.sort_by(|a, b| b.1.total_cmp(&a.1));
        results.truncate(k);

        let results: Vec<ScoredChunk> = results
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: entries[i].chunk.clone(),
                score,
            })
            .collect();

        debug!("Found {} matching chunks", results.len());
        Ok(results)
    }

    /// Total number of indexed chunks.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    /// Check if a document is indexed.
    pub fn contains_document(&self, document_id: &str) -> Result<bool> {
        Ok(self.read()?.iter().any(|e| e.chunk.document_id == document_id))
    }

    /// All chunks of a document, in ordinal order.
    pub fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let mut chunks: Vec<Chunk> = self
            .read()?
            .iter()
            .filter(|e| e.chunk.document_id == document_id)
            .map(|e| e.chunk.clone())
            .collect();
        chunks.sort_by_key(|c| c.ordinal);
        Ok(chunks)
    }

    /// List indexed documents in the order they were first indexed.
    pub fn documents(&self) -> Result<Vec<IndexedDocument>> {
        let entries = self.read()?;

        let mut order: Vec<String> = Vec::new();
        let mut summaries: HashMap<String, IndexedDocument> = HashMap::new();

        for entry in entries.iter() {
            let chunk = &entry.chunk;
            let summary = summaries
                .entry(chunk.document_id.clone())
                .or_insert_with(|| {
                    order.push(chunk.document_id.clone());
                    IndexedDocument {
                        document_id: chunk.document_id.clone(),
                        source_name: chunk.source_name.clone(),
                        chunk_count: 0,
                        char_count: 0,
                        indexed_at: entry.indexed_at,
                    }
                });

            summary.chunk_count += 1;
            summary.char_count = summary.char_count.max(chunk.end);
            if entry.indexed_at > summary.indexed_at {
                summary.indexed_at = entry.indexed_at;
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|id| summaries.remove(&id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::Metric;

    fn spec(dimension: usize, metric: Metric) -> IndexSpec {
        IndexSpec {
            dimension,
            metric,
            embedding_model: "test:model".to_string(),
        }
    }

    fn chunk(document_id: &str, ordinal: usize, text: &str) -> Chunk {
        Chunk {
            id: Chunk::make_id(document_id, ordinal),
            document_id: document_id.to_string(),
            source_name: format!("{}.txt", document_id),
            ordinal,
            start: ordinal * 10,
            end: ordinal * 10 + text.chars().count(),
            overlap: 0,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_search_orders_by_score() {
        let index = VectorIndex::new(spec(3, Metric::Cosine));
        index
            .insert(
                vec![chunk("a", 0, "hello"), chunk("a", 1, "goodbye"), chunk("b", 0, "other")],
                vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.7, 0.7, 0.0]],
            )
            .unwrap();

        assert_eq!(index.len().unwrap(), 3);

        let results = index.search(&[1.0, 0.0, 0.0], 10).unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a#0", "b#0", "a#1"]);
        assert!(results[0].score > results[1].score);

        let top = index.search(&[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(top.len(), 1);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let index = VectorIndex::new(spec(2, Metric::L2));
        index
            .insert(
                vec![chunk("a", 0, "x"), chunk("a", 1, "y"), chunk("a", 2, "z")],
                vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0]],
            )
            .unwrap();

        let results = index.search(&[1.0, 0.0], 3).unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a#0", "a#2", "a#1"]);
        assert_eq!(results[0].score, 0.0);
    }

    #[test]
    fn test_invalid_queries() {
        let index = VectorIndex::new(spec(3, Metric::Cosine));
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 0),
            Err(KihubError::InvalidArgument(_))
        ));
        assert!(matches!(
            index.search(&[1.0, 0.0], 1),
            Err(KihubError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(index.search(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_insert_is_all_or_nothing() {
        let index = VectorIndex::new(spec(2, Metric::Cosine));
        let err = index
            .insert(
                vec![chunk("a", 0, "x"), chunk("a", 1, "y")],
                vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]],
            )
            .unwrap_err();

        assert!(matches!(err, KihubError::DimensionMismatch { .. }));
        assert_eq!(index.len().unwrap(), 0);
    }

    #[test]
    fn test_duplicate_document_rejected() {
        let index = VectorIndex::new(spec(2, Metric::Cosine));
        index.insert(vec![chunk("a", 0, "x")], vec![vec![1.0, 0.0]]).unwrap();

        let err = index
            .insert(
                vec![chunk("b", 0, "y"), chunk("a", 1, "z")],
                vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            )
            .unwrap_err();
        assert!(matches!(err, KihubError::InvalidArgument(_)));
        assert_eq!(index.len().unwrap(), 1);
        assert!(!index.contains_document("b").unwrap());
    }

    #[test]
    fn test_replace_and_remove_document() {
        let index = VectorIndex::new(spec(2, Metric::Cosine));
        index
            .insert(
                vec![chunk("a", 0, "x"), chunk("a", 1, "y"), chunk("b", 0, "z")],
                vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
            )
            .unwrap();

        index
            .replace_document("a", vec![chunk("a", 0, "new")], vec![vec![0.0, 1.0]])
            .unwrap();
        assert_eq!(index.len().unwrap(), 2);
        assert_eq!(index.document_chunks("a").unwrap()[0].text, "new");

        assert_eq!(index.remove("a").unwrap(), 1);
        assert_eq!(index.remove("missing").unwrap(), 0);

        let docs = index.documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].document_id, "b");
        assert_eq!(docs[0].chunk_count, 1);
    }

    #[test]
    fn test_documents_summary() {
        let index = VectorIndex::new(spec(1, Metric::Cosine));
        index
            .insert(
                vec![chunk("a", 0, "0123456789"), chunk("a", 1, "abcde")],
                vec![vec![1.0], vec![1.0]],
            )
            .unwrap();

        let docs = index.documents().unwrap();
        assert_eq!(docs[0].chunk_count, 2);
        assert_eq!(docs[0].char_count, 15);
        assert_eq!(docs[0].source_name, "a.txt");
    }
}
