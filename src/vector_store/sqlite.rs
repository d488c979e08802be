//! SQLite persistence for the vector index.
//!
//! The whole index is written to a single file: a `meta` table pinning the
//! format version, dimension, metric and embedding model, and an `entries`
//! table holding chunks with their vectors as little-endian f32 blobs.

use super::{IndexEntry, IndexSpec, Metric, VectorIndex};
use crate::chunking::Chunk;
use crate::error::{KihubError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Version of the on-disk layout.
pub const FORMAT_VERSION: u32 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entries (
    seq INTEGER PRIMARY KEY,
    chunk_id TEXT NOT NULL UNIQUE,
    document_id TEXT NOT NULL,
    source_name TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    start_char INTEGER NOT NULL,
    end_char INTEGER NOT NULL,
    overlap INTEGER NOT NULL,
    text TEXT NOT NULL,
    indexed_at TEXT NOT NULL,
    vector BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entries_document_id ON entries(document_id);
"#;

/// Location of a persisted index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHandle {
    path: PathBuf,
}

impl IndexHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether an index has been persisted at this location.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

/// Serialize embedding to bytes.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize embedding from bytes.
fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn read_meta(conn: &Connection, key: &str) -> Result<String> {
    conn.query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
        .optional()
        .map_err(|e| KihubError::IncompatibleIndex(format!("Unreadable metadata: {}", e)))?
        .ok_or_else(|| KihubError::IncompatibleIndex(format!("Missing metadata key {}", key)))
}

fn check_meta(conn: &Connection, spec: &IndexSpec) -> Result<()> {
    let version = read_meta(conn, "format_version")?;
    if version != FORMAT_VERSION.to_string() {
        return Err(KihubError::IncompatibleIndex(format!(
            "Format version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }

    let dimension = read_meta(conn, "dimension")?;
    if dimension != spec.dimension.to_string() {
        return Err(KihubError::IncompatibleIndex(format!(
            "Index dimension {} (expected {})",
            dimension, spec.dimension
        )));
    }

    let metric = read_meta(conn, "metric")?;
    if metric.parse::<Metric>().ok() != Some(spec.metric) {
        return Err(KihubError::IncompatibleIndex(format!(
            "Index metric {} (expected {})",
            metric, spec.metric
        )));
    }

    let model = read_meta(conn, "embedding_model")?;
    if model != spec.embedding_model {
        return Err(KihubError::IncompatibleIndex(format!(
            "Index built with embedding model {} (configured {})",
            model, spec.embedding_model
        )));
    }

    Ok(())
}

impl VectorIndex {
    /// Write the index to `path`, replacing any index stored there.
    #[instrument(skip(self))]
    pub fn persist(&self, path: &Path) -> Result<IndexHandle> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let entries = self.read()?;
        let spec = self.spec();

        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;

        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM meta", [])?;
        tx.execute("DELETE FROM entries", [])?;

        for (key, value) in [
            ("format_version", FORMAT_VERSION.to_string()),
            ("dimension", spec.dimension.to_string()),
            ("metric", spec.metric.to_string()),
            ("embedding_model", spec.embedding_model.clone()),
        ] {
            tx.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO entries
                (seq, chunk_id, document_id, source_name, ordinal, start_char, end_char,
                 overlap, text, indexed_at, vector)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )?;

            for (seq, entry) in entries.iter().enumerate() {
                let chunk = &entry.chunk;
                stmt.execute(params![
                    seq as i64,
                    chunk.id,
                    chunk.document_id,
                    chunk.source_name,
                    chunk.ordinal as i64,
                    chunk.start as i64,
                    chunk.end as i64,
                    chunk.overlap as i64,
                    chunk.text,
                    entry.indexed_at.to_rfc3339(),
                    embedding_to_bytes(&entry.vector),
                ])?;
            }
        }

        tx.commit()?;
        info!("Persisted {} entries to {:?}", entries.len(), path);
        Ok(IndexHandle::new(path))
    }

    /// Load a persisted index, refusing any that was built under a different spec.
    #[instrument(skip(spec), fields(path = ?handle.path()))]
    pub fn load(handle: &IndexHandle, spec: &IndexSpec) -> Result<Self> {
        if !handle.exists() {
            return Err(KihubError::VectorStore(format!(
                "No index at {}",
                handle.path().display()
            )));
        }

        let conn = Connection::open(handle.path())?;
        check_meta(&conn, spec)?;

        let mut stmt = conn.prepare(
            r#"
            SELECT chunk_id, document_id, source_name, ordinal, start_char, end_char,
                   overlap, text, indexed_at, vector
            FROM entries
            ORDER BY seq
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(StoredRow {
                chunk_id: row.get(0)?,
                document_id: row.get(1)?,
                source_name: row.get(2)?,
                ordinal: row.get(3)?,
                start: row.get(4)?,
                end: row.get(5)?,
                overlap: row.get(6)?,
                text: row.get(7)?,
                indexed_at: row.get(8)?,
                vector: row.get(9)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry(spec.dimension)?);
        }

        info!("Loaded {} entries", entries.len());
        Ok(VectorIndex::from_entries(spec.clone(), entries))
    }
}

/// One `entries` row as stored, before validation.
struct StoredRow {
    chunk_id: String,
    document_id: String,
    source_name: String,
    ordinal: i64,
    start: i64,
    end: i64,
    overlap: i64,
    text: String,
    indexed_at: String,
    vector: Vec<u8>,
}

impl StoredRow {
    fn into_entry(self, dimension: usize) -> Result<IndexEntry> {
        let corrupt = |what: String| {
            KihubError::IncompatibleIndex(format!("Chunk {}: {}", self.chunk_id, what))
        };
        let offset = |value: i64, column: &str| {
            usize::try_from(value).map_err(|_| corrupt(format!("invalid {} {}", column, value)))
        };

        let ordinal = offset(self.ordinal, "ordinal")?;
        let start = offset(self.start, "start_char")?;
        let end = offset(self.end, "end_char")?;
        let overlap = offset(self.overlap, "overlap")?;
        if end < start {
            return Err(corrupt(format!("range {}-{} is reversed", start, end)));
        }

        let expected_bytes = dimension * 4;
        if self.vector.len() != expected_bytes {
            return Err(corrupt(format!(
                "vector has {} bytes (expected {})",
                self.vector.len(),
                expected_bytes
            )));
        }

        let indexed_at = DateTime::parse_from_rfc3339(&self.indexed_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| corrupt(format!("invalid indexed_at {:?}: {}", self.indexed_at, e)))?;

        Ok(IndexEntry {
            vector: bytes_to_embedding(&self.vector),
            indexed_at,
            chunk: Chunk {
                id: self.chunk_id,
                document_id: self.document_id,
                source_name: self.source_name,
                ordinal,
                start,
                end,
                overlap,
                text: self.text,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> IndexSpec {
        IndexSpec {
            dimension: 3,
            metric: Metric::Cosine,
            embedding_model: "hashing:xxh64-3".to_string(),
        }
    }

    fn chunk(document_id: &str, ordinal: usize) -> Chunk {
        Chunk {
            id: Chunk::make_id(document_id, ordinal),
            document_id: document_id.to_string(),
            source_name: "notes.txt".to_string(),
            ordinal,
            start: ordinal * 8,
            end: ordinal * 8 + 10,
            overlap: if ordinal == 0 { 0 } else { 2 },
            text: format!("chunk {} of {}", ordinal, document_id),
        }
    }

    fn sample_index() -> VectorIndex {
        let index = VectorIndex::new(spec());
        index
            .insert(
                vec![chunk("b", 0), chunk("b", 1), chunk("a", 0)],
                vec![
                    vec![0.1, 0.2, 0.3],
                    vec![f32::MIN_POSITIVE, -0.0, 1e-30],
                    vec![1.0, 0.0, 0.0],
                ],
            )
            .unwrap();
        index
    }

    #[test]
    fn test_round_trip_preserves_order_and_bits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");

        let index = sample_index();
        let handle = index.persist(&path).unwrap();
        let loaded = VectorIndex::load(&handle, &spec()).unwrap();

        let original = index.read().unwrap();
        let restored = loaded.read().unwrap();
        assert_eq!(original.len(), restored.len());
        for (a, b) in original.iter().zip(restored.iter()) {
            assert_eq!(a.chunk, b.chunk);
            let a_bits: Vec<u32> = a.vector.iter().map(|f| f.to_bits()).collect();
            let b_bits: Vec<u32> = b.vector.iter().map(|f| f.to_bits()).collect();
            assert_eq!(a_bits, b_bits);
        }
    }

    #[test]
    fn test_persist_overwrites_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.db");

        let index = sample_index();
        index.persist(&path).unwrap();
        index.remove("b").unwrap();
        let handle = index.persist(&path).unwrap();

        let loaded = VectorIndex::load(&handle, &spec()).unwrap();
        assert_eq!(loaded.len().unwrap(), 1);
    }

    #[test]
    fn test_load_rejects_mismatched_spec() {
        let dir = tempfile::tempdir().unwrap();
        let handle = sample_index().persist(&dir.path().join("index.db")).unwrap();

        let wrong_dimension = IndexSpec {
            dimension: 4,
            ..spec()
        };
        let wrong_metric = IndexSpec {
            metric: Metric::L2,
            ..spec()
        };
        let wrong_model = IndexSpec {
            embedding_model: "openai:text-embedding-3-small".to_string(),
            ..spec()
        };

        for bad in [wrong_dimension, wrong_metric, wrong_model] {
            assert!(matches!(
                VectorIndex::load(&handle, &bad),
                Err(KihubError::IncompatibleIndex(_))
            ));
        }
    }

    #[test]
    fn test_load_rejects_other_format_version() {
        let dir = tempfile::tempdir().unwrap();
        let handle = sample_index().persist(&dir.path().join("index.db")).unwrap();

        let conn = Connection::open(handle.path()).unwrap();
        conn.execute("UPDATE meta SET value = '99' WHERE key = 'format_version'", [])
            .unwrap();
        drop(conn);

        assert!(matches!(
            VectorIndex::load(&handle, &spec()),
            Err(KihubError::IncompatibleIndex(_))
        ));
    }

    #[test]
    fn test_load_rejects_foreign_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE documents (id TEXT);").unwrap();
        drop(conn);

        assert!(matches!(
            VectorIndex::load(&IndexHandle::new(&path), &spec()),
            Err(KihubError::IncompatibleIndex(_))
        ));
    }

    #[test]
    fn test_load_rejects_corrupt_rows() {
        let corruptions = [
            "UPDATE entries SET start_char = -5 WHERE seq = 0",
            "UPDATE entries SET ordinal = -1 WHERE seq = 1",
            "UPDATE entries SET indexed_at = 'yesterday' WHERE seq = 2",
            "UPDATE entries SET end_char = 0, start_char = 4 WHERE seq = 0",
        ];

        for sql in corruptions {
            let dir = tempfile::tempdir().unwrap();
            let handle = sample_index().persist(&dir.path().join("index.db")).unwrap();

            let conn = Connection::open(handle.path()).unwrap();
            conn.execute(sql, []).unwrap();
            drop(conn);

            let result = VectorIndex::load(&handle, &spec());
            assert!(
                matches!(result, Err(KihubError::IncompatibleIndex(_))),
                "{} was accepted",
                sql
            );
        }
    }
}
