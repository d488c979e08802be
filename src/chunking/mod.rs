//! Content chunking for breaking documents into searchable segments.
//!
//! Documents are split into fixed-size character windows that overlap by a
//! configurable number of characters. Offsets are counted in Unicode scalar
//! values, never bytes, so a window never splits a code point.

use crate::config::ChunkingSettings;
use crate::error::{KihubError, Result};
use serde::{Deserialize, Serialize};

/// Default window size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default number of characters shared by consecutive windows.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// A chunk of text from an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier, `{document_id}#{ordinal}`.
    pub id: String,
    /// Document this chunk was cut from.
    pub document_id: String,
    /// Display name of the source document.
    pub source_name: String,
    /// Position of this chunk within the document.
    pub ordinal: usize,
    /// Start offset in characters (inclusive).
    pub start: usize,
    /// End offset in characters (exclusive).
    pub end: usize,
    /// Characters shared with the previous chunk.
    pub overlap: usize,
    /// Text content of this chunk.
    pub text: String,
}

impl Chunk {
    /// Build the identifier of the chunk at `ordinal` within a document.
    pub fn make_id(document_id: &str, ordinal: usize) -> String {
        format!("{}#{}", document_id, ordinal)
    }

    /// Length of this chunk in characters.
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }

    /// Number of characters this chunk shares with another chunk's range.
    pub fn shared_chars(&self, other: &Chunk) -> usize {
        if self.document_id != other.document_id {
            return 0;
        }
        self.end
            .min(other.end)
            .saturating_sub(self.start.max(other.start))
    }
}

/// Configuration for chunking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Window size in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive windows.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl From<&ChunkingSettings> for ChunkingConfig {
    fn from(settings: &ChunkingSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            overlap: settings.overlap,
        }
    }
}

impl ChunkingConfig {
    /// Check that the window advances on every step.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(KihubError::InvalidConfiguration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(KihubError::InvalidConfiguration(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Distance between the starts of consecutive windows.
    pub fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// Split `text` into overlapping windows.
///
/// The configuration is validated up front; the returned iterator is lazy
/// and can be cloned to walk the same sequence again.
pub fn chunk<'a>(
    text: &'a str,
    document_id: &'a str,
    source_name: &'a str,
    config: ChunkingConfig,
) -> Result<Chunks<'a>> {
    config.validate()?;
    Ok(Chunks {
        text,
        document_id,
        source_name,
        config,
        total_chars: text.chars().count(),
        cursor_byte: 0,
        cursor_char: 0,
        ordinal: 0,
        done: text.is_empty(),
    })
}

/// Lazy iterator over the chunks of one document.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    document_id: &'a str,
    source_name: &'a str,
    config: ChunkingConfig,
    total_chars: usize,
    cursor_byte: usize,
    cursor_char: usize,
    ordinal: usize,
    done: bool,
}

impl Chunks<'_> {
    /// Byte offset `chars` characters past `from_byte`, or the end of text.
    fn advance(&self, from_byte: usize, chars: usize) -> usize {
        self.text[from_byte..]
            .char_indices()
            .nth(chars)
            .map(|(offset, _)| from_byte + offset)
            .unwrap_or(self.text.len())
    }
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }

        let start_byte = self.cursor_byte;
        let start = self.cursor_char;
        let end = (start + self.config.chunk_size).min(self.total_chars);
        let end_byte = self.advance(start_byte, end - start);

        let chunk = Chunk {
            id: Chunk::make_id(self.document_id, self.ordinal),
            document_id: self.document_id.to_string(),
            source_name: self.source_name.to_string(),
            ordinal: self.ordinal,
            start,
            end,
            overlap: if self.ordinal == 0 { 0 } else { self.config.overlap },
            text: self.text[start_byte..end_byte].to_string(),
        };

        if end >= self.total_chars {
            self.done = true;
        } else {
            let step = self.config.step();
            self.cursor_byte = self.advance(start_byte, step);
            self.cursor_char = start + step;
            self.ordinal += 1;
        }

        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        let remaining = self.total_chars - self.cursor_char;
        let size = self.config.chunk_size;
        let count = if remaining <= size {
            1
        } else {
            1 + (remaining - size).div_ceil(self.config.step())
        };
        (count, Some(count))
    }
}

impl ExactSizeIterator for Chunks<'_> {}

impl std::iter::FusedIterator for Chunks<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            overlap,
        }
    }

    #[test]
    fn test_window_starts_advance_by_step() {
        let text = "a".repeat(250);
        let chunks: Vec<_> = chunk(&text, "doc", "doc.txt", config(100, 20))
            .unwrap()
            .collect();

        let starts: Vec<_> = chunks.iter().map(|c| c.start).collect();
        assert_eq!(starts, vec![0, 80, 160]);
        assert_eq!(chunks[2].end, 250);
        assert_eq!(chunks[0].overlap, 0);
        assert_eq!(chunks[1].overlap, 20);
        assert_eq!(chunks[1].shared_chars(&chunks[0]), 20);
    }

    #[test]
    fn test_chunks_cover_text_and_reconstruct_it() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(7);
        let cfg = config(37, 9);
        let chunks: Vec<_> = chunk(&text, "doc", "fox.txt", cfg).unwrap().collect();

        let mut rebuilt = String::new();
        for c in &chunks {
            assert_eq!(c.text.chars().count(), c.char_len());
            rebuilt.extend(c.text.chars().skip(c.overlap));
        }
        assert_eq!(rebuilt, text);
        assert_eq!(chunks.last().unwrap().end, text.chars().count());
    }

    #[test]
    fn test_exact_fit_yields_single_chunk() {
        let text = "x".repeat(100);
        let chunks: Vec<_> = chunk(&text, "doc", "x", config(100, 20)).unwrap().collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start, chunks[0].end), (0, 100));
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        let mut chunks = chunk("", "doc", "empty.txt", config(10, 2)).unwrap();
        assert_eq!(chunks.len(), 0);
        assert!(chunks.next().is_none());
    }

    #[test]
    fn test_offsets_count_characters() {
        let text = "åäö€😀".repeat(10);
        let chunks: Vec<_> = chunk(&text, "doc", "utf8", config(7, 3)).unwrap().collect();
        for c in &chunks {
            let expected: String = text.chars().skip(c.start).take(c.end - c.start).collect();
            assert_eq!(c.text, expected);
        }
    }

    #[test]
    fn test_deterministic_and_restartable() {
        let text = "Rust ownership makes aliasing explicit. ".repeat(20);
        let chunks = chunk(&text, "doc-1", "rust.md", config(50, 10)).unwrap();
        let again = chunks.clone();

        let first: Vec<_> = chunks.collect();
        let second: Vec<_> = again.collect();
        assert_eq!(first, second);
        assert_eq!(first[3].id, "doc-1#3");
    }

    #[test]
    fn test_size_hint_is_exact() {
        let text = "b".repeat(1234);
        let chunks = chunk(&text, "doc", "b", config(100, 30)).unwrap();
        let hinted = chunks.len();
        assert_eq!(hinted, chunks.count());
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        let err = chunk("text", "doc", "t", config(10, 10)).unwrap_err();
        assert!(matches!(err, KihubError::InvalidConfiguration(_)));

        let err = chunk("text", "doc", "t", config(0, 0)).unwrap_err();
        assert!(matches!(err, KihubError::InvalidConfiguration(_)));
    }
}
