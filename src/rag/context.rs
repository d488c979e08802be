//! Context building for RAG responses.
//!
//! Merges document hits and web snippets into one ranked, deduplicated
//! block of text bounded by a character budget:
//!
//! 1. Scores are min-max normalized per origin, so cosine similarities and
//!    provider relevance scores become comparable.
//! 2. Normalized scores are weighted by [`MergePolicy`] and sorted; ties put
//!    documents first, then keep each origin's own order.
//! 3. Items pointing at the same URL, or at overlapping ranges of the same
//!    document, are collapsed onto the best-ranked one.
//! 4. Items are added greedily. An item that does not fit is truncated if at
//!    least `min_truncated_chars` of its body still fit (assembly stops
//!    there), otherwise it is skipped and the next item is tried.
//!
//! Bracketed numerals inside headers and bodies are rewritten to `(n)`, so
//! the only `[n]` markers in the block are the ones it assigns.

use crate::chunking::Chunk;
use crate::config::ContextSettings;
use crate::vector_store::ScoredChunk;
use crate::web_search::{normalize_url, WebSnippet};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;
use tracing::debug;

/// Where a hit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Document,
    Web,
}

/// Evidence behind a hit.
#[derive(Debug, Clone)]
pub enum HitSource {
    Document(Chunk),
    Web(WebSnippet),
}

/// A document chunk or web snippet with its scores.
#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub origin: Origin,
    pub source: HitSource,
    /// Score as reported by the index or provider.
    pub raw_score: f32,
    /// Score after min-max normalization within its origin.
    pub normalized_score: f32,
    /// Normalized score times the origin weight.
    pub weighted_score: f32,
    /// 1-based position within its origin.
    pub rank: usize,
}

impl RetrievalHit {
    fn header(&self) -> String {
        match &self.source {
            HitSource::Document(chunk) => {
                format!("{} (chars {}-{})", chunk.source_name, chunk.start, chunk.end)
            }
            HitSource::Web(snippet) => format!("{} ({})", snippet.title, snippet.url),
        }
    }

    fn body(&self) -> &str {
        match &self.source {
            HitSource::Document(chunk) => &chunk.text,
            HitSource::Web(snippet) => &snippet.text,
        }
    }

    fn descriptor(&self) -> SourceDescriptor {
        match &self.source {
            HitSource::Document(chunk) => SourceDescriptor::Document {
                document_id: chunk.document_id.clone(),
                source_name: chunk.source_name.clone(),
                chunk_id: chunk.id.clone(),
                start: chunk.start,
                end: chunk.end,
            },
            HitSource::Web(snippet) => SourceDescriptor::Web {
                url: snippet.url.clone(),
                title: snippet.title.clone(),
            },
        }
    }
}

/// What a citation marker points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceDescriptor {
    Document {
        document_id: String,
        source_name: String,
        chunk_id: String,
        start: usize,
        end: usize,
    },
    Web {
        url: String,
        title: String,
    },
}

impl std::fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceDescriptor::Document {
                source_name,
                start,
                end,
                ..
            } => write!(f, "{} (chars {}-{})", source_name, start, end),
            SourceDescriptor::Web { url, title } => write!(f, "{}\n  {}", title, url),
        }
    }
}

/// One item included in a context block.
#[derive(Debug, Clone)]
pub struct ContextItem {
    pub marker: usize,
    pub hit: RetrievalHit,
    /// Body as included, possibly cut short.
    pub text: String,
    pub truncated: bool,
}

/// Assembled context handed to the answer generator.
#[derive(Debug, Clone, Default)]
pub struct ContextBlock {
    pub text: String,
    /// Marker number to source, for exactly the markers present in `text`.
    pub citations: BTreeMap<usize, SourceDescriptor>,
    pub items: Vec<ContextItem>,
}

impl ContextBlock {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Relative weight of each origin when merging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergePolicy {
    pub document_weight: f32,
    pub web_weight: f32,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            document_weight: 1.0,
            web_weight: 1.0,
        }
    }
}

impl MergePolicy {
    fn weight(&self, origin: Origin) -> f32 {
        match origin {
            Origin::Document => self.document_weight,
            Origin::Web => self.web_weight,
        }
    }
}

/// Builds a bounded, cited context block from retrieval results.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    policy: MergePolicy,
    min_truncated_chars: usize,
    dedup_min_overlap: f32,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            policy: MergePolicy::default(),
            min_truncated_chars: 80,
            dedup_min_overlap: 0.0,
        }
    }
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &ContextSettings) -> Self {
        Self {
            policy: MergePolicy {
                document_weight: settings.document_weight,
                web_weight: settings.web_weight,
            },
            min_truncated_chars: settings.min_truncated_chars,
            dedup_min_overlap: settings.dedup_min_overlap,
        }
    }

    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Smallest truncated body worth including.
    pub fn with_min_truncated_chars(mut self, chars: usize) -> Self {
        self.min_truncated_chars = chars;
        self
    }

    /// Fraction of the shorter of two ranges they must share to be duplicates.
    pub fn with_dedup_min_overlap(mut self, fraction: f32) -> Self {
        self.dedup_min_overlap = fraction.clamp(0.0, 1.0);
        self
    }

    /// Normalize, weight, sort and deduplicate hits from both origins.
    pub fn merge(&self, document_hits: &[ScoredChunk], web_hits: &[WebSnippet]) -> Vec<RetrievalHit> {
        let doc_scores: Vec<f32> = document_hits.iter().map(|h| h.score).collect();
        let web_scores: Vec<f32> = if web_hits.iter().all(|s| s.score.is_some()) {
            web_hits.iter().map(|s| s.score.unwrap_or_default()).collect()
        } else {
            // Without provider scores, fall back to position.
            (0..web_hits.len()).map(|i| -(i as f32)).collect()
        };

        let mut hits: Vec<RetrievalHit> = Vec::with_capacity(document_hits.len() + web_hits.len());

        for (i, (hit, normalized)) in document_hits
            .iter()
            .zip(normalize(&doc_scores))
            .enumerate()
        {
            hits.push(self.hit(
                Origin::Document,
                HitSource::Document(hit.chunk.clone()),
                hit.score,
                normalized,
                i + 1,
            ));
        }

        for (i, ((snippet, raw), normalized)) in web_hits
            .iter()
            .zip(web_scores.iter())
            .zip(normalize(&web_scores))
            .enumerate()
        {
            hits.push(self.hit(
                Origin::Web,
                HitSource::Web(snippet.clone()),
                *raw,
                normalized,
                i + 1,
            ));
        }

        hits.sort_by(|a, b| {
            b.weighted_score
                .total_cmp(&a.weighted_score)
                .then_with(|| origin_order(a.origin).cmp(&origin_order(b.origin)))
                .then_with(|| a.rank.cmp(&b.rank))
        });

        self.dedup(hits)
    }

    fn hit(
        &self,
        origin: Origin,
        source: HitSource,
        raw_score: f32,
        normalized_score: f32,
        rank: usize,
    ) -> RetrievalHit {
        RetrievalHit {
            origin,
            source,
            raw_score,
            normalized_score,
            weighted_score: normalized_score * self.policy.weight(origin),
            rank,
        }
    }

    /// Keep the first of each group of duplicates; `hits` must already be sorted.
    fn dedup(&self, hits: Vec<RetrievalHit>) -> Vec<RetrievalHit> {
        let mut seen_urls = HashSet::new();
        let mut kept_chunks: Vec<Chunk> = Vec::new();
        let mut kept = Vec::with_capacity(hits.len());

        for hit in hits {
            let duplicate = match &hit.source {
                HitSource::Web(snippet) => {
                    let key = normalize_url(&snippet.url).unwrap_or_else(|| snippet.url.clone());
                    !seen_urls.insert(key)
                }
                HitSource::Document(chunk) => {
                    let duplicate = kept_chunks.iter().any(|k| self.overlaps(k, chunk));
                    if !duplicate {
                        kept_chunks.push(chunk.clone());
                    }
                    duplicate
                }
            };

            if duplicate {
                debug!("Dropping duplicate hit {}", hit.header());
            } else {
                kept.push(hit);
            }
        }
        kept
    }

    fn overlaps(&self, a: &Chunk, b: &Chunk) -> bool {
        if a.id == b.id {
            return true;
        }
        let shared = a.shared_chars(b);
        if shared == 0 {
            return false;
        }
        let shorter = a.char_len().min(b.char_len());
        shared as f32 >= self.dedup_min_overlap * shorter as f32
    }

    /// Merge hits and assemble them into at most `max_context_length` characters.
    pub fn build(
        &self,
        document_hits: &[ScoredChunk],
        web_hits: &[WebSnippet],
        max_context_length: usize,
    ) -> ContextBlock {
        let mut block = ContextBlock::default();
        let mut used = 0;

        for hit in self.merge(document_hits, web_hits) {
            let marker = block.items.len() + 1;
            let separator = if block.items.is_empty() { "" } else { "\n\n" };
            let header = hit.header();
            let prefix = format!("{}[{}] {}\n", separator, marker, neutralize_markers(&header));
            let prefix_len = prefix.chars().count();
            let body = neutralize_markers(hit.body());
            let body_len = body.chars().count();

            if used + prefix_len + body_len <= max_context_length {
                block.text.push_str(&prefix);
                block.text.push_str(&body);
                used += prefix_len + body_len;
                self.include(&mut block, marker, hit.clone(), body.to_string(), false);
                continue;
            }

            let room = max_context_length.saturating_sub(used + prefix_len);
            if room >= self.min_truncated_chars.max(1) {
                let cut: String = body.chars().take(room).collect();
                block.text.push_str(&prefix);
                block.text.push_str(&cut);
                self.include(&mut block, marker, hit.clone(), cut, true);
                break;
            }

            debug!("Skipping {}: does not fit the remaining budget", header);
        }

        debug!(
            "Built context with {} items ({} chars)",
            block.items.len(),
            block.text.chars().count()
        );
        block
    }

    fn include(&self, block: &mut ContextBlock, marker: usize, hit: RetrievalHit, text: String, truncated: bool) {
        block.citations.insert(marker, hit.descriptor());
        block.items.push(ContextItem {
            marker,
            hit,
            text,
            truncated,
        });
    }
}

/// Rewrite `[12]` to `(12)`. Lengths are preserved.
fn neutralize_markers(text: &str) -> Cow<'_, str> {
    static MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    match MARKER.get_or_init(|| Regex::new(r"\[(\d+)\]").ok()) {
        Some(re) => re.replace_all(text, "($1)"),
        None => Cow::Borrowed(text),
    }
}

fn origin_order(origin: Origin) -> u8 {
    match origin {
        Origin::Document => 0,
        Origin::Web => 1,
    }
}

/// Min-max normalize onto [0, 1]; a group of equal scores maps to 1.0.
fn normalize(scores: &[f32]) -> Vec<f32> {
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    scores
        .iter()
        .map(|s| {
            if range > f32::EPSILON {
                (s - min) / range
            } else {
                1.0
            }
        })
        .collect()
}
