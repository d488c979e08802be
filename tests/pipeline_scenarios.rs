//! End-to-end pipeline scenarios with local components only.

use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use kihub::chunking::ChunkingConfig;
use kihub::config::{EmbeddingProviderKind, Settings};
use kihub::document::DocumentPayload;
use kihub::embedding::{Embedder, HashingEmbedder};
use kihub::orchestrator::{Orchestrator, QueryRequest};
use kihub::rag::{ChatMessage, LanguageModel, SourceDescriptor, TokenStream};
use kihub::vector_store::{IndexSpec, Metric, VectorIndex};
use kihub::web_search::{WebSearchAdapter, WebSearchProvider, WebSnippet};
use kihub::{KihubError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DIMS: usize = 256;

/// Streams a fixed script of tokens; an `Err` entry fails the stream there.
struct ScriptedModel {
    script: Vec<std::result::Result<&'static str, &'static str>>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    fn answering(tokens: &[&'static str]) -> Self {
        Self {
            script: tokens.iter().map(|t| Ok(*t)).collect(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn failing_after(tokens: &[&'static str], message: &'static str) -> Self {
        let mut model = Self::answering(tokens);
        model.script.push(Err(message));
        model
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        let items: Vec<Result<String>> = self
            .script
            .iter()
            .map(|step| match step {
                Ok(token) => Ok(token.to_string()),
                Err(message) => Err(KihubError::Generation {
                    message: message.to_string(),
                    partial: String::new(),
                }),
            })
            .collect();
        Ok(stream::iter(items).boxed())
    }

    fn model_id(&self) -> String {
        "scripted".to_string()
    }
}

/// Embeds normally until call number `fail_on`, which fails.
struct FailingEmbedder {
    inner: HashingEmbedder,
    calls: AtomicUsize,
    fail_on: usize,
}

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(KihubError::EmbeddingProvider("provider exploded".to_string()));
        }
        self.inner.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn model_id(&self) -> String {
        self.inner.model_id()
    }
}

struct SlowSearch;

#[async_trait]
impl WebSearchProvider for SlowSearch {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<WebSnippet>> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "slow"
    }
}

struct FixedSearch;

#[async_trait]
impl WebSearchProvider for FixedSearch {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<WebSnippet>> {
        Ok(vec![
            WebSnippet {
                url: "https://example.com/sky".to_string(),
                title: "Why is the sky blue".to_string(),
                text: "Rayleigh scattering makes the sky look blue.".to_string(),
                rank: 1,
                score: Some(0.9),
            },
            WebSnippet {
                url: "https://example.com/sky#intro".to_string(),
                title: "Duplicate".to_string(),
                text: "Same page, different fragment.".to_string(),
                rank: 2,
                score: Some(0.8),
            },
        ])
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

fn hashing_settings() -> Settings {
    let mut settings = Settings::default();
    settings.embedding.provider = EmbeddingProviderKind::Hashing;
    settings.embedding.dimensions = DIMS as u32;
    settings
}

fn empty_index() -> Arc<VectorIndex> {
    Arc::new(VectorIndex::new(IndexSpec {
        dimension: DIMS,
        metric: Metric::Cosine,
        embedding_model: format!("hashing:xxh64-{}", DIMS),
    }))
}

fn build(
    embedder: Arc<dyn Embedder>,
    web: WebSearchAdapter,
    llm: Arc<dyn LanguageModel>,
) -> Orchestrator {
    Orchestrator::with_components(hashing_settings(), embedder, empty_index(), web, llm).unwrap()
}

fn sky_chunks() -> ChunkingConfig {
    ChunkingConfig {
        chunk_size: 20,
        overlap: 5,
    }
}

async fn ingest_sky(orchestrator: &Orchestrator) {
    let reports = orchestrator
        .ingest(
            vec![DocumentPayload::new("sky.txt", "The sky is blue. Water is wet.")],
            sky_chunks(),
        )
        .await
        .unwrap();
    assert!(reports[0].is_ok());
    assert_eq!(reports[0].chunks, 2);
}

#[tokio::test]
async fn overlapping_hits_collapse_to_one_citation() {
    let llm = Arc::new(ScriptedModel::answering(&["The sky is blue ", "[1]."]));
    let orchestrator = build(
        Arc::new(HashingEmbedder::new(DIMS)),
        WebSearchAdapter::disabled(),
        llm.clone(),
    );
    ingest_sky(&orchestrator).await;

    let response = orchestrator
        .query(QueryRequest::new("What color is the sky?").with_k(2), &[])
        .await
        .unwrap();

    assert_eq!(response.document_hits.len(), 2);
    assert!(response.document_hits[0].chunk.text.contains("The sky is blue"));
    assert_eq!(response.context.citations.len(), 1);
    assert!(response.context.text.starts_with("[1] sky.txt"));

    let answer = response.answer.finish().await;
    assert!(answer.complete);
    assert_eq!(answer.text, "The sky is blue [1].");
    assert_eq!(answer.cited_markers().into_iter().collect::<Vec<_>>(), vec![1]);
    assert!(answer.format_for_display().contains("--- Sources ---"));

    let prompts = llm.prompts.lock().unwrap();
    let user_prompt = &prompts[0].last().unwrap().content;
    assert!(user_prompt.contains("The sky is blue"));
    assert!(user_prompt.contains("What color is the sky?"));
}

#[tokio::test]
async fn web_timeout_leaves_document_answer_intact() {
    let web = WebSearchAdapter::new(Arc::new(SlowSearch), Duration::from_millis(50));
    let orchestrator = build(
        Arc::new(HashingEmbedder::new(DIMS)),
        web,
        Arc::new(ScriptedModel::answering(&["Blue."])),
    );
    ingest_sky(&orchestrator).await;

    let response = orchestrator
        .query(QueryRequest::new("What color is the sky?").with_web(true), &[])
        .await
        .unwrap();

    assert!(response.web_hits.is_empty());
    assert!(response
        .context
        .citations
        .values()
        .all(|s| matches!(s, SourceDescriptor::Document { .. })));
    assert!(response.answer.finish().await.complete);
}

#[tokio::test]
async fn web_results_are_deduplicated_and_cited() {
    let web = WebSearchAdapter::new(Arc::new(FixedSearch), Duration::from_secs(1));
    let orchestrator = build(
        Arc::new(HashingEmbedder::new(DIMS)),
        web,
        Arc::new(ScriptedModel::answering(&["Scattering [2]."])),
    );

    // Nothing indexed, but web search alone is enough to answer.
    let response = orchestrator
        .query(QueryRequest::new("Why is the sky blue?").with_web(true), &[])
        .await
        .unwrap();

    assert!(response.document_hits.is_empty());
    assert_eq!(response.web_hits.len(), 1);
    assert_eq!(response.context.citations.len(), 1);
    match &response.context.citations[&1] {
        SourceDescriptor::Web { url, .. } => assert_eq!(url, "https://example.com/sky"),
        other => panic!("expected a web source, got {:?}", other),
    }
}

#[tokio::test]
async fn failed_embedding_indexes_nothing_for_that_document() {
    let embedder = Arc::new(FailingEmbedder {
        inner: HashingEmbedder::new(DIMS),
        calls: AtomicUsize::new(0),
        fail_on: 2,
    });
    let orchestrator = build(
        embedder,
        WebSearchAdapter::disabled(),
        Arc::new(ScriptedModel::answering(&["unused"])),
    );

    let reports = orchestrator
        .ingest(
            vec![
                DocumentPayload::new("first.txt", "Ownership moves values. ".repeat(4)),
                DocumentPayload::new("second.txt", "Borrowing lends values. ".repeat(4)),
                DocumentPayload::new("third.txt", "Lifetimes bound borrows. ".repeat(4)),
            ],
            ChunkingConfig {
                chunk_size: 30,
                overlap: 5,
            },
        )
        .await
        .unwrap();

    assert!(reports[0].is_ok());
    assert!(!reports[1].is_ok());
    assert!(reports[1].error.as_deref().unwrap().contains("provider exploded"));
    assert!(reports[2].is_ok());

    let names: Vec<String> = orchestrator
        .documents()
        .unwrap()
        .into_iter()
        .map(|d| d.source_name)
        .collect();
    assert_eq!(names, vec!["first.txt", "third.txt"]);
}

#[tokio::test]
async fn generation_failure_keeps_partial_answer() {
    let orchestrator = build(
        Arc::new(HashingEmbedder::new(DIMS)),
        WebSearchAdapter::disabled(),
        Arc::new(ScriptedModel::failing_after(&["The sky ", "is"], "connection reset")),
    );
    ingest_sky(&orchestrator).await;

    let mut stream = orchestrator
        .query(QueryRequest::new("What color is the sky?"), &[])
        .await
        .unwrap()
        .answer;

    let mut tokens = Vec::new();
    let mut failure = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(token) => tokens.push(token),
            Err(e) => failure = Some(e),
        }
    }

    assert_eq!(tokens, vec!["The sky ", "is"]);
    match failure {
        Some(KihubError::Generation { message, partial }) => {
            assert_eq!(message, "connection reset");
            assert_eq!(partial, "The sky is");
        }
        other => panic!("expected a generation error, got {:?}", other),
    }

    let answer = stream.finish().await;
    assert!(!answer.complete);
    assert_eq!(answer.text, "The sky is");
    assert_eq!(answer.citations.len(), 1);
}

#[tokio::test]
async fn concurrent_ingest_and_search() {
    let orchestrator = build(
        Arc::new(HashingEmbedder::new(DIMS)),
        WebSearchAdapter::disabled(),
        Arc::new(ScriptedModel::answering(&["ok"])),
    );
    ingest_sky(&orchestrator).await;

    let ingests = (0..8).map(|i| {
        orchestrator.ingest(
            vec![DocumentPayload::new(
                format!("doc-{}.txt", i),
                format!("Document number {} talks about topic {}.", i, i),
            )],
            sky_chunks(),
        )
    });
    let searches = (0..8).map(|_| orchestrator.search("sky blue", 3));

    let (ingested, searched) = tokio::join!(join_all(ingests), join_all(searches));

    assert!(ingested.into_iter().all(|r| r.unwrap()[0].is_ok()));
    for hits in searched {
        let hits = hits.unwrap();
        assert!(!hits.is_empty());
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }
    assert_eq!(orchestrator.documents().unwrap().len(), 9);
}

#[tokio::test]
async fn index_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = hashing_settings();
    settings.index.path = dir.path().join("index.db").to_string_lossy().into_owned();

    let first = Orchestrator::new(settings.clone()).unwrap();
    tokio_test::assert_ok!(
        first
            .ingest(
                vec![DocumentPayload::new("sky.txt", "The sky is blue. Water is wet.").with_id("sky")],
                sky_chunks(),
            )
            .await
    );
    drop(first);

    let reopened = Orchestrator::new(settings.clone()).unwrap();
    let docs = reopened.documents().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].document_id, "sky");

    let hits = reopened.search("sky", 1).await.unwrap();
    assert!(hits[0].chunk.text.contains("sky"));

    // A different embedding model must not silently reuse the index.
    settings.embedding.dimensions = 128;
    assert!(matches!(
        Orchestrator::new(settings),
        Err(KihubError::IncompatibleIndex(_))
    ));
}
