//! Pipeline orchestrator for kihub.
//!
//! Coordinates ingestion (extract, chunk, embed, index) and querying
//! (retrieve, merge, generate).

use crate::chunking::{chunk, Chunk, ChunkingConfig};
use crate::config::{Prompts, Settings};
use crate::document::{Document, DocumentPayload};
use crate::embedding::{create_embedder, Embedder};
use crate::error::{KihubError, Result};
use crate::rag::{
    AnswerGenerator, AnswerStream, ChatMessage, ContextBlock, ContextBuilder, LanguageModel,
    OpenAIChatModel,
};
use crate::vector_store::{IndexHandle, IndexedDocument, ScoredChunk, VectorIndex};
use crate::web_search::{WebSearchAdapter, WebSnippet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Reported when a query has nothing to search.
pub const NOTHING_TO_SEARCH: &str =
    "No documents indexed and web search disabled. Ingest documents or enable web search to continue.";

/// A question to answer.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub use_web: bool,
    /// Number of document chunks to retrieve.
    pub k: usize,
    pub max_web_results: usize,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            use_web: false,
            k: 3,
            max_web_results: 3,
        }
    }

    pub fn with_web(mut self, use_web: bool) -> Self {
        self.use_web = use_web;
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_max_web_results(mut self, max: usize) -> Self {
        self.max_web_results = max;
        self
    }
}

/// Retrieval results and the answer being streamed from them.
pub struct QueryResponse {
    pub document_hits: Vec<ScoredChunk>,
    pub web_hits: Vec<WebSnippet>,
    pub context: ContextBlock,
    pub answer: AnswerStream,
}

/// Outcome of ingesting one document.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub source_name: String,
    /// Set once text extraction succeeded.
    pub document_id: Option<String>,
    /// Number of chunks indexed.
    pub chunks: usize,
    /// Length of the extracted text in characters.
    pub chars: usize,
    pub error: Option<String>,
}

impl IngestReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    fn failed(source_name: &str, document_id: Option<String>, error: &KihubError) -> Self {
        Self {
            source_name: source_name.to_string(),
            document_id,
            chunks: 0,
            chars: 0,
            error: Some(error.to_string()),
        }
    }
}

/// The main orchestrator for the kihub pipeline.
pub struct Orchestrator {
    settings: Settings,
    embedder: Arc<dyn Embedder>,
    index: Arc<VectorIndex>,
    web: WebSearchAdapter,
    context_builder: ContextBuilder,
    generator: Option<AnswerGenerator>,
    index_path: Option<PathBuf>,
}

impl Orchestrator {
    /// Create an orchestrator from settings, loading the persisted index if there is one.
    ///
    /// The language model is optional here so ingestion works without a chat API key;
    /// queries fail until one is configured.
    pub fn new(settings: Settings) -> Result<Self> {
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;

        let embedder = create_embedder(&settings.embedding)?;
        let index = Arc::new(Self::open_index(&settings)?);
        let web = WebSearchAdapter::from_settings(&settings.web_search);

        let generator = match OpenAIChatModel::from_settings(&settings.generation) {
            Ok(model) => Some(Self::build_generator(&settings, prompts, Arc::new(model))),
            Err(e) => {
                debug!("Answer generation unavailable: {}", e);
                None
            }
        };

        let index_path = Some(settings.index_path());
        Self::assemble(settings, embedder, index, web, generator, index_path)
    }

    /// Create an orchestrator with custom components. Nothing is persisted
    /// unless [`Orchestrator::with_persistence`] is called.
    pub fn with_components(
        settings: Settings,
        embedder: Arc<dyn Embedder>,
        index: Arc<VectorIndex>,
        web: WebSearchAdapter,
        llm: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;
        let generator = Some(Self::build_generator(&settings, prompts, llm));
        Self::assemble(settings, embedder, index, web, generator, None)
    }

    /// Persist the index to `path` after every change.
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_path = Some(path.into());
        self
    }

    fn build_generator(settings: &Settings, prompts: Prompts, llm: Arc<dyn LanguageModel>) -> AnswerGenerator {
        AnswerGenerator::new(llm)
            .with_prompts(prompts)
            .with_max_history_messages(settings.generation.max_history_messages)
    }

    fn assemble(
        settings: Settings,
        embedder: Arc<dyn Embedder>,
        index: Arc<VectorIndex>,
        web: WebSearchAdapter,
        generator: Option<AnswerGenerator>,
        index_path: Option<PathBuf>,
    ) -> Result<Self> {
        if embedder.dimensions() != index.spec().dimension {
            return Err(KihubError::DimensionMismatch {
                expected: index.spec().dimension,
                actual: embedder.dimensions(),
            });
        }

        Ok(Self {
            context_builder: ContextBuilder::from_settings(&settings.context),
            settings,
            embedder,
            index,
            web,
            generator,
            index_path,
        })
    }

    /// Load the index at the configured path, or start an empty one.
    pub fn open_index(settings: &Settings) -> Result<VectorIndex> {
        let spec = settings.index_spec();
        let handle = IndexHandle::new(settings.index_path());
        if handle.exists() {
            VectorIndex::load(&handle, &spec)
        } else {
            info!("No index at {:?}, starting empty", handle.path());
            Ok(VectorIndex::new(spec))
        }
    }

    /// Get the settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Get a reference to the index.
    pub fn index(&self) -> Arc<VectorIndex> {
        self.index.clone()
    }

    /// Get a reference to the embedder.
    pub fn embedder(&self) -> Arc<dyn Embedder> {
        self.embedder.clone()
    }

    pub fn web_search(&self) -> &WebSearchAdapter {
        &self.web
    }

    fn persist(&self) -> Result<()> {
        if let Some(path) = &self.index_path {
            self.index.persist(path)?;
        }
        Ok(())
    }

    /// Ingest documents. Each document is indexed completely or not at all;
    /// one failing document does not stop the others.
    pub async fn ingest(
        &self,
        payloads: Vec<DocumentPayload>,
        config: ChunkingConfig,
    ) -> Result<Vec<IngestReport>> {
        self.ingest_with(payloads, config, |_| {}).await
    }

    /// Like [`Orchestrator::ingest`], calling `on_report` as each document finishes.
    ///
    /// The index is saved once, after the whole batch. If saving fails, every
    /// document indexed in this batch is reported with the save error.
    #[instrument(skip(self, payloads, on_report), fields(count = payloads.len()))]
    pub async fn ingest_with<F>(
        &self,
        payloads: Vec<DocumentPayload>,
        config: ChunkingConfig,
        mut on_report: F,
    ) -> Result<Vec<IngestReport>>
    where
        F: FnMut(&IngestReport),
    {
        config.validate()?;

        let mut reports = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let name = payload.name.clone();
            let report = match self.ingest_one(payload, config).await {
                Ok(report) => report,
                Err((document_id, e)) => {
                    warn!("Failed to ingest {}: {}", name, e);
                    IngestReport::failed(&name, document_id, &e)
                }
            };
            on_report(&report);
            reports.push(report);
        }

        // A successful re-ingest may have removed chunks even when it added none.
        if reports.iter().any(IngestReport::is_ok) {
            if let Err(e) = self.persist() {
                warn!("Failed to save index: {}", e);
                for report in reports.iter_mut().filter(|r| r.is_ok()) {
                    report.error = Some(format!("Indexed but not saved: {}", e));
                }
            }
        }
        Ok(reports)
    }

    async fn ingest_one(
        &self,
        payload: DocumentPayload,
        config: ChunkingConfig,
    ) -> std::result::Result<IngestReport, (Option<String>, KihubError)> {
        let reingest = payload.id.is_some();
        let document = Document::from_payload(payload).map_err(|e| (None, e))?;
        let id = Some(document.id.clone());

        let chunks: Vec<Chunk> = chunk(&document.text, &document.id, &document.source_name, config)
            .map_err(|e| (id.clone(), e))?
            .collect();
        let chars = document.text.chars().count();

        if chunks.is_empty() {
            warn!("{} has no text to index", document.source_name);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| (id.clone(), e))?;

        let indexed = if reingest {
            self.index.replace_document(&document.id, chunks, vectors)
        } else {
            self.index.insert(chunks, vectors)
        };
        let count = indexed.map_err(|e| (id.clone(), e))?;

        info!("Indexed {} chunks from {}", count, document.source_name);
        Ok(IngestReport {
            source_name: document.source_name,
            document_id: id,
            chunks: count,
            chars,
            error: None,
        })
    }

    /// Remove a document from the index.
    #[instrument(skip(self))]
    pub fn remove_document(&self, document_id: &str) -> Result<usize> {
        remove_and_save(&self.index, self.index_path.as_deref(), document_id)
    }

    /// Remove a document from the index stored at the configured path.
    ///
    /// Needs no embedding or generation provider.
    #[instrument(skip(settings))]
    pub fn remove_stored_document(settings: &Settings, document_id: &str) -> Result<usize> {
        let index = Self::open_index(settings)?;
        remove_and_save(&index, Some(&settings.index_path()), document_id)
    }

    /// List indexed documents.
    pub fn documents(&self) -> Result<Vec<IndexedDocument>> {
        self.index.documents()
    }

    /// Retrieve the `k` chunks closest to `query`.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Err(KihubError::InvalidArgument("k must be at least 1".to_string()));
        }
        if self.index.is_empty()? {
            return Ok(Vec::new());
        }
        let query_vector = self.embedder.embed(query).await?;
        self.index.search(&query_vector, k)
    }

    /// Answer a question from indexed documents and, if requested, the web.
    ///
    /// Document retrieval and web search run concurrently; the answer starts
    /// streaming once both are done.
    #[instrument(skip(self, request, history), fields(query = %request.query, web = request.use_web))]
    pub async fn query(&self, request: QueryRequest, history: &[ChatMessage]) -> Result<QueryResponse> {
        if request.k == 0 {
            return Err(KihubError::InvalidArgument("k must be at least 1".to_string()));
        }
        if request.query.trim().is_empty() {
            return Err(KihubError::InvalidArgument("Query is empty".to_string()));
        }
        let generator = self.generator.as_ref().ok_or_else(|| {
            KihubError::Config(format!(
                "Answer generation needs {} to be set",
                self.settings.generation.api_key_env
            ))
        })?;

        let use_web = request.use_web && self.web.is_enabled();
        if request.use_web && !use_web {
            warn!("Web search requested but not configured");
        }
        if !use_web && self.index.is_empty()? {
            return Err(KihubError::InvalidArgument(NOTHING_TO_SEARCH.to_string()));
        }

        let (document_hits, web_hits) = tokio::join!(
            self.search(&request.query, request.k),
            async {
                if use_web {
                    self.web.search(&request.query, request.max_web_results).await
                } else {
                    Vec::new()
                }
            }
        );
        let document_hits = document_hits?;
        debug!(
            "Retrieved {} document hits and {} web hits",
            document_hits.len(),
            web_hits.len()
        );

        let context = self.context_builder.build(
            &document_hits,
            &web_hits,
            self.settings.context.max_context_length,
        );
        let answer = generator.generate(history, &context, &request.query).await?;

        Ok(QueryResponse {
            document_hits,
            web_hits,
            context,
            answer,
        })
    }
}

fn remove_and_save(index: &VectorIndex, path: Option<&Path>, document_id: &str) -> Result<usize> {
    let removed = index.remove(document_id)?;
    if removed == 0 {
        return Err(KihubError::DocumentNotFound(document_id.to_string()));
    }
    if let Some(path) = path {
        index.persist(path)?;
    }
    Ok(removed)
}
