//! kihub - a local knowledge hub with retrieval-augmented answers
//!
//! Ingest text and PDF documents into a persistent vector index, then ask
//! questions answered from the best matching chunks, optionally enriched with
//! live web search results. Answers stream token by token and cite their
//! sources with numbered markers.
//!
//! # Architecture
//!
//! - `document` - Format detection and text extraction
//! - `chunking` - Overlapping character windows
//! - `embedding` - Embedding providers (OpenAI-compatible, local hashing)
//! - `vector_store` - In-memory index with SQLite persistence
//! - `web_search` - Web search adapter with timeout and graceful fallback
//! - `rag` - Context assembly with citations and streamed answers
//! - `orchestrator` - Pipeline coordination
//! - `config` - Settings and prompt templates
//!
//! # Example
//!
//! ```rust,no_run
//! use kihub::config::Settings;
//! use kihub::document::DocumentPayload;
//! use kihub::chunking::ChunkingConfig;
//! use kihub::orchestrator::{Orchestrator, QueryRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let orchestrator = Orchestrator::new(settings)?;
//!
//!     let payload = DocumentPayload::new("notes.txt", "The sky is blue.");
//!     orchestrator.ingest(vec![payload], ChunkingConfig::default()).await?;
//!
//!     let response = orchestrator.query(QueryRequest::new("What colour is the sky?"), &[]).await?;
//!     let answer = response.answer.finish().await;
//!     println!("{}", answer.format_for_display());
//!
//!     Ok(())
//! }
//! ```

pub mod chunking;
pub mod cli;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod openai;
pub mod orchestrator;
pub mod rag;
pub mod vector_store;
pub mod web_search;

pub use error::{KihubError, Result};
