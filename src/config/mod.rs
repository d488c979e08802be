//! Configuration module for kihub.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{Prompts, RagPrompts};
pub use settings::{
    ChunkingSettings, ContextSettings, EmbeddingProviderKind, EmbeddingSettings,
    GeneralSettings, GenerationSettings, IndexSettings, PromptSettings, RetrievalSettings,
    Settings, WebSearchSettings,
};
