//! RAG (Retrieval-Augmented Generation) for question answering with sources.
//!
//! Merges document and web evidence into a cited context, then streams an
//! answer grounded in it.

pub mod context;
mod response;

pub use context::{
    ContextBlock, ContextBuilder, ContextItem, HitSource, MergePolicy, Origin, RetrievalHit,
    SourceDescriptor,
};
pub use response::{
    Answer, AnswerGenerator, AnswerStream, ChatMessage, Conversation, LanguageModel,
    OpenAIChatModel, Role, TokenStream, DEFAULT_MAX_HISTORY_MESSAGES,
};
