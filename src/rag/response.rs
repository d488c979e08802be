//! RAG response generation.

use super::context::{ContextBlock, SourceDescriptor};
use crate::config::{GenerationSettings, Prompts, Settings};
use crate::error::{KihubError, Result};
use crate::openai::create_client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default number of conversation messages kept in the prompt.
pub const DEFAULT_MAX_HISTORY_MESSAGES: usize = 20;

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A provider-neutral chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Tokens streamed by a language model.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Trait for streaming chat models.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Start a completion and stream its tokens.
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream>;

    /// Model name for logs.
    fn model_id(&self) -> String;
}

/// Chat model behind any OpenAI-compatible endpoint (Groq by default).
pub struct OpenAIChatModel {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAIChatModel {
    pub fn with_client(client: Client<OpenAIConfig>, model: &str, temperature: f32) -> Self {
        Self {
            client,
            model: model.to_string(),
            temperature,
        }
    }

    /// Create a model from settings; reads the API key from the environment.
    pub fn from_settings(settings: &GenerationSettings) -> Result<Self> {
        let api_key = Settings::api_key(&settings.api_key_env)?;
        let client = create_client(
            settings.api_base.as_deref(),
            &api_key,
            Duration::from_secs(settings.timeout_secs),
        )?;
        Ok(Self::with_client(client, &settings.model, settings.temperature))
    }

    fn to_request_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
        let built: std::result::Result<ChatCompletionRequestMessage, _> = match message.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map(Into::into),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map(Into::into),
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map(Into::into),
        };
        built.map_err(|e| KihubError::Generation {
            message: e.to_string(),
            partial: String::new(),
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIChatModel {
    #[instrument(skip(self, messages), fields(model = %self.model, count = messages.len()))]
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        let messages = messages
            .iter()
            .map(Self::to_request_message)
            .collect::<Result<Vec<_>>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(self.temperature)
            .build()
            .map_err(|e| KihubError::Generation {
                message: e.to_string(),
                partial: String::new(),
            })?;

        let stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| KihubError::Generation {
                message: format!("Failed to start generation: {}", e),
                partial: String::new(),
            })?;

        Ok(stream
            .filter_map(|item| async move {
                match item {
                    Ok(response) => response
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|choice| choice.delta.content)
                        .filter(|token| !token.is_empty())
                        .map(Ok),
                    Err(e) => Some(Err(KihubError::Generation {
                        message: e.to_string(),
                        partial: String::new(),
                    })),
                }
            })
            .boxed())
    }

    fn model_id(&self) -> String {
        self.model.clone()
    }
}

/// Builds prompts and streams answers from a language model.
pub struct AnswerGenerator {
    llm: Arc<dyn LanguageModel>,
    prompts: Prompts,
    max_history_messages: usize,
}

impl AnswerGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            llm,
            prompts: Prompts::default(),
            max_history_messages: DEFAULT_MAX_HISTORY_MESSAGES,
        }
    }

    /// Set custom prompts (with user-defined variables).
    pub fn with_prompts(mut self, prompts: Prompts) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_max_history_messages(mut self, max: usize) -> Self {
        self.max_history_messages = max;
        self
    }

    /// System prompt, the tail of the conversation, then the question with its context.
    pub fn build_messages(
        &self,
        history: &[ChatMessage],
        context: &ContextBlock,
        query: &str,
    ) -> Vec<ChatMessage> {
        let context_text = if context.is_empty() {
            self.prompts.rag.empty_context.clone()
        } else {
            context.text.clone()
        };

        let mut vars = HashMap::new();
        vars.insert("question".to_string(), query.to_string());
        vars.insert("context".to_string(), context_text);
        let user_prompt = self.prompts.render_with_custom(&self.prompts.rag.user, &vars);
        let system_prompt = self
            .prompts
            .render_with_custom(&self.prompts.rag.system, &HashMap::new());

        let recent = history
            .iter()
            .filter(|m| m.role != Role::System)
            .collect::<Vec<_>>();
        let skip = recent.len().saturating_sub(self.max_history_messages);

        let mut messages = Vec::with_capacity(recent.len() - skip + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(recent.into_iter().skip(skip).cloned());
        messages.push(ChatMessage::user(user_prompt));
        messages
    }

    /// Start streaming an answer to `query`.
    #[instrument(skip(self, history, context), fields(history = history.len(), sources = context.citations.len()))]
    pub async fn generate(
        &self,
        history: &[ChatMessage],
        context: &ContextBlock,
        query: &str,
    ) -> Result<AnswerStream> {
        info!("Generating answer with {}", self.llm.model_id());
        let messages = self.build_messages(history, context, query);
        let tokens = self.llm.stream_chat(&messages).await?;
        Ok(AnswerStream::new(tokens, context.citations.clone()))
    }
}

/// Streamed answer tokens with the citations of the context they were drawn from.
///
/// Yields each token as it arrives. A provider failure is reported once as
/// `Err(KihubError::Generation)` carrying the partial answer, and ends the stream.
pub struct AnswerStream {
    inner: TokenStream,
    partial: String,
    citations: BTreeMap<usize, SourceDescriptor>,
    finished: bool,
    error: Option<String>,
}

impl AnswerStream {
    pub fn new(inner: TokenStream, citations: BTreeMap<usize, SourceDescriptor>) -> Self {
        Self {
            inner,
            partial: String::new(),
            citations,
            finished: false,
            error: None,
        }
    }

    /// Answer text received so far.
    pub fn partial(&self) -> &str {
        &self.partial
    }

    pub fn citations(&self) -> &BTreeMap<usize, SourceDescriptor> {
        &self.citations
    }

    /// Drain any remaining tokens and assemble the answer.
    pub async fn finish(mut self) -> Answer {
        while self.next().await.is_some() {}
        Answer {
            complete: self.error.is_none(),
            text: self.partial,
            citations: self.citations,
            error: self.error,
        }
    }
}

impl Stream for AnswerStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(token))) => {
                self.partial.push_str(&token);
                Poll::Ready(Some(Ok(token)))
            }
            Poll::Ready(Some(Err(e))) => {
                let message = match e {
                    KihubError::Generation { message, .. } => message,
                    other => other.to_string(),
                };
                warn!("Generation failed after {} chars: {}", self.partial.len(), message);
                self.finished = true;
                self.error = Some(message.clone());
                Poll::Ready(Some(Err(KihubError::Generation {
                    message,
                    partial: self.partial.clone(),
                })))
            }
            Poll::Ready(None) => {
                debug!("Answer stream complete ({} chars)", self.partial.len());
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A finished (or interrupted) answer with its sources.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub citations: BTreeMap<usize, SourceDescriptor>,
    /// False if generation failed part way; `text` is then the partial answer.
    pub complete: bool,
    pub error: Option<String>,
}

impl Answer {
    /// Markers referenced in the answer text that point at a known source.
    pub fn cited_markers(&self) -> BTreeSet<usize> {
        let Ok(re) = Regex::new(r"\[(\d+)\]") else {
            return BTreeSet::new();
        };
        re.captures_iter(&self.text)
            .filter_map(|c| c[1].parse::<usize>().ok())
            .filter(|m| self.citations.contains_key(m))
            .collect()
    }

    /// Format the answer and its sources for display.
    ///
    /// Lists the cited sources, or every source when the answer cites none.
    pub fn format_for_display(&self) -> String {
        let mut output = self.text.clone();
        output.push_str(&self.format_sources());
        output
    }

    /// The "Sources" section on its own.
    pub fn format_sources(&self) -> String {
        let cited = self.cited_markers();
        let mut output = String::new();

        if !self.citations.is_empty() {
            output.push_str("\n\n--- Sources ---\n");
            for (marker, source) in &self.citations {
                if cited.is_empty() || cited.contains(marker) {
                    output.push_str(&format!("\n[{}] {}", marker, source));
                }
            }
        }

        output
    }
}

/// In-memory conversation history for a chat session.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    max_messages: usize,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY_MESSAGES)
    }
}

impl Conversation {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages,
        }
    }

    /// Record a completed exchange.
    pub fn record(&mut self, question: &str, answer: &str) {
        self.messages.push(ChatMessage::user(question));
        self.messages.push(ChatMessage::assistant(answer));

        // Trim history if too long
        if self.messages.len() > self.max_messages {
            let excess = self.messages.len() - self.max_messages;
            self.messages.drain(..excess);
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Clear conversation history.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
