use crate::config::UpstreamConfig;
use crate::upstream::UpstreamCallError;
use crate::wire::{ChatMessage, CompletionResult, StreamChunk};
use async_trait::async_trait;
use futures_util::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

pub mod anthropic;
pub mod gemini;
pub mod openai;

/// Lazy, finite, forward-only sequence of canonical chunks. A clean upstream
/// completion ends with a terminal chunk (non-null `finish_reason`); a
/// sequence that ends without one was truncated and must not be billed.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, UpstreamCallError>> + Send>>;

/// Contract every upstream provider integration satisfies. Implementations
/// translate canonical messages to the provider wire format and translate
/// responses back before anything leaves the adapter; upstream failures
/// propagate untouched.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn chat(
        &self,
        completion_id: &str,
        provider_model: &str,
        messages: &[ChatMessage],
    ) -> Result<CompletionResult, UpstreamCallError>;

    async fn stream_chat(
        &self,
        completion_id: &str,
        provider_model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChunkStream, UpstreamCallError>;
}

/// Provider identity string → adapter, built once at startup and shared by
/// reference. Identities match the provider names in the catalog.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn from_config(http: &reqwest::Client, upstream: &UpstreamConfig) -> Self {
        let mut registry = Self::default();
        registry.register(
            "OpenAI",
            Arc::new(openai::OpenAiAdapter::new(
                http.clone(),
                upstream.openai.clone(),
            )),
        );
        registry.register(
            "Claude API",
            Arc::new(anthropic::AnthropicAdapter::new(
                http.clone(),
                upstream.anthropic.clone(),
            )),
        );
        let gemini = Arc::new(gemini::GeminiAdapter::new(
            http.clone(),
            upstream.gemini.clone(),
        ));
        registry.register("Google API", gemini.clone());
        registry.register("Google Vertex", gemini);
        registry
    }

    pub fn register(&mut self, identity: &str, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(identity.to_string(), adapter);
    }

    pub fn get(&self, identity: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(identity).cloned()
    }
}
