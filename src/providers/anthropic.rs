use crate::config::ProviderEndpoint;
use crate::upstream::{self, UpstreamCallError};
use crate::wire::{ChatMessage, CompletionResult, Role, StreamChunk, now_ts};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ChunkStream, ProviderAdapter};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u64 = 2048;

/// Anthropic Messages API adapter.
pub struct AnthropicAdapter {
    http: reqwest::Client,
    endpoint: ProviderEndpoint,
}

impl AnthropicAdapter {
    pub fn new(http: reqwest::Client, endpoint: ProviderEndpoint) -> Self {
        Self { http, endpoint }
    }

    fn url(&self) -> String {
        format!("{}/v1/messages", self.endpoint.base_url.trim_end_matches('/'))
    }

    /// Messages API takes system text as a top-level field, not a message
    /// role.
    fn request_body(provider_model: &str, messages: &[ChatMessage], stream: bool) -> Value {
        let mut system = String::new();
        let mut turns: Vec<Value> = Vec::new();
        for message in messages {
            match message.role {
                Role::System => system.push_str(&message.content),
                Role::User => turns.push(json!({ "role": "user", "content": message.content })),
                Role::Assistant => {
                    turns.push(json!({ "role": "assistant", "content": message.content }))
                }
            }
        }
        let mut body = json!({
            "model": provider_model,
            "max_tokens": MAX_TOKENS,
            "messages": turns,
        });
        if !system.is_empty() {
            body["system"] = Value::String(system);
        }
        if stream {
            body["stream"] = Value::Bool(true);
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    async fn chat(
        &self,
        completion_id: &str,
        provider_model: &str,
        messages: &[ChatMessage],
    ) -> Result<CompletionResult, UpstreamCallError> {
        let body = Self::request_body(provider_model, messages, false);
        let response = upstream::post_json(
            &self.http,
            &self.url(),
            &[
                ("x-api-key", self.endpoint.api_key.as_str()),
                ("anthropic-version", ANTHROPIC_VERSION),
            ],
            &body,
        )
        .await?;

        let mut text = String::new();
        if let Some(blocks) = response.get("content").and_then(|v| v.as_array()) {
            for block in blocks {
                if block.get("type").and_then(|v| v.as_str()) == Some("text") {
                    if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                        text.push_str(t);
                    }
                }
            }
        }
        let input_tokens = response
            .pointer("/usage/input_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let output_tokens = response
            .pointer("/usage/output_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(CompletionResult::assistant_text(
            completion_id,
            provider_model,
            text,
            input_tokens,
            output_tokens,
        ))
    }

    async fn stream_chat(
        &self,
        completion_id: &str,
        provider_model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChunkStream, UpstreamCallError> {
        let body = Self::request_body(provider_model, messages, true);
        let resp = upstream::post_raw(
            &self.http,
            &self.url(),
            &[
                ("x-api-key", self.endpoint.api_key.as_str()),
                ("anthropic-version", ANTHROPIC_VERSION),
            ],
            &body,
        )
        .await?;

        let id = completion_id.to_string();
        let model = provider_model.to_string();
        let created = now_ts();
        let (tx, rx) = mpsc::channel::<Result<StreamChunk, UpstreamCallError>>(32);
        tokio::spawn(async move {
            let mut events = resp.bytes_stream().eventsource();
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        let _ = tx.send(Err(UpstreamCallError::network(err.to_string()))).await;
                        return;
                    }
                };
                let data: Value = match serde_json::from_str(&event.data) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                let event_type = data
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or(event.event.as_str());
                match event_type {
                    "content_block_delta" => {
                        if let Some(text) = data.pointer("/delta/text").and_then(|v| v.as_str()) {
                            if tx
                                .send(Ok(StreamChunk::content(&id, created, &model, text)))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                    "message_stop" => {
                        let _ = tx.send(Ok(StreamChunk::finish(&id, created, &model))).await;
                        return;
                    }
                    "error" => {
                        let message = data
                            .pointer("/error/message")
                            .and_then(|v| v.as_str())
                            .unwrap_or("upstream message stream failed");
                        let _ = tx
                            .send(Err(UpstreamCallError::network(message.to_string())))
                            .await;
                        return;
                    }
                    _ => {}
                }
            }
            // No message_stop before the connection closed: truncated stream.
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
