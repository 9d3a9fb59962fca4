use crate::config::ProviderEndpoint;
use crate::upstream::{self, UpstreamCallError};
use crate::wire::{ChatMessage, CompletionResult, StreamChunk, now_ts};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ChunkStream, ProviderAdapter};

/// OpenAI Responses API adapter.
pub struct OpenAiAdapter {
    http: reqwest::Client,
    endpoint: ProviderEndpoint,
}

impl OpenAiAdapter {
    pub fn new(http: reqwest::Client, endpoint: ProviderEndpoint) -> Self {
        Self { http, endpoint }
    }

    fn url(&self) -> String {
        format!("{}/v1/responses", self.endpoint.base_url.trim_end_matches('/'))
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.endpoint.api_key)
    }

    fn request_body(provider_model: &str, messages: &[ChatMessage], stream: bool) -> Value {
        let input: Vec<Value> = messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();
        let mut body = json!({ "model": provider_model, "input": input });
        if stream {
            body["stream"] = Value::Bool(true);
        }
        body
    }
}

fn extract_output_text(response: &Value) -> String {
    // `output_text` is an SDK convenience; the REST shape nests text under
    // output[].content[] items of type "output_text".
    let mut text = String::new();
    if let Some(items) = response.get("output").and_then(|v| v.as_array()) {
        for item in items {
            if item.get("type").and_then(|v| v.as_str()) != Some("message") {
                continue;
            }
            if let Some(parts) = item.get("content").and_then(|v| v.as_array()) {
                for part in parts {
                    if part.get("type").and_then(|v| v.as_str()) == Some("output_text") {
                        if let Some(t) = part.get("text").and_then(|v| v.as_str()) {
                            text.push_str(t);
                        }
                    }
                }
            }
        }
    }
    text
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn chat(
        &self,
        completion_id: &str,
        provider_model: &str,
        messages: &[ChatMessage],
    ) -> Result<CompletionResult, UpstreamCallError> {
        let body = Self::request_body(provider_model, messages, false);
        let auth = self.auth_header();
        let response = upstream::post_json(
            &self.http,
            &self.url(),
            &[("authorization", auth.as_str())],
            &body,
        )
        .await?;

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
            extract_output_text(&response),
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
        let auth = self.auth_header();
        let resp = upstream::post_raw(
            &self.http,
            &self.url(),
            &[("authorization", auth.as_str())],
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
                if event.data.trim() == crate::wire::DONE_SENTINEL {
                    let _ = tx.send(Ok(StreamChunk::finish(&id, created, &model))).await;
                    return;
                }
                let data: Value = match serde_json::from_str(&event.data) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                let event_type = data
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or(event.event.as_str());
                match event_type {
                    "response.output_text.delta" => {
                        if let Some(delta) = data.get("delta").and_then(|v| v.as_str()) {
                            if tx
                                .send(Ok(StreamChunk::content(&id, created, &model, delta)))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                    "response.completed" => {
                        let _ = tx.send(Ok(StreamChunk::finish(&id, created, &model))).await;
                        return;
                    }
                    "response.failed" | "error" => {
                        let message = data
                            .pointer("/error/message")
                            .or_else(|| data.get("message"))
                            .and_then(|v| v.as_str())
                            .unwrap_or("upstream response failed");
                        let _ = tx
                            .send(Err(UpstreamCallError::network(message.to_string())))
                            .await;
                        return;
                    }
                    _ => {}
                }
            }
            // Upstream closed without a completion event: truncation, no
            // terminal chunk.
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
