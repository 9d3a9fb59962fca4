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

/// Gemini generateContent adapter, serving both the "Google API" and
/// "Google Vertex" provider identities.
pub struct GeminiAdapter {
    http: reqwest::Client,
    endpoint: ProviderEndpoint,
}

impl GeminiAdapter {
    pub fn new(http: reqwest::Client, endpoint: ProviderEndpoint) -> Self {
        Self { http, endpoint }
    }

    fn url(&self, provider_model: &str, stream: bool) -> String {
        let base = self.endpoint.base_url.trim_end_matches('/');
        if stream {
            format!("{base}/v1beta/models/{provider_model}:streamGenerateContent?alt=sse")
        } else {
            format!("{base}/v1beta/models/{provider_model}:generateContent")
        }
    }

    /// Gemini has no system role in `contents`; system text goes into
    /// `systemInstruction` and assistant turns use the `model` role.
    fn request_body(messages: &[ChatMessage]) -> Value {
        let mut system = String::new();
        let mut contents: Vec<Value> = Vec::new();
        for message in messages {
            match message.role {
                Role::System => system.push_str(&message.content),
                Role::User => contents.push(json!({
                    "role": "user",
                    "parts": [{ "text": message.content }]
                })),
                Role::Assistant => contents.push(json!({
                    "role": "model",
                    "parts": [{ "text": message.content }]
                })),
            }
        }
        let mut body = json!({ "contents": contents });
        if !system.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        body
    }
}

fn extract_candidate_text(response: &Value) -> String {
    let mut text = String::new();
    if let Some(parts) = response
        .pointer("/candidates/0/content/parts")
        .and_then(|v| v.as_array())
    {
        for part in parts {
            if let Some(t) = part.get("text").and_then(|v| v.as_str()) {
                text.push_str(t);
            }
        }
    }
    text
}

fn candidate_finished(response: &Value) -> bool {
    response
        .pointer("/candidates/0/finishReason")
        .and_then(|v| v.as_str())
        .is_some()
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    async fn chat(
        &self,
        completion_id: &str,
        provider_model: &str,
        messages: &[ChatMessage],
    ) -> Result<CompletionResult, UpstreamCallError> {
        let body = Self::request_body(messages);
        let response = upstream::post_json(
            &self.http,
            &self.url(provider_model, false),
            &[("x-goog-api-key", self.endpoint.api_key.as_str())],
            &body,
        )
        .await?;

        let input_tokens = response
            .pointer("/usageMetadata/promptTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let output_tokens = response
            .pointer("/usageMetadata/candidatesTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(CompletionResult::assistant_text(
            completion_id,
            provider_model,
            extract_candidate_text(&response),
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
        let body = Self::request_body(messages);
        let resp = upstream::post_raw(
            &self.http,
            &self.url(provider_model, true),
            &[("x-goog-api-key", self.endpoint.api_key.as_str())],
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
                let text = extract_candidate_text(&data);
                if !text.is_empty()
                    && tx
                        .send(Ok(StreamChunk::content(&id, created, &model, text)))
                        .await
                        .is_err()
                {
                    return;
                }
                if candidate_finished(&data) {
                    let _ = tx.send(Ok(StreamChunk::finish(&id, created, &model))).await;
                    return;
                }
            }
            // Connection closed before any finishReason: truncated stream.
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
