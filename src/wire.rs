use serde::{Deserialize, Serialize};

/// Canonical chat-completion wire schema. Every adapter translates provider
/// responses into these shapes before they leave the adapter; the dispatcher
/// and the SSE framing only ever see this one schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

/// Non-streaming completion result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResult {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    pub input_tokens_consumed: u64,
    pub output_tokens_consumed: u64,
}

impl CompletionResult {
    pub fn assistant_text(
        id: impl Into<String>,
        model: impl Into<String>,
        content: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Self {
        Self {
            id: id.into(),
            object: "chat.completion".to_string(),
            created: now_ts(),
            model: model.into(),
            choices: vec![CompletionChoice {
                index: 0,
                message: ChatMessage::new(Role::Assistant, content),
                finish_reason: Some("stop".to_string()),
            }],
            input_tokens_consumed: input_tokens,
            output_tokens_consumed: output_tokens,
        }
    }

    /// Concatenated text of all choices, the shape persisted to the
    /// conversation log.
    pub fn output_text(&self) -> String {
        self.choices
            .iter()
            .map(|c| c.message.content.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

/// One increment of a streamed completion. All chunks of one response share
/// `id`; the terminal chunk is the only one with a non-null `finish_reason`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

impl StreamChunk {
    pub fn content(id: &str, created: i64, model: &str, content: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: Some(content.into()),
                    role: None,
                },
                finish_reason: None,
            }],
        }
    }

    /// Terminal chunk: empty delta, `finish_reason: "stop"`.
    pub fn finish(id: &str, created: i64, model: &str) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta::default(),
                finish_reason: Some("stop".to_string()),
            }],
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.choices.iter().any(|c| c.finish_reason.is_some())
    }

    pub fn delta_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// Sentinel event data ending every stream: `data: [DONE]\n\n` on the wire.
pub const DONE_SENTINEL: &str = "[DONE]";

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn new_completion_id() -> String {
    format!("chatcmpl_{}", uuid::Uuid::new_v4())
}
