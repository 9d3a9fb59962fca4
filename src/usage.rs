use crate::wire::{ChatMessage, CompletionResult, StreamChunk};

/// Fixed token heuristic: one token per four characters, rounded up. Applied
/// uniformly on the input side regardless of provider so pre-flight accounting
/// stays consistent.
pub fn estimate_tokens(content: &str) -> u64 {
    (content.chars().count() as u64).div_ceil(4)
}

pub fn estimate_input_tokens(messages: &[ChatMessage]) -> u64 {
    messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}

/// Running usage tally for one request. Input tokens are estimated before
/// dispatch; output tokens accumulate as the adapter yields content.
#[derive(Debug, Clone)]
pub struct UsageTally {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub output_text: String,
}

impl UsageTally {
    pub fn for_messages(messages: &[ChatMessage]) -> Self {
        Self {
            input_tokens: estimate_input_tokens(messages),
            output_tokens: 0,
            output_text: String::new(),
        }
    }

    pub fn record_chunk(&mut self, chunk: &StreamChunk) {
        if let Some(content) = chunk.delta_content() {
            self.output_tokens += estimate_tokens(content);
            self.output_text.push_str(content);
        }
    }

    /// Non-streaming path: provider-reported counts override the estimates
    /// when the adapter supplied them; the heuristic fills the gaps.
    pub fn record_completion(&mut self, result: &CompletionResult) {
        self.output_text = result.output_text();
        if result.input_tokens_consumed > 0 {
            self.input_tokens = result.input_tokens_consumed;
        }
        self.output_tokens = if result.output_tokens_consumed > 0 {
            result.output_tokens_consumed
        } else {
            estimate_tokens(&self.output_text)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Role;

    #[test]
    fn estimate_rounds_up_per_four_chars() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn input_estimate_sums_ceil_over_messages() {
        let messages = vec![
            ChatMessage::new(Role::System, "12345"),    // 2
            ChatMessage::new(Role::User, "1234"),       // 1
            ChatMessage::new(Role::User, "123456789"),  // 3
        ];
        assert_eq!(estimate_input_tokens(&messages), 6);
    }

    #[test]
    fn estimate_counts_characters_not_bytes() {
        // four characters, twelve utf-8 bytes
        assert_eq!(estimate_tokens("日本語字"), 1);
    }

    #[test]
    fn tally_accumulates_stream_deltas() {
        let messages = vec![ChatMessage::new(Role::User, "hello tally")]; // 3 tokens
        let mut tally = UsageTally::for_messages(&messages);
        tally.record_chunk(&StreamChunk::content("id", 0, "m", "12345")); // 2
        tally.record_chunk(&StreamChunk::content("id", 0, "m", "678")); // 1
        tally.record_chunk(&StreamChunk::finish("id", 0, "m")); // no content
        assert_eq!(tally.input_tokens, 3);
        assert_eq!(tally.output_tokens, 3);
        assert_eq!(tally.output_text, "12345678");
    }

    #[test]
    fn completion_usage_overrides_estimate_when_reported() {
        let messages = vec![ChatMessage::new(Role::User, "hi")];
        let mut tally = UsageTally::for_messages(&messages);
        let result = CompletionResult::assistant_text("id", "m", "answer", 40, 9);
        tally.record_completion(&result);
        assert_eq!(tally.input_tokens, 40);
        assert_eq!(tally.output_tokens, 9);
        assert_eq!(tally.output_text, "answer");
    }

    #[test]
    fn completion_without_reported_usage_falls_back_to_estimate() {
        let messages = vec![ChatMessage::new(Role::User, "hi")];
        let mut tally = UsageTally::for_messages(&messages);
        let result = CompletionResult::assistant_text("id", "m", "12345", 0, 0);
        tally.record_completion(&result);
        assert_eq!(tally.input_tokens, 1);
        assert_eq!(tally.output_tokens, 2);
    }
}
