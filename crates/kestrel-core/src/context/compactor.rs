//! Context compactor (spec.md §4.4): estimates token usage and, once a
//! conversation grows past budget, replaces everything but the most
//! recent messages with one synthetic summary message.

use std::sync::Arc;

use crate::llm::{GenerationRequest, LlmProvider, Message, Role};

/// Crude token estimate used for compaction thresholds, matching
/// spec.md's `chars / 4` rule rather than a real tokenizer.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.content.chars().count()).sum::<usize>() / 4
}

const KEEP_RECENT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// No compaction needed; conversation is under the threshold.
    Unchanged,
    /// Compacted and now under the escalate threshold.
    Compacted,
    /// Compacted but still over `limit * 0.9`; caller should escalate to
    /// a larger-context model.
    Escalate,
}

pub struct Compactor {
    provider: Option<Arc<dyn LlmProvider>>,
    model: String,
}

impl Compactor {
    /// `provider` is optional: without one, compaction falls back to an
    /// extractive bullet list instead of an LLM-produced summary.
    pub fn new(provider: Option<Arc<dyn LlmProvider>>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    pub async fn compact(
        &self,
        messages: &mut Vec<Message>,
        limit: usize,
    ) -> CompactionOutcome {
        let threshold = (limit as f64 * 0.75) as usize;
        if estimate_tokens(messages) <= threshold {
            return CompactionOutcome::Unchanged;
        }

        if messages.len() > KEEP_RECENT {
            let split_at = messages.len() - KEEP_RECENT;
            let to_summarize: Vec<Message> = messages.drain(..split_at).collect();
            let summary = self.summarize(&to_summarize).await;
            messages.insert(0, Message::system(summary));
        }

        let escalate_threshold = (limit as f64 * 0.9) as usize;
        if estimate_tokens(messages) > escalate_threshold {
            CompactionOutcome::Escalate
        } else {
            CompactionOutcome::Compacted
        }
    }

    async fn summarize(&self, messages: &[Message]) -> String {
        if let Some(provider) = &self.provider {
            let transcript = render_transcript(messages);
            let request = GenerationRequest {
                messages: vec![
                    Message::system(
                        "Summarize the following conversation into a compact context \
                         summary preserving key decisions, facts and open tasks.",
                    ),
                    Message::user(transcript),
                ],
                model: self.model.clone(),
                temperature: 0.0,
                max_tokens: 512,
            };
            if let Ok(mut rx) = provider.stream(request).await {
                let mut out = String::new();
                while let Some(chunk) = rx.recv().await {
                    match chunk {
                        crate::llm::StreamChunk::Text(t) => out.push_str(&t),
                        crate::llm::StreamChunk::Done => break,
                    }
                }
                if !out.trim().is_empty() {
                    return format!("[context summary]\n{out}");
                }
            }
        }
        extractive_summary(messages)
    }
}

fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{:?}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Bullet-list fallback when no provider is configured or the provider
/// call fails: one line per message, truncated.
fn extractive_summary(messages: &[Message]) -> String {
    let mut out = String::from("[context summary]\n");
    for m in messages {
        let snippet: String = m.content.chars().take(160).collect();
        out.push_str(&format!("- ({:?}) {snippet}\n", m.role));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_message(n: usize) -> Message {
        Message::user("x".repeat(n))
    }

    #[test]
    fn estimate_is_chars_over_four() {
        let messages = vec![Message::user("abcdefgh")];
        assert_eq!(estimate_tokens(&messages), 2);
    }

    #[tokio::test]
    async fn leaves_short_conversations_untouched() {
        let compactor = Compactor::new(None, "local-model");
        let mut messages = vec![Message::user("hello")];
        let outcome = compactor.compact(&mut messages, 10_000).await;
        assert_eq!(outcome, CompactionOutcome::Unchanged);
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn compacts_long_conversation_with_extractive_fallback() {
        let compactor = Compactor::new(None, "local-model");
        let mut messages: Vec<Message> = (0..20).map(|_| long_message(1000)).collect();
        let outcome = compactor.compact(&mut messages, 1000).await;
        assert_ne!(outcome, CompactionOutcome::Unchanged);
        // KEEP_RECENT originals plus one synthetic summary message.
        assert_eq!(messages.len(), KEEP_RECENT + 1);
        assert!(messages[0].content.starts_with("[context summary]"));
    }
}
