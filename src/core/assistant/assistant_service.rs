// Mention-triggered Q&A through the completion collaborator.
//
// Used only in designated premium groups and only when the bot is addressed
// directly; both gates live in the orchestrator. This service owns the text
// hygiene around the call.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("assistant call failed: {0}")]
    Backend(String),
}

/// Black-box completion collaborator.
#[async_trait]
pub trait AssistantClient: Send + Sync {
    async fn ask(&self, question: &str) -> Result<String, AssistantError>;
}

pub struct AssistantService<A: AssistantClient> {
    client: A,
}

impl<A: AssistantClient> AssistantService<A> {
    pub fn new(client: A) -> Self {
        Self { client }
    }

    /// Strip the bot mention; `None` when nothing but the mention remains.
    pub fn extract_question(text: &str, bot_username: &str) -> Option<String> {
        let question = text
            .replace(&format!("@{bot_username}"), "")
            .trim()
            .to_string();
        if question.is_empty() {
            None
        } else {
            Some(question)
        }
    }

    /// Ask the assistant, with source-reference markers stripped from the
    /// completion.
    pub async fn ask(&self, question: &str) -> Result<String, AssistantError> {
        let answer = self.client.ask(question).await?;
        Ok(strip_source_markers(&answer))
    }
}

/// Drop the 【...】 citation spans some assistant backends embed.
fn strip_source_markers(answer: &str) -> String {
    let mut cleaned = String::with_capacity(answer.len());
    let mut inside_marker = false;
    for ch in answer.chars() {
        match ch {
            '【' => inside_marker = true,
            '】' => inside_marker = false,
            _ if !inside_marker => cleaned.push(ch),
            _ => {}
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoClient;

    #[async_trait]
    impl AssistantClient for EchoClient {
        async fn ask(&self, question: &str) -> Result<String, AssistantError> {
            Ok(format!("answer to: {question}【4:2†source】!"))
        }
    }

    #[test]
    fn mention_is_stripped_from_the_question() {
        assert_eq!(
            AssistantService::<EchoClient>::extract_question(
                "@guardy_bot who are you?",
                "guardy_bot"
            ),
            Some("who are you?".to_string())
        );
    }

    #[test]
    fn bare_mention_yields_no_question() {
        assert_eq!(
            AssistantService::<EchoClient>::extract_question("@guardy_bot   ", "guardy_bot"),
            None
        );
    }

    #[tokio::test]
    async fn source_markers_are_removed_from_answers() {
        let service = AssistantService::new(EchoClient);
        let answer = service.ask("who are you?").await.unwrap();
        assert_eq!(answer, "answer to: who are you?!");
    }
}
