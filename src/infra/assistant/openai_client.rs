// Chat-completions client backing the premium assistant.

use crate::core::assistant::{AssistantClient, AssistantError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
    system_prompt: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String, system_prompt: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            system_prompt,
        }
    }
}

#[async_trait]
impl AssistantClient for OpenAiClient {
    async fn ask(&self, question: &str) -> Result<String, AssistantError> {
        let url = "https://api.openai.com/v1/chat/completions";

        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": question },
            ],
        });

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|err| AssistantError::Backend(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AssistantError::Backend(format!(
                "assistant API error: {status} - {text}"
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|err| AssistantError::Backend(err.to_string()))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AssistantError::Backend("failed to parse completion".to_string()))?
            .to_string();
        Ok(content)
    }
}
