// HTTP client for the hosted OTIS spam-classification model.
//
// The inference endpoint speaks the standard text-classification shape:
// `[[{"label": "LABEL_0", "score": 0.97}, ...]]` where LABEL_1 is spam.

use crate::core::scam::{ClassifierError, ScamClassifier, ScamLabel, ScamScore};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

pub struct OtisClient {
    client: Client,
    endpoint: String,
    api_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Classification {
    label: String,
    score: f64,
}

impl OtisClient {
    pub fn new(endpoint: String, api_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_token,
        }
    }
}

#[async_trait]
impl ScamClassifier for OtisClient {
    async fn score(&self, text: &str) -> Result<ScamScore, ClassifierError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "inputs": text }));
        if let Some(token) = &self.api_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|err| ClassifierError::Backend(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Backend(format!(
                "classifier returned {status}: {body}"
            )));
        }

        // Either a flat list or a batched list-of-lists, depending on the
        // serving stack.
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| ClassifierError::Backend(err.to_string()))?;
        let candidates: Vec<Classification> = match &body {
            serde_json::Value::Array(items) if items.first().map_or(false, |v| v.is_array()) => {
                serde_json::from_value(items[0].clone())
                    .map_err(|err| ClassifierError::Backend(err.to_string()))?
            }
            _ => serde_json::from_value(body)
                .map_err(|err| ClassifierError::Backend(err.to_string()))?,
        };

        let best = candidates
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .ok_or_else(|| ClassifierError::Backend("empty classifier response".to_string()))?;

        let label = if best.label == "LABEL_1" {
            ScamLabel::Spam
        } else {
            ScamLabel::NotSpam
        };
        Ok(ScamScore {
            label,
            probability: best.score,
        })
    }
}
