// Client for the captcha rendering service.
//
// The service draws a math puzzle and reports the expected result:
// `{"image": "<base64 png>", "answer": 27}`.

use crate::core::challenge::{Captcha, CaptchaBackend, ChallengeError};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// Difficulty requested from the renderer.
const CAPTCHA_DIFFICULTY: u8 = 2;

pub struct CaptchaApiClient {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct CaptchaResponse {
    image: String,
    answer: u32,
}

impl CaptchaApiClient {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl CaptchaBackend for CaptchaApiClient {
    async fn generate(&self) -> Result<Captcha, ChallengeError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "difficulty": CAPTCHA_DIFFICULTY }))
            .send()
            .await
            .map_err(|err| ChallengeError::Backend(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ChallengeError::Backend(format!(
                "captcha service returned {status}"
            )));
        }

        let body: CaptchaResponse = response
            .json()
            .await
            .map_err(|err| ChallengeError::Backend(err.to_string()))?;
        let image_png = BASE64
            .decode(body.image.as_bytes())
            .map_err(|err| ChallengeError::Backend(format!("invalid image payload: {err}")))?;

        Ok(Captcha {
            image_png,
            answer: body.answer,
        })
    }
}
