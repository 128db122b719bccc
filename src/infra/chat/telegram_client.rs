// Telegram Bot API client. It deliberately exposes only the calls the core
// layer needs, plus the raw long-poll used by the update loop.

use crate::core::chat::{
    ButtonAction, ChatAdmin, ChatApi, ChatError, MemberStatus, MessageRef, ReplyMarkup,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Long-poll wait passed to getUpdates.
const POLL_TIMEOUT_SECS: u64 = 50;

pub struct TelegramApiClient {
    client: Client,
    base_url: String,
}

impl TelegramApiClient {
    pub fn new(token: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            // Must outlive the getUpdates long poll.
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 30))
            .build()?;
        Ok(Self {
            client,
            base_url: format!("https://api.telegram.org/bot{token}"),
        })
    }

    async fn call(&self, method: &str, payload: Value) -> Result<Value, ChatError> {
        let response = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|err| ChatError::Transport(err.to_string()))?;
        Self::into_result(response).await
    }

    async fn call_multipart(&self, method: &str, form: Form) -> Result<Value, ChatError> {
        let response = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|err| ChatError::Transport(err.to_string()))?;
        Self::into_result(response).await
    }

    async fn into_result(response: reqwest::Response) -> Result<Value, ChatError> {
        let body: Value = response
            .json()
            .await
            .map_err(|err| ChatError::Transport(err.to_string()))?;
        if body["ok"].as_bool() == Some(true) {
            Ok(body["result"].clone())
        } else {
            let description = body["description"].as_str().unwrap_or("unknown error");
            Err(ChatError::Api(description.to_string()))
        }
    }

    /// Fetch raw updates via long poll; the adapter layer decodes them.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Value>, ChatError> {
        let result = self
            .call(
                "getUpdates",
                json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "callback_query", "my_chat_member"],
                }),
            )
            .await?;
        match result {
            Value::Array(updates) => Ok(updates),
            other => Err(ChatError::Api(format!("unexpected getUpdates result: {other}"))),
        }
    }

    /// Resolve the bot's own identity (getMe).
    pub async fn identity(&self) -> Result<(i64, String), ChatError> {
        let result = self.call("getMe", json!({})).await?;
        let user_id = result["id"]
            .as_i64()
            .ok_or_else(|| ChatError::Api("getMe without id".to_string()))?;
        let username = result["username"].as_str().unwrap_or_default().to_string();
        Ok((user_id, username))
    }

    fn message_id_of(result: &Value) -> Result<MessageRef, ChatError> {
        result["message_id"]
            .as_i64()
            .map(|message_id| MessageRef { message_id })
            .ok_or_else(|| ChatError::Api("response without message_id".to_string()))
    }
}

fn markup_json(markup: &ReplyMarkup) -> Value {
    match markup {
        ReplyMarkup::Inline(rows) => {
            let keyboard: Vec<Vec<Value>> = rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|button| match &button.action {
                            ButtonAction::Callback(action) => json!({
                                "text": button.label,
                                "callback_data": action.encode(),
                            }),
                            ButtonAction::Url(url) => json!({
                                "text": button.label,
                                "url": url,
                            }),
                            ButtonAction::WebApp(url) => json!({
                                "text": button.label,
                                "web_app": { "url": url },
                            }),
                        })
                        .collect()
                })
                .collect();
            json!({ "inline_keyboard": keyboard })
        }
        ReplyMarkup::WebAppKeyboard { label, url } => json!({
            "keyboard": [[{ "text": label, "web_app": { "url": url } }]],
            "resize_keyboard": true,
            "one_time_keyboard": true,
        }),
    }
}

#[async_trait]
impl ChatApi for TelegramApiClient {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<MessageRef, ChatError> {
        let mut payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(markup) = markup {
            payload["reply_markup"] = markup_json(&markup);
        }
        let result = self.call("sendMessage", payload).await?;
        Self::message_id_of(&result)
    }

    async fn send_reply(
        &self,
        chat_id: i64,
        reply_to: i64,
        text: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<MessageRef, ChatError> {
        let mut payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "reply_to_message_id": reply_to,
        });
        if let Some(markup) = markup {
            payload["reply_markup"] = markup_json(&markup);
        }
        let result = self.call("sendMessage", payload).await?;
        Self::message_id_of(&result)
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        image_png: &[u8],
        caption: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<MessageRef, ChatError> {
        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part(
                "photo",
                Part::bytes(image_png.to_vec())
                    .file_name("captcha.png")
                    .mime_str("image/png")
                    .map_err(|err| ChatError::Transport(err.to_string()))?,
            );
        if let Some(markup) = markup {
            form = form.text("reply_markup", markup_json(&markup).to_string());
        }
        let result = self.call_multipart("sendPhoto", form).await?;
        Self::message_id_of(&result)
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<(), ChatError> {
        let mut payload = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(markup) = markup {
            payload["reply_markup"] = markup_json(&markup);
        }
        self.call("editMessageText", payload).await?;
        Ok(())
    }

    async fn edit_message_media(
        &self,
        chat_id: i64,
        message_id: i64,
        image_png: &[u8],
        caption: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<(), ChatError> {
        let media = json!({
            "type": "photo",
            "media": "attach://photo",
            "caption": caption,
        });
        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("message_id", message_id.to_string())
            .text("media", media.to_string())
            .part(
                "photo",
                Part::bytes(image_png.to_vec())
                    .file_name("captcha.png")
                    .mime_str("image/png")
                    .map_err(|err| ChatError::Transport(err.to_string()))?,
            );
        if let Some(markup) = markup {
            form = form.text("reply_markup", markup_json(&markup).to_string());
        }
        self.call_multipart("editMessageMedia", form).await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError> {
        self.call(
            "deleteMessage",
            json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .await?;
        Ok(())
    }

    async fn restrict_member(
        &self,
        chat_id: i64,
        user_id: i64,
        can_send: bool,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), ChatError> {
        let mut payload = json!({
            "chat_id": chat_id,
            "user_id": user_id,
            "permissions": { "can_send_messages": can_send },
        });
        if let Some(until) = until {
            payload["until_date"] = json!(until.timestamp());
        }
        self.call("restrictChatMember", payload).await?;
        Ok(())
    }

    async fn kick_member(&self, chat_id: i64, user_id: i64) -> Result<(), ChatError> {
        self.call(
            "banChatMember",
            json!({ "chat_id": chat_id, "user_id": user_id }),
        )
        .await?;
        Ok(())
    }

    async fn member_status(&self, chat_id: i64, user_id: i64) -> Result<MemberStatus, ChatError> {
        let result = self
            .call(
                "getChatMember",
                json!({ "chat_id": chat_id, "user_id": user_id }),
            )
            .await?;
        let status = match result["status"].as_str() {
            Some("creator") => MemberStatus::Creator,
            Some("administrator") => MemberStatus::Administrator,
            Some("member") => MemberStatus::Member,
            Some("restricted") => MemberStatus::Restricted,
            Some("left") => MemberStatus::Left,
            Some("kicked") => MemberStatus::Kicked,
            other => {
                return Err(ChatError::Api(format!("unknown member status: {other:?}")))
            }
        };
        Ok(status)
    }

    async fn administrators(&self, chat_id: i64) -> Result<Vec<ChatAdmin>, ChatError> {
        let result = self
            .call("getChatAdministrators", json!({ "chat_id": chat_id }))
            .await?;
        let admins = result
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let user = &entry["user"];
                        Some(ChatAdmin {
                            user_id: user["id"].as_i64()?,
                            username: user["username"].as_str().map(str::to_string),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(admins)
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), ChatError> {
        let mut payload = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            payload["text"] = json!(text);
            payload["show_alert"] = json!(show_alert);
        }
        self.call("answerCallbackQuery", payload).await?;
        Ok(())
    }
}
