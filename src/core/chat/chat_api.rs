// Chat transport port.
//
// The engine never talks to a concrete chat platform; it issues commands
// through this trait. Every method is fallible I/O: the message may already
// be gone, the bot's rights may have been revoked. Call sites tolerate
// failure (log and continue) instead of aborting the enclosing handler.

use crate::core::events::CallbackAction;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat api rejected the call: {0}")]
    Api(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Reference to a message the transport created for us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub message_id: i64,
}

/// Membership standing of a user inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

impl MemberStatus {
    pub fn is_admin(self) -> bool {
        matches!(self, MemberStatus::Creator | MemberStatus::Administrator)
    }
}

#[derive(Debug, Clone)]
pub struct ChatAdmin {
    pub user_id: i64,
    pub username: Option<String>,
}

/// What pressing a button does.
#[derive(Debug, Clone)]
pub enum ButtonAction {
    Callback(CallbackAction),
    Url(String),
    WebApp(String),
}

#[derive(Debug, Clone)]
pub struct InlineButton {
    pub label: String,
    pub action: ButtonAction,
}

impl InlineButton {
    pub fn callback(label: impl Into<String>, action: CallbackAction) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Callback(action),
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Url(url.into()),
        }
    }
}

/// Keyboard attached to an outgoing message.
#[derive(Debug, Clone)]
pub enum ReplyMarkup {
    /// Rows of inline buttons under the message.
    Inline(Vec<Vec<InlineButton>>),
    /// One-time reply keyboard with a single web-app button.
    WebAppKeyboard { label: String, url: String },
}

impl ReplyMarkup {
    pub fn single_row(buttons: Vec<InlineButton>) -> Self {
        ReplyMarkup::Inline(vec![buttons])
    }

    pub fn rows(rows: Vec<Vec<InlineButton>>) -> Self {
        ReplyMarkup::Inline(rows)
    }
}

/// Outbound command surface of the chat transport.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<MessageRef, ChatError>;

    /// Send a message replying to another one in the same chat.
    async fn send_reply(
        &self,
        chat_id: i64,
        reply_to: i64,
        text: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<MessageRef, ChatError>;

    async fn send_photo(
        &self,
        chat_id: i64,
        image_png: &[u8],
        caption: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<MessageRef, ChatError>;

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<(), ChatError>;

    /// Replace the media and caption of a photo message in place.
    async fn edit_message_media(
        &self,
        chat_id: i64,
        message_id: i64,
        image_png: &[u8],
        caption: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<(), ChatError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError>;

    /// Allow or forbid a member to send messages, optionally until a time.
    async fn restrict_member(
        &self,
        chat_id: i64,
        user_id: i64,
        can_send: bool,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), ChatError>;

    async fn kick_member(&self, chat_id: i64, user_id: i64) -> Result<(), ChatError>;

    async fn member_status(&self, chat_id: i64, user_id: i64) -> Result<MemberStatus, ChatError>;

    async fn administrators(&self, chat_id: i64) -> Result<Vec<ChatAdmin>, ChatError>;

    /// Acknowledge a callback press, optionally with a toast or alert.
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), ChatError>;
}

#[cfg(test)]
pub mod testing {
    //! Recording transport double shared by the service test suites.

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum ChatCall {
        SendMessage { chat_id: i64, text: String },
        SendReply { chat_id: i64, reply_to: i64, text: String },
        SendPhoto { chat_id: i64, caption: String },
        EditText { chat_id: i64, message_id: i64, text: String },
        EditMedia { chat_id: i64, message_id: i64, caption: String },
        Delete { chat_id: i64, message_id: i64 },
        Restrict { chat_id: i64, user_id: i64, can_send: bool, has_until: bool },
        Kick { chat_id: i64, user_id: i64 },
        AnswerCallback { callback_id: String, text: Option<String>, show_alert: bool },
    }

    /// Records every outbound command and hands out sequential message ids.
    #[derive(Default)]
    pub struct RecordingChat {
        pub calls: Mutex<Vec<ChatCall>>,
        next_message_id: AtomicI64,
        pub admins: Mutex<HashMap<i64, Vec<i64>>>,
        /// Markup captured for the most recent send/edit carrying one.
        pub last_markup: Mutex<Option<ReplyMarkup>>,
    }

    impl RecordingChat {
        pub fn new() -> Self {
            Self {
                next_message_id: AtomicI64::new(1000),
                ..Default::default()
            }
        }

        pub fn grant_admin(&self, chat_id: i64, user_id: i64) {
            self.admins
                .lock()
                .unwrap()
                .entry(chat_id)
                .or_default()
                .push(user_id);
        }

        pub fn calls(&self) -> Vec<ChatCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn deletes(&self) -> Vec<(i64, i64)> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    ChatCall::Delete { chat_id, message_id } => Some((chat_id, message_id)),
                    _ => None,
                })
                .collect()
        }

        fn record(&self, call: ChatCall, markup: Option<ReplyMarkup>) -> MessageRef {
            self.calls.lock().unwrap().push(call);
            if markup.is_some() {
                *self.last_markup.lock().unwrap() = markup;
            }
            MessageRef {
                message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
            }
        }
    }

    #[async_trait]
    impl ChatApi for RecordingChat {
        async fn send_message(
            &self,
            chat_id: i64,
            text: &str,
            markup: Option<ReplyMarkup>,
        ) -> Result<MessageRef, ChatError> {
            Ok(self.record(
                ChatCall::SendMessage {
                    chat_id,
                    text: text.to_string(),
                },
                markup,
            ))
        }

        async fn send_reply(
            &self,
            chat_id: i64,
            reply_to: i64,
            text: &str,
            markup: Option<ReplyMarkup>,
        ) -> Result<MessageRef, ChatError> {
            Ok(self.record(
                ChatCall::SendReply {
                    chat_id,
                    reply_to,
                    text: text.to_string(),
                },
                markup,
            ))
        }

        async fn send_photo(
            &self,
            chat_id: i64,
            _image_png: &[u8],
            caption: &str,
            markup: Option<ReplyMarkup>,
        ) -> Result<MessageRef, ChatError> {
            Ok(self.record(
                ChatCall::SendPhoto {
                    chat_id,
                    caption: caption.to_string(),
                },
                markup,
            ))
        }

        async fn edit_message_text(
            &self,
            chat_id: i64,
            message_id: i64,
            text: &str,
            markup: Option<ReplyMarkup>,
        ) -> Result<(), ChatError> {
            self.record(
                ChatCall::EditText {
                    chat_id,
                    message_id,
                    text: text.to_string(),
                },
                markup,
            );
            Ok(())
        }

        async fn edit_message_media(
            &self,
            chat_id: i64,
            message_id: i64,
            _image_png: &[u8],
            caption: &str,
            markup: Option<ReplyMarkup>,
        ) -> Result<(), ChatError> {
            self.record(
                ChatCall::EditMedia {
                    chat_id,
                    message_id,
                    caption: caption.to_string(),
                },
                markup,
            );
            Ok(())
        }

        async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError> {
            self.record(
                ChatCall::Delete {
                    chat_id,
                    message_id,
                },
                None,
            );
            Ok(())
        }

        async fn restrict_member(
            &self,
            chat_id: i64,
            user_id: i64,
            can_send: bool,
            until: Option<DateTime<Utc>>,
        ) -> Result<(), ChatError> {
            self.record(
                ChatCall::Restrict {
                    chat_id,
                    user_id,
                    can_send,
                    has_until: until.is_some(),
                },
                None,
            );
            Ok(())
        }

        async fn kick_member(&self, chat_id: i64, user_id: i64) -> Result<(), ChatError> {
            self.record(ChatCall::Kick { chat_id, user_id }, None);
            Ok(())
        }

        async fn member_status(
            &self,
            chat_id: i64,
            user_id: i64,
        ) -> Result<MemberStatus, ChatError> {
            let admins = self.admins.lock().unwrap();
            let is_admin = admins
                .get(&chat_id)
                .map(|users| users.contains(&user_id))
                .unwrap_or(false);
            Ok(if is_admin {
                MemberStatus::Administrator
            } else {
                MemberStatus::Member
            })
        }

        async fn administrators(&self, chat_id: i64) -> Result<Vec<ChatAdmin>, ChatError> {
            let admins = self.admins.lock().unwrap();
            Ok(admins
                .get(&chat_id)
                .map(|users| {
                    users
                        .iter()
                        .map(|&user_id| ChatAdmin {
                            user_id,
                            username: Some(format!("admin{user_id}")),
                        })
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn answer_callback(
            &self,
            callback_id: &str,
            text: Option<&str>,
            show_alert: bool,
        ) -> Result<(), ChatError> {
            self.record(
                ChatCall::AnswerCallback {
                    callback_id: callback_id.to_string(),
                    text: text.map(str::to_string),
                    show_alert,
                },
                None,
            );
            Ok(())
        }
    }
}
