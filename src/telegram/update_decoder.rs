// Decoding raw Telegram updates into typed inbound events.
//
// This is the only place that understands the wire shape. Everything the
// engine routes on - including the opaque callback payload - is decoded here
// exactly once; downstream code dispatches on enum variants.

use crate::core::events::{CallbackAction, ChatInfo, Command, InboundEvent, UserInfo};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct WireUpdate {
    update_id: i64,
    message: Option<WireMessage>,
    callback_query: Option<WireCallback>,
    my_chat_member: Option<WireMemberUpdate>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: i64,
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    first_name: String,
    last_name: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChat {
    id: i64,
    #[serde(rename = "type")]
    chat_type: String,
    title: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireEntity {
    #[serde(rename = "type")]
    kind: String,
    offset: i64,
}

#[derive(Debug, Deserialize)]
struct WireWebAppData {
    data: String,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    message_id: i64,
    from: Option<WireUser>,
    chat: WireChat,
    text: Option<String>,
    #[serde(default)]
    entities: Vec<WireEntity>,
    #[serde(default)]
    new_chat_members: Vec<WireUser>,
    left_chat_member: Option<WireUser>,
    forward_date: Option<i64>,
    forward_origin: Option<Value>,
    web_app_data: Option<WireWebAppData>,
    reply_to_message: Option<Box<WireMessage>>,
}

#[derive(Debug, Deserialize)]
struct WireCallback {
    id: String,
    from: WireUser,
    data: Option<String>,
    message: Option<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMemberUpdate {
    chat: WireChat,
    new_chat_member: WireMemberState,
}

#[derive(Debug, Deserialize)]
struct WireMemberState {
    status: String,
}

fn user_info(user: WireUser) -> UserInfo {
    UserInfo {
        user_id: user.id,
        username: user.username,
        first_name: user.first_name,
        last_name: user.last_name,
        is_bot: user.is_bot,
    }
}

fn chat_info(chat: WireChat) -> ChatInfo {
    ChatInfo {
        chat_id: chat.id,
        title: chat.title.unwrap_or_default(),
        username: chat.username,
        chat_type: chat.chat_type,
    }
}

fn is_group(chat_type: &str) -> bool {
    matches!(chat_type, "group" | "supergroup")
}

/// The update's sequence number, used to advance the poll offset even when
/// the update decodes to nothing.
pub fn update_id(update: &Value) -> Option<i64> {
    update.get("update_id").and_then(Value::as_i64)
}

/// Decode one raw update. `None` means "nothing the engine reacts to".
pub fn decode(update: Value, bot_username: &str) -> Option<InboundEvent> {
    let update: WireUpdate = match serde_json::from_value(update) {
        Ok(update) => update,
        Err(err) => {
            tracing::warn!(%err, "undecodable update, skipping");
            return None;
        }
    };

    if let Some(callback) = update.callback_query {
        return decode_callback(callback);
    }
    if let Some(member_update) = update.my_chat_member {
        let removed = matches!(member_update.new_chat_member.status.as_str(), "left" | "kicked");
        return Some(InboundEvent::BotMembershipChanged {
            group_id: member_update.chat.id,
            removed,
        });
    }
    if let Some(message) = update.message {
        return decode_message(message, bot_username);
    }

    tracing::debug!(update_id = update.update_id, "update kind not handled");
    None
}

fn decode_message(message: WireMessage, bot_username: &str) -> Option<InboundEvent> {
    if !message.new_chat_members.is_empty() {
        return Some(InboundEvent::MembersJoined {
            chat: chat_info(message.chat),
            added_by: user_info(message.from?),
            members: message.new_chat_members.into_iter().map(user_info).collect(),
            service_message_id: message.message_id,
        });
    }
    if message.left_chat_member.is_some() {
        return Some(InboundEvent::MemberLeft {
            group_id: message.chat.id,
            service_message_id: message.message_id,
        });
    }
    if let Some(web_app_data) = message.web_app_data {
        return Some(InboundEvent::WebAppPayload {
            chat_id: message.chat.id,
            from: user_info(message.from?),
            payload: web_app_data.data,
        });
    }

    let text = message.text?;
    let from = user_info(message.from?);

    if let Some(command) = decode_command(&text, &message.entities, bot_username) {
        let (command, payload) = command;
        return Some(InboundEvent::CommandReceived {
            chat: chat_info(message.chat),
            from,
            command,
            payload,
        });
    }

    if !is_group(&message.chat.chat_type) {
        return None;
    }
    let has_link = message
        .entities
        .iter()
        .any(|entity| matches!(entity.kind.as_str(), "url" | "text_link"));
    let is_forwarded = message.forward_date.is_some() || message.forward_origin.is_some();
    Some(InboundEvent::GroupMessage {
        group_id: message.chat.id,
        message_id: message.message_id,
        from,
        text,
        has_link,
        is_forwarded,
    })
}

fn decode_command(
    text: &str,
    entities: &[WireEntity],
    bot_username: &str,
) -> Option<(Command, Option<String>)> {
    let leading_command = entities
        .iter()
        .any(|entity| entity.kind == "bot_command" && entity.offset == 0);
    if !leading_command && !text.starts_with('/') {
        return None;
    }

    let mut tokens = text.split_whitespace();
    let head = tokens.next()?.strip_prefix('/')?;
    // "/config@guardy_bot" addresses this bot explicitly; a command aimed at
    // another bot is not ours to handle.
    let name = match head.split_once('@') {
        Some((name, target)) if target == bot_username => name,
        Some(_) => return None,
        None => head,
    };
    let command = Command::parse(name)?;
    let payload = tokens.next().map(str::to_string);
    Some((command, payload))
}

fn decode_callback(callback: WireCallback) -> Option<InboundEvent> {
    let message = callback.message?;
    let data = callback.data.unwrap_or_default();
    Some(InboundEvent::CallbackPressed {
        callback_id: callback.id,
        chat_id: message.chat.id,
        message_id: message.message_id,
        reply_target_id: message.reply_to_message.map(|reply| reply.message_id),
        from: user_info(callback.from),
        action: CallbackAction::parse(&data),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BOT: &str = "guardy_bot";

    #[test]
    fn group_message_with_url_entity_decodes() {
        let update = json!({
            "update_id": 1,
            "message": {
                "message_id": 55,
                "from": { "id": 7, "is_bot": false, "first_name": "Ann", "username": "ann" },
                "chat": { "id": -100, "type": "supergroup", "title": "Rustaceans" },
                "text": "look at https://example.org",
                "entities": [ { "type": "url", "offset": 8, "length": 19 } ],
            },
        });
        match decode(update, BOT) {
            Some(InboundEvent::GroupMessage {
                group_id,
                message_id,
                has_link,
                is_forwarded,
                ..
            }) => {
                assert_eq!(group_id, -100);
                assert_eq!(message_id, 55);
                assert!(has_link);
                assert!(!is_forwarded);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn new_member_service_message_decodes_with_members() {
        let update = json!({
            "update_id": 2,
            "message": {
                "message_id": 56,
                "from": { "id": 7, "first_name": "Ann" },
                "chat": { "id": -100, "type": "supergroup", "title": "Rustaceans" },
                "new_chat_members": [
                    { "id": 8, "is_bot": false, "first_name": "Bob" },
                ],
            },
        });
        match decode(update, BOT) {
            Some(InboundEvent::MembersJoined {
                members,
                service_message_id,
                added_by,
                ..
            }) => {
                assert_eq!(members.len(), 1);
                assert_eq!(members[0].user_id, 8);
                assert_eq!(added_by.user_id, 7);
                assert_eq!(service_message_id, 56);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn callback_press_carries_the_reply_target() {
        let update = json!({
            "update_id": 3,
            "callback_query": {
                "id": "cb99",
                "from": { "id": 7, "first_name": "Ann" },
                "data": "msg_check_vote_scam_yes",
                "message": {
                    "message_id": 60,
                    "chat": { "id": -100, "type": "supergroup" },
                    "reply_to_message": {
                        "message_id": 59,
                        "chat": { "id": -100, "type": "supergroup" },
                    },
                },
            },
        });
        match decode(update, BOT) {
            Some(InboundEvent::CallbackPressed {
                action,
                reply_target_id,
                ..
            }) => {
                assert_eq!(action, Some(CallbackAction::Vote { scam: true }));
                assert_eq!(reply_target_id, Some(59));
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn unknown_callback_payload_survives_decode_as_none_action() {
        let update = json!({
            "update_id": 4,
            "callback_query": {
                "id": "cb1",
                "from": { "id": 7, "first_name": "Ann" },
                "data": "cmd_cb_new_fancy_thing",
                "message": {
                    "message_id": 60,
                    "chat": { "id": -100, "type": "supergroup" },
                },
            },
        });
        match decode(update, BOT) {
            Some(InboundEvent::CallbackPressed { action, .. }) => assert_eq!(action, None),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn start_command_with_deep_link_payload() {
        let update = json!({
            "update_id": 5,
            "message": {
                "message_id": 1,
                "from": { "id": 7, "first_name": "Ann" },
                "chat": { "id": 7, "type": "private" },
                "text": "/start verify",
                "entities": [ { "type": "bot_command", "offset": 0, "length": 6 } ],
            },
        });
        match decode(update, BOT) {
            Some(InboundEvent::CommandReceived {
                command, payload, ..
            }) => {
                assert_eq!(command, Command::Start);
                assert_eq!(payload.as_deref(), Some("verify"));
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn command_addressed_to_another_bot_is_ignored() {
        let update = json!({
            "update_id": 6,
            "message": {
                "message_id": 1,
                "from": { "id": 7, "first_name": "Ann" },
                "chat": { "id": -100, "type": "supergroup" },
                "text": "/config@other_bot",
                "entities": [ { "type": "bot_command", "offset": 0, "length": 17 } ],
            },
        });
        assert!(decode(update, BOT).is_none());
    }

    #[test]
    fn bot_removal_update_decodes() {
        let update = json!({
            "update_id": 7,
            "my_chat_member": {
                "chat": { "id": -100, "type": "supergroup" },
                "new_chat_member": { "status": "kicked" },
            },
        });
        match decode(update, BOT) {
            Some(InboundEvent::BotMembershipChanged { group_id, removed }) => {
                assert_eq!(group_id, -100);
                assert!(removed);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn private_chatter_without_command_is_ignored() {
        let update = json!({
            "update_id": 8,
            "message": {
                "message_id": 1,
                "from": { "id": 7, "first_name": "Ann" },
                "chat": { "id": 7, "type": "private" },
                "text": "hello there",
            },
        });
        assert!(decode(update, BOT).is_none());
    }
}
