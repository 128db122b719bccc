// Typed inbound events and callback payload codec.
//
// Callback payloads travel through the chat transport as opaque strings.
// They are decoded exactly once, at the boundary, into the closed
// `CallbackAction` set below; everything past the decode dispatches on the
// variant. The string forms are the wire format and must stay stable across
// releases, since buttons rendered by an old process keep arriving.

use crate::core::config::{AntifloodSetting, Toggle, VerificationMode};

/// Identity of the user behind an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub is_bot: bool,
}

impl UserInfo {
    /// "@username" when available, otherwise the first name.
    pub fn display_handle(&self) -> String {
        match &self.username {
            Some(name) => format!("@{name}"),
            None => self.first_name.clone(),
        }
    }
}

/// Group metadata carried on membership events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    pub chat_id: i64,
    pub title: String,
    pub username: Option<String>,
    pub chat_type: String,
}

/// Slash commands the engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Verify,
    Config,
    Enable,
    Disable,
    Rules,
    AdminList,
}

impl Command {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "start" => Some(Command::Start),
            "verify" => Some(Command::Verify),
            "config" => Some(Command::Config),
            "enable" => Some(Command::Enable),
            "disable" => Some(Command::Disable),
            "rules" => Some(Command::Rules),
            "adminlist" => Some(Command::AdminList),
            _ => None,
        }
    }
}

/// One choice inside the manual configuration wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupChoice {
    LinkRemoval(Toggle),
    ForwardedRemoval(Toggle),
    Verification(VerificationMode),
    BotRemoval(Toggle),
    Antiflood(AntifloodSetting),
}

/// Verification button presses and the web-flavor equivalents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyAction {
    CaptchaCorrect,
    CaptchaWrong,
    CaptchaRegenerate,
    WebCorrect,
    WebWrong,
}

/// Closed set of actions a callback payload can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    /// Apply the maximal-protection preset.
    FullSecurity,
    /// Apply the all-off preset.
    DisableAll,
    /// Enter the manual configuration wizard.
    SetupStart,
    /// Advance the wizard with one choice.
    Setup(SetupChoice),
    /// Verification outcome or regeneration.
    Verify(VerifyAction),
    /// Scam vote on the flagged message of the current thread.
    Vote { scam: bool },
    /// Close (delete) a previously sent report message.
    Close { message_id: i64 },
}

impl CallbackAction {
    /// Render the wire payload for a button carrying this action.
    pub fn encode(&self) -> String {
        match self {
            CallbackAction::FullSecurity => "config_full_security".into(),
            CallbackAction::DisableAll => "config_disable_guardy".into(),
            CallbackAction::SetupStart => "config_setup_security".into(),
            CallbackAction::Setup(choice) => match choice {
                SetupChoice::LinkRemoval(t) => {
                    format!("config_setup_link_removal_{}", toggle_word(*t))
                }
                SetupChoice::ForwardedRemoval(t) => {
                    format!("config_setup_forwarded_removal_{}", toggle_word(*t))
                }
                SetupChoice::Verification(mode) => {
                    let word = match mode {
                        VerificationMode::No => "no",
                        VerificationMode::Image => "image",
                        VerificationMode::Web => "web",
                    };
                    format!("config_setup_verification_{word}")
                }
                SetupChoice::BotRemoval(t) => {
                    format!("config_setup_bot_removal_{}", toggle_word(*t))
                }
                SetupChoice::Antiflood(setting) => match setting {
                    AntifloodSetting::Off => "config_setup_antiflood_no".into(),
                    AntifloodSetting::Limit(n) => format!("config_setup_antiflood_{n}"),
                },
            },
            CallbackAction::Verify(action) => match action {
                VerifyAction::CaptchaCorrect => "vrfct_correct_captcha".into(),
                VerifyAction::CaptchaWrong => "vrfct_wrong_captcha".into(),
                VerifyAction::CaptchaRegenerate => "vrfct_regenerate_captcha".into(),
                VerifyAction::WebCorrect => "vrfct_correct_web".into(),
                VerifyAction::WebWrong => "vrfct_wrong_web".into(),
            },
            CallbackAction::Vote { scam: true } => "msg_check_vote_scam_yes".into(),
            CallbackAction::Vote { scam: false } => "msg_check_vote_scam_no".into(),
            CallbackAction::Close { message_id } => format!("cmd_cb_close_{message_id}"),
        }
    }

    /// Decode a wire payload. `None` is the single unknown-variant case.
    pub fn parse(payload: &str) -> Option<Self> {
        let action = match payload {
            // "config_enable_guardy" is the /enable confirmation button; it
            // applies the same preset as the initial full-security shortcut.
            "config_full_security" | "config_enable_guardy" => CallbackAction::FullSecurity,
            "config_disable_guardy" => CallbackAction::DisableAll,
            "config_setup_security" => CallbackAction::SetupStart,
            "vrfct_correct_captcha" => CallbackAction::Verify(VerifyAction::CaptchaCorrect),
            "vrfct_wrong_captcha" => CallbackAction::Verify(VerifyAction::CaptchaWrong),
            "vrfct_regenerate_captcha" => CallbackAction::Verify(VerifyAction::CaptchaRegenerate),
            "vrfct_correct_web" => CallbackAction::Verify(VerifyAction::WebCorrect),
            "vrfct_wrong_web" => CallbackAction::Verify(VerifyAction::WebWrong),
            "msg_check_vote_scam_yes" => CallbackAction::Vote { scam: true },
            "msg_check_vote_scam_no" => CallbackAction::Vote { scam: false },
            other => return Self::parse_parameterized(other),
        };
        Some(action)
    }

    fn parse_parameterized(payload: &str) -> Option<Self> {
        if let Some(rest) = payload.strip_prefix("config_setup_link_removal_") {
            return parse_toggle(rest).map(|t| CallbackAction::Setup(SetupChoice::LinkRemoval(t)));
        }
        if let Some(rest) = payload.strip_prefix("config_setup_forwarded_removal_") {
            return parse_toggle(rest)
                .map(|t| CallbackAction::Setup(SetupChoice::ForwardedRemoval(t)));
        }
        if let Some(rest) = payload.strip_prefix("config_setup_verification_") {
            let mode = match rest {
                "no" => VerificationMode::No,
                "image" => VerificationMode::Image,
                "web" => VerificationMode::Web,
                _ => return None,
            };
            return Some(CallbackAction::Setup(SetupChoice::Verification(mode)));
        }
        if let Some(rest) = payload.strip_prefix("config_setup_bot_removal_") {
            return parse_toggle(rest).map(|t| CallbackAction::Setup(SetupChoice::BotRemoval(t)));
        }
        if let Some(rest) = payload.strip_prefix("config_setup_antiflood_") {
            let setting = if rest == "no" {
                AntifloodSetting::Off
            } else {
                AntifloodSetting::Limit(rest.parse().ok()?)
            };
            return Some(CallbackAction::Setup(SetupChoice::Antiflood(setting)));
        }
        if let Some(rest) = payload.strip_prefix("cmd_cb_close_") {
            return Some(CallbackAction::Close {
                message_id: rest.parse().ok()?,
            });
        }
        None
    }
}

fn toggle_word(toggle: Toggle) -> &'static str {
    match toggle {
        Toggle::Yes => "yes",
        Toggle::No => "no",
    }
}

fn parse_toggle(word: &str) -> Option<Toggle> {
    match word {
        "yes" => Some(Toggle::Yes),
        "no" => Some(Toggle::No),
        _ => None,
    }
}

/// An inbound chat event, already decoded from the transport's wire shape.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// One or more accounts joined a group (includes the bot itself).
    MembersJoined {
        chat: ChatInfo,
        added_by: UserInfo,
        members: Vec<UserInfo>,
        /// The join service message, deleted after handling.
        service_message_id: i64,
    },
    /// A member left; carries the service message to clean up.
    MemberLeft {
        group_id: i64,
        service_message_id: i64,
    },
    /// The bot's own membership changed (removed/kicked when `removed`).
    BotMembershipChanged { group_id: i64, removed: bool },
    /// Ordinary text message in a group.
    GroupMessage {
        group_id: i64,
        message_id: i64,
        from: UserInfo,
        text: String,
        has_link: bool,
        is_forwarded: bool,
    },
    /// Slash command, in a group or a private chat.
    CommandReceived {
        chat: ChatInfo,
        from: UserInfo,
        command: Command,
        /// Deep-link payload, e.g. "verify" on /start.
        payload: Option<String>,
    },
    /// Inline button press. `action` is `None` for unknown payloads.
    CallbackPressed {
        callback_id: String,
        chat_id: i64,
        message_id: i64,
        /// Message the pressed button's message replies to, when any.
        /// Vote buttons live on an alert replying to the flagged message.
        reply_target_id: Option<i64>,
        from: UserInfo,
        action: Option<CallbackAction>,
    },
    /// Structured payload delivered by the web verification page.
    WebAppPayload {
        chat_id: i64,
        from: UserInfo,
        payload: String,
    },
}
