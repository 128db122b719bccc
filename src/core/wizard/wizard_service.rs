// Manual configuration wizard - strictly ordered admin prompts.
//
// Entry -> LinkRemoval -> ForwardedRemoval -> HumanVerification ->
// BotRemoval -> Antiflood -> Committed. There is no back-navigation. Choices
// accumulate in an in-memory session and are persisted as one unit when the
// final step lands; abandoning the wizard mid-way changes nothing.

use crate::core::chat::{InlineButton, ReplyMarkup};
use crate::core::config::{
    AntifloodSetting, GroupConfig, GuardyStatus, Toggle, VerificationMode,
};
use crate::core::events::{CallbackAction, SetupChoice};
use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WizardStep {
    LinkRemoval,
    ForwardedRemoval,
    HumanVerification,
    BotRemoval,
    Antiflood,
}

#[derive(Debug, Clone, Copy)]
struct WizardSession {
    step: WizardStep,
    link_removal: Option<Toggle>,
    forwarded_removal: Option<Toggle>,
    human_verification: Option<VerificationMode>,
    bot_removal: Option<Toggle>,
}

impl WizardSession {
    fn entry() -> Self {
        Self {
            step: WizardStep::LinkRemoval,
            link_removal: None,
            forwarded_removal: None,
            human_verification: None,
            bot_removal: None,
        }
    }
}

/// Text and keyboard for the next step, rendered into the wizard message.
#[derive(Debug, Clone)]
pub struct WizardPrompt {
    pub text: String,
    pub markup: ReplyMarkup,
}

/// Result of feeding one choice into the wizard.
#[derive(Debug, Clone)]
pub enum WizardAdvance {
    /// Show the next step.
    Prompt(WizardPrompt),
    /// Final step accepted: persist this config as one unit.
    Committed(GroupConfig),
    /// The choice does not belong to the session's current step (stale or
    /// replayed button). Logged and dropped by the caller.
    Mismatch,
}

/// Wizard sessions keyed by (group, admin); concurrent wizards in different
/// groups or by different admins do not interfere.
#[derive(Default)]
pub struct SetupWizard {
    sessions: DashMap<(i64, i64), WizardSession>,
}

impl SetupWizard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the wizard: opens (or restarts) a session and returns the first
    /// step's prompt.
    pub fn begin(&self, group_id: i64, user_id: i64) -> WizardPrompt {
        self.sessions
            .insert((group_id, user_id), WizardSession::entry());
        link_removal_prompt()
    }

    /// Feed one choice. Steps advance strictly in order; the final step
    /// commits and destroys the session.
    pub fn advance(&self, group_id: i64, user_id: i64, choice: SetupChoice) -> WizardAdvance {
        let key = (group_id, user_id);
        let mut entry = match self.sessions.get_mut(&key) {
            Some(entry) => entry,
            None => return WizardAdvance::Mismatch,
        };

        match (entry.step, choice) {
            (WizardStep::LinkRemoval, SetupChoice::LinkRemoval(toggle)) => {
                entry.link_removal = Some(toggle);
                entry.step = WizardStep::ForwardedRemoval;
                WizardAdvance::Prompt(forwarded_removal_prompt())
            }
            (WizardStep::ForwardedRemoval, SetupChoice::ForwardedRemoval(toggle)) => {
                entry.forwarded_removal = Some(toggle);
                entry.step = WizardStep::HumanVerification;
                WizardAdvance::Prompt(human_verification_prompt())
            }
            (WizardStep::HumanVerification, SetupChoice::Verification(mode)) => {
                entry.human_verification = Some(mode);
                entry.step = WizardStep::BotRemoval;
                WizardAdvance::Prompt(bot_removal_prompt())
            }
            (WizardStep::BotRemoval, SetupChoice::BotRemoval(toggle)) => {
                entry.bot_removal = Some(toggle);
                entry.step = WizardStep::Antiflood;
                WizardAdvance::Prompt(antiflood_prompt())
            }
            (WizardStep::Antiflood, SetupChoice::Antiflood(setting)) => {
                let config = GroupConfig {
                    guardy_status: GuardyStatus::Enabled,
                    link_removal: entry.link_removal.unwrap_or(Toggle::No),
                    forwarded_removal: entry.forwarded_removal.unwrap_or(Toggle::No),
                    human_verification: entry.human_verification.unwrap_or(VerificationMode::No),
                    bot_removal: entry.bot_removal.unwrap_or(Toggle::No),
                    antiflood: setting,
                };
                drop(entry);
                self.sessions.remove(&key);
                WizardAdvance::Committed(config)
            }
            _ => WizardAdvance::Mismatch,
        }
    }

    /// Forget a group's unfinished sessions, e.g. when the bot leaves it.
    pub fn abandon_group(&self, group_id: i64) {
        self.sessions.retain(|(session_group, _), _| *session_group != group_id);
    }
}

fn yes_no_row(choice: fn(Toggle) -> SetupChoice) -> ReplyMarkup {
    ReplyMarkup::rows(vec![
        vec![InlineButton::callback(
            "Yes",
            CallbackAction::Setup(choice(Toggle::Yes)),
        )],
        vec![InlineButton::callback(
            "No",
            CallbackAction::Setup(choice(Toggle::No)),
        )],
    ])
}

fn link_removal_prompt() -> WizardPrompt {
    WizardPrompt {
        text: "🔗 Remove links? \n\n\
               Guardy will automatically remove external links posted by non-admin members. \n\n\
               Enabling this feature helps to reduce spam and prevents the spread of phishing \
               links, keeping the group more secure and focused."
            .to_string(),
        markup: yes_no_row(SetupChoice::LinkRemoval),
    }
}

fn forwarded_removal_prompt() -> WizardPrompt {
    WizardPrompt {
        text: "🔀 Remove forwarded messages? \n\n\
               Guardy will automatically remove messages that are forwarded by non-admin \
               members. \n\n\
               Forwarded messages can be a source of misinformation, spam, or malicious \
               content, as their original source is often unverified."
            .to_string(),
        markup: yes_no_row(SetupChoice::ForwardedRemoval),
    }
}

fn human_verification_prompt() -> WizardPrompt {
    WizardPrompt {
        text: "👤 How to verify new members? \n\n\
               Human verification is crucial to prevent automated bots from joining and \
               spamming the group. \n\n\
               Image = CAPTCHA-based verification \n\
               Web = Web-based verification (most secure) \n\
               No = Verification disabled"
            .to_string(),
        markup: ReplyMarkup::rows(vec![
            vec![InlineButton::callback(
                "Image",
                CallbackAction::Setup(SetupChoice::Verification(VerificationMode::Image)),
            )],
            vec![InlineButton::callback(
                "Web",
                CallbackAction::Setup(SetupChoice::Verification(VerificationMode::Web)),
            )],
            vec![InlineButton::callback(
                "No",
                CallbackAction::Setup(SetupChoice::Verification(VerificationMode::No)),
            )],
        ]),
    }
}

fn bot_removal_prompt() -> WizardPrompt {
    WizardPrompt {
        text: "🤖 Remove bots? \n\n\
               Guardy will remove all bots that are added by non-admin members. \n\n\
               Allowing users to add bots can pose a risk, as some bots may spam or phish \
               information from group members."
            .to_string(),
        markup: yes_no_row(SetupChoice::BotRemoval),
    }
}

fn antiflood_prompt() -> WizardPrompt {
    let limit_button = |n: u32| {
        InlineButton::callback(
            n.to_string(),
            CallbackAction::Setup(SetupChoice::Antiflood(AntifloodSetting::Limit(n))),
        )
    };
    WizardPrompt {
        text: "🔊 Enable anti-flood? \n\n\
               Guardy will mute users sending over X messages within 20 seconds, reducing \
               flooding and maintaining the group clean & friendly. \n\n\
               Set the trigger by specifying the maximum messages allowed per 20 seconds. \
               Default is 10 messages."
            .to_string(),
        markup: ReplyMarkup::rows(vec![
            vec![
                limit_button(3),
                limit_button(5),
                limit_button(10),
                limit_button(15),
            ],
            vec![InlineButton::callback(
                "No",
                CallbackAction::Setup(SetupChoice::Antiflood(AntifloodSetting::Off)),
            )],
        ]),
    }
}
