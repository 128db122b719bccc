// Moderation orchestrator - routes typed inbound events to the right
// session, wizard or service and issues the side-effecting commands.
//
// Every handler contains its own faults: a failed transport call or a
// missing record is logged and the handler moves on, so one group's trouble
// never stalls event processing for the rest. Per-group feature flags are
// read from the config store before acting, and the moderation checks
// exempt administrators.

use crate::core::antiflood::{FloodAction, FloodTracker, FLOOD_WINDOW_SECS, MUTE_MINUTES};
use crate::core::assistant::{AssistantClient, AssistantService};
use crate::core::chat::{ChatApi, InlineButton, ReplyMarkup};
use crate::core::config::{
    AntifloodSetting, ConfigStore, DirectoryStore, GroupConfig, GroupConfigPatch, GroupProfile,
    Toggle, UserProfile, VerificationMode,
};
use crate::core::events::{
    CallbackAction, ChatInfo, Command, InboundEvent, SetupChoice, UserInfo, VerifyAction,
};
use crate::core::scam::{should_alert, ScamAnalyzer, ScamClassifier};
use crate::core::scheduler::Scheduler;
use crate::core::verification::{
    ChallengeFlavor, CompletionStatus, RegenerateStatus, VerificationService, VerificationStore,
};
use crate::core::voting::{VoteResult, VotingService, VotingStore};
use crate::core::wizard::{SetupWizard, WizardAdvance};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Lifetime of moderation warnings (link/forward/bot removal).
const WARNING_LIFETIME: Duration = Duration::from_secs(5);
/// Lifetime of the antiflood warning.
const FLOOD_WARNING_LIFETIME: Duration = Duration::from_secs(30);
/// Lifetime of wizard/preset confirmations.
const CONFIRMATION_LIFETIME: Duration = Duration::from_secs(5);
/// Lifetime of transient reports (/rules, /adminlist).
const REPORT_LIFETIME: Duration = Duration::from_secs(30);
/// Lifetime of the plain (no-verification) welcome.
const PLAIN_WELCOME_LIFETIME: Duration = Duration::from_secs(10);

/// Who the bot is, for self-detection and mention matching.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub user_id: i64,
    pub username: String,
}

/// Full persistence surface the orchestrator needs; one store implements
/// every concern.
pub trait ModerationStore:
    ConfigStore + DirectoryStore + VerificationStore + VotingStore + 'static
{
}

impl<T> ModerationStore for T where
    T: ConfigStore + DirectoryStore + VerificationStore + VotingStore + 'static
{
}

pub struct ModerationOrchestrator<S, C, A>
where
    S: ModerationStore,
    C: ScamClassifier,
    A: AssistantClient,
{
    store: Arc<S>,
    chat: Arc<dyn ChatApi>,
    scheduler: Arc<Scheduler>,
    flood: FloodTracker,
    wizard: SetupWizard,
    verification: VerificationService<S>,
    voting: Arc<VotingService<S>>,
    scam: ScamAnalyzer<C>,
    assistant: AssistantService<A>,
    bot: BotIdentity,
    premium_groups: HashSet<i64>,
}

impl<S, C, A> ModerationOrchestrator<S, C, A>
where
    S: ModerationStore,
    C: ScamClassifier,
    A: AssistantClient,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        chat: Arc<dyn ChatApi>,
        scheduler: Arc<Scheduler>,
        verification: VerificationService<S>,
        voting: Arc<VotingService<S>>,
        scam: ScamAnalyzer<C>,
        assistant: AssistantService<A>,
        bot: BotIdentity,
        premium_groups: HashSet<i64>,
    ) -> Self {
        Self {
            store,
            chat,
            scheduler,
            flood: FloodTracker::new(),
            wizard: SetupWizard::new(),
            verification,
            voting,
            scam,
            assistant,
            bot,
            premium_groups,
        }
    }

    /// Entry point for every decoded inbound event. Never propagates an
    /// error; faults stay inside the handler that produced them.
    pub async fn handle_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::MembersJoined {
                chat,
                added_by,
                members,
                service_message_id,
            } => {
                self.on_members_joined(&chat, &added_by, &members).await;
                self.delete_silently(chat.chat_id, service_message_id).await;
            }
            InboundEvent::MemberLeft {
                group_id,
                service_message_id,
            } => {
                self.delete_silently(group_id, service_message_id).await;
            }
            InboundEvent::BotMembershipChanged { group_id, removed } => {
                if removed {
                    self.on_bot_removed(group_id).await;
                }
            }
            InboundEvent::GroupMessage {
                group_id,
                message_id,
                from,
                text,
                has_link,
                is_forwarded,
            } => {
                self.on_group_message(group_id, message_id, &from, &text, has_link, is_forwarded)
                    .await;
            }
            InboundEvent::CommandReceived {
                chat,
                from,
                command,
                payload,
            } => {
                self.on_command(&chat, &from, command, payload.as_deref())
                    .await;
            }
            InboundEvent::CallbackPressed {
                callback_id,
                chat_id,
                message_id,
                reply_target_id,
                from,
                action,
            } => {
                self.on_callback(&callback_id, chat_id, message_id, reply_target_id, &from, action)
                    .await;
            }
            InboundEvent::WebAppPayload {
                chat_id,
                from,
                payload,
            } => {
                if let Err(err) = self
                    .verification
                    .handle_web_payload(from.user_id, chat_id, &payload)
                    .await
                {
                    tracing::error!(user_id = from.user_id, %err, "web payload handling failed");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    async fn on_members_joined(&self, chat: &ChatInfo, added_by: &UserInfo, members: &[UserInfo]) {
        let config = self.group_config(chat.chat_id).await;

        for member in members {
            if member.user_id == self.bot.user_id {
                self.on_bot_added(chat, added_by).await;
            } else if member.is_bot {
                self.on_external_bot_added(chat.chat_id, added_by, member, &config)
                    .await;
            } else if config.human_verification != VerificationMode::No {
                if let Err(err) = self
                    .verification
                    .start_verification(chat, member, config.human_verification)
                    .await
                {
                    tracing::error!(
                        group_id = chat.chat_id,
                        user_id = member.user_id,
                        %err,
                        "failed to start verification"
                    );
                }
            } else if let Ok(welcome) = self
                .chat
                .send_message(
                    chat.chat_id,
                    &format!("Welcome {}!", member.display_handle()),
                    None,
                )
                .await
            {
                self.scheduler.delete_message_after(
                    Arc::clone(&self.chat),
                    chat.chat_id,
                    welcome.message_id,
                    PLAIN_WELCOME_LIFETIME,
                );
            }
        }
    }

    /// The bot itself was added: register the group and offer setup.
    async fn on_bot_added(&self, chat: &ChatInfo, added_by: &UserInfo) {
        match self.store.group_exists(chat.chat_id).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(err) => {
                tracing::error!(group_id = chat.chat_id, %err, "group lookup failed");
                return;
            }
        }

        let profile = GroupProfile {
            group_id: chat.chat_id,
            chat_title: chat.title.clone(),
            chat_username: chat.username.clone(),
            chat_type: chat.chat_type.clone(),
            added_by: added_by.user_id,
            date_added: Utc::now(),
        };
        if let Err(err) = self.store.add_group(profile).await {
            tracing::error!(group_id = chat.chat_id, %err, "failed to register group");
        }
        tracing::info!(group_id = chat.chat_id, "added to a new group");

        let markup = ReplyMarkup::rows(vec![
            vec![InlineButton::callback(
                "🛡️ Full Security 🛡️",
                CallbackAction::FullSecurity,
            )],
            vec![InlineButton::callback(
                "Manual Configuration",
                CallbackAction::SetupStart,
            )],
        ]);
        let setup_message = "Welcome to Guardy - leading Telegram community assistant with \
            focus on security & seamless group management\n\n\
            To get started, choose one of the options below:\n\n\
            <b>🛡️ Full Security 🛡️</b>: Automatically apply the best security practices in \
            your community (default).\n\n\
            <b>Manual Configuration</b>: Manually customize your group's security settings \
            to suit your unique requirements\n\n\
            Admins always can adjust the group's security settings using /config command \
            in this group";
        if let Err(err) = self
            .chat
            .send_message(chat.chat_id, setup_message, Some(markup))
            .await
        {
            tracing::error!(group_id = chat.chat_id, %err, "failed to send setup prompt");
        }
    }

    async fn on_external_bot_added(
        &self,
        group_id: i64,
        added_by: &UserInfo,
        bot: &UserInfo,
        config: &GroupConfig,
    ) {
        if !config.bot_removal.is_on() {
            return;
        }
        if self.is_admin(group_id, added_by.user_id).await != Some(false) {
            return;
        }

        if let Err(err) = self.chat.kick_member(group_id, bot.user_id).await {
            tracing::warn!(group_id, bot_id = bot.user_id, %err, "failed to kick external bot");
            return;
        }
        self.transient_warning(
            group_id,
            &format!(
                "❗ {} adding external bots is not allowed in this group ❗",
                bot.display_handle()
            ),
            WARNING_LIFETIME,
        )
        .await;
    }

    async fn on_bot_removed(&self, group_id: i64) {
        tracing::info!(group_id, "removed from group, dropping its data");
        if let Err(err) = self.store.delete_group(group_id).await {
            tracing::error!(group_id, %err, "failed to delete group profile");
        }
        if let Err(err) = self.store.delete_config(group_id).await {
            tracing::error!(group_id, %err, "failed to delete group config");
        }
        self.flood.forget_group(group_id);
        self.wizard.abandon_group(group_id);
    }

    // ------------------------------------------------------------------
    // Group messages
    // ------------------------------------------------------------------

    async fn on_group_message(
        &self,
        group_id: i64,
        message_id: i64,
        from: &UserInfo,
        text: &str,
        has_link: bool,
        is_forwarded: bool,
    ) {
        let config = self.group_config(group_id).await;

        // Link and forward checks are independent concerns; each fires at
        // most once per message. The admin status is resolved lazily and
        // only once.
        let mut admin_cache: Option<Option<bool>> = None;

        if has_link && config.link_removal.is_on() {
            let admin = self
                .cached_admin(&mut admin_cache, group_id, from.user_id)
                .await;
            if admin == Some(false) {
                self.remove_with_warning(
                    group_id,
                    message_id,
                    &format!(
                        "❗ {} posting links is not allowed in this group ❗",
                        from.display_handle()
                    ),
                )
                .await;
            }
        }

        if is_forwarded && config.forwarded_removal.is_on() {
            let admin = self
                .cached_admin(&mut admin_cache, group_id, from.user_id)
                .await;
            if admin == Some(false) {
                self.remove_with_warning(
                    group_id,
                    message_id,
                    &format!(
                        "❗ {} forwarding messages is not allowed in this group ❗",
                        from.display_handle()
                    ),
                )
                .await;
            }
        }

        if let AntifloodSetting::Limit(limit) = config.antiflood {
            self.enforce_antiflood(group_id, message_id, from, limit)
                .await;
        }

        if self.premium_groups.contains(&group_id) {
            self.analyze_for_scam(group_id, message_id, text).await;
            if text.starts_with(&format!("@{}", self.bot.username)) {
                self.answer_mention(group_id, message_id, text).await;
            }
        }
    }

    async fn enforce_antiflood(&self, group_id: i64, message_id: i64, from: &UserInfo, limit: u32) {
        let verdict = self
            .flood
            .observe(group_id, from.user_id, message_id, Utc::now(), limit);
        if verdict != FloodAction::Mute {
            return;
        }

        let until = Utc::now() + ChronoDuration::minutes(MUTE_MINUTES);
        if let Err(err) = self
            .chat
            .restrict_member(group_id, from.user_id, false, Some(until))
            .await
        {
            tracing::warn!(group_id, user_id = from.user_id, %err, "failed to mute flooding user");
        }
        self.transient_warning(
            group_id,
            &format!(
                "⛔ Stop flooding! ⛔\n\nTo prevent spamming chats with unnecessary \
                 information, group admins have set a limit of max. <b>{limit} messages \
                 every {FLOOD_WINDOW_SECS} seconds</b>!"
            ),
            FLOOD_WARNING_LIFETIME,
        )
        .await;
    }

    async fn analyze_for_scam(&self, group_id: i64, message_id: i64, text: &str) {
        let score = match self.scam.analyze(text).await {
            Ok(score) => score,
            Err(err) => {
                tracing::error!(group_id, %err, "scam analysis failed");
                self.transient_warning(
                    group_id,
                    "Scam analysis is temporarily unavailable. Please try again later.",
                    WARNING_LIFETIME,
                )
                .await;
                return;
            }
        };
        if !should_alert(score) {
            return;
        }

        let markup = ReplyMarkup::single_row(vec![
            InlineButton::callback("Yes", CallbackAction::Vote { scam: true }),
            InlineButton::callback("No", CallbackAction::Vote { scam: false }),
        ]);
        let alert_text = format!(
            "⚠️ <b>SCAM ALERT:</b> Does this message seem suspicious to you? \n\n\
             Scam Likelihood: {:.1}%",
            score.probability * 100.0
        );
        let alert = match self
            .chat
            .send_reply(group_id, message_id, &alert_text, Some(markup))
            .await
        {
            Ok(alert) => alert,
            Err(err) => {
                tracing::warn!(group_id, message_id, %err, "failed to send scam alert");
                return;
            }
        };

        if let Err(err) = self
            .voting
            .open(group_id, message_id, alert.message_id)
            .await
        {
            tracing::error!(group_id, message_id, %err, "failed to open scam vote");
        } else {
            tracing::info!(group_id, message_id, "scam vote opened");
        }
    }

    async fn answer_mention(&self, group_id: i64, message_id: i64, text: &str) {
        let question = match AssistantService::<A>::extract_question(text, &self.bot.username) {
            Some(question) => question,
            None => {
                self.transient_warning(
                    group_id,
                    "You sent an <b>empty message</b>. Please ask me something!",
                    PLAIN_WELCOME_LIFETIME,
                )
                .await;
                return;
            }
        };

        let placeholder = match self
            .chat
            .send_reply(group_id, message_id, "🔍 Looking in my mind palace...", None)
            .await
        {
            Ok(placeholder) => placeholder,
            Err(err) => {
                tracing::warn!(group_id, %err, "failed to send assistant placeholder");
                return;
            }
        };

        let reply = match self.assistant.ask(&question).await {
            Ok(answer) => answer,
            Err(err) => {
                tracing::error!(group_id, %err, "assistant completion failed");
                "Something went wrong. Try once again...".to_string()
            }
        };
        if let Err(err) = self
            .chat
            .edit_message_text(group_id, placeholder.message_id, &reply, None)
            .await
        {
            tracing::warn!(group_id, %err, "failed to deliver assistant answer");
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    async fn on_command(
        &self,
        chat: &ChatInfo,
        from: &UserInfo,
        command: Command,
        payload: Option<&str>,
    ) {
        match command {
            Command::Start => self.cmd_start(chat, from, payload).await,
            Command::Verify => {
                if is_group(chat) {
                    return;
                }
                match self.verification.begin_challenge(from.user_id, chat.chat_id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!(user_id = from.user_id, "verify without pending record")
                    }
                    Err(err) => {
                        tracing::error!(user_id = from.user_id, %err, "failed to issue challenge")
                    }
                }
            }
            Command::Config => self.cmd_config(chat, from).await,
            Command::Enable => self.cmd_enable_disable(chat, from, true).await,
            Command::Disable => self.cmd_enable_disable(chat, from, false).await,
            Command::Rules => self.cmd_rules(chat).await,
            Command::AdminList => self.cmd_admin_list(chat).await,
        }
    }

    async fn cmd_start(&self, chat: &ChatInfo, from: &UserInfo, payload: Option<&str>) {
        if is_group(chat) {
            return;
        }

        match self.store.user_exists(from.user_id).await {
            Ok(false) => {
                let profile = UserProfile {
                    user_id: from.user_id,
                    username: from.username.clone(),
                    first_name: from.first_name.clone(),
                    last_name: from.last_name.clone(),
                    date_added: Utc::now(),
                };
                if let Err(err) = self.store.add_user(profile).await {
                    tracing::error!(user_id = from.user_id, %err, "failed to register user");
                }
            }
            Ok(true) => {}
            Err(err) => tracing::error!(user_id = from.user_id, %err, "user lookup failed"),
        }

        // Deep link from the group's "Verify me" button.
        if payload == Some("verify") {
            if let Err(err) = self
                .verification
                .begin_challenge(from.user_id, chat.chat_id)
                .await
            {
                tracing::error!(user_id = from.user_id, %err, "failed to issue challenge");
            }
            return;
        }

        let markup = ReplyMarkup::single_row(vec![InlineButton::url(
            "➕ Add to a group ➕",
            format!("https://t.me/{}?startgroup=true", self.bot.username),
        )]);
        let greeting = "🛡️ Welcome to <b>Guardy</b>! 🛡️\n\n\
            Guardy is a leading Telegram community assistant with focus on security & \
            seamless management\n\n\
            👥 <b>Top-Tier User Verification</b>: Streamlining the process to distinguish \
            real humans from bots.\n\n\
            🎣 <b>Scam & Phishing Prevention</b>: Proactively identifying and removing scam \
            and phishing attempts to protect your community members.\n\n\
            🚫 <b>Bot Fighting</b>: Detecting and removing unwanted bot activities ensuring \
            only authorized bots are allowed in the group.";
        if let Err(err) = self.chat.send_message(chat.chat_id, greeting, Some(markup)).await {
            tracing::warn!(chat_id = chat.chat_id, %err, "failed to send greeting");
        }
    }

    async fn cmd_config(&self, chat: &ChatInfo, from: &UserInfo) {
        if !self.require_group_admin(chat, from).await {
            return;
        }

        let config = match self.store.get_config(chat.chat_id).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                self.transient_warning(
                    chat.chat_id,
                    "No configuration found for this group.",
                    WARNING_LIFETIME,
                )
                .await;
                return;
            }
            Err(err) => {
                tracing::error!(group_id = chat.chat_id, %err, "config lookup failed");
                return;
            }
        };

        let report = format!(
            "🔧 <b>Group Configuration</b>\n\n\
             🔗 <b>Link Removal:</b> {}\n\
             🔀 <b>Forwarded Removal:</b> {}\n\
             👤 <b>Human Verification:</b> {}\n\
             🤖 <b>Bot Removal:</b> {}\n\
             🔊 <b>Antiflood:</b> {}",
            toggle_label(config.link_removal),
            toggle_label(config.forwarded_removal),
            verification_label(config.human_verification),
            toggle_label(config.bot_removal),
            antiflood_label(config.antiflood),
        );

        let sent = match self.chat.send_message(chat.chat_id, &report, None).await {
            Ok(sent) => sent,
            Err(err) => {
                tracing::warn!(group_id = chat.chat_id, %err, "failed to send config report");
                return;
            }
        };
        // The close button needs the report's own id, so the markup is
        // attached in a second pass.
        let markup = ReplyMarkup::rows(vec![
            vec![InlineButton::callback(
                "⚙️ Change settings",
                CallbackAction::SetupStart,
            )],
            vec![InlineButton::callback(
                "❌ Close",
                CallbackAction::Close {
                    message_id: sent.message_id,
                },
            )],
        ]);
        if let Err(err) = self
            .chat
            .edit_message_text(chat.chat_id, sent.message_id, &report, Some(markup))
            .await
        {
            tracing::warn!(group_id = chat.chat_id, %err, "failed to attach config buttons");
        }
    }

    async fn cmd_enable_disable(&self, chat: &ChatInfo, from: &UserInfo, enable: bool) {
        if !self.require_group_admin(chat, from).await {
            return;
        }
        if matches!(self.store.get_config(chat.chat_id).await, Ok(None)) {
            self.transient_warning(
                chat.chat_id,
                "No configuration found for this group.",
                WARNING_LIFETIME,
            )
            .await;
            return;
        }

        let (text, button_label, action) = if enable {
            (
                format!(
                    "✅ <b>Confirm Enable Guardy</b>\n\n\
                     Activating this feature will implement the highest level of security \
                     measures for <b>{}</b>.\n\n\
                     Use /config to manage & adjust the security settings manually at any time.",
                    chat.title
                ),
                "✅ Enable Guardy",
                CallbackAction::FullSecurity,
            )
        } else {
            (
                format!(
                    "🚫 <b>Confirm Disable Guardy</b>\n\n\
                     Disabling this feature will turn off all security functionalities for \
                     <b>{}</b>. Although Guardy will remain an admin in the group, it will \
                     stop active monitoring and protection.\n\n\
                     Use /enable to reactivate maximum security at any time.",
                    chat.title
                ),
                "🚫 Disable Guardy",
                CallbackAction::DisableAll,
            )
        };

        let sent = match self.chat.send_message(chat.chat_id, &text, None).await {
            Ok(sent) => sent,
            Err(err) => {
                tracing::warn!(group_id = chat.chat_id, %err, "failed to send confirmation");
                return;
            }
        };
        let markup = ReplyMarkup::rows(vec![
            vec![InlineButton::callback(button_label, action)],
            vec![InlineButton::callback(
                "❌ Close",
                CallbackAction::Close {
                    message_id: sent.message_id,
                },
            )],
        ]);
        if let Err(err) = self
            .chat
            .edit_message_text(chat.chat_id, sent.message_id, &text, Some(markup))
            .await
        {
            tracing::warn!(group_id = chat.chat_id, %err, "failed to attach buttons");
        }
    }

    async fn cmd_rules(&self, chat: &ChatInfo) {
        if !is_group(chat) {
            return;
        }
        let config = self.group_config(chat.chat_id).await;
        if !config.is_enabled() {
            return;
        }

        let mut rules = vec![format!("⚖️ <b>{} Chat Rules</b>\n", chat.title)];
        if config.link_removal.is_on() {
            rules.push("🔗 External links posted by non-admin members are removed.".into());
        }
        if config.forwarded_removal.is_on() {
            rules.push("🔀 Forwarded messages from non-admin members are removed.".into());
        }
        match config.human_verification {
            VerificationMode::Image => {
                rules.push("👤 New members verify through a CAPTCHA challenge.".into())
            }
            VerificationMode::Web => {
                rules.push("👤 New members verify through the verification web page.".into())
            }
            VerificationMode::No => {}
        }
        if config.bot_removal.is_on() {
            rules.push("🤖 Bots added by non-admin members are removed.".into());
        }
        if let AntifloodSetting::Limit(limit) = config.antiflood {
            rules.push(format!(
                "🔊 Sending more than {limit} messages every {FLOOD_WINDOW_SECS} seconds \
                 leads to a mute."
            ));
        }
        rules.push(format!(
            "\nP.S. Engage with kindness and uphold mutual respect, making <b>{}</b> \
             welcoming for all.",
            chat.title
        ));

        if let Ok(sent) = self
            .chat
            .send_message(chat.chat_id, &rules.join("\n"), None)
            .await
        {
            self.scheduler.delete_message_after(
                Arc::clone(&self.chat),
                chat.chat_id,
                sent.message_id,
                REPORT_LIFETIME,
            );
        }
    }

    async fn cmd_admin_list(&self, chat: &ChatInfo) {
        if !is_group(chat) {
            return;
        }
        let admins = match self.chat.administrators(chat.chat_id).await {
            Ok(admins) => admins,
            Err(err) => {
                tracing::warn!(group_id = chat.chat_id, %err, "failed to list administrators");
                return;
            }
        };
        let names: Vec<String> = admins
            .iter()
            .filter_map(|admin| admin.username.as_ref())
            .map(|name| format!("- @{name}"))
            .collect();
        let text = format!(
            "🧑‍💻 <b>Group Admins in {}</b>\n\nAdmins:\n{}",
            chat.title,
            names.join("\n")
        );
        if let Ok(sent) = self.chat.send_message(chat.chat_id, &text, None).await {
            self.scheduler.delete_message_after(
                Arc::clone(&self.chat),
                chat.chat_id,
                sent.message_id,
                REPORT_LIFETIME,
            );
        }
    }

    // ------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------

    async fn on_callback(
        &self,
        callback_id: &str,
        chat_id: i64,
        message_id: i64,
        reply_target_id: Option<i64>,
        from: &UserInfo,
        action: Option<CallbackAction>,
    ) {
        let action = match action {
            Some(action) => action,
            None => {
                // Unknown discriminator: acknowledge and drop.
                tracing::warn!(chat_id, user_id = from.user_id, "unknown callback payload");
                self.ack(callback_id, None, false).await;
                return;
            }
        };

        match action {
            CallbackAction::FullSecurity => {
                if !self.callback_admin_gate(callback_id, chat_id, from).await {
                    return;
                }
                self.commit_preset(
                    chat_id,
                    message_id,
                    GroupConfig::full_security(),
                    "🛡️ Guardy enabled maximum security for this group 🛡️",
                )
                .await;
                self.ack(callback_id, None, false).await;
            }
            CallbackAction::DisableAll => {
                if !self.callback_admin_gate(callback_id, chat_id, from).await {
                    return;
                }
                self.commit_preset(
                    chat_id,
                    message_id,
                    GroupConfig::all_off(),
                    "🚫 Guardy is now disabled!",
                )
                .await;
                self.ack(callback_id, None, false).await;
            }
            CallbackAction::SetupStart => {
                if !self.callback_admin_gate(callback_id, chat_id, from).await {
                    return;
                }
                let prompt = self.wizard.begin(chat_id, from.user_id);
                if let Err(err) = self
                    .chat
                    .edit_message_text(chat_id, message_id, &prompt.text, Some(prompt.markup))
                    .await
                {
                    tracing::warn!(chat_id, %err, "failed to render wizard step");
                }
                self.ack(callback_id, None, false).await;
            }
            CallbackAction::Setup(choice) => {
                if !self.callback_admin_gate(callback_id, chat_id, from).await {
                    return;
                }
                self.advance_wizard(chat_id, message_id, from.user_id, choice)
                    .await;
                self.ack(callback_id, None, false).await;
            }
            CallbackAction::Verify(verify) => {
                self.on_verify_callback(callback_id, chat_id, message_id, from, verify)
                    .await;
            }
            CallbackAction::Vote { scam } => {
                self.on_vote_callback(callback_id, chat_id, reply_target_id, from, scam)
                    .await;
            }
            CallbackAction::Close { message_id: target } => {
                if is_group_chat_id(chat_id)
                    && !self.callback_admin_gate(callback_id, chat_id, from).await
                {
                    return;
                }
                self.delete_silently(chat_id, target).await;
                self.ack(callback_id, None, false).await;
            }
        }
    }

    async fn advance_wizard(
        &self,
        chat_id: i64,
        message_id: i64,
        user_id: i64,
        choice: SetupChoice,
    ) {
        match self.wizard.advance(chat_id, user_id, choice) {
            WizardAdvance::Prompt(prompt) => {
                if let Err(err) = self
                    .chat
                    .edit_message_text(chat_id, message_id, &prompt.text, Some(prompt.markup))
                    .await
                {
                    tracing::warn!(chat_id, %err, "failed to render wizard step");
                }
            }
            WizardAdvance::Committed(config) => {
                self.commit_preset(
                    chat_id,
                    message_id,
                    config,
                    "🛡️ Your group is now under Guardy's protection! 🛡️",
                )
                .await;
            }
            WizardAdvance::Mismatch => {
                tracing::warn!(chat_id, user_id, "wizard choice out of step, dropped");
            }
        }
    }

    /// Persist a complete config as one unit and confirm transiently.
    async fn commit_preset(
        &self,
        chat_id: i64,
        message_id: i64,
        config: GroupConfig,
        confirmation: &str,
    ) {
        if let Err(err) = self
            .store
            .set_config(chat_id, GroupConfigPatch::full(config))
            .await
        {
            tracing::error!(group_id = chat_id, %err, "failed to persist config");
            return;
        }
        tracing::info!(group_id = chat_id, ?config, "group config committed");

        if let Err(err) = self
            .chat
            .edit_message_text(chat_id, message_id, confirmation, None)
            .await
        {
            tracing::warn!(group_id = chat_id, %err, "failed to confirm config change");
            return;
        }
        self.scheduler.delete_message_after(
            Arc::clone(&self.chat),
            chat_id,
            message_id,
            CONFIRMATION_LIFETIME,
        );
    }

    async fn on_verify_callback(
        &self,
        callback_id: &str,
        chat_id: i64,
        message_id: i64,
        from: &UserInfo,
        verify: VerifyAction,
    ) {
        let completion = match verify {
            VerifyAction::CaptchaRegenerate => {
                match self
                    .verification
                    .regenerate_captcha(from.user_id, chat_id)
                    .await
                {
                    Ok(RegenerateStatus::Regenerated) => {
                        self.ack(callback_id, None, false).await;
                    }
                    Ok(RegenerateStatus::Exhausted) => {
                        self.ack(callback_id, None, false).await;
                    }
                    Ok(RegenerateStatus::BackendFailed) => {
                        self.ack(
                            callback_id,
                            Some("Failed to regenerate CAPTCHA. Please try again later."),
                            true,
                        )
                        .await;
                    }
                    Ok(RegenerateStatus::NotInSession) => {
                        self.generic_verification_error(callback_id).await;
                    }
                    Err(err) => {
                        tracing::error!(user_id = from.user_id, %err, "captcha regeneration failed");
                        self.generic_verification_error(callback_id).await;
                    }
                }
                return;
            }
            VerifyAction::CaptchaCorrect => {
                self.verification
                    .complete(from.user_id, chat_id, message_id, ChallengeFlavor::Captcha, true)
                    .await
            }
            VerifyAction::CaptchaWrong => {
                self.verification
                    .complete(from.user_id, chat_id, message_id, ChallengeFlavor::Captcha, false)
                    .await
            }
            VerifyAction::WebCorrect => {
                self.verification
                    .complete(from.user_id, chat_id, message_id, ChallengeFlavor::Web, true)
                    .await
            }
            VerifyAction::WebWrong => {
                self.verification
                    .complete(from.user_id, chat_id, message_id, ChallengeFlavor::Web, false)
                    .await
            }
        };

        match completion {
            Ok(CompletionStatus::Completed) => self.ack(callback_id, None, false).await,
            Ok(CompletionStatus::NotInSession) => {
                tracing::warn!(user_id = from.user_id, "verification callback without session");
                self.generic_verification_error(callback_id).await;
            }
            Err(err) => {
                tracing::error!(user_id = from.user_id, %err, "verification completion failed");
                self.generic_verification_error(callback_id).await;
            }
        }
    }

    async fn on_vote_callback(
        &self,
        callback_id: &str,
        chat_id: i64,
        reply_target_id: Option<i64>,
        from: &UserInfo,
        scam: bool,
    ) {
        let flagged_message_id = match reply_target_id {
            Some(id) => id,
            None => {
                tracing::warn!(chat_id, "vote callback without a flagged message");
                self.ack(callback_id, None, false).await;
                return;
            }
        };

        match self
            .voting
            .cast_vote(chat_id, flagged_message_id, from.user_id, scam)
            .await
        {
            Ok(VoteResult::Accepted) => self.ack(callback_id, None, false).await,
            Ok(VoteResult::AlreadyVoted) => {
                self.ack(callback_id, Some("You've already voted!"), true).await
            }
            Ok(VoteResult::Closed) => {
                self.ack(callback_id, Some("Voting has already concluded!"), true)
                    .await
            }
            Err(err) => {
                tracing::error!(chat_id, %err, "failed to record vote");
                self.ack(callback_id, Some("Failed to process your vote."), false)
                    .await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    /// Effective config of a group; absence or a store fault reads as
    /// everything off.
    async fn group_config(&self, group_id: i64) -> GroupConfig {
        match self.store.get_config(group_id).await {
            Ok(Some(config)) => config,
            Ok(None) => GroupConfig::all_off(),
            Err(err) => {
                tracing::error!(group_id, %err, "config lookup failed");
                GroupConfig::all_off()
            }
        }
    }

    async fn cached_admin(
        &self,
        cache: &mut Option<Option<bool>>,
        chat_id: i64,
        user_id: i64,
    ) -> Option<bool> {
        if let Some(cached) = *cache {
            return cached;
        }
        let status = self.is_admin(chat_id, user_id).await;
        *cache = Some(status);
        status
    }

    /// `None` means the status could not be resolved; moderation actions
    /// skip rather than act on unknown standing.
    async fn is_admin(&self, chat_id: i64, user_id: i64) -> Option<bool> {
        match self.chat.member_status(chat_id, user_id).await {
            Ok(status) => Some(status.is_admin()),
            Err(err) => {
                tracing::warn!(chat_id, user_id, %err, "member status lookup failed");
                None
            }
        }
    }

    /// Command gate: group chats only, admins only (with a transient hint).
    async fn require_group_admin(&self, chat: &ChatInfo, from: &UserInfo) -> bool {
        if !is_group(chat) {
            self.transient_warning(
                chat.chat_id,
                "This command can only be used by <b>admins</b> in <b>groups</b> and \
                 <b>supergroups</b>!",
                PLAIN_WELCOME_LIFETIME,
            )
            .await;
            return false;
        }
        if self.is_admin(chat.chat_id, from.user_id).await != Some(true) {
            self.transient_warning(
                chat.chat_id,
                "Only <b>admins</b> can use this command!",
                PLAIN_WELCOME_LIFETIME,
            )
            .await;
            return false;
        }
        true
    }

    /// Callback gate: a non-admin press is answered but not acted upon.
    async fn callback_admin_gate(&self, callback_id: &str, chat_id: i64, from: &UserInfo) -> bool {
        if self.is_admin(chat_id, from.user_id).await == Some(true) {
            return true;
        }
        self.ack(callback_id, None, false).await;
        false
    }

    async fn remove_with_warning(&self, group_id: i64, message_id: i64, warning: &str) {
        if let Err(err) = self.chat.delete_message(group_id, message_id).await {
            tracing::warn!(group_id, message_id, %err, "failed to remove message");
        }
        self.transient_warning(group_id, warning, WARNING_LIFETIME).await;
    }

    async fn transient_warning(&self, chat_id: i64, text: &str, lifetime: Duration) {
        match self.chat.send_message(chat_id, text, None).await {
            Ok(sent) => {
                self.scheduler.delete_message_after(
                    Arc::clone(&self.chat),
                    chat_id,
                    sent.message_id,
                    lifetime,
                );
            }
            Err(err) => tracing::warn!(chat_id, %err, "failed to send warning"),
        }
    }

    async fn delete_silently(&self, chat_id: i64, message_id: i64) {
        if let Err(err) = self.chat.delete_message(chat_id, message_id).await {
            tracing::debug!(chat_id, message_id, %err, "message already gone");
        }
    }

    async fn generic_verification_error(&self, callback_id: &str) {
        self.ack(
            callback_id,
            Some("An error occurred during the verification process. Please try again."),
            false,
        )
        .await;
    }

    async fn ack(&self, callback_id: &str, text: Option<&str>, alert: bool) {
        if let Err(err) = self.chat.answer_callback(callback_id, text, alert).await {
            tracing::debug!(callback_id, %err, "failed to answer callback");
        }
    }
}

fn is_group(chat: &ChatInfo) -> bool {
    matches!(chat.chat_type.as_str(), "group" | "supergroup")
}

/// Group chat ids are negative on the wire; private chats are positive.
fn is_group_chat_id(chat_id: i64) -> bool {
    chat_id < 0
}

fn toggle_label(toggle: Toggle) -> &'static str {
    match toggle {
        Toggle::Yes => "yes",
        Toggle::No => "no",
    }
}

fn verification_label(mode: VerificationMode) -> &'static str {
    match mode {
        VerificationMode::No => "no",
        VerificationMode::Image => "image",
        VerificationMode::Web => "web",
    }
}

fn antiflood_label(setting: AntifloodSetting) -> String {
    match setting {
        AntifloodSetting::Off => "no".to_string(),
        AntifloodSetting::Limit(limit) => limit.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assistant::AssistantError;
    use crate::core::challenge::{Captcha, CaptchaBackend, ChallengeError};
    use crate::core::chat::testing::{ChatCall, RecordingChat};
    use crate::core::scam::{ScamLabel, ScamScore};
    use crate::infra::store::MemoryStore;
    use std::sync::Mutex;

    const GROUP: i64 = -77;
    const ADMIN: i64 = 11;
    const MEMBER: i64 = 22;
    const BOT_ID: i64 = 999;

    struct TestClassifier {
        score: Arc<Mutex<ScamScore>>,
    }

    #[async_trait::async_trait]
    impl ScamClassifier for TestClassifier {
        async fn score(&self, _text: &str) -> Result<ScamScore, crate::core::scam::ClassifierError> {
            Ok(*self.score.lock().unwrap())
        }
    }

    struct EchoAssistant;

    #[async_trait::async_trait]
    impl AssistantClient for EchoAssistant {
        async fn ask(&self, question: &str) -> Result<String, AssistantError> {
            Ok(format!("echo: {question}"))
        }
    }

    struct StubCaptcha;

    #[async_trait::async_trait]
    impl CaptchaBackend for StubCaptcha {
        async fn generate(&self) -> Result<Captcha, ChallengeError> {
            Ok(Captcha {
                image_png: vec![1, 2, 3],
                answer: 17,
            })
        }
    }

    struct Fixture {
        orchestrator: ModerationOrchestrator<MemoryStore, TestClassifier, EchoAssistant>,
        store: Arc<MemoryStore>,
        chat: Arc<RecordingChat>,
        score: Arc<Mutex<ScamScore>>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let chat = Arc::new(RecordingChat::new());
        let chat_api: Arc<dyn ChatApi> = Arc::clone(&chat) as Arc<dyn ChatApi>;
        let scheduler = Arc::new(Scheduler::new());
        let score = Arc::new(Mutex::new(ScamScore {
            label: ScamLabel::NotSpam,
            probability: 0.0,
        }));

        let verification = VerificationService::new(
            Arc::clone(&store),
            Arc::clone(&chat_api),
            Arc::new(StubCaptcha),
            Arc::clone(&scheduler),
            "https://t.me/guardy_bot".to_string(),
            "https://verify.example.org".to_string(),
        );
        let voting = Arc::new(VotingService::new(
            Arc::clone(&store),
            Arc::clone(&chat_api),
            Arc::clone(&scheduler),
        ));
        let orchestrator = ModerationOrchestrator::new(
            Arc::clone(&store),
            chat_api,
            scheduler,
            verification,
            voting,
            ScamAnalyzer::new(TestClassifier {
                score: Arc::clone(&score),
            }),
            AssistantService::new(EchoAssistant),
            BotIdentity {
                user_id: BOT_ID,
                username: "guardy_bot".to_string(),
            },
            HashSet::from([GROUP]),
        );
        chat.grant_admin(GROUP, ADMIN);
        Fixture {
            orchestrator,
            store,
            chat,
            score,
        }
    }

    fn group_info() -> ChatInfo {
        ChatInfo {
            chat_id: GROUP,
            title: "Rustaceans".to_string(),
            username: Some("rustaceans".to_string()),
            chat_type: "supergroup".to_string(),
        }
    }

    fn user(user_id: i64) -> UserInfo {
        UserInfo {
            user_id,
            username: Some(format!("user{user_id}")),
            first_name: "User".to_string(),
            last_name: None,
            is_bot: false,
        }
    }

    fn message(message_id: i64, from_user: i64, text: &str, has_link: bool) -> InboundEvent {
        InboundEvent::GroupMessage {
            group_id: GROUP,
            message_id,
            from: user(from_user),
            text: text.to_string(),
            has_link,
            is_forwarded: false,
        }
    }

    fn callback(from_user: i64, action: CallbackAction) -> InboundEvent {
        InboundEvent::CallbackPressed {
            callback_id: "cb".to_string(),
            chat_id: GROUP,
            message_id: 1,
            reply_target_id: None,
            from: user(from_user),
            action: Some(action),
        }
    }

    async fn set_config(fx: &Fixture, config: GroupConfig) {
        fx.store
            .set_config(GROUP, GroupConfigPatch::full(config))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn flooding_user_is_muted_on_the_eleventh_message() {
        let fx = fixture();
        let mut config = GroupConfig::all_off();
        config.antiflood = AntifloodSetting::Limit(10);
        set_config(&fx, config).await;

        for i in 0..11 {
            fx.orchestrator
                .handle_event(message(100 + i, MEMBER, "spam spam", false))
                .await;
        }

        let calls = fx.chat.calls();
        assert!(calls.contains(&ChatCall::Restrict {
            chat_id: GROUP,
            user_id: MEMBER,
            can_send: false,
            has_until: true,
        }));
        assert!(calls.iter().any(|call| matches!(
            call,
            ChatCall::SendMessage { chat_id: GROUP, text } if text.contains("Stop flooding")
        )));

        // The warning is transient: gone after its 30s lifetime.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(fx.chat.deletes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn link_removal_exempts_administrators() {
        let fx = fixture();
        let mut config = GroupConfig::all_off();
        config.link_removal = Toggle::Yes;
        set_config(&fx, config).await;

        fx.orchestrator
            .handle_event(message(100, ADMIN, "see https://rust-lang.org", true))
            .await;
        assert!(fx.chat.deletes().is_empty());

        fx.orchestrator
            .handle_event(message(101, MEMBER, "buy at https://scam.example", true))
            .await;
        assert_eq!(fx.chat.deletes(), vec![(GROUP, 101)]);
        assert!(fx.chat.calls().iter().any(|call| matches!(
            call,
            ChatCall::SendMessage { chat_id: GROUP, text } if text.contains("posting links")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn link_and_forward_checks_fire_independently_once_each() {
        let fx = fixture();
        let mut config = GroupConfig::all_off();
        config.link_removal = Toggle::Yes;
        config.forwarded_removal = Toggle::Yes;
        set_config(&fx, config).await;

        fx.orchestrator
            .handle_event(InboundEvent::GroupMessage {
                group_id: GROUP,
                message_id: 100,
                from: user(MEMBER),
                text: "fwd: https://scam.example".to_string(),
                has_link: true,
                is_forwarded: true,
            })
            .await;

        let warnings = fx
            .chat
            .calls()
            .iter()
            .filter(|call| {
                matches!(call, ChatCall::SendMessage { text, .. } if text.contains("not allowed"))
            })
            .count();
        assert_eq!(warnings, 2);
        assert_eq!(fx.chat.deletes(), vec![(GROUP, 100), (GROUP, 100)]);
    }

    #[tokio::test(start_paused = true)]
    async fn bot_addition_registers_group_and_offers_setup() {
        let fx = fixture();
        let bot_member = UserInfo {
            user_id: BOT_ID,
            username: Some("guardy_bot".to_string()),
            first_name: "Guardy".to_string(),
            last_name: None,
            is_bot: true,
        };
        fx.orchestrator
            .handle_event(InboundEvent::MembersJoined {
                chat: group_info(),
                added_by: user(ADMIN),
                members: vec![bot_member],
                service_message_id: 5,
            })
            .await;

        assert!(fx.store.group_exists(GROUP).await.unwrap());
        assert!(fx.chat.calls().iter().any(|call| matches!(
            call,
            ChatCall::SendMessage { chat_id: GROUP, text } if text.contains("Full Security")
        )));
        // The join service message is cleaned up.
        assert!(fx.chat.deletes().contains(&(GROUP, 5)));
    }

    #[tokio::test(start_paused = true)]
    async fn external_bot_added_by_non_admin_is_kicked() {
        let fx = fixture();
        let mut config = GroupConfig::all_off();
        config.bot_removal = Toggle::Yes;
        set_config(&fx, config).await;

        let intruder = UserInfo {
            user_id: 555,
            username: Some("spambot".to_string()),
            first_name: "Spam".to_string(),
            last_name: None,
            is_bot: true,
        };
        fx.orchestrator
            .handle_event(InboundEvent::MembersJoined {
                chat: group_info(),
                added_by: user(MEMBER),
                members: vec![intruder.clone()],
                service_message_id: 5,
            })
            .await;
        assert!(fx.chat.calls().contains(&ChatCall::Kick {
            chat_id: GROUP,
            user_id: 555,
        }));

        // The same bot added by an admin stays.
        fx.orchestrator
            .handle_event(InboundEvent::MembersJoined {
                chat: group_info(),
                added_by: user(ADMIN),
                members: vec![intruder],
                service_message_id: 6,
            })
            .await;
        let kicks = fx
            .chat
            .calls()
            .iter()
            .filter(|call| matches!(call, ChatCall::Kick { .. }))
            .count();
        assert_eq!(kicks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_security_preset_is_admin_gated() {
        let fx = fixture();

        fx.orchestrator
            .handle_event(callback(MEMBER, CallbackAction::FullSecurity))
            .await;
        assert_eq!(fx.store.get_config(GROUP).await.unwrap(), None);

        fx.orchestrator
            .handle_event(callback(ADMIN, CallbackAction::FullSecurity))
            .await;
        assert_eq!(
            fx.store.get_config(GROUP).await.unwrap(),
            Some(GroupConfig::full_security())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wizard_walkthrough_commits_one_unit() {
        let fx = fixture();

        fx.orchestrator
            .handle_event(callback(ADMIN, CallbackAction::SetupStart))
            .await;
        for choice in [
            SetupChoice::LinkRemoval(Toggle::Yes),
            SetupChoice::ForwardedRemoval(Toggle::Yes),
            SetupChoice::Verification(VerificationMode::Image),
            SetupChoice::BotRemoval(Toggle::No),
        ] {
            fx.orchestrator
                .handle_event(callback(ADMIN, CallbackAction::Setup(choice)))
                .await;
            // Nothing persisted until the final step.
            assert_eq!(fx.store.get_config(GROUP).await.unwrap(), None);
        }
        fx.orchestrator
            .handle_event(callback(
                ADMIN,
                CallbackAction::Setup(SetupChoice::Antiflood(AntifloodSetting::Limit(3))),
            ))
            .await;

        let config = fx.store.get_config(GROUP).await.unwrap().unwrap();
        assert!(config.is_enabled());
        assert_eq!(config.link_removal, Toggle::Yes);
        assert_eq!(config.human_verification, VerificationMode::Image);
        assert_eq!(config.antiflood, AntifloodSetting::Limit(3));
        assert!(fx.chat.calls().iter().any(|call| matches!(
            call,
            ChatCall::EditText { text, .. } if text.contains("under Guardy's protection")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn scam_alert_opens_vote_and_majority_concludes_it() {
        let fx = fixture();
        *fx.score.lock().unwrap() = ScamScore {
            label: ScamLabel::Spam,
            probability: 0.75,
        };

        fx.orchestrator
            .handle_event(message(555, MEMBER, "You won $1.000.000, claim now!", false))
            .await;

        // Alert (id 1000) replies to the flagged message.
        assert!(fx.chat.calls().iter().any(|call| matches!(
            call,
            ChatCall::SendReply { chat_id: GROUP, reply_to: 555, text }
                if text.contains("SCAM ALERT") && text.contains("75.0%")
        )));

        for (voter, scam) in [(1, true), (2, true), (3, true), (4, false)] {
            fx.orchestrator
                .handle_event(InboundEvent::CallbackPressed {
                    callback_id: format!("vote{voter}"),
                    chat_id: GROUP,
                    message_id: 1000,
                    reply_target_id: Some(555),
                    from: user(voter),
                    action: Some(CallbackAction::Vote { scam }),
                })
                .await;
        }
        // A duplicate vote is answered with an alert and not counted.
        fx.orchestrator
            .handle_event(InboundEvent::CallbackPressed {
                callback_id: "dup".to_string(),
                chat_id: GROUP,
                message_id: 1000,
                reply_target_id: Some(555),
                from: user(1),
                action: Some(CallbackAction::Vote { scam: true }),
            })
            .await;
        assert!(fx.chat.calls().iter().any(|call| matches!(
            call,
            ChatCall::AnswerCallback { text: Some(text), show_alert: true, .. }
                if text.contains("already voted")
        )));

        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert!(fx.chat.deletes().contains(&(GROUP, 555)));
        assert!(fx.chat.calls().iter().any(|call| matches!(
            call,
            ChatCall::EditText { message_id: 1000, text, .. } if text.contains("75%")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn greeting_spam_is_deboosted_below_the_alert_threshold() {
        let fx = fixture();
        *fx.score.lock().unwrap() = ScamScore {
            label: ScamLabel::Spam,
            probability: 0.7,
        };

        fx.orchestrator
            .handle_event(message(556, MEMBER, "hello friends, claim your prize", false))
            .await;
        assert!(!fx
            .chat
            .calls()
            .iter()
            .any(|call| matches!(call, ChatCall::SendReply { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn mention_in_premium_group_is_answered() {
        let fx = fixture();
        fx.orchestrator
            .handle_event(message(600, MEMBER, "@guardy_bot who are you?", false))
            .await;

        let calls = fx.chat.calls();
        assert!(calls.iter().any(|call| matches!(
            call,
            ChatCall::SendReply { reply_to: 600, text, .. } if text.contains("mind palace")
        )));
        assert!(calls.iter().any(|call| matches!(
            call,
            ChatCall::EditText { text, .. } if text.contains("echo: who are you?")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_callback_is_acknowledged_and_dropped() {
        let fx = fixture();
        fx.orchestrator
            .handle_event(InboundEvent::CallbackPressed {
                callback_id: "mystery".to_string(),
                chat_id: GROUP,
                message_id: 1,
                reply_target_id: None,
                from: user(MEMBER),
                action: CallbackAction::parse("cmd_cb_totally_new"),
            })
            .await;

        let calls = fx.chat.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(
            &calls[0],
            ChatCall::AnswerCallback { callback_id, .. } if callback_id == "mystery"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn member_join_with_image_verification_restricts_and_records() {
        let fx = fixture();
        let mut config = GroupConfig::all_off();
        config.human_verification = VerificationMode::Image;
        set_config(&fx, config).await;

        fx.orchestrator
            .handle_event(InboundEvent::MembersJoined {
                chat: group_info(),
                added_by: user(MEMBER),
                members: vec![user(33)],
                service_message_id: 5,
            })
            .await;

        assert!(fx
            .store
            .get_verification(33, GROUP)
            .await
            .unwrap()
            .is_some());
        assert!(fx.chat.calls().contains(&ChatCall::Restrict {
            chat_id: GROUP,
            user_id: 33,
            can_send: false,
            has_until: false,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn bot_removal_from_group_drops_its_records() {
        let fx = fixture();
        set_config(&fx, GroupConfig::full_security()).await;

        fx.orchestrator
            .handle_event(InboundEvent::BotMembershipChanged {
                group_id: GROUP,
                removed: true,
            })
            .await;
        assert_eq!(fx.store.get_config(GROUP).await.unwrap(), None);
        assert!(!fx.store.group_exists(GROUP).await.unwrap());
    }
}
