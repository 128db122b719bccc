// Human verification - the per-(user, group) challenge state machine.
//
// States: AwaitingJoin -> ChallengeIssued -> {Verified, Failed}. The
// persisted record marks the pending span; the in-memory session carries the
// challenge state and the message ids to clean up. The image and web flavors
// differ only in how the challenge is issued and how the answer arrives;
// both funnel into `complete`.

use super::verification_models::{SessionStore, UserSession, VerificationRecord};
use crate::core::challenge::{
    shuffled_options, Captcha, CaptchaBackend, ChallengeState, CAPTCHA_OPTION_RANGE, OPTION_COUNT,
    WEB_OPTION_RANGE,
};
use crate::core::chat::{ChatApi, ChatError, InlineButton, ReplyMarkup};
use crate::core::config::{StoreError, VerificationMode};
use crate::core::events::{CallbackAction, ChatInfo, UserInfo, VerifyAction};
use crate::core::scheduler::Scheduler;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// How long the success/failure confirmation stays in the private chat.
const CONFIRMATION_LIFETIME: Duration = Duration::from_secs(60);

const CAPTCHA_CAPTION: &str = "🔒 Solve the CAPTCHA below to verify that you're a human. \
    \n\nPlease note: You can regenerate CAPTCHA only 3x times.";

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Chat(#[from] ChatError),
}

/// Persistence port for pending verifications.
#[async_trait]
pub trait VerificationStore: Send + Sync {
    async fn get_verification(
        &self,
        user_id: i64,
        group_id: i64,
    ) -> Result<Option<VerificationRecord>, StoreError>;

    /// Upsert; a new join supersedes any previous pending record.
    async fn put_verification(&self, record: VerificationRecord) -> Result<(), StoreError>;

    async fn delete_verification(&self, user_id: i64, group_id: i64) -> Result<(), StoreError>;
}

/// Which delivery mechanism produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeFlavor {
    Captcha,
    Web,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Completed,
    /// No pending verification matched the caller.
    NotInSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerateStatus {
    Regenerated,
    /// The regeneration budget is spent; the press came from a stale button.
    Exhausted,
    NotInSession,
    BackendFailed,
}

pub struct VerificationService<S: VerificationStore> {
    store: Arc<S>,
    chat: Arc<dyn ChatApi>,
    captcha: Arc<dyn CaptchaBackend>,
    scheduler: Arc<Scheduler>,
    sessions: SessionStore,
    /// Deep link opening the bot's private chat with the verify payload.
    verify_link: String,
    /// Externally hosted interactive verification page.
    web_app_url: String,
}

impl<S: VerificationStore> VerificationService<S> {
    pub fn new(
        store: Arc<S>,
        chat: Arc<dyn ChatApi>,
        captcha: Arc<dyn CaptchaBackend>,
        scheduler: Arc<Scheduler>,
        verify_link: String,
        web_app_url: String,
    ) -> Self {
        Self {
            store,
            chat,
            captcha,
            scheduler,
            sessions: SessionStore::new(),
            verify_link,
            web_app_url,
        }
    }

    /// AwaitingJoin entry: a non-bot member joined a group that requires
    /// verification. Sends the welcome prompt, persists the pending record
    /// and restricts the member until a terminal outcome.
    pub async fn start_verification(
        &self,
        chat_info: &ChatInfo,
        member: &UserInfo,
        kind: VerificationMode,
    ) -> Result<(), VerificationError> {
        let group_id = chat_info.chat_id;
        let markup = ReplyMarkup::single_row(vec![InlineButton::url(
            "Verify me",
            format!("{}?start=verify", self.verify_link),
        )]);
        let welcome = self
            .chat
            .send_message(
                group_id,
                &format!("Welcome {}! Please verify yourself!", member.display_handle()),
                Some(markup),
            )
            .await?;

        self.store
            .put_verification(VerificationRecord {
                group_id,
                user_id: member.user_id,
                group_title: chat_info.title.clone(),
                group_username: chat_info.username.clone(),
                welcome_message_id: welcome.message_id,
                kind,
                created_at: Utc::now(),
            })
            .await?;

        self.sessions.update(member.user_id, |session| {
            *session = UserSession {
                pending_group_id: Some(group_id),
                welcome_message_id: Some(welcome.message_id),
                ..UserSession::default()
            };
        });

        if let Err(err) = self
            .chat
            .restrict_member(group_id, member.user_id, false, None)
            .await
        {
            tracing::warn!(group_id, user_id = member.user_id, %err, "failed to restrict joining member");
        }
        Ok(())
    }

    /// ChallengeIssued entry: the user asked to be verified from the private
    /// chat. Returns `false` when no verification is pending for them.
    pub async fn begin_challenge(
        &self,
        user_id: i64,
        private_chat_id: i64,
    ) -> Result<bool, VerificationError> {
        let record = match self.pending_record(user_id).await? {
            Some(record) => record,
            None => return Ok(false),
        };

        match record.kind {
            VerificationMode::Image => self.issue_captcha(user_id, private_chat_id).await?,
            VerificationMode::Web => {
                let prompt = self
                    .chat
                    .send_message(
                        private_chat_id,
                        "🔒 For verification press the menu button below:",
                        Some(ReplyMarkup::WebAppKeyboard {
                            label: "🔒 Verification 🔒".to_string(),
                            url: self.web_app_url.clone(),
                        }),
                    )
                    .await?;
                self.sessions.update(user_id, |session| {
                    session.verification_prompt_id = Some(prompt.message_id);
                });
            }
            // The group dropped verification after the join; nothing to ask.
            VerificationMode::No => {}
        }
        Ok(true)
    }

    async fn issue_captcha(
        &self,
        user_id: i64,
        private_chat_id: i64,
    ) -> Result<(), VerificationError> {
        let captcha = match self.captcha.generate().await {
            Ok(captcha) => captcha,
            Err(err) => {
                tracing::error!(user_id, %err, "captcha generation failed");
                self.chat
                    .send_message(
                        private_chat_id,
                        "Failed to generate CAPTCHA. Please try again later.",
                        None,
                    )
                    .await?;
                return Ok(());
            }
        };

        let options = shuffled_options(captcha.answer, OPTION_COUNT, CAPTCHA_OPTION_RANGE);
        let markup = captcha_markup(&options, captcha.answer, true);
        let prompt = self
            .chat
            .send_photo(private_chat_id, &captcha.image_png, CAPTCHA_CAPTION, Some(markup))
            .await?;

        self.sessions.update(user_id, |session| {
            session.challenge = Some(ChallengeState::issued(
                captcha.answer,
                options,
                prompt.message_id,
            ));
        });
        Ok(())
    }

    /// ChallengeIssued self-transition: swap in a fresh puzzle, preserving
    /// the regeneration counter.
    pub async fn regenerate_captcha(
        &self,
        user_id: i64,
        private_chat_id: i64,
    ) -> Result<RegenerateStatus, VerificationError> {
        let challenge = match self.sessions.get(user_id).and_then(|s| s.challenge) {
            Some(challenge) => challenge,
            None => return Ok(RegenerateStatus::NotInSession),
        };
        if !challenge.can_regenerate() {
            return Ok(RegenerateStatus::Exhausted);
        }

        let Captcha { image_png, answer } = match self.captcha.generate().await {
            Ok(captcha) => captcha,
            Err(err) => {
                tracing::error!(user_id, %err, "captcha regeneration failed");
                return Ok(RegenerateStatus::BackendFailed);
            }
        };

        let options = shuffled_options(answer, OPTION_COUNT, CAPTCHA_OPTION_RANGE);
        let next = challenge.regenerated(answer, options);
        let markup = captcha_markup(&next.options, next.answer, next.can_regenerate());
        self.chat
            .edit_message_media(
                private_chat_id,
                next.prompt_message_id,
                &image_png,
                CAPTCHA_CAPTION,
                Some(markup),
            )
            .await?;

        self.sessions.update(user_id, |session| {
            session.challenge = Some(next);
        });
        Ok(RegenerateStatus::Regenerated)
    }

    /// The web page reported the number it displayed; ask the user to
    /// confirm it among decoys. Funnels into the same complete() transition.
    pub async fn handle_web_payload(
        &self,
        user_id: i64,
        private_chat_id: i64,
        payload: &str,
    ) -> Result<(), VerificationError> {
        let shown: Option<u32> = serde_json::from_str::<serde_json::Value>(payload)
            .ok()
            .and_then(|value| value.get("randomNumber").and_then(|n| n.as_u64()))
            .map(|n| n as u32);

        let shown = match shown {
            Some(shown) => shown,
            None => {
                tracing::warn!(user_id, "malformed web verification payload");
                self.chat
                    .send_message(
                        private_chat_id,
                        "Failed to process web verification data. Please try again.",
                        None,
                    )
                    .await?;
                return Ok(());
            }
        };

        let options = shuffled_options(shown, OPTION_COUNT, WEB_OPTION_RANGE);
        let rows = options
            .iter()
            .map(|&option| {
                let action = if option == shown {
                    VerifyAction::WebCorrect
                } else {
                    VerifyAction::WebWrong
                };
                vec![InlineButton::callback(
                    option.to_string(),
                    CallbackAction::Verify(action),
                )]
            })
            .collect();
        self.chat
            .send_message(
                private_chat_id,
                "🔒 Confirm you're human by selecting the correct number that was displayed \
                 in the app. \n\nPlease select:",
                Some(ReplyMarkup::rows(rows)),
            )
            .await?;
        Ok(())
    }

    /// Terminal transition. Deletes the pending record, lifts or keeps the
    /// restriction, sends the confirmation and tears the prompts down.
    pub async fn complete(
        &self,
        user_id: i64,
        private_chat_id: i64,
        origin_message_id: i64,
        flavor: ChallengeFlavor,
        correct: bool,
    ) -> Result<CompletionStatus, VerificationError> {
        let session = self.sessions.get(user_id).unwrap_or_default();
        let record = match self.pending_record(user_id).await? {
            Some(record) => record,
            None => return Ok(CompletionStatus::NotInSession),
        };

        let welcome_message_id = session
            .welcome_message_id
            .unwrap_or(record.welcome_message_id);

        // The record goes first: whatever fails afterwards, this attempt is
        // terminal and a rejoin starts a fresh one.
        self.store
            .delete_verification(user_id, record.group_id)
            .await?;

        if let Err(err) = self
            .chat
            .restrict_member(record.group_id, user_id, correct, None)
            .await
        {
            tracing::warn!(group_id = record.group_id, user_id, %err, "failed to update restriction");
        }

        let (text, markup) = if correct {
            let markup = record.group_username.as_ref().map(|username| {
                ReplyMarkup::single_row(vec![InlineButton::url(
                    "Back to the group",
                    format!("https://t.me/{username}"),
                )])
            });
            (
                format!(
                    "✅ <b>VERIFICATION COMPLETE</b> ✅\n\nYou can now chat in the \
                     <b>{}</b> group!",
                    record.group_title
                ),
                markup,
            )
        } else {
            (
                format!(
                    "❌ <b>VERIFICATION FAILED</b> ❌\n\nYou cannot chat in the {} group.\n\n\
                     Please contact the group admins directly or leave the group and try again...",
                    record.group_title
                ),
                None,
            )
        };

        let confirmation_id = match flavor {
            ChallengeFlavor::Web => {
                self.chat
                    .edit_message_text(private_chat_id, origin_message_id, &text, markup)
                    .await?;
                origin_message_id
            }
            ChallengeFlavor::Captcha => {
                self.chat
                    .send_message(private_chat_id, &text, markup)
                    .await?
                    .message_id
            }
        };

        if let Err(err) = self
            .chat
            .delete_message(record.group_id, welcome_message_id)
            .await
        {
            tracing::warn!(group_id = record.group_id, %err, "failed to delete welcome prompt");
        }

        let prompt_id = match flavor {
            ChallengeFlavor::Captcha => session.challenge.map(|c| c.prompt_message_id),
            ChallengeFlavor::Web => session.verification_prompt_id,
        };
        if let Some(prompt_id) = prompt_id {
            if prompt_id != confirmation_id {
                self.scheduler.delete_message_after(
                    Arc::clone(&self.chat),
                    private_chat_id,
                    prompt_id,
                    Duration::ZERO,
                );
            }
        }
        self.scheduler.delete_message_after(
            Arc::clone(&self.chat),
            private_chat_id,
            confirmation_id,
            CONFIRMATION_LIFETIME,
        );

        self.sessions.remove(user_id);
        Ok(CompletionStatus::Completed)
    }

    async fn pending_record(
        &self,
        user_id: i64,
    ) -> Result<Option<VerificationRecord>, StoreError> {
        let group_id = match self.sessions.get(user_id).and_then(|s| s.pending_group_id) {
            Some(group_id) => group_id,
            None => return Ok(None),
        };
        self.store.get_verification(user_id, group_id).await
    }
}

fn captcha_markup(options: &[u32], answer: u32, include_regenerate: bool) -> ReplyMarkup {
    let option_row = options
        .iter()
        .map(|&option| {
            let action = if option == answer {
                VerifyAction::CaptchaCorrect
            } else {
                VerifyAction::CaptchaWrong
            };
            InlineButton::callback(option.to_string(), CallbackAction::Verify(action))
        })
        .collect();

    let mut rows = vec![option_row];
    if include_regenerate {
        rows.push(vec![InlineButton::callback(
            "Regenerate 🔁",
            CallbackAction::Verify(VerifyAction::CaptchaRegenerate),
        )]);
    }
    ReplyMarkup::rows(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::challenge::ChallengeError;
    use crate::core::chat::testing::{ChatCall, RecordingChat};
    use crate::core::chat::ButtonAction;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct MockVerificationStore {
        records: DashMap<(i64, i64), VerificationRecord>,
    }

    #[async_trait]
    impl VerificationStore for MockVerificationStore {
        async fn get_verification(
            &self,
            user_id: i64,
            group_id: i64,
        ) -> Result<Option<VerificationRecord>, StoreError> {
            Ok(self
                .records
                .get(&(user_id, group_id))
                .map(|entry| entry.clone()))
        }

        async fn put_verification(&self, record: VerificationRecord) -> Result<(), StoreError> {
            self.records
                .insert((record.user_id, record.group_id), record);
            Ok(())
        }

        async fn delete_verification(
            &self,
            user_id: i64,
            group_id: i64,
        ) -> Result<(), StoreError> {
            self.records.remove(&(user_id, group_id));
            Ok(())
        }
    }

    struct FixedCaptcha {
        fail: AtomicBool,
    }

    impl FixedCaptcha {
        fn working() -> Self {
            Self {
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl CaptchaBackend for FixedCaptcha {
        async fn generate(&self) -> Result<Captcha, ChallengeError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ChallengeError::Backend("render backend down".into()));
            }
            Ok(Captcha {
                image_png: vec![0x89, 0x50, 0x4e, 0x47],
                answer: 42,
            })
        }
    }

    struct Fixture {
        service: VerificationService<MockVerificationStore>,
        store: Arc<MockVerificationStore>,
        chat: Arc<RecordingChat>,
        captcha: Arc<FixedCaptcha>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MockVerificationStore::default());
        let chat = Arc::new(RecordingChat::new());
        let captcha = Arc::new(FixedCaptcha::working());
        let service = VerificationService::new(
            Arc::clone(&store),
            Arc::clone(&chat) as Arc<dyn ChatApi>,
            Arc::clone(&captcha) as Arc<dyn CaptchaBackend>,
            Arc::new(Scheduler::new()),
            "https://t.me/guardy_bot".to_string(),
            "https://verify.example.org".to_string(),
        );
        Fixture {
            service,
            store,
            chat,
            captcha,
        }
    }

    fn group() -> ChatInfo {
        ChatInfo {
            chat_id: -500,
            title: "Rustaceans".to_string(),
            username: Some("rustaceans".to_string()),
            chat_type: "supergroup".to_string(),
        }
    }

    fn member(user_id: i64) -> UserInfo {
        UserInfo {
            user_id,
            username: Some("newcomer".to_string()),
            first_name: "New".to_string(),
            last_name: None,
            is_bot: false,
        }
    }

    async fn joined(fx: &Fixture, user_id: i64) {
        fx.service
            .start_verification(&group(), &member(user_id), VerificationMode::Image)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn join_restricts_persists_and_welcomes() {
        let fx = fixture();
        joined(&fx, 7).await;

        assert!(fx.store.records.contains_key(&(7, -500)));
        let calls = fx.chat.calls();
        assert!(calls.iter().any(|call| matches!(
            call,
            ChatCall::SendMessage { chat_id: -500, text } if text.contains("Welcome @newcomer")
        )));
        assert!(calls.contains(&ChatCall::Restrict {
            chat_id: -500,
            user_id: 7,
            can_send: false,
            has_until: false,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn correct_captcha_answer_runs_the_full_success_path() {
        let fx = fixture();
        joined(&fx, 7).await;
        assert!(fx.service.begin_challenge(7, 700).await.unwrap());

        // RecordingChat hands out sequential ids: welcome 1000, photo 1001.
        assert!(fx
            .chat
            .calls()
            .iter()
            .any(|call| matches!(call, ChatCall::SendPhoto { .. })));
        let prompt_id = 1001;

        let status = fx
            .service
            .complete(7, 700, prompt_id, ChallengeFlavor::Captcha, true)
            .await
            .unwrap();
        assert_eq!(status, CompletionStatus::Completed);

        // Record is gone and the restriction lifted.
        assert!(!fx.store.records.contains_key(&(7, -500)));
        let calls = fx.chat.calls();
        assert!(calls.contains(&ChatCall::Restrict {
            chat_id: -500,
            user_id: 7,
            can_send: true,
            has_until: false,
        }));
        assert!(calls.iter().any(|call| matches!(
            call,
            ChatCall::SendMessage { chat_id: 700, text } if text.contains("VERIFICATION COMPLETE")
        )));
        // Welcome prompt removed from the group right away.
        assert!(fx.chat.deletes().contains(&(-500, 1000)));

        // Challenge prompt deleted immediately, confirmation only after 60s.
        let private_deletes = |chat: &RecordingChat| {
            chat.deletes()
                .iter()
                .filter(|&&(chat_id, _)| chat_id == 700)
                .count()
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(fx.chat.deletes().contains(&(700, prompt_id)));
        assert_eq!(private_deletes(&fx.chat), 1);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(private_deletes(&fx.chat), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_answer_keeps_the_restriction() {
        let fx = fixture();
        joined(&fx, 7).await;
        fx.service.begin_challenge(7, 700).await.unwrap();

        let status = fx
            .service
            .complete(7, 700, 1001, ChallengeFlavor::Captcha, false)
            .await
            .unwrap();
        assert_eq!(status, CompletionStatus::Completed);

        let calls = fx.chat.calls();
        assert!(calls.contains(&ChatCall::Restrict {
            chat_id: -500,
            user_id: 7,
            can_send: false,
            has_until: false,
        }));
        assert!(calls.iter().any(|call| matches!(
            call,
            ChatCall::SendMessage { chat_id: 700, text } if text.contains("VERIFICATION FAILED")
        )));
        assert!(!fx.store.records.contains_key(&(7, -500)));
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_session_answer_is_reported() {
        let fx = fixture();
        let status = fx
            .service
            .complete(99, 700, 1, ChallengeFlavor::Captcha, true)
            .await
            .unwrap();
        assert_eq!(status, CompletionStatus::NotInSession);
    }

    #[tokio::test(start_paused = true)]
    async fn captcha_backend_failure_degrades_to_retry_prompt() {
        let fx = fixture();
        joined(&fx, 7).await;
        fx.captcha.fail.store(true, Ordering::SeqCst);

        assert!(fx.service.begin_challenge(7, 700).await.unwrap());
        let calls = fx.chat.calls();
        assert!(!calls.iter().any(|call| matches!(call, ChatCall::SendPhoto { .. })));
        assert!(calls.iter().any(|call| matches!(
            call,
            ChatCall::SendMessage { chat_id: 700, text } if text.contains("try again later")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn regeneration_budget_is_three() {
        let fx = fixture();
        joined(&fx, 7).await;
        fx.service.begin_challenge(7, 700).await.unwrap();

        for _ in 0..3 {
            assert_eq!(
                fx.service.regenerate_captcha(7, 700).await.unwrap(),
                RegenerateStatus::Regenerated
            );
        }
        assert_eq!(
            fx.service.regenerate_captcha(7, 700).await.unwrap(),
            RegenerateStatus::Exhausted
        );

        // After the last allowed regeneration the markup lost its
        // regenerate row.
        let markup = fx.chat.last_markup.lock().unwrap().clone();
        match markup {
            Some(ReplyMarkup::Inline(rows)) => {
                assert_eq!(rows.len(), 1, "regenerate row must be withdrawn");
                assert_eq!(rows[0].len(), OPTION_COUNT);
            }
            other => panic!("unexpected markup: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn web_payload_produces_options_with_one_correct_button() {
        let fx = fixture();
        fx.service
            .handle_web_payload(7, 700, r#"{"randomNumber": 58}"#)
            .await
            .unwrap();

        let markup = fx.chat.last_markup.lock().unwrap().clone();
        let rows = match markup {
            Some(ReplyMarkup::Inline(rows)) => rows,
            other => panic!("unexpected markup: {other:?}"),
        };
        assert_eq!(rows.len(), OPTION_COUNT);
        let correct_buttons = rows
            .iter()
            .flatten()
            .filter(|button| {
                matches!(
                    button.action,
                    ButtonAction::Callback(CallbackAction::Verify(VerifyAction::WebCorrect))
                )
            })
            .count();
        assert_eq!(correct_buttons, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_web_payload_gets_a_retry_prompt() {
        let fx = fixture();
        fx.service
            .handle_web_payload(7, 700, "not json at all")
            .await
            .unwrap();
        assert!(fx.chat.calls().iter().any(|call| matches!(
            call,
            ChatCall::SendMessage { chat_id: 700, text } if text.contains("Please try again")
        )));
    }
}
