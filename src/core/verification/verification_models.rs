// Verification domain types and the in-memory user session table.

use crate::core::challenge::ChallengeState;
use crate::core::config::VerificationMode;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// One pending verification per (user, group).
///
/// Presence of the record IS the pending state: it is created when a member
/// joins a group requiring verification and deleted on any terminal outcome.
/// (The original data model carried a `verified` flag that was never set
/// true; verification status is modeled purely by record presence instead.)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub group_id: i64,
    pub user_id: i64,
    pub group_title: String,
    pub group_username: Option<String>,
    pub welcome_message_id: i64,
    pub kind: VerificationMode,
    pub created_at: DateTime<Utc>,
}

/// Per-user transient state replacing the ambient per-user scratch map:
/// which group the user is verifying for and which messages to clean up.
/// Created when a verification flow is triggered, destroyed on any terminal
/// transition, lost on restart (forcing re-verification).
#[derive(Debug, Clone, Default)]
pub struct UserSession {
    pub pending_group_id: Option<i64>,
    pub welcome_message_id: Option<i64>,
    /// Web flavor: the message carrying the verification keyboard.
    pub verification_prompt_id: Option<i64>,
    pub challenge: Option<ChallengeState>,
}

/// Session table keyed by user id.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<i64, UserSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: i64) -> Option<UserSession> {
        self.sessions.get(&user_id).map(|entry| entry.clone())
    }

    pub fn update(&self, user_id: i64, mutate: impl FnOnce(&mut UserSession)) {
        let mut entry = self.sessions.entry(user_id).or_default();
        mutate(&mut entry);
    }

    pub fn remove(&self, user_id: i64) -> Option<UserSession> {
        self.sessions.remove(&user_id).map(|(_, session)| session)
    }
}
