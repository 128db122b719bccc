// Community scam voting - time-boxed consensus per flagged message.
//
// A voting record lives for exactly one decision window. `conclude` runs off
// an atomic take (read-and-delete) on the store, so a conclusion racing a
// late vote resolves to exactly one of "vote counted" or "vote ignored" -
// never both, never neither.

use crate::core::chat::ChatApi;
use crate::core::config::StoreError;
use crate::core::scheduler::{Scheduler, TaskKey};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Length of the community decision window.
pub const VOTE_WINDOW: Duration = Duration::from_secs(60);
/// How long the conclusion announcement stays up.
const ANNOUNCEMENT_LIFETIME: Duration = Duration::from_secs(10);

/// Tally for one flagged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VotingRecord {
    pub group_id: i64,
    pub message_id: i64,
    pub alert_message_id: i64,
    pub vote_yes: u32,
    pub vote_no: u32,
    pub voters: HashSet<i64>,
}

impl VotingRecord {
    pub fn opened(group_id: i64, message_id: i64, alert_message_id: i64) -> Self {
        Self {
            group_id,
            message_id,
            alert_message_id,
            vote_yes: 0,
            vote_no: 0,
            voters: HashSet::new(),
        }
    }
}

/// Result of the atomic voter-set insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoterInsert {
    Added,
    AlreadyVoted,
    /// No open record for the key (window already concluded).
    NoRecord,
}

/// Persistence port for voting records.
#[async_trait]
pub trait VotingStore: Send + Sync {
    /// Create a zero-tally record; no-op when one already exists.
    async fn vote_init(
        &self,
        group_id: i64,
        message_id: i64,
        alert_message_id: i64,
    ) -> Result<(), StoreError>;

    /// Atomic compare-and-insert into the voter set.
    async fn vote_add_voter(
        &self,
        group_id: i64,
        message_id: i64,
        user_id: i64,
    ) -> Result<VoterInsert, StoreError>;

    async fn vote_has_voted(
        &self,
        group_id: i64,
        message_id: i64,
        user_id: i64,
    ) -> Result<bool, StoreError>;

    async fn vote_increment(
        &self,
        group_id: i64,
        message_id: i64,
        yes: bool,
    ) -> Result<(), StoreError>;

    /// Atomically read and delete the record, if still present.
    async fn vote_take(
        &self,
        group_id: i64,
        message_id: i64,
    ) -> Result<Option<VotingRecord>, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteResult {
    Accepted,
    AlreadyVoted,
    /// The window already closed; the vote is ignored.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    NoVotes,
    ScamConfirmed { yes_percent: u32 },
    ScamRejected { no_percent: u32 },
    Tie,
}

pub struct VotingService<S: VotingStore> {
    store: Arc<S>,
    chat: Arc<dyn ChatApi>,
    scheduler: Arc<Scheduler>,
}

impl<S: VotingStore + 'static> VotingService<S> {
    pub fn new(store: Arc<S>, chat: Arc<dyn ChatApi>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            store,
            chat,
            scheduler,
        }
    }

    /// Open a voting window and schedule its single conclusion.
    pub async fn open(
        self: &Arc<Self>,
        group_id: i64,
        message_id: i64,
        alert_message_id: i64,
    ) -> Result<(), StoreError> {
        self.store
            .vote_init(group_id, message_id, alert_message_id)
            .await?;

        let service = Arc::clone(self);
        self.scheduler.schedule(
            TaskKey::ConcludeVote {
                group_id,
                message_id,
            },
            VOTE_WINDOW,
            async move {
                match service.conclude(group_id, message_id).await {
                    Ok(Some(outcome)) => {
                        tracing::info!(group_id, message_id, ?outcome, "scam vote concluded")
                    }
                    Ok(None) => {
                        tracing::debug!(group_id, message_id, "vote already concluded")
                    }
                    Err(err) => {
                        tracing::error!(group_id, message_id, %err, "vote conclusion failed")
                    }
                }
            },
        );
        Ok(())
    }

    /// Record one user's vote, at most once per user.
    pub async fn cast_vote(
        &self,
        group_id: i64,
        message_id: i64,
        user_id: i64,
        is_scam: bool,
    ) -> Result<VoteResult, StoreError> {
        match self
            .store
            .vote_add_voter(group_id, message_id, user_id)
            .await?
        {
            VoterInsert::AlreadyVoted => Ok(VoteResult::AlreadyVoted),
            VoterInsert::NoRecord => Ok(VoteResult::Closed),
            VoterInsert::Added => {
                self.store
                    .vote_increment(group_id, message_id, is_scam)
                    .await?;
                Ok(VoteResult::Accepted)
            }
        }
    }

    /// Close the window and act on the tally. Returns `None` when another
    /// caller already concluded this vote.
    pub async fn conclude(
        &self,
        group_id: i64,
        message_id: i64,
    ) -> Result<Option<VoteOutcome>, StoreError> {
        let record = match self.store.vote_take(group_id, message_id).await? {
            Some(record) => record,
            None => return Ok(None),
        };

        let total = record.vote_yes + record.vote_no;
        let alert_id = record.alert_message_id;

        if total == 0 {
            // Nobody cared; drop the alert without an announcement.
            if let Err(err) = self.chat.delete_message(group_id, alert_id).await {
                tracing::warn!(group_id, alert_id, %err, "failed to delete stale alert");
            }
            return Ok(Some(VoteOutcome::NoVotes));
        }

        let outcome = if record.vote_yes > record.vote_no {
            let yes_percent = percent(record.vote_yes, total);
            if let Err(err) = self.chat.delete_message(group_id, message_id).await {
                tracing::warn!(group_id, message_id, %err, "failed to delete voted-out message");
            }
            self.announce(
                group_id,
                alert_id,
                &format!(
                    "🛡️ {yes_percent}% of voters found this message as a scam. \
                     Thanks for keeping the community secure! 🛡️"
                ),
            )
            .await;
            VoteOutcome::ScamConfirmed { yes_percent }
        } else if record.vote_no > record.vote_yes {
            let no_percent = percent(record.vote_no, total);
            self.announce(
                group_id,
                alert_id,
                &format!(
                    "🛡️ {no_percent}% found this message NOT to be a scam. \
                     Thanks for staying aware! 🛡️"
                ),
            )
            .await;
            VoteOutcome::ScamRejected { no_percent }
        } else {
            self.announce(
                group_id,
                alert_id,
                "Voting concluded. Action taken based on community decision.",
            )
            .await;
            VoteOutcome::Tie
        };

        Ok(Some(outcome))
    }

    async fn announce(&self, group_id: i64, alert_message_id: i64, text: &str) {
        if let Err(err) = self
            .chat
            .edit_message_text(group_id, alert_message_id, text, None)
            .await
        {
            tracing::warn!(group_id, alert_message_id, %err, "failed to edit vote alert");
            return;
        }
        self.scheduler.delete_message_after(
            Arc::clone(&self.chat),
            group_id,
            alert_message_id,
            ANNOUNCEMENT_LIFETIME,
        );
    }
}

/// Share of `part` in `total` votes, rounded to the nearest integer.
fn percent(part: u32, total: u32) -> u32 {
    (f64::from(part) / f64::from(total) * 100.0).round() as u32
}
