// In-memory implementation of the persistence ports.
//
// Backs tests and single-node deployments that can afford to lose state on
// restart. DashMap entry locking gives the atomicity the ports require
// (upsert-safe creation, compare-and-insert voters, take-and-delete).

use crate::core::config::{
    ConfigStore, DirectoryStore, GroupConfig, GroupConfigPatch, GroupProfile, StoreError,
    UserProfile,
};
use crate::core::verification::{VerificationRecord, VerificationStore};
use crate::core::voting::{VoterInsert, VotingRecord, VotingStore};
use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Default)]
pub struct MemoryStore {
    configs: DashMap<i64, GroupConfig>,
    groups: DashMap<i64, GroupProfile>,
    users: DashMap<i64, UserProfile>,
    /// Keyed (user_id, group_id).
    verifications: DashMap<(i64, i64), VerificationRecord>,
    /// Keyed (group_id, message_id).
    votes: DashMap<(i64, i64), VotingRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get_config(&self, group_id: i64) -> Result<Option<GroupConfig>, StoreError> {
        Ok(self.configs.get(&group_id).map(|entry| *entry))
    }

    async fn set_config(&self, group_id: i64, patch: GroupConfigPatch) -> Result<(), StoreError> {
        let mut entry = self
            .configs
            .entry(group_id)
            .or_insert_with(GroupConfig::all_off);
        *entry = patch.apply_to(*entry);
        Ok(())
    }

    async fn delete_config(&self, group_id: i64) -> Result<(), StoreError> {
        self.configs.remove(&group_id);
        Ok(())
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn group_exists(&self, group_id: i64) -> Result<bool, StoreError> {
        Ok(self.groups.contains_key(&group_id))
    }

    async fn add_group(&self, profile: GroupProfile) -> Result<(), StoreError> {
        self.groups.entry(profile.group_id).or_insert(profile);
        Ok(())
    }

    async fn delete_group(&self, group_id: i64) -> Result<(), StoreError> {
        self.groups.remove(&group_id);
        Ok(())
    }

    async fn user_exists(&self, user_id: i64) -> Result<bool, StoreError> {
        Ok(self.users.contains_key(&user_id))
    }

    async fn add_user(&self, profile: UserProfile) -> Result<(), StoreError> {
        self.users.entry(profile.user_id).or_insert(profile);
        Ok(())
    }
}

#[async_trait]
impl VerificationStore for MemoryStore {
    async fn get_verification(
        &self,
        user_id: i64,
        group_id: i64,
    ) -> Result<Option<VerificationRecord>, StoreError> {
        Ok(self
            .verifications
            .get(&(user_id, group_id))
            .map(|entry| entry.clone()))
    }

    async fn put_verification(&self, record: VerificationRecord) -> Result<(), StoreError> {
        self.verifications
            .insert((record.user_id, record.group_id), record);
        Ok(())
    }

    async fn delete_verification(&self, user_id: i64, group_id: i64) -> Result<(), StoreError> {
        self.verifications.remove(&(user_id, group_id));
        Ok(())
    }
}

#[async_trait]
impl VotingStore for MemoryStore {
    async fn vote_init(
        &self,
        group_id: i64,
        message_id: i64,
        alert_message_id: i64,
    ) -> Result<(), StoreError> {
        self.votes
            .entry((group_id, message_id))
            .or_insert_with(|| VotingRecord::opened(group_id, message_id, alert_message_id));
        Ok(())
    }

    async fn vote_add_voter(
        &self,
        group_id: i64,
        message_id: i64,
        user_id: i64,
    ) -> Result<VoterInsert, StoreError> {
        match self.votes.get_mut(&(group_id, message_id)) {
            Some(mut record) => {
                if record.voters.insert(user_id) {
                    Ok(VoterInsert::Added)
                } else {
                    Ok(VoterInsert::AlreadyVoted)
                }
            }
            None => Ok(VoterInsert::NoRecord),
        }
    }

    async fn vote_has_voted(
        &self,
        group_id: i64,
        message_id: i64,
        user_id: i64,
    ) -> Result<bool, StoreError> {
        Ok(self
            .votes
            .get(&(group_id, message_id))
            .map(|record| record.voters.contains(&user_id))
            .unwrap_or(false))
    }

    async fn vote_increment(
        &self,
        group_id: i64,
        message_id: i64,
        yes: bool,
    ) -> Result<(), StoreError> {
        if let Some(mut record) = self.votes.get_mut(&(group_id, message_id)) {
            if yes {
                record.vote_yes += 1;
            } else {
                record.vote_no += 1;
            }
        }
        Ok(())
    }

    async fn vote_take(
        &self,
        group_id: i64,
        message_id: i64,
    ) -> Result<Option<VotingRecord>, StoreError> {
        Ok(self
            .votes
            .remove(&(group_id, message_id))
            .map(|(_, record)| record))
    }
}
