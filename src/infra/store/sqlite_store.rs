// SQLite implementation of the persistence ports.
//
// Column-per-field layout; the voter set is stored as a JSON array, the way
// other list-shaped fields are persisted here. Voter insertion and the
// conclusion take run inside transactions to keep the port's atomicity
// guarantees.

use crate::core::config::{
    AntifloodSetting, ConfigStore, DirectoryStore, GroupConfig, GroupConfigPatch, GroupProfile,
    GuardyStatus, StoreError, Toggle, UserProfile, VerificationMode,
};
use crate::core::verification::{VerificationRecord, VerificationStore};
use crate::core::voting::{VoterInsert, VotingRecord, VotingStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashSet;
use std::path::Path;

pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure the file exists if it's a file path
        let path_str = database_url.trim_start_matches("sqlite://");
        if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let pool = SqlitePoolOptions::new().connect(&conn_str).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS group_configs (
                group_id INTEGER PRIMARY KEY,
                guardy_status TEXT,
                link_removal TEXT,
                forwarded_removal TEXT,
                human_verification TEXT,
                bot_removal TEXT,
                antiflood TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS groups (
                group_id INTEGER PRIMARY KEY,
                chat_title TEXT NOT NULL,
                chat_username TEXT,
                chat_type TEXT NOT NULL,
                added_by INTEGER NOT NULL,
                date_added TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                first_name TEXT NOT NULL,
                last_name TEXT,
                date_added TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS verifications (
                user_id INTEGER NOT NULL,
                group_id INTEGER NOT NULL,
                group_title TEXT NOT NULL,
                group_username TEXT,
                welcome_message_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, group_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scam_votes (
                group_id INTEGER NOT NULL,
                message_id INTEGER NOT NULL,
                alert_message_id INTEGER NOT NULL,
                vote_yes INTEGER NOT NULL DEFAULT 0,
                vote_no INTEGER NOT NULL DEFAULT 0,
                voters TEXT NOT NULL DEFAULT '[]',
                PRIMARY KEY (group_id, message_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn backend_err(err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn toggle_to_text(toggle: Toggle) -> &'static str {
    match toggle {
        Toggle::Yes => "yes",
        Toggle::No => "no",
    }
}

fn toggle_from_text(text: Option<String>) -> Toggle {
    match text.as_deref() {
        Some("yes") => Toggle::Yes,
        _ => Toggle::No,
    }
}

fn verification_to_text(mode: VerificationMode) -> &'static str {
    match mode {
        VerificationMode::No => "no",
        VerificationMode::Image => "image",
        VerificationMode::Web => "web",
    }
}

fn verification_from_text(text: Option<String>) -> VerificationMode {
    match text.as_deref() {
        Some("image") => VerificationMode::Image,
        Some("web") => VerificationMode::Web,
        _ => VerificationMode::No,
    }
}

fn antiflood_to_text(setting: AntifloodSetting) -> String {
    match setting {
        AntifloodSetting::Off => "no".to_string(),
        AntifloodSetting::Limit(limit) => limit.to_string(),
    }
}

fn antiflood_from_text(text: Option<String>) -> AntifloodSetting {
    match text.as_deref() {
        Some("no") | None => AntifloodSetting::Off,
        Some(limit) => limit
            .parse()
            .map(AntifloodSetting::Limit)
            .unwrap_or(AntifloodSetting::Off),
    }
}

#[async_trait]
impl ConfigStore for SqliteStore {
    async fn get_config(&self, group_id: i64) -> Result<Option<GroupConfig>, StoreError> {
        let row = sqlx::query("SELECT * FROM group_configs WHERE group_id = ?")
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;

        Ok(row.map(|row| GroupConfig {
            guardy_status: match row.get::<Option<String>, _>("guardy_status").as_deref() {
                Some("enabled") => GuardyStatus::Enabled,
                _ => GuardyStatus::Disabled,
            },
            link_removal: toggle_from_text(row.get("link_removal")),
            forwarded_removal: toggle_from_text(row.get("forwarded_removal")),
            human_verification: verification_from_text(row.get("human_verification")),
            bot_removal: toggle_from_text(row.get("bot_removal")),
            antiflood: antiflood_from_text(row.get("antiflood")),
        }))
    }

    async fn set_config(&self, group_id: i64, patch: GroupConfigPatch) -> Result<(), StoreError> {
        // COALESCE keeps the stored value wherever the patch carries NULL,
        // giving merge semantics in a single upsert.
        sqlx::query(
            r#"
            INSERT INTO group_configs
                (group_id, guardy_status, link_removal, forwarded_removal,
                 human_verification, bot_removal, antiflood)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(group_id) DO UPDATE SET
                guardy_status = COALESCE(excluded.guardy_status, guardy_status),
                link_removal = COALESCE(excluded.link_removal, link_removal),
                forwarded_removal = COALESCE(excluded.forwarded_removal, forwarded_removal),
                human_verification = COALESCE(excluded.human_verification, human_verification),
                bot_removal = COALESCE(excluded.bot_removal, bot_removal),
                antiflood = COALESCE(excluded.antiflood, antiflood)
            "#,
        )
        .bind(group_id)
        .bind(patch.guardy_status.map(|status| match status {
            GuardyStatus::Enabled => "enabled",
            GuardyStatus::Disabled => "disabled",
        }))
        .bind(patch.link_removal.map(toggle_to_text))
        .bind(patch.forwarded_removal.map(toggle_to_text))
        .bind(patch.human_verification.map(verification_to_text))
        .bind(patch.bot_removal.map(toggle_to_text))
        .bind(patch.antiflood.map(antiflood_to_text))
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn delete_config(&self, group_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM group_configs WHERE group_id = ?")
            .bind(group_id)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }
}

#[async_trait]
impl DirectoryStore for SqliteStore {
    async fn group_exists(&self, group_id: i64) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM groups WHERE group_id = ?")
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(row.is_some())
    }

    async fn add_group(&self, profile: GroupProfile) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO groups (group_id, chat_title, chat_username, chat_type, added_by, date_added)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(group_id) DO NOTHING
            "#,
        )
        .bind(profile.group_id)
        .bind(&profile.chat_title)
        .bind(&profile.chat_username)
        .bind(&profile.chat_type)
        .bind(profile.added_by)
        .bind(profile.date_added)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn delete_group(&self, group_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM groups WHERE group_id = ?")
            .bind(group_id)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn user_exists(&self, user_id: i64) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(row.is_some())
    }

    async fn add_user(&self, profile: UserProfile) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, username, first_name, last_name, date_added)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO NOTHING
            "#,
        )
        .bind(profile.user_id)
        .bind(&profile.username)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(profile.date_added)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }
}

#[async_trait]
impl VerificationStore for SqliteStore {
    async fn get_verification(
        &self,
        user_id: i64,
        group_id: i64,
    ) -> Result<Option<VerificationRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM verifications WHERE user_id = ? AND group_id = ?")
            .bind(user_id)
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;

        Ok(row.map(|row| VerificationRecord {
            user_id: row.get("user_id"),
            group_id: row.get("group_id"),
            group_title: row.get("group_title"),
            group_username: row.get("group_username"),
            welcome_message_id: row.get("welcome_message_id"),
            kind: verification_from_text(row.get("kind")),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
        }))
    }

    async fn put_verification(&self, record: VerificationRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO verifications
                (user_id, group_id, group_title, group_username, welcome_message_id,
                 kind, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.user_id)
        .bind(record.group_id)
        .bind(&record.group_title)
        .bind(&record.group_username)
        .bind(record.welcome_message_id)
        .bind(verification_to_text(record.kind))
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn delete_verification(&self, user_id: i64, group_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM verifications WHERE user_id = ? AND group_id = ?")
            .bind(user_id)
            .bind(group_id)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }
}

fn voters_from_json(json: &str) -> Result<HashSet<i64>, StoreError> {
    serde_json::from_str(json).map_err(backend_err)
}

#[async_trait]
impl VotingStore for SqliteStore {
    async fn vote_init(
        &self,
        group_id: i64,
        message_id: i64,
        alert_message_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scam_votes (group_id, message_id, alert_message_id)
            VALUES (?, ?, ?)
            ON CONFLICT(group_id, message_id) DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(message_id)
        .bind(alert_message_id)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn vote_add_voter(
        &self,
        group_id: i64,
        message_id: i64,
        user_id: i64,
    ) -> Result<VoterInsert, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        let row = sqlx::query("SELECT voters FROM scam_votes WHERE group_id = ? AND message_id = ?")
            .bind(group_id)
            .bind(message_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend_err)?;

        let voters_json: String = match row {
            Some(row) => row.get("voters"),
            None => return Ok(VoterInsert::NoRecord),
        };
        let mut voters = voters_from_json(&voters_json)?;
        if !voters.insert(user_id) {
            return Ok(VoterInsert::AlreadyVoted);
        }

        let updated = serde_json::to_string(&voters).map_err(backend_err)?;
        sqlx::query("UPDATE scam_votes SET voters = ? WHERE group_id = ? AND message_id = ?")
            .bind(updated)
            .bind(group_id)
            .bind(message_id)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        tx.commit().await.map_err(backend_err)?;
        Ok(VoterInsert::Added)
    }

    async fn vote_has_voted(
        &self,
        group_id: i64,
        message_id: i64,
        user_id: i64,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT voters FROM scam_votes WHERE group_id = ? AND message_id = ?")
            .bind(group_id)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        match row {
            Some(row) => {
                let voters = voters_from_json(&row.get::<String, _>("voters"))?;
                Ok(voters.contains(&user_id))
            }
            None => Ok(false),
        }
    }

    async fn vote_increment(
        &self,
        group_id: i64,
        message_id: i64,
        yes: bool,
    ) -> Result<(), StoreError> {
        let column = if yes { "vote_yes" } else { "vote_no" };
        sqlx::query(&format!(
            "UPDATE scam_votes SET {column} = {column} + 1 WHERE group_id = ? AND message_id = ?"
        ))
        .bind(group_id)
        .bind(message_id)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn vote_take(
        &self,
        group_id: i64,
        message_id: i64,
    ) -> Result<Option<VotingRecord>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        let row = sqlx::query("SELECT * FROM scam_votes WHERE group_id = ? AND message_id = ?")
            .bind(group_id)
            .bind(message_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend_err)?;

        let record = match row {
            Some(row) => VotingRecord {
                group_id: row.get("group_id"),
                message_id: row.get("message_id"),
                alert_message_id: row.get("alert_message_id"),
                vote_yes: row.get::<i64, _>("vote_yes") as u32,
                vote_no: row.get::<i64, _>("vote_no") as u32,
                voters: voters_from_json(&row.get::<String, _>("voters"))?,
            },
            None => return Ok(None),
        };

        sqlx::query("DELETE FROM scam_votes WHERE group_id = ? AND message_id = ?")
            .bind(group_id)
            .bind(message_id)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        tx.commit().await.map_err(backend_err)?;
        Ok(Some(record))
    }
}
