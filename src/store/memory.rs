//! In-process store. Used by tests and by `DATABASE_URL=memory` runs;
//! nothing survives a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{
    Credential, CredentialUpsert, MessageRecord, MessageStatus, NewMessage,
};
use super::MessageStore;
use crate::error::AppError;

#[derive(Default)]
pub struct MemoryStore {
    messages: RwLock<HashMap<Uuid, MessageRecord>>,
    credentials: RwLock<HashMap<String, Credential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of message records currently held, regardless of status.
    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

fn sorted_by_send_at(mut records: Vec<MessageRecord>) -> Vec<MessageRecord> {
    records.sort_by_key(|r| r.send_at);
    records
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<MessageRecord>, AppError> {
        let messages = self.messages.read().await;
        let due = messages.values().filter(|r| r.is_due(now)).cloned().collect();
        Ok(sorted_by_send_at(due))
    }

    async fn find_message(&self, id: Uuid) -> Result<Option<MessageRecord>, AppError> {
        Ok(self.messages.read().await.get(&id).cloned())
    }

    async fn list_scheduled(&self, user_id: &str) -> Result<Vec<MessageRecord>, AppError> {
        let messages = self.messages.read().await;
        let scheduled = messages
            .values()
            .filter(|r| r.user_id == user_id && r.status == MessageStatus::Scheduled)
            .cloned()
            .collect();
        Ok(sorted_by_send_at(scheduled))
    }

    async fn create_message(&self, msg: NewMessage) -> Result<MessageRecord, AppError> {
        let now = Utc::now();
        let record = MessageRecord {
            id: Uuid::new_v4(),
            user_id: msg.user_id,
            access_token: msg.access_token,
            refresh_token: msg.refresh_token,
            channel: msg.channel,
            text: msg.text,
            send_at: msg.send_at,
            status: MessageStatus::Scheduled,
            created_at: now,
            updated_at: now,
        };
        self.messages.write().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_message(&self, record: &MessageRecord) -> Result<(), AppError> {
        let mut messages = self.messages.write().await;
        let stored = messages
            .get_mut(&record.id)
            .ok_or_else(|| AppError::NotFound("message".into()))?;

        stored.status = record.status;
        stored.access_token = record.access_token.clone();
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_message(&self, id: Uuid) -> Result<(), AppError> {
        self.messages
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound("message".into()))
    }

    async fn find_credential(&self, user_id: &str) -> Result<Option<Credential>, AppError> {
        Ok(self.credentials.read().await.get(user_id).cloned())
    }

    async fn upsert_credential(&self, cred: &CredentialUpsert) -> Result<Credential, AppError> {
        let now = Utc::now();
        let mut credentials = self.credentials.write().await;

        let entry = credentials
            .entry(cred.user_id.clone())
            .or_insert_with(|| Credential {
                user_id: cred.user_id.clone(),
                access_token: String::new(),
                refresh_token: None,
                bot_user_id: None,
                team_id: None,
                scope: None,
                created_at: now,
                updated_at: now,
            });

        entry.access_token = cred.access_token.clone();
        if cred.refresh_token.is_some() {
            entry.refresh_token = cred.refresh_token.clone();
        }
        entry.bot_user_id = cred.bot_user_id.clone();
        entry.team_id = cred.team_id.clone();
        entry.scope = cred.scope.clone();
        entry.updated_at = now;

        Ok(entry.clone())
    }

    async fn update_access_token(
        &self,
        user_id: &str,
        access_token: &str,
    ) -> Result<(), AppError> {
        let mut credentials = self.credentials.write().await;
        let cred = credentials
            .get_mut(user_id)
            .ok_or_else(|| AppError::NotFound("credential".into()))?;

        cred.access_token = access_token.to_string();
        cred.updated_at = Utc::now();
        Ok(())
    }
}
