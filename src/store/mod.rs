//! Message and credential persistence.
//!
//! `PgStore` is the production backend; `MemoryStore` serves tests and
//! `DATABASE_URL=memory` local runs.

pub mod db;
pub mod memory;
pub mod models;

pub use db::PgStore;
pub use memory::MemoryStore;
pub use models::{
    Credential, CredentialUpsert, MessageInfo, MessageRecord, MessageStatus, NewMessage,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;

/// Storage operations over message records and the per-user credentials
/// they are sent with.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// All `scheduled` records with `send_at <= now`, oldest first.
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<MessageRecord>, AppError>;

    /// A single record by id.
    async fn find_message(&self, id: Uuid) -> Result<Option<MessageRecord>, AppError>;

    /// `scheduled` records owned by `user_id`, ordered by `send_at`.
    async fn list_scheduled(&self, user_id: &str) -> Result<Vec<MessageRecord>, AppError>;

    /// Insert a new `scheduled` record.
    async fn create_message(&self, msg: NewMessage) -> Result<MessageRecord, AppError>;

    /// Persist `status` and `access_token` of an existing record.
    async fn update_message(&self, record: &MessageRecord) -> Result<(), AppError>;

    /// Delete a record. `NotFound` if the id is unknown.
    async fn delete_message(&self, id: Uuid) -> Result<(), AppError>;

    /// The credential for `user_id`, if the user has linked Slack.
    async fn find_credential(&self, user_id: &str) -> Result<Option<Credential>, AppError>;

    /// Insert or update a credential. A missing refresh token keeps the stored one.
    async fn upsert_credential(&self, cred: &CredentialUpsert) -> Result<Credential, AppError>;

    /// Replace the access token of an existing credential.
    async fn update_access_token(&self, user_id: &str, access_token: &str)
        -> Result<(), AppError>;
}
