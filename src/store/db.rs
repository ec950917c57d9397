//! PostgreSQL-backed store for scheduled messages and Slack credentials.
//!
//! Tables:
//! - `slack_credentials`: one token pair per linked user
//! - `scheduled_messages`: messages with a token snapshot and delivery status

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::models::{
    Credential, CredentialUpsert, MessageRecord, MessageStatus, NewMessage,
};
use super::MessageStore;
use crate::error::AppError;

const MESSAGE_COLUMNS: &str = "id, user_id, access_token, refresh_token, channel, text, \
                               send_at, status, created_at, updated_at";

const CREDENTIAL_COLUMNS: &str = "user_id, access_token, refresh_token, bot_user_id, \
                                  team_id, scope, created_at, updated_at";

/// Message store backed by PostgreSQL.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn new(db_url: &str) -> Result<Self, AppError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(db_url)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to PostgreSQL: {e}")))?;

        Ok(Self { pool })
    }

    /// Run schema migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS slack_credentials (
                user_id         TEXT PRIMARY KEY,
                access_token    TEXT NOT NULL,
                refresh_token   TEXT,
                bot_user_id     TEXT,
                team_id         TEXT,
                scope           TEXT,
                created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_messages (
                id              UUID PRIMARY KEY,
                user_id         TEXT NOT NULL,
                access_token    TEXT NOT NULL,
                refresh_token   TEXT,
                channel         TEXT NOT NULL,
                text            TEXT NOT NULL,
                send_at         TIMESTAMPTZ NOT NULL,
                status          TEXT NOT NULL DEFAULT 'scheduled',
                created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_scheduled_messages_due ON scheduled_messages(send_at) WHERE status = 'scheduled'"
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_scheduled_messages_user ON scheduled_messages(user_id, status)"
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn message_from_row(row: &PgRow) -> Result<MessageRecord, AppError> {
    let status: String = row.try_get("status")?;
    let status = MessageStatus::parse(&status)
        .ok_or_else(|| AppError::Database(format!("unknown message status '{status}'")))?;

    Ok(MessageRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        access_token: row.try_get("access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        channel: row.try_get("channel")?,
        text: row.try_get("text")?,
        send_at: row.try_get("send_at")?,
        status,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn credential_from_row(row: &PgRow) -> Result<Credential, AppError> {
    Ok(Credential {
        user_id: row.try_get("user_id")?,
        access_token: row.try_get("access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        bot_user_id: row.try_get("bot_user_id")?,
        team_id: row.try_get("team_id")?,
        scope: row.try_get("scope")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl MessageStore for PgStore {
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<MessageRecord>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM scheduled_messages \
             WHERE status = 'scheduled' AND send_at <= $1 \
             ORDER BY send_at"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Scan(e.to_string()))?;

        rows.iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Scan(e.to_string()))
    }

    async fn find_message(&self, id: Uuid) -> Result<Option<MessageRecord>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM scheduled_messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(message_from_row).transpose()
    }

    async fn list_scheduled(&self, user_id: &str) -> Result<Vec<MessageRecord>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM scheduled_messages \
             WHERE user_id = $1 AND status = 'scheduled' \
             ORDER BY send_at"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn create_message(&self, msg: NewMessage) -> Result<MessageRecord, AppError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO scheduled_messages
                (id, user_id, access_token, refresh_token, channel, text, send_at, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'scheduled')
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&msg.user_id)
        .bind(&msg.access_token)
        .bind(&msg.refresh_token)
        .bind(&msg.channel)
        .bind(&msg.text)
        .bind(msg.send_at)
        .fetch_one(&self.pool)
        .await?;

        message_from_row(&row)
    }

    async fn update_message(&self, record: &MessageRecord) -> Result<(), AppError> {
        let affected = sqlx::query(
            r#"
            UPDATE scheduled_messages
            SET status = $1,
                access_token = $2,
                updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(record.status.as_str())
        .bind(&record.access_token)
        .bind(record.id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(AppError::NotFound("message".into()));
        }

        Ok(())
    }

    async fn delete_message(&self, id: Uuid) -> Result<(), AppError> {
        let affected = sqlx::query("DELETE FROM scheduled_messages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if affected == 0 {
            return Err(AppError::NotFound("message".into()));
        }

        Ok(())
    }

    async fn find_credential(&self, user_id: &str) -> Result<Option<Credential>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM slack_credentials WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(credential_from_row).transpose()
    }

    async fn upsert_credential(&self, cred: &CredentialUpsert) -> Result<Credential, AppError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO slack_credentials
                (user_id, access_token, refresh_token, bot_user_id, team_id, scope)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id)
            DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = COALESCE(EXCLUDED.refresh_token, slack_credentials.refresh_token),
                bot_user_id = EXCLUDED.bot_user_id,
                team_id = EXCLUDED.team_id,
                scope = EXCLUDED.scope,
                updated_at = NOW()
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        ))
        .bind(&cred.user_id)
        .bind(&cred.access_token)
        .bind(&cred.refresh_token)
        .bind(&cred.bot_user_id)
        .bind(&cred.team_id)
        .bind(&cred.scope)
        .fetch_one(&self.pool)
        .await?;

        credential_from_row(&row)
    }

    async fn update_access_token(
        &self,
        user_id: &str,
        access_token: &str,
    ) -> Result<(), AppError> {
        let affected = sqlx::query(
            "UPDATE slack_credentials SET access_token = $1, updated_at = NOW() WHERE user_id = $2",
        )
        .bind(access_token)
        .bind(user_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(AppError::NotFound("credential".into()));
        }

        Ok(())
    }
}
