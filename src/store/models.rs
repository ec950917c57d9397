use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery state of a message. Moves only from `Scheduled` to `Sent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Scheduled,
    Sent,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Scheduled => "scheduled",
            MessageStatus::Sent => "sent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(MessageStatus::Scheduled),
            "sent" => Some(MessageStatus::Sent),
            _ => None,
        }
    }
}

/// A message waiting for (or done with) delivery to a Slack channel.
///
/// Carries a snapshot of the owner's tokens taken when it was scheduled; the
/// runner writes a refreshed access token back here after a successful retry.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub id: Uuid,
    pub user_id: String,
    pub access_token: String,
    /// Snapshot only. Refreshes always read the credential's refresh token.
    pub refresh_token: Option<String>,
    pub channel: String,
    pub text: String,
    pub send_at: DateTime<Utc>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Eligible for delivery at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == MessageStatus::Scheduled && self.send_at <= now
    }
}

/// Input for creating a message record. Always created `scheduled`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub channel: String,
    pub text: String,
    pub send_at: DateTime<Utc>,
}

impl NewMessage {
    /// Build a message for `user`, copying their current tokens.
    pub fn for_credential(
        credential: &Credential,
        channel: String,
        text: String,
        send_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: credential.user_id.clone(),
            access_token: credential.access_token.clone(),
            refresh_token: credential.refresh_token.clone(),
            channel,
            text,
            send_at,
        }
    }
}

/// Token-free view of a message, as returned by the list endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInfo {
    pub id: Uuid,
    pub user_id: String,
    pub channel: String,
    pub text: String,
    pub send_at: DateTime<Utc>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&MessageRecord> for MessageInfo {
    fn from(r: &MessageRecord) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id.clone(),
            channel: r.channel.clone(),
            text: r.text.clone(),
            send_at: r.send_at,
            status: r.status,
            created_at: r.created_at,
        }
    }
}

// ── Credentials ─────────────────────────────────────────────────────────────

/// Tokens for a linked Slack user, keyed by `user_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub bot_user_id: Option<String>,
    pub team_id: Option<String>,
    pub scope: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upsert payload written by the OAuth callback.
#[derive(Debug, Clone)]
pub struct CredentialUpsert {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub bot_user_id: Option<String>,
    pub team_id: Option<String>,
    pub scope: Option<String>,
}
