//! Route handlers for the Slack linking and messaging API.
//!
//! All handlers receive `SharedState` via Axum state extraction.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::store::{Credential, CredentialUpsert, MessageInfo, NewMessage};
use crate::SharedState;

// =============================================================================
// Slack Router
// =============================================================================

pub fn slack_router(state: SharedState) -> Router {
    Router::new()
        // ── OAuth ────────────────────────────────────────────────────────
        .route("/auth", get(auth_redirect))
        .route("/callback", get(oauth_callback))
        // ── Messages ─────────────────────────────────────────────────────
        .route("/send", post(send_now))
        .route("/schedule", post(schedule))
        .route("/list/{user_id}", get(list_scheduled))
        .route("/cancel/{id}", delete(cancel))
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

pub async fn status() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "slack-connect",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// =============================================================================
// OAuth Endpoints
// =============================================================================

/// GET /slack/auth: Redirect the user to Slack's consent screen.
async fn auth_redirect(State(state): State<SharedState>) -> Result<Response, AppError> {
    let signed_state = state.signer.issue(state.clock.now())?;
    let auth_url = state.provider.auth_url(
        &state.provider.default_scopes(),
        &signed_state,
        &state.config.slack_redirect_uri,
    );

    Ok(Redirect::temporary(&auth_url).into_response())
}

#[derive(Deserialize)]
struct OAuthCallbackQuery {
    code: Option<String>,
    state: Option<String>,
    /// Set by Slack instead of `code` when the user declines.
    error: Option<String>,
}

/// GET /slack/callback: Exchange the code and store the user's tokens.
async fn oauth_callback(
    State(state): State<SharedState>,
    Query(q): Query<OAuthCallbackQuery>,
) -> Result<Response, AppError> {
    if let Some(error) = q.error {
        return Err(AppError::OAuth(error));
    }

    let now = state.clock.now();
    let signed_state = q.state.ok_or(AppError::InvalidState)?;
    state.signer.check(&signed_state, now)?;

    let code = q
        .code
        .ok_or_else(|| AppError::BadRequest("missing code".into()))?;

    let tokens = state
        .provider
        .exchange_code(&code, &state.config.slack_redirect_uri)
        .await?;

    let user_id = tokens
        .authed_user_id
        .clone()
        .or_else(|| tokens.bot_user_id.clone())
        .unwrap_or_else(|| format!("bot-{}", now.timestamp_millis()));

    let credential = state
        .store
        .upsert_credential(&CredentialUpsert {
            user_id: user_id.clone(),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            bot_user_id: tokens.bot_user_id,
            team_id: tokens.team_id,
            scope: tokens.scope,
        })
        .await?;

    info!(
        user_id = %credential.user_id,
        team_id = credential.team_id.as_deref().unwrap_or_default(),
        "Slack workspace linked"
    );

    Ok("Slack connected successfully! You can close this tab and go back to the app."
        .into_response())
}

// =============================================================================
// Message Endpoints
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendBody {
    user_id: String,
    channel: String,
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleBody {
    user_id: String,
    channel: String,
    text: String,
    send_at: DateTime<Utc>,
}

fn require_non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::BadRequest(format!("{field} is required")));
    }
    Ok(())
}

async fn linked_user(state: &SharedState, user_id: &str) -> Result<Credential, AppError> {
    state
        .store
        .find_credential(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User".into()))
}

/// POST /slack/send: Send a message now.
///
/// The message is persisted first, so a failed send is picked up by the
/// next scheduler scan.
async fn send_now(
    State(state): State<SharedState>,
    Json(body): Json<SendBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_non_empty("channel", &body.channel)?;
    require_non_empty("text", &body.text)?;
    let credential = linked_user(&state, &body.user_id).await?;

    let msg = NewMessage::for_credential(&credential, body.channel, body.text, state.clock.now());
    let (record, delivered) = state.runner.clone().send_now(msg).await?;
    let posted = delivered.posted();

    Ok(Json(json!({
        "message": "Message sent!",
        "id": record.id,
        "channel": posted.channel,
        "ts": posted.ts,
    })))
}

/// POST /slack/schedule: Schedule a message for later delivery.
async fn schedule(
    State(state): State<SharedState>,
    Json(body): Json<ScheduleBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_non_empty("channel", &body.channel)?;
    require_non_empty("text", &body.text)?;
    let credential = linked_user(&state, &body.user_id).await?;

    let record = state
        .store
        .create_message(NewMessage::for_credential(
            &credential,
            body.channel,
            body.text,
            body.send_at,
        ))
        .await?;

    info!(message_id = %record.id, send_at = %record.send_at, "Message scheduled");

    Ok(Json(json!({
        "message": "Message scheduled",
        "id": record.id,
    })))
}

/// GET /slack/list/{user_id}: Messages still waiting to be sent.
async fn list_scheduled(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let messages: Vec<MessageInfo> = state
        .store
        .list_scheduled(&user_id)
        .await?
        .iter()
        .map(MessageInfo::from)
        .collect();

    Ok(Json(json!({ "data": messages })))
}

/// DELETE /slack/cancel/{id}: Remove a message so it is never sent.
async fn cancel(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.delete_message(id).await?;

    info!(message_id = %id, "Message cancelled");

    Ok(Json(json!({
        "message": "Message cancelled",
        "id": id,
    })))
}
