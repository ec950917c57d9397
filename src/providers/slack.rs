use async_trait::async_trait;
use serde::Deserialize;

use super::traits::{OAuthProvider, TokenSet};
use crate::error::AppError;

/// Slack OAuth 2.0 provider.
///
/// Quirks:
/// - Uses `oauth.v2.access` for both code exchange and token refresh.
/// - Errors come back as HTTP 200 with `ok: false` and an `error` code.
/// - The bot token is the top-level `access_token`; that is the one we send with.
/// - Scopes are comma-separated, NOT space-separated.
pub struct SlackProvider {
    client_id: String,
    client_secret: String,
    api_base: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SlackTokenResponse {
    ok: bool,
    access_token: Option<String>,
    scope: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    bot_user_id: Option<String>,
    authed_user: Option<SlackAuthedUser>,
    team: Option<SlackTeam>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackAuthedUser {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackTeam {
    id: Option<String>,
}

impl SlackTokenResponse {
    fn into_token_set(self) -> Option<TokenSet> {
        Some(TokenSet {
            access_token: self.access_token?,
            refresh_token: self.refresh_token,
            expires_in: self.expires_in,
            scope: self.scope,
            authed_user_id: self.authed_user.and_then(|u| u.id),
            bot_user_id: self.bot_user_id,
            team_id: self.team.and_then(|t| t.id),
        })
    }
}

impl SlackProvider {
    pub fn new(
        client_id: String,
        client_secret: String,
        api_base: &str,
        http: reqwest::Client,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            api_base: api_base.trim_end_matches('/').to_string(),
            http,
        }
    }

    fn token_url(&self) -> String {
        format!("{}/oauth.v2.access", self.api_base)
    }
}

#[async_trait]
impl OAuthProvider for SlackProvider {
    fn default_scopes(&self) -> Vec<String> {
        vec![
            "chat:write".into(),
            "channels:read".into(),
            "channels:join".into(),
            "users:read".into(),
            "groups:read".into(),
        ]
    }

    fn auth_url(&self, scopes: &[String], state: &str, redirect_uri: &str) -> String {
        let scope_str = scopes.join(",");
        format!(
            "https://slack.com/oauth/v2/authorize?\
             client_id={client_id}\
             &scope={scope}\
             &redirect_uri={redirect_uri}\
             &state={state}",
            client_id = urlencoding(&self.client_id),
            scope = urlencoding(&scope_str),
            redirect_uri = urlencoding(redirect_uri),
            state = urlencoding(state),
        )
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet, AppError> {
        let resp = self
            .http
            .post(self.token_url())
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Token exchange request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "Slack token exchange failed ({status}): {body}"
            )));
        }

        let token_resp: SlackTokenResponse = resp
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to parse token response: {e}")))?;

        if !token_resp.ok {
            return Err(AppError::OAuth(
                token_resp.error.unwrap_or_else(|| "unknown".into()),
            ));
        }

        token_resp
            .into_token_set()
            .ok_or_else(|| AppError::OAuth("no access_token in response".into()))
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AppError> {
        let resp = self
            .http
            .post(self.token_url())
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::RefreshExchange(format!("Refresh request failed: {e}")))?;

        let token_resp: SlackTokenResponse = resp.json().await.map_err(|e| {
            AppError::RefreshExchange(format!("Failed to parse refresh response: {e}"))
        })?;

        if !token_resp.ok {
            return Err(AppError::RefreshExchange(format!(
                "Slack refresh error: {}",
                token_resp.error.unwrap_or_else(|| "unknown".into())
            )));
        }

        token_resp
            .into_token_set()
            .ok_or_else(|| AppError::RefreshExchange("no access_token in response".into()))
    }
}

fn urlencoding(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
