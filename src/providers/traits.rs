use async_trait::async_trait;

use crate::error::AppError;

/// Tokens returned by the OAuth provider after code exchange or refresh.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
    /// Slack user who authorized the install, when the response names one.
    pub authed_user_id: Option<String>,
    pub bot_user_id: Option<String>,
    pub team_id: Option<String>,
}

/// OAuth operations the service needs from Slack.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Scopes requested when a user links their workspace.
    fn default_scopes(&self) -> Vec<String>;

    /// Build the authorization URL that the user should be redirected to.
    ///
    /// - `scopes`: The OAuth scopes to request.
    /// - `state`: An opaque, HMAC-signed state string for CSRF protection.
    /// - `redirect_uri`: The callback URL registered with the provider.
    fn auth_url(&self, scopes: &[String], state: &str, redirect_uri: &str) -> String;

    /// Exchange an authorization code for tokens.
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet, AppError>;

    /// Mint a new access token from a refresh token.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AppError>;
}
