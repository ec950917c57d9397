use std::sync::Arc;

use tracing::{error, info};

use crate::error::AppError;
use crate::providers::OAuthProvider;
use crate::store::MessageStore;

/// Exchanges a user's stored refresh token for a new access token.
pub struct TokenRefresher {
    store: Arc<dyn MessageStore>,
    provider: Arc<dyn OAuthProvider>,
}

impl TokenRefresher {
    pub fn new(store: Arc<dyn MessageStore>, provider: Arc<dyn OAuthProvider>) -> Self {
        Self { store, provider }
    }

    /// Refresh the access token for `user_id`, persist it, and return it.
    ///
    /// The refresh token itself is kept as is. Nothing is written unless the
    /// exchange succeeds.
    pub async fn refresh(&self, user_id: &str) -> Result<String, AppError> {
        let credential = self
            .store
            .find_credential(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("credential for {user_id}")))?;

        let refresh_token = match credential.refresh_token.as_deref() {
            Some(rt) if !rt.is_empty() => rt,
            _ => return Err(AppError::MissingCredential(user_id.to_string())),
        };

        let tokens = match self.provider.refresh_token(refresh_token).await {
            Ok(tokens) => tokens,
            Err(e @ AppError::RefreshExchange(_)) => {
                error!(user_id, "Failed to refresh token: {e}");
                return Err(e);
            }
            Err(e) => {
                error!(user_id, "Failed to refresh token: {e}");
                return Err(AppError::RefreshExchange(e.to_string()));
            }
        };

        self.store
            .update_access_token(user_id, &tokens.access_token)
            .await?;

        info!(user_id, "Access token refreshed");
        Ok(tokens.access_token)
    }
}
