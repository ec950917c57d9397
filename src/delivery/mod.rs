//! Outbound message delivery.
//!
//! A [`DeliveryClient`] makes exactly one attempt per call and classifies the
//! outcome; retry and token refresh belong to the scheduler's runner.

mod slack;

pub use slack::SlackDeliveryClient;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::AppError;

/// Slack's acknowledgement of a posted message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// Post `text` to `channel` with `token`.
    ///
    /// Fails with [`AppError::AuthExpired`] when Slack rejects the token as
    /// expired, and [`AppError::TransientSend`] for every other failure.
    async fn post_message(
        &self,
        token: &str,
        channel: &str,
        text: &str,
    ) -> Result<PostedMessage, AppError>;
}
