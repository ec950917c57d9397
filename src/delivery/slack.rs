use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::{DeliveryClient, PostedMessage};
use crate::error::AppError;

/// Slack error codes that mean the bearer token has expired.
const EXPIRED_TOKEN_CODES: &[&str] = &["token_expired"];

/// `chat.postMessage` client.
pub struct SlackDeliveryClient {
    api_base: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    channel: Option<String>,
    ts: Option<String>,
    error: Option<String>,
}

impl SlackDeliveryClient {
    pub fn new(api_base: &str, http: reqwest::Client) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            http,
        }
    }
}

#[async_trait]
impl DeliveryClient for SlackDeliveryClient {
    async fn post_message(
        &self,
        token: &str,
        channel: &str,
        text: &str,
    ) -> Result<PostedMessage, AppError> {
        let resp = self
            .http
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(token)
            .json(&json!({ "channel": channel, "text": text }))
            .send()
            .await
            .map_err(|e| AppError::TransientSend(format!("request failed: {e}")))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(AppError::AuthExpired);
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::TransientSend(format!("HTTP {status}: {body}")));
        }

        let body: PostMessageResponse = resp
            .json()
            .await
            .map_err(|e| AppError::TransientSend(format!("unparseable response: {e}")))?;

        if !body.ok {
            let code = body.error.unwrap_or_else(|| "unknown".into());
            if EXPIRED_TOKEN_CODES.contains(&code.as_str()) {
                return Err(AppError::AuthExpired);
            }
            return Err(AppError::TransientSend(format!("Slack API error: {code}")));
        }

        Ok(PostedMessage {
            channel: body.channel.unwrap_or_else(|| channel.to_string()),
            ts: body.ts.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_post_message_sends_bearer_and_json() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat.postMessage")
                    .header("authorization", "Bearer xoxb-valid")
                    .json_body(json!({ "channel": "#general", "text": "hi" }));
                then.status(200).json_body(json!({
                    "ok": true,
                    "channel": "C123",
                    "ts": "1700000000.000100"
                }));
            })
            .await;

        let client = SlackDeliveryClient::new(&server.base_url(), reqwest::Client::new());
        let posted = client
            .post_message("xoxb-valid", "#general", "hi")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(
            posted,
            PostedMessage {
                channel: "C123".into(),
                ts: "1700000000.000100".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_http_401_is_auth_expired() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat.postMessage");
                then.status(401);
            })
            .await;

        let client = SlackDeliveryClient::new(&server.base_url(), reqwest::Client::new());
        let err = client
            .post_message("xoxb-expired", "#general", "hi")
            .await
            .unwrap_err();
        assert!(err.is_auth_expired());
    }

    #[tokio::test]
    async fn test_token_expired_code_is_auth_expired() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat.postMessage");
                then.status(200)
                    .json_body(json!({ "ok": false, "error": "token_expired" }));
            })
            .await;

        let client = SlackDeliveryClient::new(&server.base_url(), reqwest::Client::new());
        let err = client
            .post_message("xoxb-expired", "#general", "hi")
            .await
            .unwrap_err();
        assert!(err.is_auth_expired());
    }

    #[tokio::test]
    async fn test_other_api_error_is_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat.postMessage");
                then.status(200)
                    .json_body(json!({ "ok": false, "error": "channel_not_found" }));
            })
            .await;

        let client = SlackDeliveryClient::new(&server.base_url(), reqwest::Client::new());
        let err = client
            .post_message("xoxb-valid", "#nowhere", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TransientSend(ref m) if m.contains("channel_not_found")));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat.postMessage");
                then.status(503).body("upstream unavailable");
            })
            .await;

        let client = SlackDeliveryClient::new(&server.base_url(), reqwest::Client::new());
        let err = client
            .post_message("xoxb-valid", "#general", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TransientSend(_)));
    }
}
