//! One delivery scan: find due messages, send them, and recover once from an
//! expired token.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::clock::Clock;
use super::refresher::TokenRefresher;
use crate::delivery::{DeliveryClient, PostedMessage};
use crate::error::AppError;
use crate::store::{MessageRecord, MessageStatus, MessageStore, NewMessage};

/// Outcome of a single [`DeliveryRunner::run_cycle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleReport {
    /// Another cycle (or an immediate send) held the run lock. The scan is
    /// not queued, so due messages wait for the next tick.
    Skipped,
    /// The due-message query failed; nothing was attempted.
    ScanFailed,
    Completed {
        due: usize,
        sent: usize,
        /// Sent on the retry after a token refresh. Included in `sent`.
        refreshed: usize,
        failed: usize,
    },
}

/// How a successful delivery came about.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivered {
    Sent(PostedMessage),
    SentAfterRefresh(PostedMessage),
}

impl Delivered {
    pub fn posted(&self) -> &PostedMessage {
        match self {
            Delivered::Sent(p) | Delivered::SentAfterRefresh(p) => p,
        }
    }
}

pub struct DeliveryRunner {
    store: Arc<dyn MessageStore>,
    client: Arc<dyn DeliveryClient>,
    refresher: TokenRefresher,
    clock: Arc<dyn Clock>,
    run_lock: Mutex<()>,
}

impl DeliveryRunner {
    pub fn new(
        store: Arc<dyn MessageStore>,
        client: Arc<dyn DeliveryClient>,
        refresher: TokenRefresher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            client,
            refresher,
            clock,
            run_lock: Mutex::new(()),
        }
    }

    /// Scan for due messages and attempt each one.
    ///
    /// Skips without waiting if a previous cycle still holds the run lock.
    /// Per-message failures are logged and leave the message `scheduled`.
    pub async fn run_cycle(&self) -> CycleReport {
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!("Previous delivery cycle still running, skipping this one");
            return CycleReport::Skipped;
        };

        let now = self.clock.now();
        let due = match self.store.find_due(now).await {
            Ok(due) => due,
            Err(e) => {
                error!("Scan for due messages failed: {e}");
                return CycleReport::ScanFailed;
            }
        };

        let total = due.len();
        let (mut sent, mut refreshed, mut failed) = (0, 0, 0);

        for record in due {
            match self.deliver(record).await {
                Ok(Delivered::Sent(_)) => sent += 1,
                Ok(Delivered::SentAfterRefresh(_)) => {
                    sent += 1;
                    refreshed += 1;
                }
                Err(_) => failed += 1,
            }
        }

        if total > 0 {
            info!(due = total, sent, refreshed, failed, "Delivery cycle finished");
        }

        CycleReport::Completed {
            due: total,
            sent,
            refreshed,
            failed,
        }
    }

    /// Persist `msg` as due now and deliver it immediately through the same
    /// path a scan uses. Holds the run lock so a concurrent scan cannot pick
    /// the record up and send it twice.
    ///
    /// The work runs on its own task: dropping the returned future does not
    /// stop a delivery that is already in flight from being marked `sent`.
    ///
    /// On failure the record stays `scheduled` and the returned error carries
    /// the reason; the next scan retries it.
    pub async fn send_now(
        self: Arc<Self>,
        mut msg: NewMessage,
    ) -> Result<(MessageRecord, Delivered), AppError> {
        let task = tokio::spawn(async move {
            let _guard = self.run_lock.lock().await;

            msg.send_at = self.clock.now();
            let record = self.store.create_message(msg).await?;
            let delivered = self.deliver(record.clone()).await?;

            Ok::<_, AppError>((record, delivered))
        });

        task.await
            .map_err(|e| AppError::Internal(format!("Send task failed: {e}")))?
    }

    /// Deliver one record, refreshing its owner's token and retrying once on
    /// an expired-token rejection.
    async fn deliver(&self, mut record: MessageRecord) -> Result<Delivered, AppError> {
        let first = self
            .client
            .post_message(&record.access_token, &record.channel, &record.text)
            .await;

        let delivered = match first {
            Ok(posted) => Delivered::Sent(posted),
            Err(e) if e.is_auth_expired() => {
                let token = match self.refresher.refresh(&record.user_id).await {
                    Ok(token) => token,
                    Err(e) => {
                        error!(
                            message_id = %record.id,
                            user_id = %record.user_id,
                            "Token refresh failed: {e}"
                        );
                        return Err(e);
                    }
                };

                match self
                    .client
                    .post_message(&token, &record.channel, &record.text)
                    .await
                {
                    Ok(posted) => {
                        record.access_token = token;
                        Delivered::SentAfterRefresh(posted)
                    }
                    Err(e) => {
                        error!(
                            message_id = %record.id,
                            channel = %record.channel,
                            "Retry after token refresh failed: {e}"
                        );
                        return Err(e);
                    }
                }
            }
            Err(e) => {
                error!(
                    message_id = %record.id,
                    channel = %record.channel,
                    "Failed to send message: {e}"
                );
                return Err(e);
            }
        };

        record.status = MessageStatus::Sent;
        if let Err(e) = self.store.update_message(&record).await {
            // Slack already has the message; the record will be re-sent next scan.
            error!(message_id = %record.id, "Sent but failed to mark as sent: {e}");
            return Err(e);
        }

        match &delivered {
            Delivered::Sent(_) => {
                info!(message_id = %record.id, channel = %record.channel, "Sent message")
            }
            Delivered::SentAfterRefresh(_) => info!(
                message_id = %record.id,
                channel = %record.channel,
                "Sent message after refreshing token"
            ),
        }

        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{OAuthProvider, TokenSet};
    use crate::scheduler::clock::ManualClock;
    use crate::store::{Credential, CredentialUpsert, MemoryStore};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    /// Accepts "valid" and "new-token", rejects "expired" as expired, and
    /// fails anything else as a transient error.
    #[derive(Default)]
    struct FakeSlack {
        calls: StdMutex<Vec<(String, String)>>,
    }

    impl FakeSlack {
        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeliveryClient for FakeSlack {
        async fn post_message(
            &self,
            token: &str,
            channel: &str,
            _text: &str,
        ) -> Result<PostedMessage, AppError> {
            self.calls
                .lock()
                .unwrap()
                .push((token.to_string(), channel.to_string()));
            match token {
                "valid" | "new-token" => Ok(PostedMessage {
                    channel: channel.to_string(),
                    ts: "1700000000.000100".into(),
                }),
                "expired" => Err(AppError::AuthExpired),
                _ => Err(AppError::TransientSend("channel_not_found".into())),
            }
        }
    }

    struct FakeOAuth {
        refreshed: Option<&'static str>,
    }

    #[async_trait]
    impl OAuthProvider for FakeOAuth {
        fn default_scopes(&self) -> Vec<String> {
            vec![]
        }

        fn auth_url(&self, _scopes: &[String], _state: &str, _redirect_uri: &str) -> String {
            String::new()
        }

        async fn exchange_code(&self, _code: &str, _redirect_uri: &str) -> Result<TokenSet, AppError> {
            Err(AppError::OAuth("not used".into()))
        }

        async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenSet, AppError> {
            match self.refreshed {
                Some(token) => Ok(TokenSet {
                    access_token: token.into(),
                    refresh_token: None,
                    expires_in: None,
                    scope: None,
                    authed_user_id: None,
                    bot_user_id: None,
                    team_id: None,
                }),
                None => Err(AppError::RefreshExchange("invalid_refresh_token".into())),
            }
        }
    }

    /// A store whose scan always fails.
    struct BrokenStore;

    #[async_trait]
    impl MessageStore for BrokenStore {
        async fn find_due(&self, _now: DateTime<Utc>) -> Result<Vec<MessageRecord>, AppError> {
            Err(AppError::Scan("connection refused".into()))
        }
        async fn find_message(&self, _id: Uuid) -> Result<Option<MessageRecord>, AppError> {
            unreachable!()
        }
        async fn list_scheduled(&self, _user_id: &str) -> Result<Vec<MessageRecord>, AppError> {
            unreachable!()
        }
        async fn create_message(&self, _msg: NewMessage) -> Result<MessageRecord, AppError> {
            unreachable!()
        }
        async fn update_message(&self, _record: &MessageRecord) -> Result<(), AppError> {
            unreachable!()
        }
        async fn delete_message(&self, _id: Uuid) -> Result<(), AppError> {
            unreachable!()
        }
        async fn find_credential(&self, _user_id: &str) -> Result<Option<Credential>, AppError> {
            unreachable!()
        }
        async fn upsert_credential(&self, _cred: &CredentialUpsert) -> Result<Credential, AppError> {
            unreachable!()
        }
        async fn update_access_token(&self, _user_id: &str, _token: &str) -> Result<(), AppError> {
            unreachable!()
        }
    }

    /// Delegates to a `MemoryStore` but fails the first `update_message`.
    struct FlakyUpdateStore {
        inner: MemoryStore,
        failed_once: AtomicBool,
    }

    #[async_trait]
    impl MessageStore for FlakyUpdateStore {
        async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<MessageRecord>, AppError> {
            self.inner.find_due(now).await
        }
        async fn find_message(&self, id: Uuid) -> Result<Option<MessageRecord>, AppError> {
            self.inner.find_message(id).await
        }
        async fn list_scheduled(&self, user_id: &str) -> Result<Vec<MessageRecord>, AppError> {
            self.inner.list_scheduled(user_id).await
        }
        async fn create_message(&self, msg: NewMessage) -> Result<MessageRecord, AppError> {
            self.inner.create_message(msg).await
        }
        async fn update_message(&self, record: &MessageRecord) -> Result<(), AppError> {
            if !self.failed_once.swap(true, Ordering::SeqCst) {
                return Err(AppError::Database("connection reset".into()));
            }
            self.inner.update_message(record).await
        }
        async fn delete_message(&self, id: Uuid) -> Result<(), AppError> {
            self.inner.delete_message(id).await
        }
        async fn find_credential(&self, user_id: &str) -> Result<Option<Credential>, AppError> {
            self.inner.find_credential(user_id).await
        }
        async fn upsert_credential(&self, cred: &CredentialUpsert) -> Result<Credential, AppError> {
            self.inner.upsert_credential(cred).await
        }
        async fn update_access_token(&self, user_id: &str, token: &str) -> Result<(), AppError> {
            self.inner.update_access_token(user_id, token).await
        }
    }

    /// Counts posts and answers only after two seconds.
    #[derive(Default)]
    struct SlowSlack {
        posts: AtomicUsize,
    }

    #[async_trait]
    impl DeliveryClient for SlowSlack {
        async fn post_message(
            &self,
            _token: &str,
            channel: &str,
            _text: &str,
        ) -> Result<PostedMessage, AppError> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            Ok(PostedMessage {
                channel: channel.to_string(),
                ts: "1700000000.000200".into(),
            })
        }
    }

    fn new_message(user: &str, token: &str, send_at: DateTime<Utc>) -> NewMessage {
        NewMessage {
            user_id: user.into(),
            access_token: token.into(),
            refresh_token: Some("xoxe-refresh".into()),
            channel: "#general".into(),
            text: "hi".into(),
            send_at,
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        slack: Arc<FakeSlack>,
        clock: Arc<ManualClock>,
        runner: Arc<DeliveryRunner>,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn harness(refreshed: Option<&'static str>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let slack = Arc::new(FakeSlack::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let refresher = TokenRefresher::new(store.clone(), Arc::new(FakeOAuth { refreshed }));
        let runner = Arc::new(DeliveryRunner::new(
            store.clone(),
            slack.clone(),
            refresher,
            clock.clone(),
        ));
        Harness {
            store,
            slack,
            clock,
            runner,
        }
    }

    impl Harness {
        async fn link(&self, user: &str, access_token: &str) {
            self.store
                .upsert_credential(&CredentialUpsert {
                    user_id: user.into(),
                    access_token: access_token.into(),
                    refresh_token: Some("xoxe-refresh".into()),
                    bot_user_id: None,
                    team_id: None,
                    scope: None,
                })
                .await
                .unwrap();
        }

        async fn schedule(&self, user: &str, token: &str, send_at: DateTime<Utc>) -> Uuid {
            self.store
                .create_message(new_message(user, token, send_at))
                .await
                .unwrap()
                .id
        }

        async fn record(&self, id: Uuid) -> MessageRecord {
            self.store.find_message(id).await.unwrap().unwrap()
        }
    }

    #[tokio::test]
    async fn test_due_message_is_sent() {
        let h = harness(None);
        let id = h.schedule("U1", "valid", t0() - Duration::seconds(1)).await;

        let report = h.runner.run_cycle().await;

        assert_eq!(
            report,
            CycleReport::Completed { due: 1, sent: 1, refreshed: 0, failed: 0 }
        );
        assert_eq!(h.record(id).await.status, MessageStatus::Sent);
        assert_eq!(h.slack.calls(), vec![("valid".to_string(), "#general".to_string())]);
    }

    #[tokio::test]
    async fn test_future_message_untouched() {
        let h = harness(None);
        let id = h.schedule("U1", "valid", t0() + Duration::minutes(5)).await;
        let before = h.record(id).await;

        let report = h.runner.run_cycle().await;

        assert_eq!(
            report,
            CycleReport::Completed { due: 0, sent: 0, refreshed: 0, failed: 0 }
        );
        assert_eq!(h.record(id).await, before);
        assert!(h.slack.calls().is_empty());

        h.clock.advance(Duration::minutes(5));
        h.runner.run_cycle().await;
        assert_eq!(h.record(id).await.status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn test_expired_token_refreshed_and_retried_once() {
        let h = harness(Some("new-token"));
        h.link("U1", "expired").await;
        let id = h.schedule("U1", "expired", t0() - Duration::seconds(1)).await;

        let report = h.runner.run_cycle().await;

        assert_eq!(
            report,
            CycleReport::Completed { due: 1, sent: 1, refreshed: 1, failed: 0 }
        );
        let record = h.record(id).await;
        assert_eq!(record.status, MessageStatus::Sent);
        assert_eq!(record.access_token, "new-token");
        let cred = h.store.find_credential("U1").await.unwrap().unwrap();
        assert_eq!(cred.access_token, "new-token");
        assert_eq!(
            h.slack.calls(),
            vec![
                ("expired".to_string(), "#general".to_string()),
                ("new-token".to_string(), "#general".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_message_scheduled() {
        let h = harness(None);
        h.link("U1", "expired").await;
        let id = h.schedule("U1", "expired", t0() - Duration::seconds(1)).await;
        let before = h.record(id).await;

        let report = h.runner.run_cycle().await;

        assert_eq!(
            report,
            CycleReport::Completed { due: 1, sent: 0, refreshed: 0, failed: 1 }
        );
        assert_eq!(h.record(id).await, before);
        assert_eq!(h.slack.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_after_refresh_only_once() {
        // Refresh hands back a token Slack still rejects as expired.
        let h = harness(Some("expired"));
        h.link("U1", "expired").await;
        let id = h.schedule("U1", "expired", t0() - Duration::seconds(1)).await;

        h.runner.run_cycle().await;

        let record = h.record(id).await;
        assert_eq!(record.status, MessageStatus::Scheduled);
        assert_eq!(record.access_token, "expired");
        assert_eq!(h.slack.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_other_users() {
        let h = harness(None);
        let broken = h.schedule("U1", "revoked", t0() - Duration::minutes(2)).await;
        let fine = h.schedule("U2", "valid", t0() - Duration::minutes(1)).await;

        let report = h.runner.run_cycle().await;

        assert_eq!(
            report,
            CycleReport::Completed { due: 2, sent: 1, refreshed: 0, failed: 1 }
        );
        assert_eq!(h.record(broken).await.status, MessageStatus::Scheduled);
        assert_eq!(h.record(fine).await.status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn test_failing_message_retried_every_cycle() {
        let h = harness(None);
        let id = h.schedule("U1", "revoked", t0() - Duration::seconds(1)).await;

        h.runner.run_cycle().await;
        h.clock.advance(Duration::minutes(1));
        h.runner.run_cycle().await;

        assert_eq!(h.record(id).await.status, MessageStatus::Scheduled);
        assert_eq!(h.slack.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_sent_message_not_resent() {
        let h = harness(None);
        h.schedule("U1", "valid", t0() - Duration::seconds(1)).await;

        h.runner.run_cycle().await;
        h.clock.advance(Duration::minutes(1));
        let report = h.runner.run_cycle().await;

        assert_eq!(
            report,
            CycleReport::Completed { due: 0, sent: 0, refreshed: 0, failed: 0 }
        );
        assert_eq!(h.slack.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_message_never_scanned() {
        let h = harness(None);
        let id = h.schedule("U1", "valid", t0() + Duration::minutes(1)).await;
        h.store.delete_message(id).await.unwrap();

        h.clock.advance(Duration::minutes(2));
        let report = h.runner.run_cycle().await;

        assert_eq!(
            report,
            CycleReport::Completed { due: 0, sent: 0, refreshed: 0, failed: 0 }
        );
        assert!(h.store.find_message(id).await.unwrap().is_none());
        assert!(h.slack.calls().is_empty());
    }

    #[tokio::test]
    async fn test_scan_failure_aborts_cycle() {
        let slack = Arc::new(FakeSlack::default());
        let store: Arc<dyn MessageStore> = Arc::new(BrokenStore);
        let refresher = TokenRefresher::new(store.clone(), Arc::new(FakeOAuth { refreshed: None }));
        let runner = DeliveryRunner::new(
            store,
            slack.clone(),
            refresher,
            Arc::new(ManualClock::new(t0())),
        );

        assert_eq!(runner.run_cycle().await, CycleReport::ScanFailed);
        assert!(slack.calls().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_skipped() {
        let h = harness(None);
        let id = h.schedule("U1", "valid", t0() - Duration::seconds(1)).await;

        let guard = h.runner.run_lock.lock().await;
        assert_eq!(h.runner.run_cycle().await, CycleReport::Skipped);
        drop(guard);

        assert_eq!(h.record(id).await.status, MessageStatus::Scheduled);
        assert!(h.slack.calls().is_empty());
    }

    #[tokio::test]
    async fn test_send_now_persists_and_delivers() {
        let h = harness(None);
        h.link("U1", "valid").await;
        let cred = h.store.find_credential("U1").await.unwrap().unwrap();
        let tomorrow = t0() + Duration::days(1);
        let msg = NewMessage::for_credential(&cred, "#general".into(), "hi".into(), tomorrow);

        let (record, delivered) = h.runner.clone().send_now(msg).await.unwrap();

        assert!(matches!(delivered, Delivered::Sent(_)));
        let stored = h.record(record.id).await;
        assert_eq!(stored.status, MessageStatus::Sent);
        assert_eq!(stored.send_at, t0());
    }

    #[tokio::test]
    async fn test_send_now_failure_leaves_record_for_next_scan() {
        let h = harness(None);
        h.link("U1", "revoked").await;
        let cred = h.store.find_credential("U1").await.unwrap().unwrap();
        let msg = NewMessage::for_credential(&cred, "#general".into(), "hi".into(), t0());

        let err = h.runner.clone().send_now(msg).await.unwrap_err();

        assert!(matches!(err, AppError::TransientSend(_)));
        assert_eq!(h.store.message_count().await, 1);
        let due = h.store.find_due(t0()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].status, MessageStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_failed_sent_write_does_not_stop_siblings() {
        let store = Arc::new(FlakyUpdateStore {
            inner: MemoryStore::new(),
            failed_once: AtomicBool::new(false),
        });
        let first = store
            .create_message(new_message("U1", "valid", t0() - Duration::minutes(2)))
            .await
            .unwrap()
            .id;
        let second = store
            .create_message(new_message("U2", "valid", t0() - Duration::minutes(1)))
            .await
            .unwrap()
            .id;
        let slack = Arc::new(FakeSlack::default());
        let refresher = TokenRefresher::new(store.clone(), Arc::new(FakeOAuth { refreshed: None }));
        let runner = DeliveryRunner::new(
            store.clone(),
            slack.clone(),
            refresher,
            Arc::new(ManualClock::new(t0())),
        );

        let report = runner.run_cycle().await;

        assert_eq!(
            report,
            CycleReport::Completed { due: 2, sent: 1, refreshed: 0, failed: 1 }
        );
        assert_eq!(slack.calls().len(), 2);
        let first = store.find_message(first).await.unwrap().unwrap();
        let second = store.find_message(second).await.unwrap().unwrap();
        assert_eq!(first.status, MessageStatus::Scheduled);
        assert_eq!(second.status, MessageStatus::Sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_send_now_still_marks_sent() {
        let store = Arc::new(MemoryStore::new());
        let slack = Arc::new(SlowSlack::default());
        let refresher = TokenRefresher::new(store.clone(), Arc::new(FakeOAuth { refreshed: None }));
        let runner = Arc::new(DeliveryRunner::new(
            store.clone(),
            slack.clone(),
            refresher,
            Arc::new(ManualClock::new(t0())),
        ));

        // The caller gives up while Slack is still answering.
        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            runner.clone().send_now(new_message("U1", "valid", t0())),
        )
        .await;
        assert!(outcome.is_err());

        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        let report = runner.run_cycle().await;

        assert_eq!(
            report,
            CycleReport::Completed { due: 0, sent: 0, refreshed: 0, failed: 0 }
        );
        assert_eq!(slack.posts.load(Ordering::SeqCst), 1);
        assert_eq!(store.message_count().await, 1);
        assert!(store.find_due(t0()).await.unwrap().is_empty());
    }
}
