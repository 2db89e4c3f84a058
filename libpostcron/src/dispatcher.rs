//! Due-post dispatch
//!
//! [`Dispatcher::run_once`] scans the store for due posts and drives each one
//! through `scheduled -> publishing -> posted | failed`:
//!
//! 1. claim the post with a conditional update (losing the race means skip)
//! 2. resolve the account's credentials
//! 3. publish, retrying transient errors with exponential backoff, every
//!    attempt bounded by `publish_timeout`
//! 4. on success, optionally resolve the media URL (failures are swallowed)
//! 5. persist the terminal outcome
//!
//! Posts are processed concurrently up to `max_concurrency`. A failure on one
//! post never affects its siblings. A failure to list the due set aborts the
//! run before anything is touched.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::error::{PostcronError, PublishError, Result};
use crate::publisher::{PublishReceipt, PublishRequest, Publisher};
use crate::store::{AccountLookup, PostStore};
use crate::types::{Credentials, PostStatus, PublishOutcome, ScheduledPost};

/// Counts from a single `run_once` invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Posts in the due set when the run started
    pub due: usize,
    pub published: usize,
    pub failed: usize,
    /// Due posts claimed by someone else first
    pub skipped: usize,
    /// Posts whose outcome could not be written back
    pub unrecorded: usize,
    /// Stale `publishing` claims moved to `failed`
    pub expired_claims: u64,
}

impl DispatchReport {
    fn record(&mut self, result: PostResult) {
        match result {
            PostResult::Published => self.published += 1,
            PostResult::Failed => self.failed += 1,
            PostResult::Skipped => self.skipped += 1,
            PostResult::Unrecorded => self.unrecorded += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PostResult {
    Published,
    Failed,
    Skipped,
    Unrecorded,
}

fn is_transient(error: &PostcronError) -> bool {
    matches!(error, PostcronError::Publish(e) if e.is_transient())
}

pub struct Dispatcher {
    config: DispatcherConfig,
    store: Arc<dyn PostStore>,
    accounts: Arc<dyn AccountLookup>,
    publisher: Arc<dyn Publisher>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        store: Arc<dyn PostStore>,
        accounts: Arc<dyn AccountLookup>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            config,
            store,
            accounts,
            publisher,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Dispatch everything due as of the current time
    pub async fn run_once(&self) -> Result<DispatchReport> {
        self.run_once_at(chrono::Utc::now().timestamp()).await
    }

    /// Dispatch everything due as of `now` (unix seconds)
    ///
    /// # Errors
    ///
    /// Only a failure to read the due set is returned; per-post failures are
    /// recorded on the post and counted in the report.
    pub async fn run_once_at(&self, now: i64) -> Result<DispatchReport> {
        let started = Instant::now();
        let mut due = match self.store.list_due(now).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to list due posts; skipping this run");
                return Err(e);
            }
        };

        let listed = due.len();
        due.retain(|post| post.is_due(now));
        if due.len() < listed {
            warn!(
                dropped = listed - due.len(),
                "Store listed posts that are not due; ignoring them"
            );
        }

        let mut report = DispatchReport {
            due: due.len(),
            ..Default::default()
        };

        let claimed_before = now.saturating_sub(self.config.claim_timeout as i64);
        match self.store.fail_stale_claims(claimed_before, now).await {
            Ok(0) => {}
            Ok(expired) => {
                warn!(count = expired, "Marked stale publishing claims as failed");
                report.expired_claims = expired;
            }
            Err(e) => warn!(error = %e, "Failed to expire stale claims"),
        }

        if due.is_empty() {
            debug!("No posts due");
            return Ok(report);
        }

        info!(count = due.len(), "Dispatching due posts");

        let results: Vec<PostResult> = stream::iter(due)
            .map(|post| self.dispatch_post(post, now, started))
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        for result in results {
            report.record(result);
        }

        info!(
            due = report.due,
            published = report.published,
            failed = report.failed,
            skipped = report.skipped,
            unrecorded = report.unrecorded,
            "Dispatch run complete"
        );

        Ok(report)
    }

    async fn dispatch_post(&self, post: ScheduledPost, now: i64, started: Instant) -> PostResult {
        // Posts queued behind the concurrency limit are claimed later than `now`
        let claimed_at = now.saturating_add(started.elapsed().as_secs() as i64);

        match self.store.claim(&post.id, claimed_at).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(post_id = %post.id, "Post already claimed; skipping");
                return PostResult::Skipped;
            }
            Err(e) => {
                error!(post_id = %post.id, error = %e, "Failed to claim post");
                return PostResult::Skipped;
            }
        }

        let outcome = self.attempt(&post, now).await;
        let status = outcome.status();

        match &outcome {
            PublishOutcome::Posted { tweet_id, .. } => {
                info!(post_id = %post.id, tweet_id = ?tweet_id, "Post published");
            }
            PublishOutcome::Failed { error, .. } => {
                warn!(post_id = %post.id, error = %error, "Post failed");
            }
        }

        match self.store.update_status(&post.id, outcome).await {
            Ok(_) if status == PostStatus::Posted => PostResult::Published,
            Ok(_) => PostResult::Failed,
            Err(e) => {
                error!(
                    post_id = %post.id,
                    status = %status,
                    error = %e,
                    "Failed to record publish outcome; stored status may be stale"
                );
                PostResult::Unrecorded
            }
        }
    }

    /// Everything between claim and persist; never fails, only resolves
    async fn attempt(&self, post: &ScheduledPost, now: i64) -> PublishOutcome {
        let creds = match self.accounts.credentials(&post.account_id).await {
            Ok(creds) => creds,
            Err(e) => {
                return PublishOutcome::Failed {
                    posted_at: now,
                    error: e.to_string(),
                }
            }
        };

        let request = PublishRequest::from(post);

        match self.publish_with_retry(&request, &creds).await {
            Ok(receipt) if receipt.success => {
                let media_url = self.enrich(post, receipt.tweet_id.as_deref(), &creds).await;
                PublishOutcome::Posted {
                    posted_at: now,
                    tweet_id: receipt.tweet_id,
                    media_url,
                }
            }
            Ok(_) => PublishOutcome::Failed {
                posted_at: now,
                error: PublishError::NonSuccess(format!(
                    "{} answered success=false",
                    self.publisher.name()
                ))
                .to_string(),
            },
            Err(e) => PublishOutcome::Failed {
                posted_at: now,
                error: e.to_string(),
            },
        }
    }

    async fn publish_with_retry(
        &self,
        request: &PublishRequest,
        creds: &Credentials,
    ) -> Result<PublishReceipt> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = match timeout(
                self.config.publish_timeout(),
                self.publisher.publish(request, creds),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(PublishError::Timeout(self.config.publish_timeout).into()),
            };

            match result {
                Ok(receipt) => {
                    if attempt > 1 {
                        info!(post_id = %request.post_id, attempt, "Published after retry");
                    }
                    return Ok(receipt);
                }
                Err(e) if is_transient(&e) && attempt < max_attempts => {
                    let delay = self.config.retry_delay(attempt);
                    warn!(
                        post_id = %request.post_id,
                        attempt,
                        max_attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Transient publish error; retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if is_transient(&e) {
                        warn!(
                            post_id = %request.post_id,
                            attempts = max_attempts,
                            error = %e,
                            "Giving up after repeated transient errors"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Best-effort media URL lookup; never changes the outcome
    async fn enrich(
        &self,
        post: &ScheduledPost,
        tweet_id: Option<&str>,
        creds: &Credentials,
    ) -> Option<String> {
        if !self.config.enrich_media || post.media_ids.is_empty() {
            return None;
        }
        let tweet_id = tweet_id?;

        match timeout(
            self.config.publish_timeout(),
            self.publisher.resolve_media(tweet_id, creds),
        )
        .await
        {
            Ok(Ok(info)) => Some(info.url),
            Ok(Err(e)) => {
                warn!(post_id = %post.id, error = %e, "Media lookup failed");
                None
            }
            Err(_) => {
                warn!(
                    post_id = %post.id,
                    timeout_secs = self.config.publish_timeout,
                    "Media lookup timed out"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::publisher::mock::MockPublisher;
    use crate::types::Account;
    use std::time::Duration;

    fn fast_config() -> DispatcherConfig {
        DispatcherConfig {
            retry_base_delay_ms: 1,
            publish_timeout: 1,
            ..Default::default()
        }
    }

    async fn setup(publisher: MockPublisher, config: DispatcherConfig) -> (Database, Dispatcher) {
        let db = Database::in_memory().await.unwrap();
        db.upsert_account(&Account::new("acct-1".to_string(), "alice".to_string()))
            .await
            .unwrap();

        let dispatcher = Dispatcher::new(
            config,
            Arc::new(db.clone()),
            Arc::new(db.clone()),
            Arc::new(publisher),
        );
        (db, dispatcher)
    }

    async fn add_post(db: &Database, content: &str, scheduled_at: i64) -> ScheduledPost {
        let post = ScheduledPost::new("acct-1".to_string(), content.to_string(), scheduled_at);
        db.create_post(&post).await.unwrap();
        post
    }

    async fn stored(db: &Database, post: &ScheduledPost) -> ScheduledPost {
        db.get_post(&post.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_queued_posts_are_claimed_when_they_start() {
        let publisher = MockPublisher::with_delay("mock", Duration::from_millis(1100));
        let config = DispatcherConfig {
            max_concurrency: 1,
            publish_timeout: 5,
            enrich_media: false,
            ..Default::default()
        };
        let (db, dispatcher) = setup(publisher, config).await;
        let first = add_post(&db, "first", 100).await;
        let second = add_post(&db, "second", 200).await;

        let report = dispatcher.run_once_at(1000).await.unwrap();
        assert_eq!(report.published, 2);

        let first = stored(&db, &first).await;
        let second = stored(&db, &second).await;
        assert_eq!(first.claimed_at, Some(1000));
        assert!(second.claimed_at.unwrap() >= 1001, "second waited behind the first");
        assert_eq!(second.posted_at, Some(1000), "outcomes keep the run's time");
    }

    #[tokio::test]
    async fn test_empty_due_set() {
        let publisher = MockPublisher::success("mock");
        let (_db, dispatcher) = setup(publisher.clone(), fast_config()).await;

        let report = dispatcher.run_once_at(1000).await.unwrap();
        assert_eq!(report, DispatchReport::default());
        assert_eq!(publisher.publish_call_count(), 0);
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let publisher = MockPublisher::transient_then_success("mock", 2);
        let (db, dispatcher) = setup(publisher.clone(), fast_config()).await;
        let post = add_post(&db, "retry me", 100).await;

        let report = dispatcher.run_once_at(200).await.unwrap();

        assert_eq!(report.published, 1);
        assert_eq!(publisher.publish_call_count(), 3);
        assert_eq!(stored(&db, &post).await.status, PostStatus::Posted);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let publisher = MockPublisher::transient_then_success("mock", 10);
        let (db, dispatcher) = setup(publisher.clone(), fast_config()).await;
        let post = add_post(&db, "never works", 100).await;

        let report = dispatcher.run_once_at(200).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(publisher.publish_call_count(), 3, "default max_attempts is 3");

        let post = stored(&db, &post).await;
        assert_eq!(post.status, PostStatus::Failed);
        assert!(post.error_message.unwrap().contains("Network error"));
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let publisher =
            MockPublisher::failure("mock", PublishError::Authentication("revoked".to_string()));
        let (db, dispatcher) = setup(publisher.clone(), fast_config()).await;
        add_post(&db, "x", 100).await;

        let report = dispatcher.run_once_at(200).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(publisher.publish_call_count(), 1);
    }

    #[tokio::test]
    async fn test_non_success_receipt_fails_without_retry() {
        let publisher = MockPublisher::non_success("mock");
        let (db, dispatcher) = setup(publisher.clone(), fast_config()).await;
        let post = add_post(&db, "x", 100).await;

        let report = dispatcher.run_once_at(200).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(publisher.publish_call_count(), 1);

        let post = stored(&db, &post).await;
        assert_eq!(post.status, PostStatus::Failed);
        assert_eq!(post.posted_at, Some(200));
        assert_eq!(post.tweet_id, None);
        assert!(post.error_message.unwrap().contains("success=false"));
    }

    #[tokio::test]
    async fn test_hung_publish_times_out() {
        let publisher = MockPublisher::with_delay("mock", Duration::from_secs(5));
        let config = DispatcherConfig {
            max_attempts: 1,
            ..fast_config()
        };
        let (db, dispatcher) = setup(publisher, config).await;
        let post = add_post(&db, "slow", 100).await;

        let started = std::time::Instant::now();
        let report = dispatcher.run_once_at(200).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(report.failed, 1);
        let post = stored(&db, &post).await;
        assert!(post.error_message.unwrap().contains("Timed out after 1s"));
    }

    #[tokio::test]
    async fn test_unknown_account_fails_post() {
        let publisher = MockPublisher::success("mock");
        let (db, dispatcher) = setup(publisher.clone(), fast_config()).await;

        db.upsert_account(&Account::new("acct-2".to_string(), "bob".to_string()))
            .await
            .unwrap();
        let post = ScheduledPost::new("acct-2".to_string(), "orphan".to_string(), 100);
        db.create_post(&post).await.unwrap();
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query("DELETE FROM accounts WHERE id = 'acct-2'")
            .execute(db.pool())
            .await
            .unwrap();

        let report = dispatcher.run_once_at(200).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(publisher.publish_call_count(), 0);
        let post = stored(&db, &post).await;
        assert!(post.error_message.unwrap().contains("Account not found"));
    }

    #[tokio::test]
    async fn test_enrichment_skipped_without_media() {
        let publisher = MockPublisher::success("mock");
        let (db, dispatcher) = setup(publisher.clone(), fast_config()).await;
        let post = add_post(&db, "text only", 100).await;

        dispatcher.run_once_at(200).await.unwrap();

        assert_eq!(publisher.resolve_call_count(), 0);
        assert_eq!(stored(&db, &post).await.media_url, None);
    }

    #[tokio::test]
    async fn test_enrichment_disabled_by_config() {
        let publisher = MockPublisher::success("mock");
        let config = DispatcherConfig {
            enrich_media: false,
            ..fast_config()
        };
        let (db, dispatcher) = setup(publisher.clone(), config).await;
        let post = ScheduledPost::new("acct-1".to_string(), "pic".to_string(), 100)
            .with_media(vec!["m1".to_string()]);
        db.create_post(&post).await.unwrap();

        dispatcher.run_once_at(200).await.unwrap();

        assert_eq!(publisher.resolve_call_count(), 0);
        let post = stored(&db, &post).await;
        assert_eq!(post.status, PostStatus::Posted);
        assert_eq!(post.media_url, None);
    }

    #[tokio::test]
    async fn test_stale_claims_are_failed() {
        let publisher = MockPublisher::success("mock");
        let config = DispatcherConfig {
            claim_timeout: 60,
            ..fast_config()
        };
        let (db, dispatcher) = setup(publisher.clone(), config).await;

        let post = add_post(&db, "crashed mid-publish", 100).await;
        assert!(db.claim(&post.id, 100).await.unwrap());

        let report = dispatcher.run_once_at(1000).await.unwrap();

        assert_eq!(report.expired_claims, 1);
        assert_eq!(report.due, 0);
        assert_eq!(publisher.publish_call_count(), 0, "crashed publishes are not retried");
        assert_eq!(stored(&db, &post).await.status, PostStatus::Failed);
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let publisher = MockPublisher::with_delay("mock", Duration::from_millis(100));
        let config = DispatcherConfig {
            max_concurrency: 4,
            publish_timeout: 5,
            ..fast_config()
        };
        let (db, dispatcher) = setup(publisher.clone(), config).await;
        for i in 0..8 {
            add_post(&db, &format!("post {}", i), 100).await;
        }

        let started = std::time::Instant::now();
        let report = dispatcher.run_once_at(200).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(report.published, 8);
        assert!(elapsed >= Duration::from_millis(200), "8 posts at 4 wide take two rounds");
        assert!(elapsed < Duration::from_millis(800), "posts must run concurrently");
    }
}
