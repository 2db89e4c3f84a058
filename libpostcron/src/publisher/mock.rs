//! Mock publisher for testing and dry runs
//!
//! Configurable to simulate successes, permanent and transient failures,
//! explicit non-success answers, latency, and enrichment failures. Calls are
//! counted, and requests are recorded unless `record_requests` is off.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{PublishError, Result};
use crate::publisher::{MediaInfo, PublishReceipt, PublishRequest, Publisher};
use crate::types::Credentials;

/// Configuration for mock publisher behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub name: String,

    /// Error returned by every publish call (after any transient failures)
    pub publish_error: Option<PublishError>,

    /// Value of `success` in the receipt when no error is configured
    pub receipt_success: bool,

    /// Whether successful receipts carry a tweet id
    pub returns_tweet_id: bool,

    /// Number of leading publish calls that fail with a network error
    pub transient_failures: usize,

    /// Posts whose content is listed here are rejected permanently
    pub rejected_content: Vec<String>,

    /// Delay before each publish completes
    pub delay: Duration,

    /// URL returned by `resolve_media`; `None` makes enrichment fail
    pub media_url: Option<String>,

    pub publish_call_count: Arc<Mutex<usize>>,
    pub resolve_call_count: Arc<Mutex<usize>>,

    /// Keep every request in `published`; off for long-running dry runs
    pub record_requests: bool,

    /// Requests that reached the publisher, in call order
    pub published: Arc<Mutex<Vec<PublishRequest>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            publish_error: None,
            receipt_success: true,
            returns_tweet_id: true,
            transient_failures: 0,
            rejected_content: Vec::new(),
            delay: Duration::from_millis(0),
            media_url: Some("https://media.mock/image.jpg".to_string()),
            publish_call_count: Arc::new(Mutex::new(0)),
            resolve_call_count: Arc::new(Mutex::new(0)),
            record_requests: true,
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Lock ignoring poisoning; a panicking test thread must not hide the counts
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
pub struct MockPublisher {
    config: MockConfig,
}

impl MockPublisher {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// Always publishes successfully and resolves media
    pub fn success(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// Accepts every post without inventing a tweet id or media URL, and
    /// keeps no request history
    pub fn dry_run() -> Self {
        Self::new(MockConfig {
            name: "dry-run".to_string(),
            returns_tweet_id: false,
            media_url: None,
            record_requests: false,
            ..Default::default()
        })
    }

    /// Every publish call fails with `error`
    pub fn failure(name: &str, error: PublishError) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            publish_error: Some(error),
            ..Default::default()
        })
    }

    /// Publisher answers, but with `success = false`
    pub fn non_success(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            receipt_success: false,
            returns_tweet_id: false,
            ..Default::default()
        })
    }

    /// Fails `failures` times with a network error, then succeeds
    pub fn transient_then_success(name: &str, failures: usize) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            transient_failures: failures,
            ..Default::default()
        })
    }

    pub fn with_delay(name: &str, delay: Duration) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            delay,
            ..Default::default()
        })
    }

    /// Publishes fine but cannot resolve media
    pub fn media_failure(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            media_url: None,
            ..Default::default()
        })
    }

    /// Rejects posts with the given contents, publishes the rest
    pub fn rejecting(name: &str, contents: &[&str]) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            rejected_content: contents.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        })
    }

    pub fn publish_call_count(&self) -> usize {
        *lock(&self.config.publish_call_count)
    }

    pub fn resolve_call_count(&self) -> usize {
        *lock(&self.config.resolve_call_count)
    }

    /// Post ids in the order they were sent to the publisher
    pub fn published_post_ids(&self) -> Vec<String> {
        lock(&self.config.published)
            .iter()
            .map(|r| r.post_id.clone())
            .collect()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, request: &PublishRequest, _creds: &Credentials) -> Result<PublishReceipt> {
        let call = {
            let mut count = lock(&self.config.publish_call_count);
            *count += 1;
            *count
        };
        if self.config.record_requests {
            lock(&self.config.published).push(request.clone());
        }

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        if call <= self.config.transient_failures {
            return Err(PublishError::Network(format!(
                "Mock transient failure {} of {}",
                call, self.config.transient_failures
            ))
            .into());
        }

        if self.config.rejected_content.contains(&request.content) {
            return Err(PublishError::Rejected(format!(
                "Mock rejected content of post {}",
                request.post_id
            ))
            .into());
        }

        if let Some(error) = &self.config.publish_error {
            return Err(error.clone().into());
        }

        let tweet_id = (self.config.receipt_success && self.config.returns_tweet_id)
            .then(|| format!("{}-{}", self.config.name, uuid::Uuid::new_v4()));

        Ok(PublishReceipt {
            success: self.config.receipt_success,
            tweet_id,
        })
    }

    async fn resolve_media(&self, tweet_id: &str, _creds: &Credentials) -> Result<MediaInfo> {
        *lock(&self.config.resolve_call_count) += 1;

        match &self.config.media_url {
            Some(url) => Ok(MediaInfo { url: url.clone() }),
            None => Err(PublishError::Network(format!(
                "Mock media lookup failed for {}",
                tweet_id
            ))
            .into()),
        }
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}
