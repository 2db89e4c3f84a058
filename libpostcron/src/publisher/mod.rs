//! Publish client abstraction and implementations
//!
//! The dispatcher only knows about the [`Publisher`] trait. The HTTP publisher
//! forwards posts to the web application that owns the platform tokens; the
//! mock publisher is used by tests and dry runs.
//!
//! # Examples
//!
//! ```no_run
//! use libpostcron::publisher::{http::HttpPublisher, PublishRequest, Publisher};
//! use libpostcron::config::PublisherConfig;
//! use libpostcron::types::Credentials;
//!
//! # async fn example() -> libpostcron::error::Result<()> {
//! let config = PublisherConfig::default();
//! let publisher = HttpPublisher::new(&config)?;
//!
//! let request = PublishRequest {
//!     post_id: "post-1".to_string(),
//!     content: "Hello from the queue".to_string(),
//!     media_ids: vec![],
//! };
//! let creds = Credentials {
//!     account_id: "acct-1".to_string(),
//!     username: "alice".to_string(),
//!     access_token: None,
//! };
//!
//! let receipt = publisher.publish(&request, &creds).await?;
//! println!("success: {}", receipt.success);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PublishError, Result};
use crate::types::{Credentials, ScheduledPost};

pub mod http;

// Available in all builds so integration tests and `--dry-run` can use it
pub mod mock;

/// What gets handed to the publisher for one post
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    pub post_id: String,
    pub content: String,
    pub media_ids: Vec<String>,
}

impl From<&ScheduledPost> for PublishRequest {
    fn from(post: &ScheduledPost) -> Self {
        Self {
            post_id: post.id.clone(),
            content: post.content.clone(),
            media_ids: post.media_ids.clone(),
        }
    }
}

/// Result reported by a publisher that answered at all.
///
/// `success = false` is an explicit non-success and is treated as a permanent
/// failure by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    pub success: bool,
    #[serde(default)]
    pub tweet_id: Option<String>,
}

/// Display metadata resolved after a successful publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub url: String,
}

/// Publish client trait
///
/// Implementations perform the network action of publishing. They may fail
/// transiently (`Network`, `Timeout`, `RateLimit`) or permanently; the
/// dispatcher decides whether to retry based on
/// [`PublishError::is_transient`](crate::error::PublishError::is_transient).
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one post on behalf of an account
    ///
    /// # Errors
    ///
    /// Returns `PostcronError::Publish` for any failure to get an answer from
    /// the publishing side. An answer with `success = false` is returned as an
    /// `Ok` receipt.
    async fn publish(&self, request: &PublishRequest, creds: &Credentials) -> Result<PublishReceipt>;

    /// Resolve the media URL of a published post.
    ///
    /// Best effort; the default implementation reports `NotImplemented`.
    async fn resolve_media(&self, tweet_id: &str, creds: &Credentials) -> Result<MediaInfo> {
        let _ = creds;
        Err(PublishError::NotImplemented(format!(
            "{} cannot resolve media for {}",
            self.name(),
            tweet_id
        ))
        .into())
    }

    /// Short name used in logs
    fn name(&self) -> &str;
}
