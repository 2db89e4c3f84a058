//! Storage seams consumed by the dispatcher and the scheduling endpoint
//!
//! The post store is the single arbiter of post status. Every status change
//! goes through a conditional update so that two dispatchers racing on the
//! same due set cannot both publish a post.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Credentials, PublishOutcome, ScheduledPost};

/// Request to put a post (back) on the schedule
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRequest {
    pub post_id: String,
    pub scheduled_at: i64,
    /// Replaces the stored media list when present
    pub media_ids: Option<Vec<String>>,
}

#[async_trait]
pub trait PostStore: Send + Sync {
    /// Posts with `status = scheduled` and `scheduled_at <= now`
    async fn list_due(&self, now: i64) -> Result<Vec<ScheduledPost>>;

    async fn get_post(&self, post_id: &str) -> Result<Option<ScheduledPost>>;

    /// Atomically move a post from `scheduled` to `publishing`.
    ///
    /// Returns `false` when the post is no longer `scheduled` (another
    /// dispatcher won the claim, or it was rescheduled into the future).
    async fn claim(&self, post_id: &str, now: i64) -> Result<bool>;

    /// Record the terminal outcome of a claimed post.
    ///
    /// # Errors
    ///
    /// `NotFound` when the post does not exist, `InvalidTransition` when it is
    /// not currently `publishing`.
    async fn update_status(&self, post_id: &str, outcome: PublishOutcome) -> Result<ScheduledPost>;

    /// Fail claims older than `claimed_before`; returns how many were failed
    async fn fail_stale_claims(&self, claimed_before: i64, now: i64) -> Result<u64>;

    /// Set a post to `scheduled` at a new time.
    ///
    /// # Errors
    ///
    /// `NotFound` when the post does not exist, `InvalidTransition` when it is
    /// in flight or already posted.
    async fn schedule(&self, request: &ScheduleRequest) -> Result<ScheduledPost>;
}

#[async_trait]
pub trait AccountLookup: Send + Sync {
    /// Resolve an account reference to publishing credentials
    async fn credentials(&self, account_id: &str) -> Result<Credentials>;
}
