//! Scheduling requests and time parsing
//!
//! Two entry points feed the post store's `schedule` operation: the HTTP
//! endpoint, which receives machine timestamps, and `postcron-queue`, which
//! accepts human-friendly times.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::info;

use crate::error::{PostcronError, Result};
use crate::store::{PostStore, ScheduleRequest};
use crate::types::ScheduledPost;

/// Parse a schedule string relative to `now`
///
/// Supports, in order:
/// - `now`
/// - RFC 3339 timestamps: "2025-11-20T15:00:00Z"
/// - Relative durations: "30m", "2h 30m", "1d"
/// - Natural language: "tomorrow 3pm", "next monday 10am"
///
/// # Errors
///
/// Returns `InvalidInput` if the string is empty or matches none of the formats.
pub fn parse_when(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(PostcronError::InvalidInput(
            "Schedule time cannot be empty".to_string(),
        ));
    }

    if input.eq_ignore_ascii_case("now") {
        return Ok(now);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(duration) = parse_duration(input) {
        return now.checked_add_signed(duration).ok_or_else(|| {
            PostcronError::InvalidInput(format!("Schedule time '{}' is too far in the future", input))
        });
    }

    chrono_english::parse_date_string(input, now, chrono_english::Dialect::Us).map_err(|e| {
        PostcronError::InvalidInput(format!("Could not parse schedule time '{}': {}", input, e))
    })
}

fn parse_duration(input: &str) -> Result<Duration> {
    let std_duration = humantime::parse_duration(input)
        .map_err(|e| PostcronError::InvalidInput(format!("Could not parse duration: {}", e)))?;

    Duration::from_std(std_duration)
        .map_err(|_| PostcronError::InvalidInput("Duration out of range".to_string()))
}

/// Timestamp as sent by the web application: an RFC 3339 string or epoch milliseconds
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    Millis(i64),
    Text(String),
}

impl WireTimestamp {
    /// Unix seconds
    pub fn to_unix(&self) -> Result<i64> {
        match self {
            WireTimestamp::Millis(ms) => Ok(ms.div_euclid(1000)),
            WireTimestamp::Text(text) => DateTime::parse_from_rfc3339(text.trim())
                .map(|dt| dt.timestamp())
                .map_err(|e| {
                    PostcronError::InvalidInput(format!(
                        "scheduledAt '{}' is not an RFC 3339 timestamp: {}",
                        text, e
                    ))
                }),
        }
    }
}

/// Body of `POST /schedule`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleBody {
    pub post_id: String,
    pub scheduled_at: WireTimestamp,
    #[serde(default)]
    pub media_ids: Option<Vec<String>>,
}

impl ScheduleBody {
    pub fn into_request(self) -> Result<ScheduleRequest> {
        let post_id = self.post_id.trim().to_string();
        if post_id.is_empty() {
            return Err(PostcronError::InvalidInput("postId cannot be empty".to_string()));
        }

        let scheduled_at = self.scheduled_at.to_unix()?;

        if let Some(media_ids) = &self.media_ids {
            if media_ids.iter().any(|id| id.trim().is_empty()) {
                return Err(PostcronError::InvalidInput(
                    "mediaIds cannot contain empty identifiers".to_string(),
                ));
            }
        }

        Ok(ScheduleRequest {
            post_id,
            scheduled_at,
            media_ids: self.media_ids,
        })
    }
}

/// Put a post (back) on the schedule
///
/// Delegates to the store's conditional update; `scheduled` and `failed`
/// posts can be scheduled, anything in flight or posted cannot.
pub async fn schedule_post(store: &dyn PostStore, request: ScheduleRequest) -> Result<ScheduledPost> {
    let post = store.schedule(&request).await?;

    info!(
        post_id = %post.id,
        scheduled_at = post.scheduled_at,
        media = post.media_ids.len(),
        "Post scheduled"
    );

    Ok(post)
}
