//! Core types for Postcron

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// A post waiting for (or past) its publish time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledPost {
    pub id: String,
    pub account_id: String,
    pub content: String,
    /// Opaque media identifiers handed to the publisher, in order
    pub media_ids: Vec<String>,
    /// Unix timestamp; the post is due once `now >= scheduled_at`
    pub scheduled_at: i64,
    pub status: PostStatus,
    /// When a dispatcher claimed the post (only meaningful while `publishing`)
    pub claimed_at: Option<i64>,
    /// When the publish attempt resolved, success or failure
    pub posted_at: Option<i64>,
    pub tweet_id: Option<String>,
    pub media_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
}

impl ScheduledPost {
    pub fn new(account_id: String, content: String, scheduled_at: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            account_id,
            content,
            media_ids: Vec::new(),
            scheduled_at,
            status: PostStatus::Scheduled,
            claimed_at: None,
            posted_at: None,
            tweet_id: None,
            media_url: None,
            error_message: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_media(mut self, media_ids: Vec<String>) -> Self {
        self.media_ids = media_ids;
        self
    }

    /// Due means still `scheduled` and the scheduled time has been reached
    pub fn is_due(&self, now: i64) -> bool {
        self.status == PostStatus::Scheduled && self.scheduled_at <= now
    }
}

/// Lifecycle of a scheduled post.
///
/// ```text
/// scheduled -> publishing -> posted
///                        \-> failed -> (re-queue) scheduled
/// ```
///
/// `publishing` is the claim marker held by exactly one dispatcher while the
/// publish call is in flight. `posted` is terminal. `failed` is terminal for
/// the dispatcher; only an explicit re-schedule puts it back in the queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Scheduled,
    Publishing,
    Posted,
    Failed,
}

impl PostStatus {
    pub const ALL: [PostStatus; 4] = [
        PostStatus::Scheduled,
        PostStatus::Publishing,
        PostStatus::Posted,
        PostStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Scheduled => "scheduled",
            PostStatus::Publishing => "publishing",
            PostStatus::Posted => "posted",
            PostStatus::Failed => "failed",
        }
    }

    /// Terminal statuses are never left by the dispatcher
    pub fn is_terminal(&self) -> bool {
        matches!(self, PostStatus::Posted | PostStatus::Failed)
    }

    /// Transitions the dispatcher may perform
    pub fn can_transition_to(&self, next: PostStatus) -> bool {
        matches!(
            (self, next),
            (PostStatus::Scheduled, PostStatus::Publishing)
                | (PostStatus::Publishing, PostStatus::Posted)
                | (PostStatus::Publishing, PostStatus::Failed)
        )
    }

    /// Whether a post in this status may be (re)scheduled from outside the dispatcher
    pub fn can_reschedule(&self) -> bool {
        matches!(self, PostStatus::Scheduled | PostStatus::Failed)
    }

    /// Statuses the dispatcher may move to `next` from
    pub fn sources_of(next: PostStatus) -> Vec<PostStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }

    /// Statuses a post may be rescheduled from
    pub fn reschedulable() -> Vec<PostStatus> {
        Self::ALL.into_iter().filter(|s| s.can_reschedule()).collect()
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scheduled" => Ok(PostStatus::Scheduled),
            "publishing" => Ok(PostStatus::Publishing),
            // Older rows used `completed` for a successful publish
            "posted" | "completed" | "published" => Ok(PostStatus::Posted),
            "failed" => Ok(PostStatus::Failed),
            _ => Err(format!(
                "Invalid status: '{}'. Valid options: scheduled, publishing, posted, failed",
                s
            )),
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a claimed post resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Posted {
        posted_at: i64,
        tweet_id: Option<String>,
        media_url: Option<String>,
    },
    Failed {
        posted_at: i64,
        error: String,
    },
}

impl PublishOutcome {
    pub fn status(&self) -> PostStatus {
        match self {
            PublishOutcome::Posted { .. } => PostStatus::Posted,
            PublishOutcome::Failed { .. } => PostStatus::Failed,
        }
    }

    pub fn posted_at(&self) -> i64 {
        match self {
            PublishOutcome::Posted { posted_at, .. } | PublishOutcome::Failed { posted_at, .. } => {
                *posted_at
            }
        }
    }
}

/// Publishing identity, owned by the account-management side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub created_at: i64,
}

impl Account {
    pub fn new(id: String, username: String) -> Self {
        Self {
            id,
            username,
            access_token: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// What a publisher needs to act on behalf of an account
#[derive(Debug)]
pub struct Credentials {
    pub account_id: String,
    pub username: String,
    pub access_token: Option<SecretString>,
}

impl From<Account> for Credentials {
    fn from(account: Account) -> Self {
        Self {
            account_id: account.id,
            username: account.username,
            access_token: account.access_token.map(SecretString::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_new_post_defaults() {
        let post = ScheduledPost::new("acct-1".to_string(), "Hello".to_string(), 1_700_000_000);

        assert!(Uuid::parse_str(&post.id).is_ok(), "Post ID should be a valid UUID");
        assert_eq!(post.status, PostStatus::Scheduled);
        assert!(post.media_ids.is_empty());
        assert_eq!(post.posted_at, None);
        assert_eq!(post.claimed_at, None);
        assert_eq!(post.tweet_id, None);
        assert_eq!(post.media_url, None);
    }

    #[test]
    fn test_new_post_unique_ids() {
        let a = ScheduledPost::new("acct".to_string(), "one".to_string(), 0);
        let b = ScheduledPost::new("acct".to_string(), "two".to_string(), 0);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_is_due_boundaries() {
        let post = ScheduledPost::new("acct".to_string(), "x".to_string(), 1000);

        assert!(!post.is_due(999));
        assert!(post.is_due(1000), "scheduled_at == now is due");
        assert!(post.is_due(1001));
    }

    #[test]
    fn test_is_due_requires_scheduled_status() {
        let mut post = ScheduledPost::new("acct".to_string(), "x".to_string(), 1000);
        for status in [PostStatus::Publishing, PostStatus::Posted, PostStatus::Failed] {
            post.status = status;
            assert!(!post.is_due(2000), "{} posts are never due", status);
        }
    }

    #[test]
    fn test_dispatcher_transitions() {
        use PostStatus::*;

        assert!(Scheduled.can_transition_to(Publishing));
        assert!(Publishing.can_transition_to(Posted));
        assert!(Publishing.can_transition_to(Failed));

        assert!(!Scheduled.can_transition_to(Posted), "publish requires a claim");
        assert!(!Scheduled.can_transition_to(Failed));
        assert!(!Publishing.can_transition_to(Scheduled));

        assert_eq!(PostStatus::sources_of(Publishing), vec![Scheduled]);
        assert_eq!(PostStatus::sources_of(Posted), vec![Publishing]);
        assert_eq!(PostStatus::sources_of(Failed), vec![Publishing]);
        assert!(PostStatus::sources_of(Scheduled).is_empty());
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_transitions() {
        for from in PostStatus::ALL.iter().filter(|s| s.is_terminal()) {
            for to in PostStatus::ALL {
                assert!(
                    !from.can_transition_to(to),
                    "{} -> {} must not be allowed",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_reschedule_rules() {
        assert!(PostStatus::Scheduled.can_reschedule());
        assert!(PostStatus::Failed.can_reschedule());
        assert!(!PostStatus::Publishing.can_reschedule());
        assert!(!PostStatus::Posted.can_reschedule());
        assert_eq!(
            PostStatus::reschedulable(),
            vec![PostStatus::Scheduled, PostStatus::Failed]
        );
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("scheduled".parse::<PostStatus>().unwrap(), PostStatus::Scheduled);
        assert_eq!("PUBLISHING".parse::<PostStatus>().unwrap(), PostStatus::Publishing);
        assert_eq!("posted".parse::<PostStatus>().unwrap(), PostStatus::Posted);
        assert_eq!("completed".parse::<PostStatus>().unwrap(), PostStatus::Posted);
        assert_eq!("published".parse::<PostStatus>().unwrap(), PostStatus::Posted);
        assert_eq!("failed".parse::<PostStatus>().unwrap(), PostStatus::Failed);

        let err = "draft".parse::<PostStatus>().unwrap_err();
        assert!(err.contains("Invalid status: 'draft'"));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&PostStatus::Posted).unwrap();
        assert_eq!(json, r#""posted""#);

        let status: PostStatus = serde_json::from_str(r#""publishing""#).unwrap();
        assert_eq!(status, PostStatus::Publishing);
    }

    #[test]
    fn test_post_serializes_camel_case() {
        let post = ScheduledPost::new("acct".to_string(), "x".to_string(), 5)
            .with_media(vec!["m1".to_string()]);
        let value = serde_json::to_value(&post).unwrap();

        assert_eq!(value["accountId"], "acct");
        assert_eq!(value["scheduledAt"], 5);
        assert_eq!(value["mediaIds"][0], "m1");
        assert_eq!(value["status"], "scheduled");
        assert!(value["postedAt"].is_null());
    }

    #[test]
    fn test_outcome_status_and_time() {
        let posted = PublishOutcome::Posted {
            posted_at: 10,
            tweet_id: Some("t1".to_string()),
            media_url: None,
        };
        assert_eq!(posted.status(), PostStatus::Posted);
        assert_eq!(posted.posted_at(), 10);

        let failed = PublishOutcome::Failed {
            posted_at: 11,
            error: "boom".to_string(),
        };
        assert_eq!(failed.status(), PostStatus::Failed);
        assert_eq!(failed.posted_at(), 11);
    }

    #[test]
    fn test_credentials_from_account() {
        let mut account = Account::new("acct-1".to_string(), "alice".to_string());
        account.access_token = Some("tok".to_string());

        let creds = Credentials::from(account);
        assert_eq!(creds.account_id, "acct-1");
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.access_token.as_ref().unwrap().expose_secret(), "tok");
        assert!(!format!("{:?}", creds).contains("tok"), "token must not leak into Debug");
    }

    #[test]
    fn test_account_token_not_serialized() {
        let mut account = Account::new("acct-1".to_string(), "alice".to_string());
        account.access_token = Some("secret-token".to_string());

        let json = serde_json::to_string(&account).unwrap();
        assert!(!json.contains("secret-token"));
    }
}
