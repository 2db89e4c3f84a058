//! SQLite post store for Postcron

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{AccountError, DbError, PostcronError, Result};
use crate::store::{AccountLookup, PostStore, ScheduleRequest};
use crate::types::{Account, Credentials, PostStatus, PublishOutcome, ScheduledPost};

const POST_COLUMNS: &str = "id, account_id, content, media_ids, scheduled_at, status, \
     claimed_at, posted_at, tweet_id, media_url, error_message, created_at";

const STALE_CLAIM_ERROR: &str = "claim expired before the publish attempt was recorded";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // mode=rwc creates the file on first use
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        Self::from_pool(pool).await
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        // Every connection to :memory: is a separate database, so pin one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(DbError::SqlxError)?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool; later operations fail with a database error
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert or replace an account
    pub async fn upsert_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, username, access_token, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                access_token = excluded.access_token
            "#,
        )
        .bind(&account.id)
        .bind(&account.username)
        .bind(&account.access_token)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, username, access_token, created_at
            FROM accounts WHERE id = ?
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| -> Result<Account> {
            Ok(Account {
                id: r.try_get("id").map_err(DbError::SqlxError)?,
                username: r.try_get("username").map_err(DbError::SqlxError)?,
                access_token: r.try_get("access_token").map_err(DbError::SqlxError)?,
                created_at: r.try_get("created_at").map_err(DbError::SqlxError)?,
            })
        })
        .transpose()
    }

    /// Insert a new post
    pub async fn create_post(&self, post: &ScheduledPost) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_posts
                (id, account_id, content, media_ids, scheduled_at, status,
                 claimed_at, posted_at, tweet_id, media_url, error_message, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.account_id)
        .bind(&post.content)
        .bind(encode_media_ids(&post.media_ids))
        .bind(post.scheduled_at)
        .bind(post.status.as_str())
        .bind(post.claimed_at)
        .bind(post.posted_at)
        .bind(&post.tweet_id)
        .bind(&post.media_url)
        .bind(&post.error_message)
        .bind(post.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<ScheduledPost>> {
        let query = format!("SELECT {} FROM scheduled_posts WHERE id = ?", POST_COLUMNS);

        let row = sqlx::query(&query)
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(post_from_row).transpose()
    }

    /// List posts ordered by scheduled time, optionally filtered by status
    pub async fn list_posts(
        &self,
        status: Option<PostStatus>,
        limit: usize,
    ) -> Result<Vec<ScheduledPost>> {
        let rows = match status {
            Some(status) => {
                let query = format!(
                    "SELECT {} FROM scheduled_posts WHERE status IN (?, ?) \
                     ORDER BY scheduled_at ASC LIMIT ?",
                    POST_COLUMNS
                );
                // Legacy `completed` rows are listed with `posted`
                let legacy = if status == PostStatus::Posted {
                    "completed"
                } else {
                    status.as_str()
                };
                sqlx::query(&query)
                    .bind(status.as_str())
                    .bind(legacy)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let query = format!(
                    "SELECT {} FROM scheduled_posts ORDER BY scheduled_at ASC LIMIT ?",
                    POST_COLUMNS
                );
                sqlx::query(&query)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Number of posts per status
    pub async fn count_by_status(&self) -> Result<HashMap<PostStatus, i64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM scheduled_posts GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        let mut counts: HashMap<PostStatus, i64> =
            PostStatus::ALL.iter().map(|s| (*s, 0)).collect();

        for row in rows {
            let raw: String = row.try_get("status").map_err(DbError::SqlxError)?;
            let count: i64 = row.try_get("count").map_err(DbError::SqlxError)?;
            let status = raw.parse::<PostStatus>().map_err(|reason| DbError::CorruptRow {
                post_id: "<aggregate>".to_string(),
                reason,
            })?;
            *counts.entry(status).or_insert(0) += count;
        }

        Ok(counts)
    }

    /// Resolve why a conditional update touched no row
    async fn transition_error(&self, post_id: &str, to: PostStatus) -> PostcronError {
        match self.get_post(post_id).await {
            Ok(Some(post)) => PostcronError::InvalidTransition {
                post_id: post_id.to_string(),
                from: post.status,
                to,
            },
            Ok(None) => PostcronError::NotFound(post_id.to_string()),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl PostStore for Database {
    async fn list_due(&self, now: i64) -> Result<Vec<ScheduledPost>> {
        let query = format!(
            "SELECT {} FROM scheduled_posts \
             WHERE status = ? AND scheduled_at <= ? \
             ORDER BY scheduled_at ASC",
            POST_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(PostStatus::Scheduled.as_str())
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    async fn get_post(&self, post_id: &str) -> Result<Option<ScheduledPost>> {
        Database::get_post(self, post_id).await
    }

    async fn claim(&self, post_id: &str, now: i64) -> Result<bool> {
        let sources = PostStatus::sources_of(PostStatus::Publishing);
        let query = format!(
            "UPDATE scheduled_posts SET status = ?, claimed_at = ? \
             WHERE id = ? AND status IN ({}) AND scheduled_at <= ?",
            placeholders(sources.len())
        );

        let mut update = sqlx::query(&query)
            .bind(PostStatus::Publishing.as_str())
            .bind(now)
            .bind(post_id);
        for status in &sources {
            update = update.bind(status.as_str());
        }

        let result = update
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_status(&self, post_id: &str, outcome: PublishOutcome) -> Result<ScheduledPost> {
        let to = outcome.status();
        let sources = PostStatus::sources_of(to);

        let (tweet_id, media_url, error) = match &outcome {
            PublishOutcome::Posted {
                tweet_id,
                media_url,
                ..
            } => (tweet_id.as_deref(), media_url.as_deref(), None),
            PublishOutcome::Failed { error, .. } => (None, None, Some(error.as_str())),
        };

        let query = format!(
            "UPDATE scheduled_posts \
             SET status = ?, posted_at = ?, tweet_id = ?, media_url = ?, error_message = ? \
             WHERE id = ? AND status IN ({})",
            placeholders(sources.len())
        );

        let mut update = sqlx::query(&query)
            .bind(to.as_str())
            .bind(outcome.posted_at())
            .bind(tweet_id)
            .bind(media_url)
            .bind(error)
            .bind(post_id);
        for status in &sources {
            update = update.bind(status.as_str());
        }

        let result = update
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(post_id, to).await);
        }

        Database::get_post(self, post_id)
            .await?
            .ok_or_else(|| PostcronError::NotFound(post_id.to_string()))
    }

    async fn fail_stale_claims(&self, claimed_before: i64, now: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = ?, posted_at = ?, error_message = ?
            WHERE status = ? AND claimed_at < ?
            "#,
        )
        .bind(PostStatus::Failed.as_str())
        .bind(now)
        .bind(STALE_CLAIM_ERROR)
        .bind(PostStatus::Publishing.as_str())
        .bind(claimed_before)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    async fn schedule(&self, request: &ScheduleRequest) -> Result<ScheduledPost> {
        let media_ids = request.media_ids.as_deref().map(encode_media_ids);
        let sources = PostStatus::reschedulable();

        let query = format!(
            "UPDATE scheduled_posts \
             SET status = ?, scheduled_at = ?, media_ids = COALESCE(?, media_ids), \
                 claimed_at = NULL, posted_at = NULL, tweet_id = NULL, \
                 media_url = NULL, error_message = NULL \
             WHERE id = ? AND status IN ({})",
            placeholders(sources.len())
        );

        let mut update = sqlx::query(&query)
            .bind(PostStatus::Scheduled.as_str())
            .bind(request.scheduled_at)
            .bind(media_ids)
            .bind(&request.post_id);
        for status in &sources {
            update = update.bind(status.as_str());
        }

        let result = update
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Err(self
                .transition_error(&request.post_id, PostStatus::Scheduled)
                .await);
        }

        Database::get_post(self, &request.post_id)
            .await?
            .ok_or_else(|| PostcronError::NotFound(request.post_id.clone()))
    }
}

#[async_trait]
impl AccountLookup for Database {
    async fn credentials(&self, account_id: &str) -> Result<Credentials> {
        let account = self
            .get_account(account_id)
            .await?
            .ok_or_else(|| AccountError::NotFound(account_id.to_string()))?;

        Ok(account.into())
    }
}

/// `?, ?, ..` for an `IN` list
fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn encode_media_ids(media_ids: &[String]) -> String {
    serde_json::to_string(media_ids).unwrap_or_else(|_| "[]".to_string())
}

fn post_from_row(row: &SqliteRow) -> Result<ScheduledPost> {
    let id: String = row.try_get("id").map_err(DbError::SqlxError)?;

    let corrupt = |reason: String| DbError::CorruptRow {
        post_id: id.clone(),
        reason,
    };

    let raw_status: String = row.try_get("status").map_err(DbError::SqlxError)?;
    let status = raw_status.parse::<PostStatus>().map_err(corrupt)?;

    let raw_media: String = row.try_get("media_ids").map_err(DbError::SqlxError)?;
    let media_ids: Vec<String> = serde_json::from_str(&raw_media)
        .map_err(|e| corrupt(format!("media_ids is not a JSON string array: {}", e)))?;

    Ok(ScheduledPost {
        account_id: row.try_get("account_id").map_err(DbError::SqlxError)?,
        content: row.try_get("content").map_err(DbError::SqlxError)?,
        media_ids,
        scheduled_at: row.try_get("scheduled_at").map_err(DbError::SqlxError)?,
        status,
        claimed_at: row.try_get("claimed_at").map_err(DbError::SqlxError)?,
        posted_at: row.try_get("posted_at").map_err(DbError::SqlxError)?,
        tweet_id: row.try_get("tweet_id").map_err(DbError::SqlxError)?,
        media_url: row.try_get("media_url").map_err(DbError::SqlxError)?,
        error_message: row.try_get("error_message").map_err(DbError::SqlxError)?,
        created_at: row.try_get("created_at").map_err(DbError::SqlxError)?,
        id,
    })
}
