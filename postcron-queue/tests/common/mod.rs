//! Shared setup for postcron-queue integration tests

#![allow(dead_code)]

use assert_cmd::Command;
use libpostcron::types::{Account, PublishOutcome};
use libpostcron::{Database, PostStore, ScheduledPost};
use std::fs;
use tempfile::TempDir;

pub struct TestEnv {
    pub temp_dir: TempDir,
    pub config_path: String,
    pub db_path: String,
}

/// Config and database with a single account, `acct-1`
pub async fn setup_test_env() -> TestEnv {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("posts.db");

    let config_content = format!(
        "[database]\npath = \"{}\"\n",
        db_path.display().to_string().replace('\\', "/")
    );
    fs::write(&config_path, config_content).unwrap();

    let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
    db.upsert_account(&Account::new("acct-1".to_string(), "alice".to_string()))
        .await
        .unwrap();
    db.close().await;

    TestEnv {
        config_path: config_path.to_str().unwrap().to_string(),
        db_path: db_path.to_str().unwrap().to_string(),
        temp_dir,
    }
}

impl TestEnv {
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("postcron-queue").unwrap();
        cmd.env("POSTCRON_CONFIG", &self.config_path)
            .env_remove("POSTCRON_DB_PATH")
            .env_remove("POSTCRON_LOG_LEVEL");
        cmd
    }

    pub async fn db(&self) -> Database {
        Database::new(&self.db_path).await.unwrap()
    }

    /// Insert a scheduled post `offset` seconds from now
    pub async fn add_post(&self, content: &str, offset: i64) -> String {
        let db = self.db().await;
        let now = chrono::Utc::now().timestamp();
        let post = ScheduledPost::new("acct-1".to_string(), content.to_string(), now + offset);
        db.create_post(&post).await.unwrap();
        db.close().await;
        post.id
    }

    /// Drive a post through a publish attempt
    pub async fn resolve_post(&self, post_id: &str, succeeded: bool) {
        let db = self.db().await;
        let now = chrono::Utc::now().timestamp();
        assert!(db.claim(post_id, now).await.unwrap());

        let outcome = if succeeded {
            PublishOutcome::Posted {
                posted_at: now,
                tweet_id: Some("tweet-1".to_string()),
                media_url: None,
            }
        } else {
            PublishOutcome::Failed {
                posted_at: now,
                error: "Content rejected: duplicate".to_string(),
            }
        };
        db.update_status(post_id, outcome).await.unwrap();
        db.close().await;
    }

    pub async fn load_post(&self, post_id: &str) -> ScheduledPost {
        let db = self.db().await;
        let post = db.get_post(post_id).await.unwrap().unwrap();
        db.close().await;
        post
    }
}
