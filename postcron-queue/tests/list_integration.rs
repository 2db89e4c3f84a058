//! Integration tests for postcron-queue list, show and stats

mod common;

use common::setup_test_env;
use predicates::prelude::*;

#[tokio::test]
async fn test_list_empty_queue() {
    let env = setup_test_env().await;

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[tokio::test]
async fn test_list_shows_posts_in_schedule_order() {
    let env = setup_test_env().await;
    let later = env.add_post("Later post", 7230).await;
    let sooner = env.add_post("Sooner post", 630).await;

    let output = env.cmd().arg("list").assert().success().get_output().stdout.clone();
    let stdout = String::from_utf8(output).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();

    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with(&sooner));
    assert!(lines[0].contains("in 10 minutes"));
    assert!(lines[1].starts_with(&later));
    assert!(lines[1].contains("in 2 hours"));
}

#[tokio::test]
async fn test_list_json_format() {
    let env = setup_test_env().await;
    let post_id = env.add_post("JSON post", 3600).await;

    let output = env
        .cmd()
        .args(["list", "--format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let posts: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let posts = posts.as_array().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["id"], post_id.as_str());
    assert_eq!(posts[0]["accountId"], "acct-1");
    assert_eq!(posts[0]["status"], "scheduled");
}

#[tokio::test]
async fn test_list_filters_by_status() {
    let env = setup_test_env().await;
    let waiting = env.add_post("Still waiting", 3600).await;
    let broken = env.add_post("Will fail", -60).await;
    env.resolve_post(&broken, false).await;

    env.cmd()
        .args(["list", "--status", "failed"])
        .assert()
        .success()
        .stdout(predicate::str::contains(broken.as_str()))
        .stdout(predicate::str::contains(waiting.as_str()).not());
}

#[tokio::test]
async fn test_list_rejects_unknown_status() {
    let env = setup_test_env().await;

    env.cmd()
        .args(["list", "--status", "cancelled"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Invalid status"));
}

#[tokio::test]
async fn test_list_rejects_unknown_format() {
    let env = setup_test_env().await;

    env.cmd()
        .args(["list", "--format", "xml"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Invalid format"));
}

#[tokio::test]
async fn test_show_failed_post_includes_error() {
    let env = setup_test_env().await;
    let post_id = env.add_post("Rejected content", -60).await;
    env.resolve_post(&post_id, false).await;

    env.cmd()
        .args(["show", &post_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("status:       failed"))
        .stdout(predicate::str::contains("resolved at:"))
        .stdout(predicate::str::contains("Content rejected: duplicate"))
        .stdout(predicate::str::contains("Rejected content"));
}

#[tokio::test]
async fn test_show_json_includes_tweet_id() {
    let env = setup_test_env().await;
    let post_id = env.add_post("Published", -60).await;
    env.resolve_post(&post_id, true).await;

    let output = env
        .cmd()
        .args(["show", &post_id, "--format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let post: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(post["status"], "posted");
    assert_eq!(post["tweetId"], "tweet-1");
}

#[tokio::test]
async fn test_show_unknown_post() {
    let env = setup_test_env().await;

    env.cmd()
        .args(["show", "does-not-exist"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("does-not-exist"));
}

#[tokio::test]
async fn test_stats_counts_each_status() {
    let env = setup_test_env().await;
    env.add_post("One", 3600).await;
    env.add_post("Two", 7200).await;
    let posted = env.add_post("Three", -60).await;
    env.resolve_post(&posted, true).await;
    let failed = env.add_post("Four", -60).await;
    env.resolve_post(&failed, false).await;

    let output = env
        .cmd()
        .args(["stats", "--format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let stats: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(stats["scheduled"], 2);
    assert_eq!(stats["publishing"], 0);
    assert_eq!(stats["posted"], 1);
    assert_eq!(stats["failed"], 1);
    assert_eq!(stats["total"], 4);
    assert!(stats["nextDue"].is_i64());
}

#[tokio::test]
async fn test_stats_text_on_empty_queue() {
    let env = setup_test_env().await;

    env.cmd()
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("scheduled:  0"))
        .stdout(predicate::str::contains("total:      0"))
        .stdout(predicate::str::contains("next due").not());
}

#[test]
fn test_missing_config_exits_with_code_2() {
    let temp_dir = tempfile::TempDir::new().unwrap();

    assert_cmd::Command::cargo_bin("postcron-queue")
        .unwrap()
        .env("POSTCRON_CONFIG", temp_dir.path().join("nope.toml"))
        .arg("list")
        .assert()
        .failure()
        .code(2);
}
