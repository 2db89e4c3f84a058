//! postcron-queue - Manage scheduled posts
//!
//! Operator tool for the post queue the daemon dispatches from.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use libpostcron::logging::LoggingConfig;
use libpostcron::scheduling::{parse_when, schedule_post};
use libpostcron::{
    Config, Database, PostStatus, PostcronError, Result, ScheduleRequest, ScheduledPost,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "postcron-queue")]
#[command(version)]
#[command(about = "Manage scheduled posts")]
#[command(long_about = "\
postcron-queue - Manage scheduled posts

DESCRIPTION:
    postcron-queue inspects and edits the queue that postcron-send publishes
    from. Use it to list posts, add new ones, move a post to a new time, or
    put a failed post back on the schedule.

COMMANDS:
    list        List posts, optionally filtered by status
    show        Show one post in full
    add         Add a post to the queue
    schedule    Reschedule a post, or re-queue a failed one
    stats       Show counts per status

TIME FORMATS:
    now, 2030-01-01T09:00:00Z, 30m, 2h 30m, tomorrow 3pm, next monday 10am

USAGE EXAMPLES:
    # List everything still waiting
    postcron-queue list --status scheduled

    # Add a post for tomorrow afternoon
    postcron-queue add \"Launch day!\" --account acct-1 --at \"tomorrow 3pm\"

    # Retry a failed post in ten minutes
    postcron-queue schedule <POST_ID> 10m

    # Queue statistics as JSON
    postcron-queue stats --format json

CONFIGURATION:
    Configuration file: ~/.config/postcron/config.toml
    Database location: ~/.local/share/postcron/posts.db

    Override with environment variables:
        POSTCRON_CONFIG    - Path to config file
        POSTCRON_DB_PATH   - Path to database file

EXIT CODES:
    0 - Success
    1 - Operation failed (e.g. post is already published)
    2 - Database or configuration error
    3 - Invalid input (unknown post, bad time format, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List posts
    List {
        /// Only posts in this status (scheduled, publishing, posted, failed)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of posts to show
        #[arg(short, long, default_value_t = 100)]
        limit: usize,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show a single post
    Show {
        /// Post ID
        post_id: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Add a post to the queue
    Add {
        /// Post text
        content: String,

        /// Account to publish as
        #[arg(short, long)]
        account: String,

        /// When to publish (e.g. "tomorrow 3pm", "2h", RFC 3339)
        #[arg(long, default_value = "now")]
        at: String,

        /// Media identifier to attach (repeatable)
        #[arg(short, long = "media")]
        media: Vec<String>,
    },

    /// Reschedule a post or re-queue a failed one
    Schedule {
        /// Post ID
        post_id: String,

        /// New publish time (e.g. "tomorrow 3pm", "30m", RFC 3339)
        time: String,

        /// Replace the attached media (repeatable); omit to keep it
        #[arg(short, long = "media")]
        media: Vec<String>,
    },

    /// Show queue statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Quiet unless asked; stdout is for results
    let mut logging = LoggingConfig::from_env(cli.verbose);
    if !cli.verbose && std::env::var("POSTCRON_LOG_LEVEL").is_err() {
        logging.level = "error".to_string();
    }
    logging.init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;

    let result = match cli.command {
        Commands::List {
            status,
            limit,
            format,
        } => cmd_list(&db, status.as_deref(), limit, &format).await,
        Commands::Show { post_id, format } => cmd_show(&db, &post_id, &format).await,
        Commands::Add {
            content,
            account,
            at,
            media,
        } => cmd_add(&db, &content, &account, &at, media).await,
        Commands::Schedule {
            post_id,
            time,
            media,
        } => cmd_schedule(&db, &post_id, &time, media).await,
        Commands::Stats { format } => cmd_stats(&db, &format).await,
    };

    db.close().await;
    result
}

fn validate_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(PostcronError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| PostcronError::InvalidInput(format!("Failed to serialize output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

/// List posts
async fn cmd_list(db: &Database, status: Option<&str>, limit: usize, format: &str) -> Result<()> {
    validate_format(format)?;

    let status = status
        .map(|s| s.parse::<PostStatus>().map_err(PostcronError::InvalidInput))
        .transpose()?;

    let posts = db.list_posts(status, limit).await?;

    if format == "json" {
        return print_json(&posts);
    }

    let now = Utc::now().timestamp();
    for post in &posts {
        let when = if post.status == PostStatus::Scheduled {
            format_time_until(now, post.scheduled_at)
        } else {
            post.status.to_string()
        };

        println!(
            "{} | {} | {} | {}",
            post.id,
            post.account_id,
            truncate_content(&post.content, 50),
            when
        );
    }

    Ok(())
}

/// Show one post
async fn cmd_show(db: &Database, post_id: &str, format: &str) -> Result<()> {
    validate_format(format)?;

    let post = db
        .get_post(post_id)
        .await?
        .ok_or_else(|| PostcronError::NotFound(post_id.to_string()))?;

    if format == "json" {
        return print_json(&post);
    }

    println!("id:           {}", post.id);
    println!("account:      {}", post.account_id);
    println!("status:       {}", post.status);
    println!("scheduled at: {}", format_timestamp(post.scheduled_at));
    if !post.media_ids.is_empty() {
        println!("media:        {}", post.media_ids.join(", "));
    }
    if post.status.is_terminal() {
        if let Some(posted_at) = post.posted_at {
            println!("resolved at:  {}", format_timestamp(posted_at));
        }
    }
    if let Some(tweet_id) = &post.tweet_id {
        println!("tweet:        {}", tweet_id);
    }
    if let Some(media_url) = &post.media_url {
        println!("media url:    {}", media_url);
    }
    if let Some(error) = &post.error_message {
        println!("error:        {}", error);
    }
    println!();
    println!("{}", post.content);

    Ok(())
}

/// Add a post; prints the new post ID
async fn cmd_add(
    db: &Database,
    content: &str,
    account_id: &str,
    at: &str,
    media: Vec<String>,
) -> Result<()> {
    if content.trim().is_empty() {
        return Err(PostcronError::InvalidInput(
            "Content cannot be empty".to_string(),
        ));
    }
    validate_media(&media)?;

    if db.get_account(account_id).await?.is_none() {
        return Err(PostcronError::InvalidInput(format!(
            "Unknown account '{}'",
            account_id
        )));
    }

    let scheduled_at = parse_when(at, Utc::now())?.timestamp();

    let post = ScheduledPost::new(account_id.to_string(), content.to_string(), scheduled_at)
        .with_media(media);
    db.create_post(&post).await?;

    info!(post_id = %post.id, scheduled_at, "Post added");
    println!("{}", post.id);

    Ok(())
}

/// Reschedule or re-queue a post
async fn cmd_schedule(db: &Database, post_id: &str, time: &str, media: Vec<String>) -> Result<()> {
    validate_media(&media)?;

    let scheduled_at = parse_when(time, Utc::now())?.timestamp();
    let request = ScheduleRequest {
        post_id: post_id.to_string(),
        scheduled_at,
        media_ids: if media.is_empty() { None } else { Some(media) },
    };

    let post = schedule_post(db, request).await?;
    println!(
        "{} scheduled for {}",
        post.id,
        format_timestamp(post.scheduled_at)
    );

    Ok(())
}

/// Counts per status
async fn cmd_stats(db: &Database, format: &str) -> Result<()> {
    validate_format(format)?;

    let counts = db.count_by_status().await?;
    let next_due = db
        .list_posts(Some(PostStatus::Scheduled), 1)
        .await?
        .into_iter()
        .next()
        .map(|p| p.scheduled_at);
    let total: i64 = counts.values().sum();

    if format == "json" {
        let mut json = serde_json::Map::new();
        for status in PostStatus::ALL {
            let count = counts.get(&status).copied().unwrap_or(0);
            json.insert(status.to_string(), count.into());
        }
        json.insert("total".to_string(), total.into());
        json.insert("nextDue".to_string(), next_due.into());
        return print_json(&json);
    }

    for status in PostStatus::ALL {
        println!(
            "{:<11} {}",
            format!("{}:", status),
            counts.get(&status).copied().unwrap_or(0)
        );
    }
    println!("{:<11} {}", "total:", total);
    if let Some(next) = next_due {
        println!(
            "next due:   {} ({})",
            format_timestamp(next),
            format_time_until(Utc::now().timestamp(), next)
        );
    }

    Ok(())
}

fn validate_media(media: &[String]) -> Result<()> {
    if media.iter().any(|id| id.trim().is_empty()) {
        return Err(PostcronError::InvalidInput(
            "Media identifiers cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Truncate content to max characters with ellipsis
fn truncate_content(content: &str, max_len: usize) -> String {
    let single_line = content.replace('\n', " ");
    if single_line.chars().count() <= max_len {
        single_line
    } else {
        let truncated: String = single_line.chars().take(max_len).collect();
        format!("{}...", truncated)
    }
}

fn format_timestamp(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

/// Format time until scheduled time in human-readable format
fn format_time_until(now: i64, scheduled_at: i64) -> String {
    let diff = scheduled_at - now;

    if diff < 0 {
        return "overdue".to_string();
    }

    let minutes = diff / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("in {} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("in {} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        "in <1 minute".to_string()
    }
}
