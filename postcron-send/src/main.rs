//! postcron-send - Background daemon for scheduled posting
//!
//! Runs the dispatcher on a timer and serves the scheduling endpoint.

use clap::{Parser, ValueEnum};
use libpostcron::config::Config;
use libpostcron::db::Database;
use libpostcron::dispatcher::{DispatchReport, Dispatcher};
use libpostcron::error::{ConfigError, PostcronError, Result};
use libpostcron::logging::LoggingConfig;
use libpostcron::publisher::http::HttpPublisher;
use libpostcron::publisher::mock::MockPublisher;
use libpostcron::publisher::Publisher;
use libpostcron::scheduler::Scheduler;
use libpostcron::server;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "postcron-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled posting")]
#[command(long_about = "\
postcron-send - Background daemon for scheduled posting

DESCRIPTION:
    postcron-send checks the queue on a fixed interval and publishes every
    post whose scheduled time has passed. Each post is claimed before it is
    published, so two daemons sharing a database never both send the same
    post. Transient publish errors are retried with backoff, which can
    resend a post the application accepted but did not confirm in time.
    Anything else marks the post failed.

    The daemon also serves the scheduling endpoint:
        GET  /            health check
        POST /schedule    {\"postId\", \"scheduledAt\", \"mediaIds\"?}

USAGE:
    # Run in foreground (logs to stderr)
    postcron-send

    # Check every 30 seconds
    postcron-send --poll-interval 30

    # Process due posts once and exit
    postcron-send --once --format json

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current run)

CONFIGURATION:
    Configuration file: ~/.config/postcron/config.toml (or $POSTCRON_CONFIG)

    Environment overrides:
        POSTCRON_DB_PATH    - Path to database file
        POSTCRON_APP_URL    - Base URL of the publishing application
        POSTCRON_API_KEY    - Key sent as x-api-key
        PORT                - Port for the scheduling endpoint

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or database error
")]
struct Cli {
    /// Seconds between queue checks (overrides config)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Process due posts once and exit
    #[arg(long)]
    once: bool,

    /// Output format for the --once report
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Do not serve the scheduling endpoint
    #[arg(long)]
    no_server: bool,

    /// Mark due posts as posted without contacting the publisher.
    /// No tweet id or media URL is stored.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    LoggingConfig::from_env(cli.verbose).init();

    if let Err(e) = run(cli).await {
        error!(error = %e, "postcron-send failed");
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(seconds) = cli.poll_interval {
        config.dispatcher.tick_interval = seconds;
    }
    config.dispatcher.validate()?;

    info!("postcron-send daemon starting");

    let db = Arc::new(Database::new(&config.database.path).await?);

    let publisher: Arc<dyn Publisher> = if cli.dry_run {
        info!("Dry run: posts will not be sent");
        Arc::new(MockPublisher::dry_run())
    } else {
        Arc::new(HttpPublisher::new(&config.publisher)?)
    };

    let dispatcher = Arc::new(Dispatcher::new(
        config.dispatcher.clone(),
        db.clone(),
        db.clone(),
        publisher,
    ));

    if cli.once {
        let report = dispatcher.run_once().await?;
        print_report(&report, cli.format);
        info!("Processed due posts once, exiting");
        return Ok(());
    }

    info!(seconds = config.dispatcher.tick_interval, "Poll interval configured");

    let shutdown = shutdown_signal()?;
    let (stop_tx, stop_rx) = watch::channel(false);

    let server_task = if cli.no_server {
        None
    } else {
        let listener = TcpListener::bind(&config.server.listen).await.map_err(|e| {
            ConfigError::InvalidValue {
                field: "server.listen".to_string(),
                reason: format!("cannot bind {}: {}", config.server.listen, e),
            }
        })?;

        let mut stop_rx = stop_rx.clone();
        Some(tokio::spawn(server::serve(listener, db.clone(), async move {
            let _ = stop_rx.changed().await;
        })))
    };

    let tick = dispatcher.config().tick_interval();
    let scheduler = Scheduler::start(dispatcher, tick);

    shutdown.await;
    info!("Shutdown requested, stopping gracefully");

    let _ = stop_tx.send(true);
    scheduler.shutdown().await;

    if let Some(task) = server_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Scheduling endpoint stopped with an error"),
            Err(e) => error!(error = %e, "Scheduling endpoint task panicked"),
        }
    }

    info!("postcron-send daemon stopped");
    Ok(())
}

fn print_report(report: &DispatchReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{}", json),
            Err(e) => error!(error = %e, "Failed to serialize report"),
        },
        OutputFormat::Text => println!(
            "due: {}, published: {}, failed: {}, skipped: {}, unrecorded: {}, expired claims: {}",
            report.due,
            report.published,
            report.failed,
            report.skipped,
            report.unrecorded,
            report.expired_claims
        ),
    }
}

/// Resolves on SIGINT or SIGTERM. Handlers are installed before returning.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    use futures::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| PostcronError::InvalidInput(format!("Signal setup failed: {}", e)))?;
    let handle = signals.handle();

    Ok(async move {
        if let Some(signal) = signals.next().await {
            info!(signal, "Received shutdown signal");
        }
        handle.close();
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
        }
    })
}
