//! Periodic timer driving the dispatcher
//!
//! One task owns the timer. Each tick awaits `run_once` to completion before
//! polling the timer again, so runs never overlap; ticks that fire during a
//! long run are skipped rather than queued.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::dispatcher::Dispatcher;

pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn the timer task. The first run starts immediately.
    pub fn start(dispatcher: Arc<Dispatcher>, period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(period_secs = period.as_secs_f64(), "Scheduler started");

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        match dispatcher.run_once().await {
                            Ok(report) => debug!(?report, "Tick complete"),
                            Err(e) => error!(error = %e, "Dispatch run failed; retrying next tick"),
                        }
                    }
                }
            }

            info!("Scheduler stopped");
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stop the timer and wait for an in-flight run to finish
    pub async fn shutdown(self) {
        // Receiver gone means the task already exited
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.handle.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
    }
}
