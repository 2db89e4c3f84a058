//! Postcron - dispatch scheduled social posts at their due time
//!
//! The library holds the post store, the publish clients, and the dispatcher
//! that moves each due post from `scheduled` to `posted` or `failed`.
//! `postcron-send` runs it on a timer; `postcron-queue` manages the queue.

pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod publisher;
pub mod scheduler;
pub mod scheduling;
pub mod server;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use dispatcher::{DispatchReport, Dispatcher};
pub use error::{PostcronError, Result};
pub use scheduler::Scheduler;
pub use store::{AccountLookup, PostStore, ScheduleRequest};
pub use types::{PostStatus, ScheduledPost};
