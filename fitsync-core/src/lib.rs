//! # fitsync-core
//!
//! Core library for fitsync - a WHOOP data pipeline.
//!
//! This library provides:
//! - Backfill range planning and window iteration
//! - A rate-limited, paginated API client with token refresh
//! - An append-only SQLite raw store with idempotent ingestion
//! - The daily merge engine and CSV dataset writers
//! - Run orchestration with metrics, notifications and run state
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Raw:** per-fetch JSON dumps on disk (immutable)
//! - **Store:** one current row per record identity in SQLite, plus run
//!   and fetch logs
//! - **Derived:** the daily CSV dataset, regenerable from either raw layer
//!
//! ## Example
//!
//! ```rust,no_run
//! use fitsync_core::{Config, Store};
//!
//! let config = Config::load().expect("failed to load config");
//! let store = Store::open(config.database_path()).expect("failed to open store");
//! ```

// Re-export commonly used items at the crate root
pub use backfill::{run_backfill, BackfillParams};
pub use client::{Credentials, EnvFileTokenStore, TokenStore, WhoopClient};
pub use config::Config;
pub use daily::{merge, DailyRow, DailyTable, EmptyReason};
pub use error::{Error, Result};
pub use pull::{run_pull, PullParams};
pub use report::{format_summary, RunReport, RunReportBuilder, WebhookNotifier};
pub use store::Store;
pub use windows::{compute_backfill_range, iter_windows, parse_utc_timestamp, Window};

// Public modules
pub mod backfill;
pub mod client;
pub mod config;
pub mod daily;
pub mod endpoints;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod pull;
pub mod rawfile;
pub mod report;
pub mod store;
pub mod windows;
