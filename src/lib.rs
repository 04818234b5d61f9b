//! grade_watch Library
//!
//! Watches a university self-service portal for new grades:
//! - renewable portal session with silent-expiry detection
//! - course and grade extraction from the portal's HTML
//! - positional snapshot diff
//! - single-flight periodic scheduler
//! - best-effort chat notifications

pub mod commands;
pub mod config;
pub mod diff;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod notify;
pub mod portal;
pub mod scheduler;
pub mod storage;
pub mod telegram;
pub mod types;

pub use error::{Result, WatchError};
pub use types::*;
