//! `mailbell-core`: configuration and error types shared by the mailbell crates.

pub mod config;
pub mod error;

pub use config::{AccountConfig, DatabaseConfig, MailbellConfig, SchedulerConfig};
pub use error::{MailbellError, Result};
