//! # SiteGrade Common Library
//!
//! Shared code for the SiteGrade services:
//! - Common error type
//! - Configuration file location and TOML helpers
//! - Grading event types and the broadcast `EventBus`

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
