//! Taskboard HTTP - REST client for the board API
//!
//! Implements [`taskboard_sync::RemoteAuthority`] over HTTP:
//! - Bearer-token authentication
//! - Complete-order writes for boards, favourites, sections and tasks
//! - Status codes classified into validation, not-found, conflict and
//!   transient failures

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod client;
pub mod config;
pub mod error;

pub use client::HttpAuthority;
pub use config::HttpConfig;
pub use error::{classify, HttpError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
