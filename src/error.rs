//! Error types for drive-relay
//!
//! This module provides the error taxonomy for the release pipeline:
//! - A crate-wide [`Error`] with context for configuration, persistence and I/O
//! - [`FetchFailure`] for part retrieval, split into transient and permanent
//! - [`SendFailure`] for destination transport errors
//! - [`FailureKind`] for reporting why a release failed
//!
//! "No link in message", "fingerprint already committed" and "release still
//! incomplete" are ordinary outcomes of the pipeline and are not represented
//! here.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for drive-relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for drive-relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download.temp_dir")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Listing messages from a channel failed
    #[error("transport error: {0}")]
    Transport(String),

    /// A part could not be retrieved
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchFailure),

    /// A part could not be sent to the destination
    #[error("send failed: {0}")]
    Send(#[from] SendFailure),

    /// A release was handed to the publisher before all of its parts were present
    #[error("release {release} is incomplete: missing parts {missing:?}")]
    IncompleteRelease {
        /// Display title of the release
        release: String,
        /// Part indices that are absent
        missing: Vec<u32>,
    },

    /// Shutdown in progress - not starting new work
    #[error("shutdown in progress")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Failure to retrieve a part from the cloud drive
///
/// Transient failures (timeouts, rate limits, truncated bodies) are retried by
/// the downloader. Permanent failures (expired or private links) are not.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    /// Network timeout, rate limit or server-side hiccup
    #[error("transient: {0}")]
    Transient(String),

    /// Invalid or expired link, access denied
    #[error("permanent: {0}")]
    Permanent(String),
}

impl FetchFailure {
    /// Reporting category of this failure
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchFailure::Transient(_) => FailureKind::Transient,
            FetchFailure::Permanent(_) => FailureKind::Permanent,
        }
    }

    /// Human-readable reason without the category prefix
    pub fn reason(&self) -> &str {
        match self {
            FetchFailure::Transient(reason) | FetchFailure::Permanent(reason) => reason,
        }
    }
}

impl From<std::io::Error> for FetchFailure {
    fn from(e: std::io::Error) -> Self {
        // Local storage problems (disk full, permissions) will not fix themselves on retry
        FetchFailure::Permanent(format!("local storage error: {}", e))
    }
}

/// Failure to send a file or text to the destination channel
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SendFailure {
    /// Transport-provided description of the failure
    pub message: String,
}

impl SendFailure {
    /// Create a new send failure
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Why a release failed, as reported in logs and events
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Fetch kept failing transiently until retries were exhausted
    Transient,
    /// Fetch failed permanently
    Permanent,
    /// Sending to the destination failed
    Send,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Permanent => write!(f, "permanent"),
            FailureKind::Send => write!(f, "send"),
        }
    }
}
