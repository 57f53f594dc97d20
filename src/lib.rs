//! # drive-relay
//!
//! Reassembles multi-part releases announced in a chat channel as cloud-drive
//! links, and republishes each complete release to a destination channel in
//! part order, exactly once.
//!
//! ## Design Philosophy
//!
//! drive-relay is designed to be:
//! - **Library-first** - No CLI or UI; the embedding application owns credentials and channel selection
//! - **Transport-agnostic** - Chat access and file retrieval are injected as traits
//! - **Idempotent** - Committed fingerprints survive restarts, so replaying history forwards nothing twice
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use drive_relay::{ChannelId, Config, HttpDriveFetcher, PipelineCoordinator};
//! use drive_relay::transport::ChatTransport;
//! use std::sync::Arc;
//!
//! # async fn example(transport: Arc<dyn ChatTransport>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let fetcher = Arc::new(HttpDriveFetcher::new(&config.fetcher)?);
//!
//! let coordinator = PipelineCoordinator::new(
//!     config,
//!     ChannelId::new("source-channel"),
//!     ChannelId::new("destination-channel"),
//!     transport,
//!     fetcher,
//! )
//! .await?;
//!
//! // Subscribe to events
//! let mut events = coordinator.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! coordinator.run_once().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Part aggregation by release
pub mod aggregate;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Persistent dedup index
pub mod dedup;
/// Part downloads into scoped storage
pub mod downloader;
/// Error types
pub mod error;
/// Link extraction from chat messages
pub mod extract;
/// File fetcher seam and HTTP adapter
pub mod fetcher;
/// Pipeline coordination
pub mod pipeline;
/// Release publishing
pub mod publisher;
/// Retry logic with exponential backoff
pub mod retry;
/// Chat transport seam
pub mod transport;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use aggregate::{PartAggregator, ReleaseBundle};
pub use config::{Config, TotalConflictPolicy, UnknownTotalPolicy};
pub use db::Database;
pub use dedup::DedupIndex;
pub use downloader::{DownloadedPart, Downloader};
pub use error::{DatabaseError, Error, FailureKind, FetchFailure, Result, SendFailure};
pub use extract::{LinkExtractor, ParsedHints};
pub use fetcher::{FetchedFile, FileFetcher, HttpDriveFetcher};
pub use pipeline::PipelineCoordinator;
pub use publisher::{PublishResult, ReleasePublisher};
pub use transport::{ChatTransport, MessagePage, OutgoingFile};
pub use types::{
    ChannelId, Cursor, Event, Fingerprint, Locator, MediaRef, Message, MessageId, PartLink,
    ReleaseKey, ReleaseState,
};

/// Run the live pipeline until SIGTERM/SIGINT (Ctrl+C elsewhere), then shut down.
///
/// Returns the outcome of [`PipelineCoordinator::run`]; shutdown runs in
/// either case.
///
/// # Example
///
/// ```no_run
/// use drive_relay::{PipelineCoordinator, run_with_shutdown};
///
/// # async fn example(coordinator: PipelineCoordinator) -> drive_relay::Result<()> {
/// // Run with automatic signal handling
/// run_with_shutdown(coordinator).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_with_shutdown(coordinator: PipelineCoordinator) -> Result<()> {
    let outcome = tokio::select! {
        result = coordinator.run() => result,
        _ = wait_for_signal() => Ok(()),
    };

    if let Err(e) = &outcome {
        tracing::error!(error = %e, "Pipeline stopped with an error");
    }

    coordinator.shutdown().await?;
    outcome
}

/// Resolves on SIGTERM or SIGINT
///
/// Signal registration can fail in restricted environments; whichever handler
/// registers is used, and `ctrl_c` is the last resort.
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{Signal, SignalKind, signal};

    fn register(kind: SignalKind, name: &str) -> Option<Signal> {
        signal(kind)
            .inspect_err(|e| tracing::warn!(signal = name, error = %e, "Could not register signal handler"))
            .ok()
    }

    let sigterm = register(SignalKind::terminate(), "SIGTERM");
    let sigint = register(SignalKind::interrupt(), "SIGINT");

    let received = match (sigterm, sigint) {
        (Some(mut term), Some(mut int)) => tokio::select! {
            _ = term.recv() => "SIGTERM",
            _ = int.recv() => "SIGINT",
        },
        (Some(mut term), None) => {
            term.recv().await;
            "SIGTERM"
        }
        (None, Some(mut int)) => {
            int.recv().await;
            "SIGINT"
        }
        (None, None) => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "No signal handler available");
            }
            "ctrl_c"
        }
    };

    tracing::info!(signal = received, "Shutdown signal received");
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!(signal = "ctrl_c", "Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C"),
    }
}
