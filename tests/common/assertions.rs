//! Event waiting helpers

use drive_relay::Event;
use std::time::Duration;
use tokio::sync::broadcast;

/// Outcome of waiting for a release to settle
#[derive(Debug)]
pub enum WaitResult {
    /// Release was published
    Published(u32),
    /// Release was already published
    Skipped,
    /// Release failed at the given part
    Failed(u32, String),
    /// Nothing conclusive arrived in time
    Timeout,
}

/// Wait until the release with the given title is published, skipped or fails
pub async fn wait_for_release(
    events: &mut broadcast::Receiver<Event>,
    title: &str,
    timeout: Duration,
) -> WaitResult {
    let key = drive_relay::ReleaseKey::from_title(title);
    let outcome = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::Published { release, parts }) if release == key => {
                    return WaitResult::Published(parts);
                }
                Ok(Event::ReleaseSkipped { release }) if release == key => {
                    return WaitResult::Skipped;
                }
                Ok(Event::ReleaseFailed {
                    release,
                    index,
                    error,
                    ..
                }) if release == key => {
                    return WaitResult::Failed(index, error);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return WaitResult::Timeout,
            }
        }
    })
    .await;

    outcome.unwrap_or(WaitResult::Timeout)
}
