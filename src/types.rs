//! Core types for drive-relay

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureKind;

/// Unique identifier of a message within its channel
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl MessageId {
    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a chat channel, as understood by the transport
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl ChannelId {
    /// Create a new channel identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque position in a channel's history, produced by the transport
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

/// Media attached to a message
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Original file name, when the transport knows it
    pub file_name: Option<String>,
    /// MIME type, when the transport knows it
    pub mime_type: Option<String>,
    /// Size in bytes
    pub size_bytes: Option<u64>,
}

/// A message read from a channel
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier
    pub id: MessageId,
    /// Text body or caption (may be empty)
    pub text: String,
    /// Attached media, if any
    pub media: Option<MediaRef>,
    /// When the message was posted
    pub timestamp: DateTime<Utc>,
}

/// Handle sufficient for the file fetcher to retrieve a part
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    /// Drive file identifier
    pub file_id: String,
    /// Link exactly as it appeared in the message
    pub url: String,
}

/// Normalized release title used as the aggregation key
///
/// Case, whitespace and `.`/`_` separators are folded, so titles that differ
/// only in those respects share a key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseKey(String);

impl ReleaseKey {
    /// Normalize a release title into a key
    pub fn from_title(title: &str) -> Self {
        let folded: String = title
            .chars()
            .map(|c| if c == '_' || c == '.' { ' ' } else { c })
            .collect::<String>()
            .to_lowercase();
        Self(folded.split_whitespace().collect::<Vec<_>>().join(" "))
    }

    /// The normalized key text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReleaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One drive-hosted part of a release, extracted from a message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartLink {
    /// Display title as written in the message
    pub title: String,
    /// Aggregation key derived from the title
    pub release: ReleaseKey,
    /// 1-based part index
    pub index: u32,
    /// Declared total part count, if the message states one
    pub total: Option<u32>,
    /// Where to fetch the part from
    pub locator: Locator,
    /// Message that carried the link
    pub source_message: MessageId,
    /// When that message was posted
    pub posted_at: DateTime<Utc>,
}

/// The unit of "already handled" in the dedup index
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Release the part belongs to
    pub release: ReleaseKey,
    /// 1-based part index
    pub index: u32,
    /// SHA-256 of the part content, once downloaded
    pub content_hash: Option<String>,
    /// Size of the part content, once downloaded
    pub size_bytes: Option<u64>,
}

impl Fingerprint {
    /// Fingerprint for a part whose content has not been seen
    pub fn new(release: ReleaseKey, index: u32) -> Self {
        Self {
            release,
            index,
            content_hash: None,
            size_bytes: None,
        }
    }
}

/// Lifecycle of a release bundle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseState {
    /// Parts still arriving
    Pending,
    /// Every index 1..=total is present; dedup not checked yet
    CompleteUnverified,
    /// Parts are being fetched
    Downloading,
    /// Parts are being sent to the destination
    Publishing,
    /// Published, or found already published
    Done,
    /// A part could not be fetched or sent
    Failed,
}

impl std::fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReleaseState::Pending => "pending",
            ReleaseState::CompleteUnverified => "complete_unverified",
            ReleaseState::Downloading => "downloading",
            ReleaseState::Publishing => "publishing",
            ReleaseState::Done => "done",
            ReleaseState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Event emitted during the release lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A part link was recognised in a source message
    PartObserved {
        /// Release key
        release: ReleaseKey,
        /// Part index
        index: u32,
        /// Declared total after this observation
        total: Option<u32>,
        /// Message that carried the link
        message: MessageId,
    },

    /// Every part of a release has been seen
    ReleaseComplete {
        /// Release key
        release: ReleaseKey,
        /// Number of parts
        parts: u32,
    },

    /// Release was already fully fingerprinted and needs no work
    ReleaseSkipped {
        /// Release key
        release: ReleaseKey,
    },

    /// A part download started
    Downloading {
        /// Release key
        release: ReleaseKey,
        /// Part index
        index: u32,
    },

    /// All parts downloaded; sending to the destination
    Publishing {
        /// Release key
        release: ReleaseKey,
    },

    /// Release sent and committed to the dedup index
    Published {
        /// Release key
        release: ReleaseKey,
        /// Number of parts sent
        parts: u32,
    },

    /// Release failed at one of its parts
    ReleaseFailed {
        /// Release key
        release: ReleaseKey,
        /// Failing part index
        index: u32,
        /// Failure category
        kind: FailureKind,
        /// Error message
        error: String,
    },

    /// A pass over the source channel finished
    ScanComplete {
        /// Messages read during the pass
        messages: u64,
        /// Part links recognised during the pass
        links: u64,
    },

    /// Coordinator is shutting down
    Shutdown,
}
