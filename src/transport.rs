//! Chat transport seam
//!
//! The pipeline reads source messages and writes to the destination channel
//! through [`ChatTransport`]. Authentication, channel resolution and the
//! wire protocol belong to the implementation supplied by the embedding
//! application.

use crate::error::{Result, SendFailure};
use crate::types::{ChannelId, Cursor, Message};
use async_trait::async_trait;
use std::path::PathBuf;

/// One page of channel history
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    /// Messages in this page, in any order
    pub messages: Vec<Message>,
    /// Cursor to resume after this page
    pub cursor: Option<Cursor>,
    /// True when more history is immediately available after `cursor`
    pub has_more: bool,
}

/// A file ready to be sent to the destination channel
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    /// Local path of the downloaded part
    pub path: PathBuf,
    /// File name to present in the destination
    pub file_name: String,
    /// Size in bytes
    pub size_bytes: u64,
}

/// Capability to read from and post to chat channels
///
/// # Examples
///
/// ```no_run
/// use drive_relay::transport::{ChatTransport, MessagePage, OutgoingFile};
/// use drive_relay::types::{ChannelId, Cursor};
/// use drive_relay::error::{Result, SendFailure};
/// use async_trait::async_trait;
///
/// struct Offline;
///
/// #[async_trait]
/// impl ChatTransport for Offline {
///     async fn list_messages(
///         &self,
///         _channel: &ChannelId,
///         _from: Option<&Cursor>,
///         _limit: usize,
///     ) -> Result<MessagePage> {
///         Ok(MessagePage::default())
///     }
///
///     async fn send_file(
///         &self,
///         _channel: &ChannelId,
///         _file: &OutgoingFile,
///         _caption: &str,
///     ) -> std::result::Result<(), SendFailure> {
///         Err(SendFailure::new("offline"))
///     }
///
///     async fn send_text(
///         &self,
///         _channel: &ChannelId,
///         _text: &str,
///     ) -> std::result::Result<(), SendFailure> {
///         Err(SendFailure::new("offline"))
///     }
/// }
/// ```
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// List messages of `channel` after `from`, oldest first where possible
    ///
    /// `None` starts from the beginning of the history. Each call returns a
    /// finite page; callers resume with the returned cursor.
    async fn list_messages(
        &self,
        channel: &ChannelId,
        from: Option<&Cursor>,
        limit: usize,
    ) -> Result<MessagePage>;

    /// Send a file to `channel` with a caption
    async fn send_file(
        &self,
        channel: &ChannelId,
        file: &OutgoingFile,
        caption: &str,
    ) -> std::result::Result<(), SendFailure>;

    /// Send a text message to `channel`
    async fn send_text(
        &self,
        channel: &ChannelId,
        text: &str,
    ) -> std::result::Result<(), SendFailure>;

    /// Most recent messages of `channel`, newest first
    ///
    /// Used to seed the dedup index from what the destination already shows.
    /// Transports that cannot look back return an empty list.
    async fn recent_messages(&self, _channel: &ChannelId, _limit: usize) -> Result<Vec<Message>> {
        Ok(Vec::new())
    }
}
