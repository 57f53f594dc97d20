//! Shared test helpers: in-memory transport and fetcher, builders and a test coordinator.

use crate::config::{Config, RetryConfig};
use crate::error::{FetchFailure, Result, SendFailure};
use crate::fetcher::{FetchedFile, FileFetcher};
use crate::pipeline::PipelineCoordinator;
use crate::transport::{ChatTransport, MessagePage, OutgoingFile};
use crate::types::{ChannelId, Cursor, Locator, Message, MessageId, PartLink, ReleaseKey};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Link in the form posted to the source channel
pub(crate) fn drive_url(file_id: &str) -> String {
    format!("https://drive.google.com/file/d/{file_id}/view?usp=sharing")
}

/// Message whose timestamp follows its id
pub(crate) fn message(id: i64, text: &str) -> Message {
    Message {
        id: MessageId(id),
        text: text.to_string(),
        media: None,
        timestamp: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
    }
}

pub(crate) fn part_link(title: &str, index: u32, total: Option<u32>, file_id: &str) -> PartLink {
    PartLink {
        title: title.to_string(),
        release: ReleaseKey::from_title(title),
        index,
        total,
        locator: Locator {
            file_id: file_id.to_string(),
            url: drive_url(file_id),
        },
        source_message: MessageId(index as i64),
        posted_at: Utc.timestamp_opt(1_700_000_000 + index as i64, 0).unwrap(),
    }
}

/// Config with all state under `dir` and near-instant retries
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("relay.db");
    config.download.temp_dir = dir.join("temp");
    config.retry = RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config.scan.poll_interval = Duration::from_millis(20);
    config.scan.shutdown_grace = Duration::from_secs(2);
    config
}

pub(crate) async fn create_test_coordinator(
    config: Config,
    transport: Arc<MockTransport>,
    fetcher: Arc<MockFetcher>,
) -> PipelineCoordinator {
    PipelineCoordinator::new(
        config,
        ChannelId::new("source"),
        ChannelId::new("dest"),
        transport,
        fetcher,
    )
    .await
    .unwrap()
}

#[derive(Clone)]
struct Served {
    content: Vec<u8>,
    file_name: Option<String>,
    announced_length: Option<u64>,
}

/// In-memory [`FileFetcher`] keyed by file id
#[derive(Default)]
pub(crate) struct MockFetcher {
    files: Mutex<HashMap<String, Served>>,
    failures: Mutex<HashMap<String, (FetchFailure, Option<u32>)>>,
    hanging: Mutex<Vec<String>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn serve(&self, file_id: &str, content: &[u8]) {
        self.insert(file_id, content, None, None);
    }

    pub(crate) fn serve_named(&self, file_id: &str, content: &[u8], file_name: &str) {
        self.insert(file_id, content, Some(file_name.to_string()), None);
    }

    /// Announce `announced` bytes but deliver only `content`
    pub(crate) fn serve_truncated(&self, file_id: &str, content: &[u8], announced: u64) {
        self.insert(file_id, content, None, Some(announced));
    }

    /// Fail the next `times` requests for `file_id`, then serve normally
    pub(crate) fn fail_times(&self, file_id: &str, failure: FetchFailure, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert(file_id.to_string(), (failure, Some(times)));
    }

    pub(crate) fn fail_always(&self, file_id: &str, failure: FetchFailure) {
        self.failures
            .lock()
            .unwrap()
            .insert(file_id.to_string(), (failure, None));
    }

    /// Never answer requests for `file_id`
    pub(crate) fn hang(&self, file_id: &str) {
        self.hanging.lock().unwrap().push(file_id.to_string());
    }

    pub(crate) fn calls(&self, file_id: &str) -> u32 {
        self.calls.lock().unwrap().get(file_id).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    fn insert(
        &self,
        file_id: &str,
        content: &[u8],
        file_name: Option<String>,
        announced_length: Option<u64>,
    ) {
        self.files.lock().unwrap().insert(
            file_id.to_string(),
            Served {
                content: content.to_vec(),
                file_name,
                announced_length,
            },
        );
    }

    fn take_failure(&self, file_id: &str) -> Option<FetchFailure> {
        let mut failures = self.failures.lock().unwrap();
        let (failure, remaining) = failures.get_mut(file_id)?;
        match remaining {
            None => Some(failure.clone()),
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(failure.clone())
            }
        }
    }
}

#[async_trait]
impl FileFetcher for MockFetcher {
    async fn resolve(&self, locator: &Locator) -> std::result::Result<FetchedFile, FetchFailure> {
        let file_id = locator.file_id.as_str();
        *self
            .calls
            .lock()
            .unwrap()
            .entry(file_id.to_string())
            .or_default() += 1;

        if let Some(failure) = self.take_failure(file_id) {
            return Err(failure);
        }

        if self.hanging.lock().unwrap().iter().any(|id| id == file_id) {
            std::future::pending::<()>().await;
        }

        let served = self
            .files
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .ok_or_else(|| FetchFailure::Permanent(format!("no such file {file_id}")))?;

        let chunks: Vec<std::result::Result<Vec<u8>, FetchFailure>> = served
            .content
            .chunks(4)
            .map(|c| Ok(c.to_vec()))
            .collect();

        Ok(FetchedFile {
            file_name: served.file_name,
            content_length: Some(
                served
                    .announced_length
                    .unwrap_or(served.content.len() as u64),
            ),
            body: futures::stream::iter(chunks).boxed(),
        })
    }
}

/// Something the mock transport delivered to the destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Sent {
    File {
        caption: String,
        file_name: String,
        content: Vec<u8>,
    },
    Text {
        text: String,
    },
}

/// In-memory [`ChatTransport`]
///
/// The source history is paged by position; each page is returned newest
/// first so callers have to order it themselves.
#[derive(Default)]
pub(crate) struct MockTransport {
    history: Mutex<Vec<Message>>,
    destination_history: Mutex<Vec<Message>>,
    sent: Mutex<Vec<Sent>>,
    send_attempts: Mutex<u32>,
    fail_send_at: Mutex<Option<u32>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_history(messages: Vec<Message>) -> Self {
        let transport = Self::new();
        *transport.history.lock().unwrap() = messages;
        transport
    }

    pub(crate) fn push(&self, message: Message) {
        self.history.lock().unwrap().push(message);
    }

    pub(crate) fn push_destination(&self, message: Message) {
        self.destination_history.lock().unwrap().push(message);
    }

    /// Make the `attempt`-th file send (counting from 1) fail
    pub(crate) fn fail_send_at(&self, attempt: u32) {
        *self.fail_send_at.lock().unwrap() = Some(attempt);
    }

    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    /// Captions of every file sent, in order
    pub(crate) fn captions(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::File { caption, .. } => Some(caption),
                Sent::Text { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn list_messages(
        &self,
        _channel: &ChannelId,
        from: Option<&Cursor>,
        limit: usize,
    ) -> Result<MessagePage> {
        let history = self.history.lock().unwrap();
        let start = from
            .and_then(|c| c.0.parse::<usize>().ok())
            .unwrap_or(0)
            .min(history.len());
        let end = (start + limit).min(history.len());

        let mut messages = history[start..end].to_vec();
        messages.reverse();

        Ok(MessagePage {
            messages,
            cursor: Some(Cursor(end.to_string())),
            has_more: end < history.len(),
        })
    }

    async fn send_file(
        &self,
        _channel: &ChannelId,
        file: &OutgoingFile,
        caption: &str,
    ) -> std::result::Result<(), SendFailure> {
        let attempt = {
            let mut attempts = self.send_attempts.lock().unwrap();
            *attempts += 1;
            *attempts
        };
        if *self.fail_send_at.lock().unwrap() == Some(attempt) {
            return Err(SendFailure::new("flood wait"));
        }

        let content = std::fs::read(&file.path).map_err(|e| SendFailure::new(e.to_string()))?;
        self.sent.lock().unwrap().push(Sent::File {
            caption: caption.to_string(),
            file_name: file.file_name.clone(),
            content,
        });
        Ok(())
    }

    async fn send_text(
        &self,
        _channel: &ChannelId,
        text: &str,
    ) -> std::result::Result<(), SendFailure> {
        self.sent.lock().unwrap().push(Sent::Text {
            text: text.to_string(),
        });
        Ok(())
    }

    async fn recent_messages(&self, _channel: &ChannelId, limit: usize) -> Result<Vec<Message>> {
        Ok(self
            .destination_history
            .lock()
            .unwrap()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}
