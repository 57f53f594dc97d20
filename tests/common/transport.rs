//! In-memory chat transport that records what it delivers

use async_trait::async_trait;
use drive_relay::{
    ChannelId, ChatTransport, Cursor, Message, MessagePage, OutgoingFile, Result, SendFailure,
};
use std::sync::Mutex;

/// A file delivered to the destination channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub caption: String,
    pub file_name: String,
    pub content: Vec<u8>,
}

/// Source history served newest-first per page; destination sends recorded in order
#[derive(Default)]
pub struct RecordingTransport {
    history: Mutex<Vec<Message>>,
    delivered: Mutex<Vec<Delivered>>,
}

impl RecordingTransport {
    pub fn new(history: Vec<Message>) -> Self {
        Self {
            history: Mutex::new(history),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, message: Message) {
        self.history.lock().unwrap().push(message);
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn captions(&self) -> Vec<String> {
        self.delivered().into_iter().map(|d| d.caption).collect()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
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
        let content = std::fs::read(&file.path).map_err(|e| SendFailure::new(e.to_string()))?;
        self.delivered.lock().unwrap().push(Delivered {
            caption: caption.to_string(),
            file_name: file.file_name.clone(),
            content,
        });
        Ok(())
    }

    async fn send_text(
        &self,
        _channel: &ChannelId,
        _text: &str,
    ) -> std::result::Result<(), SendFailure> {
        Ok(())
    }
}
