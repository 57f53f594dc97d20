//! Message builders, test configuration and a mock drive server

use chrono::{TimeZone, Utc};
use drive_relay::config::RetryConfig;
use drive_relay::{Config, Message, MessageId};
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Share link in the form posted to the source channel
pub fn drive_url(file_id: &str) -> String {
    format!("https://drive.google.com/file/d/{file_id}/view?usp=sharing")
}

/// Source message whose timestamp follows its id
pub fn message(id: i64, text: &str) -> Message {
    Message {
        id: MessageId(id),
        text: text.to_string(),
        media: None,
        timestamp: Utc
            .timestamp_opt(1_700_000_000 + id, 0)
            .single()
            .unwrap_or_else(Utc::now),
    }
}

/// Announcement of one part, e.g. `GameX part 1 of 3: <link>`
pub fn part_message(id: i64, title: &str, index: u32, total: u32, file_id: &str) -> Message {
    message(
        id,
        &format!("{title} part {index} of {total}: {}", drive_url(file_id)),
    )
}

/// Config rooted at `dir`, pointed at `endpoint`, with near-instant retries
pub fn test_config(dir: &Path, endpoint: &str) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("relay.db");
    config.download.temp_dir = dir.join("temp");
    config.fetcher.download_endpoint = endpoint.to_string();
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

/// Drive-like download server
pub struct DriveServer {
    pub server: MockServer,
}

impl DriveServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Download endpoint to put in [`drive_relay::config::FetcherConfig`]
    pub fn endpoint(&self) -> String {
        format!("{}/uc", self.server.uri())
    }

    /// Serve `content` as `file_name` for `file_id`
    pub async fn serve(&self, file_id: &str, file_name: &str, content: &[u8]) {
        Mock::given(method("GET"))
            .and(path("/uc"))
            .and(query_param("export", "download"))
            .and(query_param("id", file_id))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(
                        "content-disposition",
                        format!("attachment; filename=\"{file_name}\"").as_str(),
                    )
                    .set_body_bytes(content.to_vec()),
            )
            .mount(&self.server)
            .await;
    }

    /// Answer every request for `file_id` with `status`
    pub async fn respond_with_status(&self, file_id: &str, status: u16) {
        Mock::given(method("GET"))
            .and(path("/uc"))
            .and(query_param("id", file_id))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Number of download requests seen for `file_id`
    pub async fn requests_for(&self, file_id: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| {
                r.url
                    .query_pairs()
                    .any(|(k, v)| k == "id" && v == file_id)
            })
            .count()
    }

    pub async fn total_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .len()
    }
}
