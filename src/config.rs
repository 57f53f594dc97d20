//! Configuration types for drive-relay

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for drive-relay
///
/// Every field has a default, so `Config::default()` works out of the box and
/// a JSON file only needs to mention the settings it changes. Channel
/// identifiers and credentials are not part of this struct; they are resolved
/// by the embedding application and passed to the coordinator directly.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Scoped storage and concurrency for part downloads
    #[serde(default)]
    pub download: DownloadConfig,

    /// Retry behavior for transient fetch failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Link recognition settings
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Part aggregation policy
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Destination publishing settings
    #[serde(default)]
    pub publish: PublishConfig,

    /// Duplicate detection settings
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Source channel scanning settings
    #[serde(default)]
    pub scan: ScanConfig,

    /// HTTP fetcher settings
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// Missing fields take their defaults. The result is validated before it is returned.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make the pipeline stall or misbehave
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_releases == 0 {
            return Err(invalid(
                "download.max_concurrent_releases",
                "must be at least 1",
            ));
        }
        if self.download.part_concurrency == 0 {
            return Err(invalid("download.part_concurrency", "must be at least 1"));
        }
        if self.scan.page_size == 0 {
            return Err(invalid("scan.page_size", "must be at least 1"));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(invalid(
                "retry.backoff_multiplier",
                "must be greater than or equal to 1.0",
            ));
        }
        if self.extraction.drive_hosts.is_empty() {
            return Err(invalid(
                "extraction.drive_hosts",
                "at least one drive host is required",
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> Error {
    Error::Config {
        message: format!("{key} {message}"),
        key: Some(key.to_string()),
    }
}

/// Download behavior configuration (scoped storage, concurrency)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory for scoped part storage (default: "./temp")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Maximum number of releases downloading or publishing at once (default: 3)
    #[serde(default = "default_max_concurrent_releases")]
    pub max_concurrent_releases: usize,

    /// Maximum parts of one release fetched at once (default: 2)
    #[serde(default = "default_part_concurrency")]
    pub part_concurrency: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            max_concurrent_releases: default_max_concurrent_releases(),
            part_concurrency: default_part_concurrency(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Link recognition configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Hosts whose links are treated as drive-hosted files
    #[serde(default = "default_drive_hosts")]
    pub drive_hosts: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            drive_hosts: default_drive_hosts(),
        }
    }
}

/// How to resolve two messages that disagree on a release's total part count
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalConflictPolicy {
    /// Keep the largest total seen (default)
    ///
    /// Never stalls on a transient mis-parse that under-counts, but may wait
    /// for parts that do not exist if a message over-counts.
    #[default]
    Max,
    /// Keep the first total seen
    First,
    /// Keep the most recently seen total
    Latest,
}

/// What to do with a release whose messages never state a total part count
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownTotalPolicy {
    /// Once no new part has been posted for `settle_after`, take the highest
    /// index as the total, provided indices `1..=highest` are all present (default)
    #[default]
    SettleWhenQuiet,
    /// Keep waiting until some message declares a total
    Wait,
}

/// Part aggregation configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Resolution of conflicting declared totals
    #[serde(default)]
    pub total_conflict: TotalConflictPolicy,

    /// Handling of releases that never declare a total
    #[serde(default)]
    pub unknown_total: UnknownTotalPolicy,

    /// Quiet period after the newest part before an unknown total is settled (default: 10 minutes)
    #[serde(default = "default_settle_after", with = "duration_serde")]
    pub settle_after: Duration,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            total_conflict: TotalConflictPolicy::default(),
            unknown_total: UnknownTotalPolicy::default(),
            settle_after: default_settle_after(),
        }
    }
}

/// Destination publishing configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Send a text message naming the release before its files (default: false)
    #[serde(default)]
    pub announce_release: bool,
}

/// Duplicate detection configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Record fingerprints for captions already visible in the destination (default: true)
    #[serde(default = "default_true")]
    pub seed_from_destination: bool,

    /// Number of recent destination messages inspected when seeding (default: 200)
    #[serde(default = "default_seed_limit")]
    pub seed_limit: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            seed_from_destination: true,
            seed_limit: default_seed_limit(),
        }
    }
}

/// Source channel scanning configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Messages requested per transport page (default: 100)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Delay between live polls after the history scan (default: 30 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Time allowed for in-flight releases to finish on shutdown (default: 30 seconds)
    #[serde(default = "default_shutdown_grace", with = "duration_serde")]
    pub shutdown_grace: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            poll_interval: default_poll_interval(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

/// HTTP fetcher configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Direct-download endpoint; the file id is passed as the `id` query parameter
    #[serde(default = "default_download_endpoint")]
    pub download_endpoint: String,

    /// Per-request timeout (default: 300 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// User agent sent with each request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            download_endpoint: default_download_endpoint(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./drive-relay.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

// Default value functions
fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_max_concurrent_releases() -> usize {
    3
}

fn default_part_concurrency() -> usize {
    2
}

fn default_database_path() -> PathBuf {
    PathBuf::from("drive-relay.db")
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_drive_hosts() -> Vec<String> {
    vec!["drive.google.com".into(), "docs.google.com".into()]
}

fn default_settle_after() -> Duration {
    Duration::from_secs(600)
}

fn default_seed_limit() -> usize {
    200
}

fn default_page_size() -> usize {
    100
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_download_endpoint() -> String {
    "https://drive.google.com/uc".into()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_user_agent() -> String {
    format!("drive-relay/{}", env!("CARGO_PKG_VERSION"))
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.download.max_concurrent_releases, 3);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.aggregation.total_conflict, TotalConflictPolicy::Max);
        assert_eq!(
            config.aggregation.unknown_total,
            UnknownTotalPolicy::SettleWhenQuiet
        );
        assert_eq!(config.aggregation.settle_after, Duration::from_secs(600));
        assert!(config.dedup.seed_from_destination);
        assert_eq!(config.scan.poll_interval, Duration::from_secs(30));
        assert_eq!(
            config.extraction.drive_hosts,
            vec!["drive.google.com".to_string(), "docs.google.com".to_string()]
        );
    }

    #[test]
    fn test_partial_json_overrides_only_named_fields() {
        let json = r#"{
            "retry": { "max_attempts": 2, "initial_delay": 5 },
            "aggregation": { "total_conflict": "latest" },
            "publish": { "announce_release": true }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(5));
        assert_eq!(config.retry.max_delay, Duration::from_secs(60));
        assert!(config.retry.jitter);
        assert_eq!(
            config.aggregation.total_conflict,
            TotalConflictPolicy::Latest
        );
        assert!(config.publish.announce_release);
    }

    #[test]
    fn test_validate_rejects_zero_page_size() {
        let mut config = Config::default();
        config.scan.page_size = 0;

        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("scan.page_size")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        let mut config = Config::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_drive_hosts() {
        let mut config = Config::default();
        config.extraction.drive_hosts.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "download": {{ "max_concurrent_releases": 7 }}, "scan": {{ "page_size": 10 }} }}"#
        )
        .unwrap();

        let config = Config::from_json_file(file.path()).unwrap();
        assert_eq!(config.download.max_concurrent_releases, 7);
        assert_eq!(config.scan.page_size, 10);
    }

    #[test]
    fn test_from_json_file_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "download": {{ "part_concurrency": 0 }} }}"#).unwrap();

        assert!(matches!(
            Config::from_json_file(file.path()),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_from_missing_file_is_config_error() {
        let result = Config::from_json_file(Path::new("/nonexistent/drive-relay.json"));
        assert!(matches!(result, Err(Error::Config { key: None, .. })));
    }
}
