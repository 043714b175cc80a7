//! yt-dlp extraction collaborator
//!
//! Runs `yt-dlp` as a child process for one URL and reports the path of the
//! produced file. The process is awaited asynchronously, so a long download
//! never stalls the update dispatcher.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Format preference: ≤720p mp4, then any mp4, then whatever is best
pub const FORMAT_PREFERENCE: &str = "best[height<=720][ext=mp4]/best[ext=mp4]/best";

/// Output file name template inside the downloads directory
pub const OUTPUT_TEMPLATE: &str = "%(id)s.%(ext)s";

/// Patterns indicating the video itself cannot be fetched
const UNAVAILABLE_PATTERNS: &[&str] = &[
    "Video unavailable",
    "Private video",
    "This video is not available",
    "This video is private",
    "Sign in to confirm your age",
    "age-restricted",
    "removed by the uploader",
    "no longer available",
    "blocked it in your country",
    "geo-restricted",
    "copyright",
    "HTTP Error 403",
    "HTTP Error 404",
    "Requested content is not available",
    "login required",
];

/// Patterns indicating the link is not something yt-dlp can handle
const UNSUPPORTED_PATTERNS: &[&str] = &[
    "Unsupported URL",
    "is not a valid URL",
    "Unable to extract",
];

/// Patterns indicating a transient network failure
const NETWORK_PATTERNS: &[&str] = &[
    "Connection reset",
    "Connection timed out",
    "Unable to download webpage",
    "HTTP Error 429",
    "HTTP Error 503",
    "Read timed out",
    "network is unreachable",
    "Temporary failure in name resolution",
];

/// Errors reported by the extraction collaborator
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Video is private, removed, geo-blocked or otherwise unavailable
    #[error("video unavailable: {0}")]
    Unavailable(String),
    /// yt-dlp does not support the link
    #[error("unsupported link: {0}")]
    Unsupported(String),
    /// Transient network failure
    #[error("network failure: {0}")]
    Network(String),
    /// Any other non-zero exit
    #[error("yt-dlp failed: {0}")]
    Failed(String),
    /// The run exceeded the time limit
    #[error("yt-dlp timed out after {0}s")]
    Timeout(u64),
    /// The process could not be started
    #[error("failed to run yt-dlp: {0}")]
    Spawn(#[source] std::io::Error),
    /// yt-dlp exited successfully but printed no file path
    #[error("yt-dlp reported no output file")]
    MissingOutput,
}

impl ExtractError {
    /// Classify yt-dlp's stderr into an error kind
    #[must_use]
    pub fn classify(stderr: &str) -> Self {
        let message = stderr.trim().to_string();
        let contains_any = |patterns: &[&str]| patterns.iter().any(|p| message.contains(p));

        if contains_any(UNSUPPORTED_PATTERNS) {
            Self::Unsupported(message)
        } else if contains_any(UNAVAILABLE_PATTERNS) {
            Self::Unavailable(message)
        } else if contains_any(NETWORK_PATTERNS) {
            Self::Network(message)
        } else {
            Self::Failed(message)
        }
    }
}

/// Resolves a video page URL into a local media file
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoExtractor: Send + Sync {
    /// Download the video behind `url` and return the local file path
    async fn extract(&self, url: &str) -> Result<PathBuf, ExtractError>;
}

/// [`VideoExtractor`] backed by the yt-dlp executable
pub struct YtdlpExtractor {
    binary: String,
    downloads_dir: PathBuf,
    timeout: Duration,
}

impl YtdlpExtractor {
    /// Create an extractor writing into `downloads_dir`
    #[must_use]
    pub fn new(binary: impl Into<String>, downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            downloads_dir: downloads_dir.into(),
            timeout: Duration::from_secs(crate::config::YTDLP_TIMEOUT_SECS),
        }
    }

    /// Override the time limit of one run
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, url: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["-f", FORMAT_PREFERENCE])
            .args(["--merge-output-format", "mp4"])
            .args(["--no-playlist", "--quiet", "--no-warnings", "--no-progress"])
            .args(["--print", "after_move:filepath"])
            .arg("-o")
            .arg(self.downloads_dir.join(OUTPUT_TEMPLATE))
            .arg("--")
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl VideoExtractor for YtdlpExtractor {
    async fn extract(&self, url: &str) -> Result<PathBuf, ExtractError> {
        debug!(url, "Executing yt-dlp");

        let output = tokio::time::timeout(self.timeout, self.command(url).output())
            .await
            .map_err(|_| ExtractError::Timeout(self.timeout.as_secs()))?
            .map_err(ExtractError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let err = ExtractError::classify(&stderr);
            warn!(url, exit_status = %output.status, error = %err, "yt-dlp run failed");
            return Err(err);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let printed = last_printed_path(&stdout).ok_or(ExtractError::MissingOutput)?;
        Ok(prefer_merged_mp4(printed).await)
    }
}

/// yt-dlp prints the final path as the last line
fn last_printed_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .map(PathBuf::from)
}

/// Use the `.mp4` sibling if the reported file is not an mp4 but the merged file exists
async fn prefer_merged_mp4(path: PathBuf) -> PathBuf {
    if path.extension().is_some_and(|ext| ext == "mp4") {
        return path;
    }
    let merged = path.with_extension("mp4");
    if tokio::fs::try_exists(&merged).await.unwrap_or(false) {
        merged
    } else {
        path
    }
}
