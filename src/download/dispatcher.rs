//! Link dispatcher: validate, fetch, classify, send, clean up
//!
//! A linear pipeline with no retries. The downloaded file is owned by a
//! [`DownloadedFile`] guard, so it is removed whichever way the pipeline exits:
//! asynchronously via [`DownloadedFile::remove`] after a finished delivery, and
//! by `Drop` on early returns.

use crate::config::INLINE_VIDEO_LIMIT_BYTES;
use crate::download::domains::{find_url, is_allowed};
use crate::download::workdir::file_size;
use crate::download::ytdlp::VideoExtractor;
use crate::error::BotError;
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Sent once a link is accepted and the download starts
pub const DOWNLOAD_STARTED_TEXT: &str = "Downloading the video... Please wait ⏳";
/// Caption of an inline video
pub const VIDEO_CAPTION: &str = "Done! No watermark 👍";
/// Caption of a video sent as a document
pub const DOCUMENT_CAPTION: &str = "The video is large, sending it as a file 👍";

/// Outgoing side of a conversation with one user
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaReply: Send + Sync {
    /// Send a plain text message
    async fn send_text(&self, text: &str) -> Result<()>;
    /// Send a file as an inline video
    async fn send_video(&self, path: &Path, caption: &str) -> Result<()>;
    /// Send a file as a generic document
    async fn send_document(&self, path: &Path, caption: &str) -> Result<()>;
}

/// How a downloaded file is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Inline video attachment
    Video,
    /// Generic file attachment
    Document,
}

impl Delivery {
    /// Files strictly below `inline_limit` bytes go out as inline video
    ///
    /// # Examples
    ///
    /// ```
    /// use reel_relay_bot::download::dispatcher::Delivery;
    ///
    /// assert_eq!(Delivery::for_size(99, 100), Delivery::Video);
    /// assert_eq!(Delivery::for_size(100, 100), Delivery::Document);
    /// ```
    #[must_use]
    pub const fn for_size(size: u64, inline_limit: u64) -> Self {
        if size < inline_limit {
            Self::Video
        } else {
            Self::Document
        }
    }
}

/// A downloaded file that is deleted when dropped
#[derive(Debug)]
pub struct DownloadedFile {
    path: PathBuf,
    removed: bool,
}

impl DownloadedFile {
    /// Take ownership of the file at `path`
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self {
            path,
            removed: false,
        }
    }

    /// Location of the file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file without blocking the runtime
    pub async fn remove(mut self) {
        let result = tokio::fs::remove_file(&self.path).await;
        self.removed = true;
        log_removal(&self.path, result);
    }
}

impl Drop for DownloadedFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        // Blocking unlink; only reached on early-return paths
        log_removal(&self.path, std::fs::remove_file(&self.path));
    }
}

fn log_removal(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => debug!(path = %path.display(), "Removed downloaded file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove downloaded file"),
    }
}

/// Routes accepted links to the extractor and the result back to the user
pub struct LinkDispatcher {
    extractor: Arc<dyn VideoExtractor>,
    inline_limit: u64,
}

impl LinkDispatcher {
    /// Create a dispatcher using `extractor`
    #[must_use]
    pub fn new(extractor: Arc<dyn VideoExtractor>) -> Self {
        Self {
            extractor,
            inline_limit: INLINE_VIDEO_LIMIT_BYTES,
        }
    }

    /// Override the inline video size threshold
    #[must_use]
    pub const fn with_inline_limit(mut self, inline_limit: u64) -> Self {
        self.inline_limit = inline_limit;
        self
    }

    /// Handle a link message from `user_id`, replying through `reply`.
    ///
    /// Failures are logged here with their detail; the caller only needs to
    /// send [`BotError::user_message`].
    ///
    /// # Errors
    ///
    /// Returns [`BotError::UnsupportedDomain`] for links outside the allow-list,
    /// [`BotError::ExtractionFailure`] when the download fails and
    /// [`BotError::Delivery`] when a Telegram send fails.
    pub async fn handle(
        &self,
        user_id: i64,
        text: &str,
        reply: &dyn MediaReply,
    ) -> Result<Delivery, BotError> {
        let Some(url) = find_url(text).filter(|url| is_allowed(url)) else {
            warn!(user_id, text, "Rejected link from unsupported domain");
            return Err(BotError::UnsupportedDomain);
        };
        info!(user_id, url, "User sent a link");

        reply
            .send_text(DOWNLOAD_STARTED_TEXT)
            .await
            .map_err(|e| delivery_error(user_id, &e))?;

        let path = self.extractor.extract(url).await.map_err(|e| {
            error!(user_id, url, error = %e, "Video extraction failed");
            BotError::ExtractionFailure(e.to_string())
        })?;
        let file = DownloadedFile::new(path);

        let size = file_size(file.path()).await.map_err(|e| {
            error!(user_id, path = %file.path().display(), error = %e, "Downloaded file is unreadable");
            BotError::ExtractionFailure(e.to_string())
        })?;

        let delivery = Delivery::for_size(size, self.inline_limit);
        let sent = match delivery {
            Delivery::Video => reply.send_video(file.path(), VIDEO_CAPTION).await,
            Delivery::Document => reply.send_document(file.path(), DOCUMENT_CAPTION).await,
        };
        sent.map_err(|e| delivery_error(user_id, &e))?;
        file.remove().await;

        info!(user_id, size_bytes = size, ?delivery, "Video sent to user");
        Ok(delivery)
    }
}

fn delivery_error(user_id: i64, e: &anyhow::Error) -> BotError {
    error!(user_id, error = %e, "Failed to send reply");
    BotError::Delivery(e.to_string())
}
