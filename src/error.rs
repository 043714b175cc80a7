//! Error taxonomy shared by the bot handlers and the download pipeline.
//!
//! Every variant maps to a short fixed reply via [`BotError::user_message`];
//! the detail carried by a variant is for operator logs only.

use thiserror::Error;

/// Reply sent when the download pipeline fails for any reason.
pub const GENERIC_FAILURE_TEXT: &str =
    "Couldn't download the video 😔 Check the link or try another one.";

/// Reason the rate limiter refused an inbound message.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Too many messages inside the sliding window
    #[error("flood limit reached")]
    FloodLimit,
    /// Download requested before the cooldown elapsed
    #[error("download cooldown active")]
    DownloadCooldown,
}

/// Errors that can occur while serving a user request
#[derive(Error, Debug)]
pub enum BotError {
    /// Request refused by the rate limiter
    #[error(transparent)]
    Throttled(#[from] RejectReason),
    /// URL host is not on the allow-list (or no URL was found)
    #[error("unsupported domain")]
    UnsupportedDomain,
    /// The extraction collaborator failed
    #[error("extraction failed: {0}")]
    ExtractionFailure(String),
    /// Channel membership query failed
    #[error("subscription check failed: {0}")]
    SubscriptionCheckFailure(String),
    /// A Telegram send failed
    #[error("Telegram delivery error: {0}")]
    Delivery(String),
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BotError {
    /// Fixed text shown to the user for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use reel_relay_bot::error::{BotError, GENERIC_FAILURE_TEXT};
    ///
    /// let err = BotError::ExtractionFailure("HTTP Error 404".to_string());
    /// assert_eq!(err.user_message(), GENERIC_FAILURE_TEXT);
    /// ```
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::Throttled(RejectReason::FloodLimit) => "Too many requests! Wait a minute ⏳",
            Self::Throttled(RejectReason::DownloadCooldown) => {
                "Wait 30 seconds before the next download ⏳"
            }
            Self::UnsupportedDomain => {
                "Only TikTok, Instagram Reels and YouTube Shorts links are supported 😔"
            }
            Self::SubscriptionCheckFailure(_) => "Subscribe to the channel to use the bot!",
            Self::ExtractionFailure(_) | Self::Delivery(_) | Self::Io(_) => GENERIC_FAILURE_TEXT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_is_not_shown_to_user() {
        let err = BotError::ExtractionFailure("ERROR: [tiktok] 123: secret detail".to_string());
        assert!(!err.user_message().contains("secret"));
        assert!(err.to_string().contains("secret detail"));
    }

    #[test]
    fn test_reject_reason_converts() {
        let err: BotError = RejectReason::DownloadCooldown.into();
        assert!(matches!(
            err,
            BotError::Throttled(RejectReason::DownloadCooldown)
        ));
        assert!(err.user_message().contains("30 seconds"));
    }
}
