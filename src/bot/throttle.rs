//! Per-user flood protection and download cooldown
//!
//! Every inbound message passes through [`RateLimiter::admit`] before any
//! handler sees it. Each user gets a [`UserRecord`] holding a sliding window
//! of recent message timestamps and the time of the last download.
//!
//! Records live in a moka cache behind per-user async mutexes, so the
//! trim-check-append sequence is atomic per user even on a multi-threaded
//! runtime. Records idle for longer than both the window and the cooldown are
//! evicted: such a record would admit the next message exactly like a fresh one.

use crate::config::{DOWNLOAD_COOLDOWN_SECS, FLOOD_MAX_MESSAGES, FLOOD_WINDOW_SECS};
use crate::error::RejectReason;
use moka::future::Cache;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Limits applied to every user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    /// Length of the sliding message window
    pub window: Duration,
    /// Messages admitted inside one window
    pub max_messages: usize,
    /// Minimum interval between downloads
    pub download_cooldown: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(FLOOD_WINDOW_SECS),
            max_messages: FLOOD_MAX_MESSAGES,
            download_cooldown: Duration::from_secs(DOWNLOAD_COOLDOWN_SECS),
        }
    }
}

impl ThrottlePolicy {
    /// How long a record must sit idle before it carries no state worth keeping
    #[must_use]
    pub fn idle_horizon(&self) -> Duration {
        self.window.max(self.download_cooldown)
    }
}

/// Returns `true` if the message text should be treated as a download request.
///
/// # Examples
///
/// ```
/// use reel_relay_bot::bot::throttle::is_download_candidate;
///
/// assert!(is_download_candidate("look HTTPS://youtu.be/abc"));
/// assert!(!is_download_candidate("hello"));
/// ```
#[must_use]
pub fn is_download_candidate(text: &str) -> bool {
    text.to_lowercase().contains("http")
}

/// Rate-limit state of a single user
#[derive(Debug, Default)]
pub struct UserRecord {
    messages: VecDeque<Instant>,
    last_download: Option<Instant>,
}

impl UserRecord {
    /// Applies `policy` to an event observed at `now`.
    ///
    /// The message window is checked and committed first; a download
    /// cooldown rejection does not roll that append back.
    ///
    /// # Errors
    ///
    /// Returns [`RejectReason::FloodLimit`] when the window is full and
    /// [`RejectReason::DownloadCooldown`] when a download comes too early.
    pub fn admit(
        &mut self,
        now: Instant,
        is_download_candidate: bool,
        policy: &ThrottlePolicy,
    ) -> Result<(), RejectReason> {
        while self
            .messages
            .front()
            .is_some_and(|&t| now.saturating_duration_since(t) >= policy.window)
        {
            self.messages.pop_front();
        }

        if self.messages.len() >= policy.max_messages {
            return Err(RejectReason::FloodLimit);
        }
        self.messages.push_back(now);

        if is_download_candidate {
            if let Some(last) = self.last_download {
                if now.saturating_duration_since(last) < policy.download_cooldown {
                    return Err(RejectReason::DownloadCooldown);
                }
            }
            // Never move backwards if events arrive out of order
            self.last_download = Some(self.last_download.map_or(now, |last| last.max(now)));
        }

        Ok(())
    }

    /// Number of timestamps currently held in the window
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.messages.len()
    }
}

/// Shared rate limiter injected into the update handler tree
#[derive(Clone)]
pub struct RateLimiter {
    users: Cache<i64, Arc<Mutex<UserRecord>>>,
    policy: ThrottlePolicy,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(ThrottlePolicy::default())
    }
}

impl RateLimiter {
    /// Creates a limiter enforcing `policy`.
    ///
    /// Records are dropped only after idling past [`ThrottlePolicy::idle_horizon`].
    /// No size-based eviction: a record evicted inside its window would reset
    /// that user's quota.
    ///
    /// # Examples
    ///
    /// ```
    /// use reel_relay_bot::bot::throttle::{RateLimiter, ThrottlePolicy};
    ///
    /// let limiter = RateLimiter::new(ThrottlePolicy::default());
    /// assert_eq!(limiter.policy().max_messages, 5);
    /// ```
    #[must_use]
    pub fn new(policy: ThrottlePolicy) -> Self {
        let users = Cache::builder()
            .time_to_idle(policy.idle_horizon())
            .build();

        Self { users, policy }
    }

    /// Decides whether the user's event at `now` is admitted.
    ///
    /// # Errors
    ///
    /// Returns the [`RejectReason`] when the event is refused.
    pub async fn admit(
        &self,
        user_id: i64,
        now: Instant,
        is_download_candidate: bool,
    ) -> Result<(), RejectReason> {
        let record = self
            .users
            .get_with(user_id, async { Arc::new(Mutex::new(UserRecord::default())) })
            .await;
        let mut record = record.lock().await;
        record.admit(now, is_download_candidate, &self.policy)
    }

    /// The policy this limiter enforces
    #[must_use]
    pub const fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }

    /// Number of users currently tracked
    #[must_use]
    pub fn tracked_users(&self) -> u64 {
        self.users.entry_count()
    }
}
