use reel_relay_bot::bot::throttle::{is_download_candidate, ThrottlePolicy};
use reel_relay_bot::bot::RateLimiter;
use reel_relay_bot::download::domains::{find_url, is_allowed, ALLOWED_DOMAINS};
use reel_relay_bot::error::RejectReason;
use std::sync::Arc;
use std::time::{Duration, Instant};

const LINK: &str = "https://vm.tiktok.com/ZMabc/";

fn limiter() -> RateLimiter {
    RateLimiter::new(ThrottlePolicy::default())
}

#[tokio::test]
async fn test_window_never_admits_more_than_limit() {
    let limiter = limiter();
    let start = Instant::now();

    // 20 messages spread over 40 seconds: only the first 5 fit in the window
    let mut admitted = 0;
    for i in 0..20 {
        let now = start + Duration::from_secs(i * 2);
        if limiter.admit(7, now, false).await.is_ok() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 5);

    // Rejected messages were not recorded, so the window frees up 60s after the first
    let later = start + Duration::from_secs(60);
    assert!(limiter.admit(7, later, false).await.is_ok());
}

#[tokio::test]
async fn test_downloads_spaced_by_cooldown() {
    let limiter = limiter();
    let start = Instant::now();

    assert!(limiter.admit(1, start, true).await.is_ok());
    assert_eq!(
        limiter
            .admit(1, start + Duration::from_secs(29), true)
            .await,
        Err(RejectReason::DownloadCooldown)
    );
    // Plain chatter is unaffected by the cooldown
    assert!(limiter
        .admit(1, start + Duration::from_secs(29), false)
        .await
        .is_ok());
    assert!(limiter
        .admit(1, start + Duration::from_secs(30), true)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_flood_rejection_takes_precedence() {
    let limiter = limiter();
    let start = Instant::now();
    for _ in 0..5 {
        assert!(limiter.admit(3, start, false).await.is_ok());
    }
    assert_eq!(
        limiter.admit(3, start, true).await,
        Err(RejectReason::FloodLimit)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_messages_from_one_user() {
    let limiter = Arc::new(limiter());
    let now = Instant::now();

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.admit(99, now, false).await.is_ok() })
        })
        .collect();

    let mut admitted = 0;
    for task in tasks {
        if task.await.unwrap_or(false) {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 5);
}

#[test]
fn test_link_classification_end_to_end() {
    let text = format!("look at this {LINK}");
    assert!(is_download_candidate(&text));

    let url = find_url(&text);
    assert_eq!(url, Some(LINK));
    assert!(url.is_some_and(is_allowed));

    assert!(!is_allowed("https://vimeo.com/123"));
    assert!(!is_allowed("https://nottiktok.com/video/1"));
    assert!(ALLOWED_DOMAINS
        .iter()
        .all(|domain| is_allowed(&format!("https://{domain}/x"))));
}
