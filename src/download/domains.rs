//! Link extraction and the domain allow-list

// lazy_regex! uses once_cell internally
#![allow(clippy::non_std_lazy_statics)]

use lazy_regex::lazy_regex;
use url::Url;

/// Hosts the bot accepts links from. Subdomains of these are accepted too.
pub const ALLOWED_DOMAINS: &[&str] = &[
    "tiktok.com",
    "vm.tiktok.com",
    "vt.tiktok.com",
    "instagram.com",
    "www.instagram.com",
    "youtube.com",
    "youtu.be",
    "m.youtube.com",
];

/// Match the first http(s) URL in a message
static RE_URL: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?i)https?://\S+");

/// Returns the first http(s) URL found in `text`.
///
/// # Examples
///
/// ```
/// use reel_relay_bot::download::domains::find_url;
///
/// assert_eq!(
///     find_url("watch this https://youtu.be/abc please"),
///     Some("https://youtu.be/abc")
/// );
/// assert_eq!(find_url("no links here"), None);
/// ```
#[must_use]
pub fn find_url(text: &str) -> Option<&str> {
    RE_URL.find(text).map(|m| m.as_str())
}

/// Returns `true` if the URL's host is an allow-listed domain or one of its subdomains.
///
/// # Examples
///
/// ```
/// use reel_relay_bot::download::domains::is_allowed;
///
/// assert!(is_allowed("https://www.tiktok.com/@x/video/123"));
/// assert!(!is_allowed("https://example.com/video"));
/// ```
#[must_use]
pub fn is_allowed(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.trim_end_matches('.');

    ALLOWED_DOMAINS.iter().any(|domain| {
        host == *domain
            || host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_hosts() {
        for url in [
            "https://www.tiktok.com/@x/video/123",
            "https://vm.tiktok.com/ZMabc/",
            "https://www.instagram.com/reel/Cxyz/",
            "https://youtube.com/shorts/abc",
            "https://m.youtube.com/shorts/abc",
            "https://youtu.be/abc",
            "HTTPS://WWW.YOUTUBE.COM/shorts/abc",
        ] {
            assert!(is_allowed(url), "{url} should be allowed");
        }
    }

    #[test]
    fn test_rejected_hosts() {
        for url in [
            "https://example.com/video",
            "https://nottiktok.com/video",
            "https://tiktok.com.evil.net/video",
            "https://example.com/?next=tiktok.com",
            "not a url",
            "file:///etc/passwd",
        ] {
            assert!(!is_allowed(url), "{url} should be rejected");
        }
    }

    #[test]
    fn test_find_url_picks_first_link() {
        let text = "first https://youtu.be/a then http://tiktok.com/b";
        assert_eq!(find_url(text), Some("https://youtu.be/a"));
    }

    #[test]
    fn test_find_url_case_insensitive_scheme() {
        assert_eq!(
            find_url("HTTPS://vm.tiktok.com/x"),
            Some("HTTPS://vm.tiktok.com/x")
        );
    }
}
