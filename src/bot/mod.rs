/// Command, link and callback handlers
pub mod handlers;
/// Telegram implementation of the reply side
pub mod reply;
/// Channel subscription gate
pub mod subscription;
/// Per-user flood protection and download cooldown
pub mod throttle;

pub use subscription::SubscriptionGate;
pub use throttle::RateLimiter;
