use crate::bot;
use crate::bot::handlers::{Command, CHECK_SUBSCRIPTION_CALLBACK};
use crate::bot::subscription::TelegramMembership;
use crate::bot::throttle::is_download_candidate;
use crate::bot::{RateLimiter, SubscriptionGate};
use crate::config::{Settings, STALE_DOWNLOAD_MAX_AGE_SECS, STALE_DOWNLOAD_SWEEP_SECS};
use crate::download::{workdir, LinkDispatcher, YtdlpExtractor};
use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use teloxide::update_listeners::{webhooks, Polling};
use tokio::net::TcpListener;
use tracing::{debug, error, info};
use url::Url;

/// Body of the `GET /` health endpoint
pub const HEALTH_BODY: &str = "Bot is running";

/// Run the Telegram transport runtime.
///
/// Uses webhook delivery when a webhook URL is configured and long polling
/// otherwise. The health endpoint is served on the configured port in both modes.
///
/// # Errors
///
/// Returns an error if the downloads directory cannot be created, the port
/// cannot be bound, or the webhook cannot be registered.
pub async fn run_bot(settings: Arc<Settings>) -> Result<()> {
    init_downloads(&settings).await?;

    let bot = Bot::new(settings.bot_token.clone());
    let rate_limiter = init_rate_limiter();
    let gate = init_subscription_gate(&bot, &settings);
    let link_dispatcher = init_link_dispatcher(&settings);
    let handler = setup_handler();
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .dependencies(dptree::deps![
            settings.clone(),
            rate_limiter,
            gate,
            link_dispatcher
        ])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .enable_ctrlc_handler()
        .build();

    if let Some(endpoint) = settings.webhook_endpoint() {
        let url = Url::parse(&endpoint).with_context(|| format!("Invalid webhook URL {endpoint}"))?;
        // Registers the webhook now and deletes it once the listener stops
        let (listener, stop_flag, router) =
            webhooks::axum_to_router(bot, webhooks::Options::new(addr, url))
                .await
                .context("Failed to register webhook")?;

        serve_http(bind(addr).await?, router.route("/", get(health)), stop_flag);
        info!("Bot is running (webhook mode, {endpoint})...");

        dispatcher
            .dispatch_with_listener(
                listener,
                LoggingErrorHandler::with_custom_text("An error from the webhook listener"),
            )
            .await;
    } else {
        serve_http(bind(addr).await?, health_router(), std::future::pending());
        let listener = Polling::builder(bot).delete_webhook().await.build();
        info!("Bot is running (polling mode)...");

        dispatcher
            .dispatch_with_listener(
                listener,
                LoggingErrorHandler::with_custom_text("An error from the update listener"),
            )
            .await;
    }

    Ok(())
}

async fn init_downloads(settings: &Settings) -> Result<()> {
    let dir = settings.downloads_dir.clone();
    workdir::prepare(&dir)
        .await
        .with_context(|| format!("Failed to create downloads directory {}", dir.display()))?;
    info!("Downloads directory ready: {}", dir.display());

    workdir::spawn_sweeper(
        dir,
        Duration::from_secs(STALE_DOWNLOAD_MAX_AGE_SECS),
        Duration::from_secs(STALE_DOWNLOAD_SWEEP_SECS),
    );
    Ok(())
}

fn init_rate_limiter() -> Arc<RateLimiter> {
    let limiter = RateLimiter::default();
    let policy = limiter.policy();

    info!(
        "Initializing RateLimiter (window: {}s, max messages: {}, download cooldown: {}s)",
        policy.window.as_secs(),
        policy.max_messages,
        policy.download_cooldown.as_secs()
    );

    Arc::new(limiter)
}

fn init_subscription_gate(bot: &Bot, settings: &Settings) -> Arc<SubscriptionGate> {
    info!(
        "Subscription required for channel {} ({})",
        settings.channel_username, settings.channel_id
    );
    let membership = TelegramMembership::new(bot.clone(), ChatId(settings.channel_id));
    Arc::new(SubscriptionGate::new(Arc::new(membership)))
}

fn init_link_dispatcher(settings: &Settings) -> Arc<LinkDispatcher> {
    let extractor = YtdlpExtractor::new(settings.ytdlp_path.clone(), settings.downloads_dir.clone());
    Arc::new(LinkDispatcher::new(Arc::new(extractor)))
}

async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {addr}"))
}

async fn health() -> &'static str {
    HEALTH_BODY
}

/// Router serving only the health endpoint
#[must_use]
pub fn health_router() -> Router {
    Router::new().route("/", get(health))
}

fn serve_http<F>(listener: TcpListener, app: Router, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP server listening on {addr}");
    }
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("HTTP server error: {e}");
        }
    });
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(
            Update::filter_callback_query()
                .filter(|q: CallbackQuery| {
                    q.data.as_deref() == Some(CHECK_SUBSCRIPTION_CALLBACK)
                })
                .endpoint(handle_check_subscription),
        )
        .branch(
            // Every message passes the rate limiter before any handler
            Update::filter_message()
                .filter_async(bot::handlers::throttle_message)
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(
                    dptree::filter(|msg: Message| msg.text().is_some_and(is_download_candidate))
                        .endpoint(handle_link),
                ),
        )
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    gate: Arc<SubscriptionGate>,
    settings: Arc<Settings>,
) -> Result<(), teloxide::RequestError> {
    let res = match cmd {
        Command::Start => bot::handlers::start(bot, msg, gate, settings).await,
        Command::Help => bot::handlers::help(bot, msg).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_link(
    bot: Bot,
    msg: Message,
    gate: Arc<SubscriptionGate>,
    link_dispatcher: Arc<LinkDispatcher>,
    settings: Arc<Settings>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) =
        bot::handlers::handle_link(bot, msg, gate, link_dispatcher, settings).await
    {
        error!("Link handler error: {}", e);
    }
    respond(())
}

async fn handle_check_subscription(
    bot: Bot,
    q: CallbackQuery,
    gate: Arc<SubscriptionGate>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = bot::handlers::handle_check_subscription(bot, q, gate).await {
        error!("Subscription callback handler error: {}", e);
    }
    respond(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::subscription::MockChannelMembership;
    use crate::download::ytdlp::MockVideoExtractor;
    use serde_json::json;
    use std::ops::ControlFlow;
    use std::path::Path;
    use std::time::Instant;
    use teloxide::types::Me;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    const USER_ID: i64 = 42;

    fn test_settings(downloads_dir: &Path) -> Settings {
        Settings {
            bot_token: "dummy".to_string(),
            channel_id: -100,
            channel_username: "@channel".to_string(),
            webhook_url: None,
            port: 0,
            downloads_dir: downloads_dir.to_path_buf(),
            ytdlp_path: "yt-dlp".to_string(),
        }
    }

    fn message_update(text: &str, from: Option<i64>) -> serde_json::Result<Update> {
        let mut message = json!({
            "message_id": 1,
            "date": 1_700_000_000,
            "chat": { "id": USER_ID, "type": "private", "first_name": "Alice" },
            "text": text,
        });
        if let Some(id) = from {
            message["from"] = json!({ "id": id, "is_bot": false, "first_name": "Alice" });
        }
        if text.starts_with('/') {
            let len = text.split_whitespace().next().map_or(0, str::len);
            message["entities"] = json!([{ "type": "bot_command", "offset": 0, "length": len }]);
        }
        serde_json::from_str(&json!({ "update_id": 1, "message": message }).to_string())
    }

    fn me() -> serde_json::Result<Me> {
        serde_json::from_value(json!({
            "id": 1,
            "is_bot": true,
            "first_name": "Reel",
            "username": "reel_bot",
            "can_join_groups": false,
            "can_read_all_group_messages": false,
            "supports_inline_queries": false,
            "can_connect_to_business": false,
            "has_main_web_app": false,
        }))
    }

    /// Bot whose API calls fail fast against a closed local port
    async fn offline_bot() -> Result<Bot> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        drop(listener);
        Ok(Bot::new("123456:TEST").set_api_url(Url::parse(&format!("http://{addr}/"))?))
    }

    /// Gate and dispatcher that fail the test if a link ever reaches them
    fn untouched_pipeline() -> (Arc<SubscriptionGate>, Arc<LinkDispatcher>) {
        let mut membership = MockChannelMembership::new();
        membership.expect_member_status().times(0);
        let mut extractor = MockVideoExtractor::new();
        extractor.expect_extract().times(0);
        (
            Arc::new(SubscriptionGate::new(Arc::new(membership))),
            Arc::new(LinkDispatcher::new(Arc::new(extractor))),
        )
    }

    async fn dispatch(
        update: Update,
        limiter: Arc<RateLimiter>,
    ) -> Result<ControlFlow<Result<(), teloxide::RequestError>, dptree::di::DependencyMap>> {
        let root = tempfile::tempdir()?;
        let (gate, link_dispatcher) = untouched_pipeline();
        let deps = dptree::deps![
            offline_bot().await?,
            me()?,
            update,
            Arc::new(test_settings(root.path())),
            limiter,
            gate,
            link_dispatcher
        ];
        Ok(setup_handler().dispatch(deps).await)
    }

    #[tokio::test]
    async fn test_throttled_link_never_reaches_handlers() -> Result<()> {
        let limiter = Arc::new(RateLimiter::default());
        let now = Instant::now();
        for _ in 0..5 {
            assert!(limiter.admit(USER_ID, now, false).await.is_ok());
        }

        let update = message_update("https://www.tiktok.com/@x/video/123", Some(USER_ID))?;
        let flow = dispatch(update, limiter).await?;

        assert!(matches!(flow, ControlFlow::Continue(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_admitted_command_reaches_handler() -> Result<()> {
        let update = message_update("/help", Some(USER_ID))?;
        let flow = dispatch(update, Arc::new(RateLimiter::default())).await?;

        assert!(matches!(flow, ControlFlow::Break(Ok(()))));
        Ok(())
    }

    #[tokio::test]
    async fn test_message_without_sender_is_dropped() -> Result<()> {
        let update = message_update("https://www.tiktok.com/@x/video/123", None)?;
        let flow = dispatch(update, Arc::new(RateLimiter::default())).await?;

        assert!(matches!(flow, ControlFlow::Continue(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_health_endpoint() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        serve_http(listener, health_router(), async {
            stop_rx.await.ok();
        });

        let mut stream = TcpStream::connect(addr).await?;
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await?;
        let mut response = String::new();
        stream.read_to_string(&mut response).await?;

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with(HEALTH_BODY));
        stop_tx.send(()).ok();
        Ok(())
    }

    #[tokio::test]
    async fn test_init_downloads_creates_dir() -> Result<()> {
        let root = tempfile::tempdir()?;
        let settings = test_settings(&root.path().join("downloads"));

        init_downloads(&settings).await?;
        assert!(settings.downloads_dir.is_dir());
        Ok(())
    }
}
