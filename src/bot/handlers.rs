use crate::bot::reply::TelegramReply;
use crate::bot::subscription::SubscriptionGate;
use crate::bot::throttle::{is_download_candidate, RateLimiter};
use crate::config::Settings;
use crate::download::dispatcher::{Delivery, LinkDispatcher, MediaReply};
use crate::error::BotError;
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup},
    utils::command::BotCommands,
};
use tracing::{debug, info, warn};
use url::Url;

/// Callback data of the "check subscription" button
pub const CHECK_SUBSCRIPTION_CALLBACK: &str = "check_sub";

const GREETING_TEXT: &str =
    "Hi! Send me a link to a video from TikTok, Instagram Reels or YouTube Shorts.";
const HELP_TEXT: &str = "Send a link to a TikTok, Instagram Reels or YouTube Shorts video \
     and I will reply with the file, without watermarks.\n\n\
     Limits: 5 messages per minute, one download every 30 seconds.";
const SUBSCRIBE_PROMPT_TEXT: &str = "Subscribe to the channel to use the bot 👇";
const SUBSCRIBED_THANKS_TEXT: &str = "Thanks for subscribing! Now send me a video link.";
const NOT_SUBSCRIBED_ALERT: &str = "You haven't subscribed yet! Subscribe and try again.";

// Helper function to get user name from Message
fn get_user_name(msg: &Message) -> String {
    if let Some(ref user) = msg.from {
        if let Some(ref username) = user.username {
            return username.clone();
        }
        if !user.first_name.is_empty() {
            return user.first_name.clone();
        }
    }
    "Unknown".to_string()
}

/// User ID of the message sender.
/// Returns `None` for messages without a sender, such as channel posts.
pub fn sender_id(msg: &Message) -> Option<i64> {
    msg.from.as_ref().map(|u| u.id.0.cast_signed())
}

/// Supported commands for the bot
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Start the bot and show welcome message
    #[command(description = "Start the bot.")]
    Start,
    /// Show usage
    #[command(description = "How to use the bot.")]
    Help,
}

/// Keyboard with a link to the required channel and a re-check button
///
/// # Examples
///
/// ```
/// use reel_relay_bot::bot::handlers::subscribe_keyboard;
/// let keyboard = subscribe_keyboard("flawlessvideohub").expect("valid handle");
/// assert_eq!(keyboard.inline_keyboard.len(), 2);
/// ```
///
/// # Errors
///
/// Returns an error if the handle does not form a valid URL.
pub fn subscribe_keyboard(channel_handle: &str) -> Result<InlineKeyboardMarkup> {
    let url = Url::parse(&format!("https://t.me/{channel_handle}"))?;
    Ok(InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::url("Subscribe to the channel", url)],
        vec![InlineKeyboardButton::callback(
            "Check subscription",
            CHECK_SUBSCRIPTION_CALLBACK,
        )],
    ]))
}

async fn send_subscribe_prompt(bot: &Bot, chat_id: ChatId, settings: &Settings) -> Result<()> {
    bot.send_message(chat_id, SUBSCRIBE_PROMPT_TEXT)
        .reply_markup(subscribe_keyboard(settings.channel_handle())?)
        .await?;
    Ok(())
}

/// Rate-limit stage run before every message handler.
///
/// Returns `false` (and tells the user why) when the message is throttled.
/// Messages without a sender are dropped here: they have no quota to charge
/// and no membership to check.
pub async fn throttle_message(bot: Bot, msg: Message, limiter: Arc<RateLimiter>) -> bool {
    let Some(user_id) = sender_id(&msg) else {
        debug!(chat_id = %msg.chat.id, "Ignoring message without a sender");
        return false;
    };
    let is_download = msg.text().is_some_and(is_download_candidate);

    let Err(reason) = limiter.admit(user_id, Instant::now(), is_download).await else {
        return true;
    };

    warn!(user_id, %reason, "Message throttled");
    let text = BotError::from(reason).user_message();
    if let Err(e) = bot.send_message(msg.chat.id, text).await {
        warn!(user_id, error = %e, "Failed to send throttle notice");
    }
    false
}

/// Start handler
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn start(
    bot: Bot,
    msg: Message,
    gate: Arc<SubscriptionGate>,
    settings: Arc<Settings>,
) -> Result<()> {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };
    let user_name = get_user_name(&msg);

    info!("User {user_id} ({user_name}) initiated /start command.");

    if gate.is_subscribed(user_id).await {
        bot.send_message(msg.chat.id, GREETING_TEXT).await?;
    } else {
        send_subscribe_prompt(&bot, msg.chat.id, &settings).await?;
    }
    Ok(())
}

/// Help handler
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn help(bot: Bot, msg: Message) -> Result<()> {
    bot.send_message(msg.chat.id, HELP_TEXT).await?;
    Ok(())
}

/// What became of a link message
#[derive(Debug)]
pub enum LinkOutcome {
    /// Sender is not subscribed; nothing was downloaded
    NotSubscribed,
    /// The video was delivered
    Delivered(Delivery),
    /// The pipeline failed and the user got the error's fixed text
    Failed(BotError),
}

/// Gate a link message on subscription, then run it through `dispatcher`.
///
/// Subscribed users get dispatcher errors answered through `reply` with
/// [`BotError::user_message`]. The subscribe prompt for unsubscribed users
/// is left to the caller.
///
/// # Errors
///
/// Returns an error if the failure notice cannot be sent.
pub async fn route_link(
    user_id: i64,
    text: &str,
    gate: &SubscriptionGate,
    dispatcher: &LinkDispatcher,
    reply: &dyn MediaReply,
) -> Result<LinkOutcome> {
    if !gate.is_subscribed(user_id).await {
        info!(user_id, "Link from unsubscribed user");
        return Ok(LinkOutcome::NotSubscribed);
    }

    match dispatcher.handle(user_id, text, reply).await {
        Ok(delivery) => Ok(LinkOutcome::Delivered(delivery)),
        Err(e) => {
            reply.send_text(e.user_message()).await?;
            Ok(LinkOutcome::Failed(e))
        }
    }
}

/// Link handler: subscription gate, then the download pipeline
///
/// # Errors
///
/// Returns an error if a reply to the user cannot be sent.
pub async fn handle_link(
    bot: Bot,
    msg: Message,
    gate: Arc<SubscriptionGate>,
    dispatcher: Arc<LinkDispatcher>,
    settings: Arc<Settings>,
) -> Result<()> {
    let (Some(user_id), Some(text)) = (sender_id(&msg), msg.text()) else {
        return Ok(());
    };

    let reply = TelegramReply::new(bot.clone(), msg.chat.id);
    let outcome = route_link(user_id, text, &gate, &dispatcher, &reply).await?;
    if matches!(outcome, LinkOutcome::NotSubscribed) {
        send_subscribe_prompt(&bot, msg.chat.id, &settings).await?;
    }
    Ok(())
}

/// "Check subscription" button handler
///
/// # Errors
///
/// Returns an error if the callback answer or message edit fails.
pub async fn handle_check_subscription(
    bot: Bot,
    q: CallbackQuery,
    gate: Arc<SubscriptionGate>,
) -> Result<()> {
    let user_id = q.from.id.0.cast_signed();

    if gate.is_subscribed(user_id).await {
        info!(user_id, "Subscription confirmed via button");
        if let Some(message) = q.regular_message() {
            bot.edit_message_text(message.chat.id, message.id, SUBSCRIBED_THANKS_TEXT)
                .await?;
        }
        bot.answer_callback_query(q.id.clone()).await?;
    } else {
        bot.answer_callback_query(q.id.clone())
            .text(NOT_SUBSCRIBED_ALERT)
            .show_alert(true)
            .await?;
    }
    Ok(())
}
