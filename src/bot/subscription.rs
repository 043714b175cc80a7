//! Channel subscription gate
//!
//! The bot is only usable by members of the required channel. Membership is
//! queried on every gated action; nothing is cached.

use crate::error::BotError;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ChatMemberStatus;
use tracing::{debug, error};

/// Source of channel membership information
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelMembership: Send + Sync {
    /// Current status of `user_id` in the required channel
    async fn member_status(&self, user_id: i64) -> Result<ChatMemberStatus>;
}

/// Membership lookup through the Telegram `getChatMember` method
pub struct TelegramMembership {
    bot: Bot,
    channel_id: ChatId,
}

impl TelegramMembership {
    /// Create a lookup for the given channel
    #[must_use]
    pub const fn new(bot: Bot, channel_id: ChatId) -> Self {
        Self { bot, channel_id }
    }
}

#[async_trait]
impl ChannelMembership for TelegramMembership {
    async fn member_status(&self, user_id: i64) -> Result<ChatMemberStatus> {
        let member = self
            .bot
            .get_chat_member(self.channel_id, UserId(user_id.cast_unsigned()))
            .await?;
        Ok(member.kind.status())
    }
}

/// Answers whether a user may use the bot
#[derive(Clone)]
pub struct SubscriptionGate {
    membership: Arc<dyn ChannelMembership>,
}

impl SubscriptionGate {
    /// Create a gate backed by `membership`
    #[must_use]
    pub fn new(membership: Arc<dyn ChannelMembership>) -> Self {
        Self { membership }
    }

    /// Returns `true` if the user is a member, administrator or owner of the channel.
    ///
    /// Fails closed: any lookup error is logged and reported as not subscribed.
    pub async fn is_subscribed(&self, user_id: i64) -> bool {
        match self.membership.member_status(user_id).await {
            Ok(status) => {
                debug!(user_id, ?status, "Channel membership resolved");
                is_subscribed_status(status)
            }
            Err(e) => {
                let err = BotError::SubscriptionCheckFailure(e.to_string());
                error!(user_id, error = %err, "Subscription check failed, treating as not subscribed");
                false
            }
        }
    }
}

const fn is_subscribed_status(status: ChatMemberStatus) -> bool {
    matches!(
        status,
        ChatMemberStatus::Member | ChatMemberStatus::Administrator | ChatMemberStatus::Owner
    )
}
