#![deny(missing_docs)]
//! Reel relay bot
//!
//! A Telegram bot that downloads short videos from TikTok, Instagram Reels
//! and YouTube Shorts for subscribers of a channel, with per-user rate limits.

/// Telegram bot handlers, rate limiting and subscription gate
pub mod bot;
/// Configuration management
pub mod config;
/// Link validation and video download pipeline
pub mod download;
/// Error taxonomy
pub mod error;
/// Telegram runtime entrypoint
pub mod runner;
