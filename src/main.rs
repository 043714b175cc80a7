// lazy_regex! uses once_cell internally
#![allow(clippy::non_std_lazy_statics)]

use dotenvy::dotenv;
use lazy_regex::lazy_regex;
use reel_relay_bot::config::Settings;
use reel_relay_bot::runner::run_bot;
use std::borrow::Cow;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{prelude::*, EnvFilter};

/// `<bot id>:<secret>`, alone or inside an API URL (`.../bot<token>/getMe`)
static RE_BOT_TOKEN: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"\d{6,}:[A-Za-z0-9_-]{30,}");

fn mask_tokens(line: &str) -> Cow<'_, str> {
    RE_BOT_TOKEN.replace_all(line, "[TELEGRAM_TOKEN]")
}

/// Writer that masks bot tokens before passing output on
struct TokenMasking<W> {
    inner: W,
}

impl<W: Write> Write for TokenMasking<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let line = String::from_utf8_lossy(buf);
        self.inner.write_all(mask_tokens(&line).as_bytes())?;
        // Masking changes the length; the caller only cares that `buf` was consumed
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Wraps any log sink so every event it receives is token-masked
struct MaskedSink<M>(M);

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for MaskedSink<M> {
    type Writer = TokenMasking<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        TokenMasking {
            inner: self.0.make_writer(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    init_logging().map_err(|e| {
        eprintln!("Failed to open log file: {e}");
        e
    })?;

    info!("Starting Reel Relay Bot...");

    let settings = init_settings();

    if let Err(e) = run_bot(settings).await {
        error!("Bot stopped with error: {:#}", e);
        std::process::exit(1);
    }

    info!("Bot stopped.");
    Ok(())
}

/// Stderr logging, plus a plain-text copy in `LOG_FILE` when it is set
fn init_logging() -> io::Result<()> {
    let debug_mode = std::env::var("DEBUG_MODE")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let filter = if debug_mode {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("reel_relay_bot=info,teloxide=warn,hyper=warn,h2=error,tower=warn")
        })
    };

    let file_layer = match std::env::var("LOG_FILE") {
        Ok(path) if !path.trim().is_empty() => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path.trim())?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(MaskedSink(Mutex::new(file))),
            )
        }
        _ => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(MaskedSink(io::stderr)))
        .with(file_layer)
        .init();
    Ok(())
}

fn init_settings() -> Arc<Settings> {
    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Configuration loaded successfully (mode: {}).",
        if settings.webhook_url.is_some() {
            "webhook"
        } else {
            "polling"
        }
    );
    Arc::new(settings)
}
