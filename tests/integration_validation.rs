use anyhow::{anyhow, Result};
use dotenvy::dotenv;
use reel_relay_bot::config::Settings;
use reel_relay_bot::download::dispatcher::DownloadedFile;
use reel_relay_bot::download::workdir::file_size;
use reel_relay_bot::download::ytdlp::VideoExtractor;
use reel_relay_bot::download::{domains, workdir, YtdlpExtractor};
use std::path::Path;
use teloxide::prelude::*;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Public clip used for the live extraction check
const DEFAULT_LIVE_URL: &str = "https://www.youtube.com/shorts/jNQXAC9IVRw";

#[tokio::test]
#[ignore = "Requires real credentials"]
async fn test_credentials_validation() -> Result<()> {
    load_dotenv();
    init_tracing();

    info!("Starting integration test for credentials validation...");
    let settings = Settings::new()?;
    let bot = Bot::new(settings.bot_token.clone());

    let me = bot.get_me().await?;
    info!("Bot token is valid: @{}", me.username());

    let channel = bot.get_chat(ChatId(settings.channel_id)).await?;
    info!("Channel {} is reachable", channel.id);

    info!("Credentials validation test passed successfully.");
    Ok(())
}

#[tokio::test]
#[ignore = "Requires yt-dlp and network access"]
async fn test_live_extraction() -> Result<()> {
    load_dotenv();
    init_tracing();

    let url = std::env::var("LIVE_VIDEO_URL").unwrap_or_else(|_| DEFAULT_LIVE_URL.to_string());
    assert!(
        domains::is_allowed(&url),
        "LIVE_VIDEO_URL must point to a supported domain"
    );

    let dir = tempfile::tempdir()?;
    workdir::prepare(dir.path()).await?;
    let binary = std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string());
    let extractor = YtdlpExtractor::new(binary, dir.path());

    info!("Extracting {url}...");
    let path = extractor.extract(&url).await?;
    validate_download(dir.path(), &path).await?;

    let file = DownloadedFile::new(path.clone());
    drop(file);
    assert!(!path.exists(), "downloaded file must be removed by its guard");

    info!("Live extraction test passed successfully.");
    Ok(())
}

async fn validate_download(dir: &Path, path: &Path) -> Result<()> {
    if !path.starts_with(dir) {
        return Err(anyhow!(
            "yt-dlp wrote outside the downloads directory: {}",
            path.display()
        ));
    }
    let size = file_size(path).await?;
    info!("Downloaded {} ({} bytes)", path.display(), size);
    assert!(size > 0, "downloaded file is empty");
    Ok(())
}

fn load_dotenv() {
    let env_path = Path::new("../.env");
    if env_path.exists() {
        let _ = dotenvy::from_path(env_path);
    } else {
        dotenv().ok();
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
