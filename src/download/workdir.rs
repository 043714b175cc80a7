//! Transient download directory

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Create the downloads directory (and parents) if it does not exist.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub async fn prepare(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await
}

/// Delete regular files in `dir` older than `max_age`.
///
/// Catches files no [`DownloadedFile`](super::dispatcher::DownloadedFile)
/// guard owns, such as `.part` files of a killed or failed extraction.
/// Returns the number of files removed.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed.
pub async fn purge_stale(dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => {
                debug!(path = %entry.path().display(), "Removed stale download");
                removed += 1;
            }
            Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to remove stale download"),
        }
    }

    Ok(removed)
}

/// Run [`purge_stale`] on `dir` now and then every `period` until aborted.
///
/// `max_age` must stay above the extraction timeout so files of a running
/// download are never touched.
pub fn spawn_sweeper(dir: PathBuf, max_age: Duration, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match purge_stale(&dir, max_age).await {
                Ok(0) => {}
                Ok(count) => info!(files_deleted = count, "Cleaned up stale downloads"),
                Err(e) => warn!(error = %e, "Failed to clean up stale downloads"),
            }
        }
    })
}

/// Size of the file at `path` in bytes
///
/// # Errors
///
/// Returns an error if the file metadata cannot be read.
pub async fn file_size(path: &Path) -> std::io::Result<u64> {
    Ok(tokio::fs::metadata(path).await?.len())
}
