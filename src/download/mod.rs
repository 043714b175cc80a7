//! Link validation, extraction and delivery

/// Dispatch pipeline from link to delivered file
pub mod dispatcher;
/// Link extraction and the domain allow-list
pub mod domains;
/// Transient download directory
pub mod workdir;
/// yt-dlp extraction collaborator
pub mod ytdlp;

pub use dispatcher::LinkDispatcher;
pub use ytdlp::YtdlpExtractor;
