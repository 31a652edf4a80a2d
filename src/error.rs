//! Error taxonomy for the playback engine
//!
//! Every failure here is non-fatal to the embedding application: a video that
//! fails to load degrades to "nothing rendered."

use thiserror::Error;

/// Playback engine errors
#[derive(Debug, Error)]
pub enum VideoError {
    /// Native decode/render plumbing could not be created. Fatal to the
    /// player instance; playback is silently disabled.
    #[error("failed to initialize decode pipeline: {0}")]
    Init(String),

    /// The file exists but the installed decode backend cannot play it.
    #[error("unsupported media: {0}")]
    UnsupportedMedia(String),

    /// Neither the primary nor the alternate path resolved to playable media.
    #[error("no playable media found")]
    MissingMedia,

    /// Asynchronous decode failure reported mid-stream.
    #[error("pipeline error: {0}")]
    Pipeline(String),
}
