use thiserror::Error;

/// Everything that can go wrong between parsing the input and the end of
/// playback. Expected conditions (no search results, no audio-only stream)
/// are distinct variants so callers can match on them instead of parsing
/// error strings.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// The external player binary is not on PATH.
    #[error("{0} not found on PATH")]
    MissingDependency(String),

    /// Neither URL nor search term, or a blank value.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Search produced zero results.
    #[error("no results found for '{0}'")]
    NotFound(String),

    /// Metadata or stream manifest could not be fetched.
    #[error("failed to resolve video: {0}")]
    Resolution(#[from] youtube_dl::Error),

    /// The manifest contains no audio-only streams.
    #[error("no audio-only streams available for this video")]
    NoAudioStream,

    /// The player subprocess failed to start.
    #[error("failed to launch player: {0}")]
    Launch(#[source] std::io::Error),

    /// Unexpected failure while supervising a running subprocess.
    #[error("playback failed: {0}")]
    Playback(String),
}
