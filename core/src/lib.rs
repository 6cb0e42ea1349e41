pub mod error;
pub mod playback;
pub mod presenter;
pub mod resolver;

// Re-exports
pub use error::PlayerError;
pub use playback::process::{FfplaySpawner, PlayerProcess, ProcessSpawner};
pub use playback::progress::ProgressSnapshot;
pub use playback::{PlaybackController, PlaybackOutcome};
pub use presenter::Presenter;
pub use resolver::{AudioStream, PlaybackTarget, ResolveRequest, ResolvedVideo};
