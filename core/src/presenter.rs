use crate::playback::progress::ProgressSnapshot;

/// Output surface for everything the player wants to tell the user.
///
/// The core never prints directly; it emits semantic events through this
/// trait so the library can be exercised in tests without a terminal. The
/// console implementation lives in the binary.
pub trait Presenter: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
    fn success(&self, message: &str);

    /// Called roughly once a second while playback is running.
    fn progress(&self, snapshot: &ProgressSnapshot);
}