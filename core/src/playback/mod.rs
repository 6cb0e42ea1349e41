pub mod input;
pub mod process;
pub mod progress;

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::PlayerError;
use crate::presenter::Presenter;
use crate::resolver::PlaybackTarget;
use input::{CrosstermKeys, KeySource};
use process::{PlayerProcess, ProcessSpawner};

/// Liveness-check period for the main wait loop and the bounded exit waits.
const LIVENESS_POLL: Duration = Duration::from_millis(100);
/// How long a graceful stop may take before the process is killed.
const GRACEFUL_STOP_WINDOW: Duration = Duration::from_millis(1000);
/// How long a kill may take to be confirmed before we warn and move on.
const KILL_CONFIRM_WINDOW: Duration = Duration::from_millis(2000);
/// Command written to the player's stdin to request a clean stop.
pub(crate) const STOP_COMMAND: &[u8] = b"q";

/// How one playback attempt ended. Failures are `Err(PlayerError)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The stream ran out and the player exited on its own.
    Completed,
    /// The user asked to stop. Not an error.
    Cancelled,
}

/// One-way idempotent flag. Single writer semantics are not enforced; setting
/// an already-set flag is a no-op, and every holder observes the set.
#[derive(Clone, Debug, Default)]
pub struct SignalFlag(Arc<AtomicBool>);

impl SignalFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The subprocess stdin writer, shared between the controller and the input
/// watcher. Filled after launch, emptied during cleanup.
pub(crate) type SharedStdin = Arc<Mutex<Option<Box<dyn Write + Send>>>>;

/// Best-effort write of the stop command to the player's stdin.
///
/// Guarded by the exited flag, and tolerant of the race where the process
/// exits between the check and the write: the write simply fails and is
/// swallowed.
pub(crate) fn write_stop_command(stdin: &SharedStdin, process_exited: &SignalFlag) {
    if process_exited.is_set() {
        return;
    }
    if let Ok(mut slot) = stdin.lock() {
        if let Some(writer) = slot.as_mut() {
            if let Err(e) = writer.write_all(STOP_COMMAND).and_then(|_| writer.flush()) {
                debug!("Stop command write failed (player likely gone): {}", e);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    NotStarted,
    Running,
    Stopping,
    Stopped,
}

/// Live state of one playback attempt. The process handle is exclusively
/// owned here; the concurrent activities communicate only through the
/// signal flags and the shared stdin slot.
struct PlaybackSession {
    process: Option<Box<dyn PlayerProcess>>,
    stdin: SharedStdin,
    cancel: SignalFlag,
    process_exited: SignalFlag,
    playback_done: SignalFlag,
    watcher: Option<JoinHandle<()>>,
    reporter: Option<JoinHandle<()>>,
    started_at: Instant,
    state: SessionState,
}

impl PlaybackSession {
    fn new() -> Self {
        Self {
            process: None,
            stdin: Arc::new(Mutex::new(None)),
            cancel: SignalFlag::new(),
            process_exited: SignalFlag::new(),
            playback_done: SignalFlag::new(),
            watcher: None,
            reporter: None,
            started_at: Instant::now(),
            state: SessionState::NotStarted,
        }
    }

    /// Adopt a freshly launched process. A session only ever holds one
    /// handle; once that process exits or is killed it is never restarted.
    fn attach(&mut self, mut process: Box<dyn PlayerProcess>) {
        if let Ok(mut slot) = self.stdin.lock() {
            *slot = process.take_stdin();
        }
        self.process = Some(process);
        self.started_at = Instant::now();
        self.state = SessionState::Running;
    }

    /// Non-blocking exit check. Marks the exited flag on the way through so
    /// stdin writes stop being attempted.
    fn poll_exit(&mut self) -> std::io::Result<Option<i32>> {
        let status = match self.process.as_mut() {
            Some(process) => process.try_wait()?,
            None => Some(-1),
        };
        if status.is_some() {
            self.process_exited.set();
        }
        Ok(status)
    }

    /// Poll for exit until `window` elapses. Errors during shutdown are
    /// logged, not escalated.
    async fn await_exit(&mut self, window: Duration) -> bool {
        let deadline = Instant::now() + window;
        loop {
            match self.poll_exit() {
                Ok(Some(_)) => return true,
                Ok(None) => {}
                Err(e) => {
                    warn!("Process status check failed during shutdown: {}", e);
                    return false;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(LIVENESS_POLL).await;
        }
    }

    fn kill_process(&mut self) -> std::io::Result<()> {
        match self.process.as_mut() {
            Some(process) => process.kill(),
            None => Ok(()),
        }
    }

    /// Unconditional teardown. Runs on every exit path and is idempotent;
    /// the second and later calls return immediately.
    async fn shutdown(&mut self, presenter: &dyn Presenter) {
        let prior = std::mem::replace(&mut self.state, SessionState::Stopped);
        if prior == SessionState::Stopped {
            return;
        }

        self.cancel.set();
        self.playback_done.set();

        // Input-watching failures must never mask the playback outcome.
        if let Some(watcher) = self.watcher.take() {
            if let Err(e) = watcher.await {
                warn!("Input watcher task failed: {}", e);
            }
        }
        if let Some(reporter) = self.reporter.take() {
            let _ = reporter.await;
        }

        if let Ok(mut slot) = self.stdin.lock() {
            slot.take();
        }

        if let Some(mut process) = self.process.take() {
            // A process that is still running here came off an error path or
            // a natural-exit race; the graceful window already ran if the
            // session reached Stopping.
            if !self.process_exited.is_set() && prior != SessionState::Stopping {
                if let Err(e) = process.kill() {
                    presenter.warn(&format!("Failed to terminate player process: {}", e));
                }
            }
            drop(process);
        }
        debug!("Playback session cleaned up");
    }
}

/// Owns external player subprocesses for the lifetime of a playback call.
///
/// `play` launches the player, runs the input watcher and progress reporter
/// alongside it, and guarantees graceful-then-forced shutdown plus resource
/// release on every path out.
pub struct PlaybackController {
    spawner: Arc<dyn ProcessSpawner>,
    presenter: Arc<dyn Presenter>,
}

impl PlaybackController {
    pub fn new(spawner: Arc<dyn ProcessSpawner>, presenter: Arc<dyn Presenter>) -> Self {
        Self { spawner, presenter }
    }

    /// Play a resolved target until the stream ends or the user cancels.
    ///
    /// Expects the terminal to be in raw mode so the cancel keystroke
    /// arrives unbuffered.
    pub async fn play(&self, target: &PlaybackTarget) -> Result<PlaybackOutcome, PlayerError> {
        self.run_session(target, Box::new(CrosstermKeys)).await
    }

    async fn run_session(
        &self,
        target: &PlaybackTarget,
        keys: Box<dyn KeySource>,
    ) -> Result<PlaybackOutcome, PlayerError> {
        if target.stream_url.trim().is_empty() {
            return Err(PlayerError::InvalidInput("stream URL is empty".to_string()));
        }

        let mut session = PlaybackSession::new();
        // The watcher starts before the subprocess so a keystroke in the
        // launch window is not lost; the stdin slot is still empty then and
        // the graceful write is simply skipped.
        session.watcher = Some(input::spawn_input_watcher(
            keys,
            session.cancel.clone(),
            session.stdin.clone(),
            session.process_exited.clone(),
        ));

        let result = self.supervise(&mut session, target).await;
        session.shutdown(self.presenter.as_ref()).await;
        result
    }

    /// Steps 2-6: launch, wait for natural exit or cancellation, stop.
    async fn supervise(
        &self,
        session: &mut PlaybackSession,
        target: &PlaybackTarget,
    ) -> Result<PlaybackOutcome, PlayerError> {
        let process = self
            .spawner
            .spawn(&target.stream_url)
            .map_err(PlayerError::Launch)?;
        session.attach(process);

        if let Some(total) = target.duration.filter(|d| !d.is_zero()) {
            session.reporter = Some(progress::spawn_progress_reporter(
                target,
                total,
                session.started_at,
                session.playback_done.clone(),
                self.presenter.clone(),
            ));
        }

        loop {
            // Cancellation wins over a stop-triggered exit observed in the
            // same poll, so a user stop is reported as Cancelled.
            if session.cancel.is_set() {
                self.stop_after_cancel(session).await;
                return Ok(PlaybackOutcome::Cancelled);
            }
            match session.poll_exit() {
                Ok(Some(code)) => {
                    debug!("Player exited on its own with code {}", code);
                    session.cancel.set();
                    return Ok(PlaybackOutcome::Completed);
                }
                Ok(None) => {}
                Err(e) => {
                    return Err(PlayerError::Playback(format!(
                        "process status check failed: {}",
                        e
                    )));
                }
            }
            tokio::time::sleep(LIVENESS_POLL).await;
        }
    }

    /// Graceful stop, escalating to a kill after the graceful window.
    async fn stop_after_cancel(&self, session: &mut PlaybackSession) {
        session.state = SessionState::Stopping;
        debug!("Cancellation requested, asking player to stop");
        write_stop_command(&session.stdin, &session.process_exited);
        if session.await_exit(GRACEFUL_STOP_WINDOW).await {
            debug!("Player exited within the graceful-stop window");
            return;
        }

        debug!("Graceful stop timed out, killing player process");
        if let Err(e) = session.kill_process() {
            self.presenter
                .warn(&format!("Failed to terminate player process: {}", e));
        }
        if !session.await_exit(KILL_CONFIRM_WINDOW).await {
            // Not escalated: cleanup continues regardless.
            self.presenter
                .warn("Player process did not confirm termination; continuing cleanup");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::playback::progress::ProgressSnapshot;

    /// Scripted behavior shared between a fake process and its test.
    #[derive(Default)]
    struct FakeBehavior {
        /// Exit on its own once this much time has passed since spawn.
        natural_exit_after: Option<Duration>,
        /// Exit as soon as the stop command arrives on stdin.
        exits_on_stop: bool,
        /// Ignore kill() so the confirmation wait times out.
        ignores_kill: bool,
        /// Make every try_wait() fail, as if the handle went bad.
        status_check_fails: bool,
        stop_received: AtomicBool,
        kills: AtomicUsize,
        disposals: AtomicUsize,
        spawns: AtomicUsize,
    }

    struct FakeProcess {
        behavior: Arc<FakeBehavior>,
        spawned_at: Instant,
    }

    struct FakeStdin {
        behavior: Arc<FakeBehavior>,
    }

    impl Write for FakeStdin {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if buf == STOP_COMMAND {
                self.behavior.stop_received.store(true, Ordering::SeqCst);
            }
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl PlayerProcess for FakeProcess {
        fn try_wait(&mut self) -> io::Result<Option<i32>> {
            let b = &self.behavior;
            if b.status_check_fails {
                return Err(io::Error::other("status check failed"));
            }
            let naturally_done = b
                .natural_exit_after
                .is_some_and(|after| self.spawned_at.elapsed() >= after);
            let stopped = b.exits_on_stop && b.stop_received.load(Ordering::SeqCst);
            let killed = !b.ignores_kill && b.kills.load(Ordering::SeqCst) > 0;
            Ok((naturally_done || stopped || killed).then_some(0))
        }

        fn take_stdin(&mut self) -> Option<Box<dyn Write + Send>> {
            Some(Box::new(FakeStdin {
                behavior: self.behavior.clone(),
            }))
        }

        fn kill(&mut self) -> io::Result<()> {
            self.behavior.kills.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Drop for FakeProcess {
        fn drop(&mut self) {
            self.behavior.disposals.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeSpawner {
        behavior: Arc<FakeBehavior>,
        fail_spawn: bool,
    }

    impl ProcessSpawner for FakeSpawner {
        fn spawn(&self, _stream_url: &str) -> io::Result<Box<dyn PlayerProcess>> {
            self.behavior.spawns.fetch_add(1, Ordering::SeqCst);
            if self.fail_spawn {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such binary"));
            }
            Ok(Box::new(FakeProcess {
                behavior: self.behavior.clone(),
                spawned_at: Instant::now(),
            }))
        }
    }

    /// Key source that presses the cancel key on the nth poll.
    struct PressQAfter {
        polls_left: usize,
    }

    impl KeySource for PressQAfter {
        fn poll_key(&mut self) -> io::Result<Option<char>> {
            if self.polls_left == 0 {
                return Ok(Some('q'));
            }
            self.polls_left -= 1;
            Ok(None)
        }
    }

    struct NoKeys;

    impl KeySource for NoKeys {
        fn poll_key(&mut self) -> io::Result<Option<char>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct RecordingPresenter {
        warnings: Mutex<Vec<String>>,
        snapshots: Mutex<Vec<ProgressSnapshot>>,
    }

    impl Presenter for RecordingPresenter {
        fn info(&self, _message: &str) {}
        fn warn(&self, message: &str) {
            self.warnings.lock().unwrap().push(message.to_string());
        }
        fn error(&self, _message: &str) {}
        fn success(&self, _message: &str) {}
        fn progress(&self, snapshot: &ProgressSnapshot) {
            self.snapshots.lock().unwrap().push(snapshot.clone());
        }
    }

    fn target(duration_secs: u64) -> PlaybackTarget {
        PlaybackTarget {
            stream_url: "https://example.com/audio.webm".to_string(),
            title: "Test Track".to_string(),
            author: "Test Channel".to_string(),
            duration: (duration_secs > 0).then(|| Duration::from_secs(duration_secs)),
        }
    }

    fn controller(
        behavior: &Arc<FakeBehavior>,
        fail_spawn: bool,
    ) -> (PlaybackController, Arc<RecordingPresenter>) {
        let presenter = Arc::new(RecordingPresenter::default());
        let controller = PlaybackController::new(
            Arc::new(FakeSpawner {
                behavior: behavior.clone(),
                fail_spawn,
            }),
            presenter.clone(),
        );
        (controller, presenter)
    }

    #[tokio::test(start_paused = true)]
    async fn empty_stream_url_fails_before_any_spawn() {
        let behavior = Arc::new(FakeBehavior::default());
        let (controller, _) = controller(&behavior, false);
        let mut bad = target(10);
        bad.stream_url = "  ".to_string();

        let result = controller.run_session(&bad, Box::new(NoKeys)).await;

        assert!(matches!(result, Err(PlayerError::InvalidInput(_))));
        assert_eq!(behavior.spawns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn natural_exit_completes_with_final_snapshot_at_total() {
        let behavior = Arc::new(FakeBehavior {
            natural_exit_after: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let (controller, presenter) = controller(&behavior, false);

        let outcome = controller
            .run_session(&target(5), Box::new(NoKeys))
            .await
            .unwrap();

        assert_eq!(outcome, PlaybackOutcome::Completed);
        assert_eq!(behavior.kills.load(Ordering::SeqCst), 0);
        assert_eq!(behavior.disposals.load(Ordering::SeqCst), 1);

        let snapshots = presenter.snapshots.lock().unwrap();
        let last = snapshots.last().unwrap();
        assert_eq!(last.elapsed, Duration::from_secs(5));
        assert_eq!(last.total, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_cancel_needs_no_kill_and_no_warning() {
        let behavior = Arc::new(FakeBehavior {
            exits_on_stop: true,
            ..Default::default()
        });
        let (controller, presenter) = controller(&behavior, false);
        // ~2s of watcher polls before the keystroke lands
        let keys = PressQAfter { polls_left: 20 };

        let outcome = controller
            .run_session(&target(10), Box::new(keys))
            .await
            .unwrap();

        assert_eq!(outcome, PlaybackOutcome::Cancelled);
        assert!(behavior.stop_received.load(Ordering::SeqCst));
        assert_eq!(behavior.kills.load(Ordering::SeqCst), 0);
        assert_eq!(behavior.disposals.load(Ordering::SeqCst), 1);
        assert!(presenter.warnings.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stubborn_process_is_killed_exactly_once() {
        let behavior = Arc::new(FakeBehavior::default());
        let (controller, presenter) = controller(&behavior, false);
        let keys = PressQAfter { polls_left: 0 };

        let outcome = controller
            .run_session(&target(10), Box::new(keys))
            .await
            .unwrap();

        assert_eq!(outcome, PlaybackOutcome::Cancelled);
        assert_eq!(behavior.kills.load(Ordering::SeqCst), 1);
        assert_eq!(behavior.disposals.load(Ordering::SeqCst), 1);
        // Kill was confirmed, so no warning either.
        assert!(presenter.warnings.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_kill_warns_but_still_cleans_up() {
        let behavior = Arc::new(FakeBehavior {
            ignores_kill: true,
            ..Default::default()
        });
        let (controller, presenter) = controller(&behavior, false);
        let keys = PressQAfter { polls_left: 0 };

        let outcome = controller
            .run_session(&target(10), Box::new(keys))
            .await
            .unwrap();

        assert_eq!(outcome, PlaybackOutcome::Cancelled);
        assert_eq!(behavior.kills.load(Ordering::SeqCst), 1);
        assert_eq!(behavior.disposals.load(Ordering::SeqCst), 1);
        assert!(!presenter.warnings.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_cancel_and_natural_exit_is_harmless() {
        let behavior = Arc::new(FakeBehavior {
            natural_exit_after: Some(Duration::ZERO),
            ..Default::default()
        });
        let (controller, _) = controller(&behavior, false);
        let keys = PressQAfter { polls_left: 0 };

        let outcome = controller
            .run_session(&target(10), Box::new(keys))
            .await
            .unwrap();

        // The first liveness check runs before the watcher has had a chance
        // to signal, so the exit is observed as natural; the watcher's
        // concurrent set of the same flag is a no-op.
        assert_eq!(outcome, PlaybackOutcome::Completed);
        assert_eq!(behavior.kills.load(Ordering::SeqCst), 0);
        assert_eq!(behavior.disposals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn status_check_error_still_disposes_process() {
        let behavior = Arc::new(FakeBehavior {
            status_check_fails: true,
            ..Default::default()
        });
        let (controller, presenter) = controller(&behavior, false);

        let result = controller.run_session(&target(10), Box::new(NoKeys)).await;

        assert!(matches!(result, Err(PlayerError::Playback(_))));
        // Cleanup still runs: the handle of a process that never reported an
        // exit is killed once and disposed once.
        assert_eq!(behavior.kills.load(Ordering::SeqCst), 1);
        assert_eq!(behavior.disposals.load(Ordering::SeqCst), 1);
        assert!(presenter.warnings.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn launch_failure_surfaces_as_launch_error() {
        let behavior = Arc::new(FakeBehavior::default());
        let (controller, _) = controller(&behavior, true);

        let result = controller.run_session(&target(10), Box::new(NoKeys)).await;

        assert!(matches!(result, Err(PlayerError::Launch(_))));
        assert_eq!(behavior.spawns.load(Ordering::SeqCst), 1);
        // Nothing to dispose: no handle was ever attached.
        assert_eq!(behavior.disposals.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn signal_flag_set_is_idempotent() {
        let flag = SignalFlag::new();
        assert!(!flag.is_set());
        flag.set();
        flag.set();
        assert!(flag.is_set());
    }
}
