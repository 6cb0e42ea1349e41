use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::SignalFlag;
use crate::presenter::Presenter;
use crate::resolver::PlaybackTarget;

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Point-in-time view of playback progress. Recomputed every tick, never
/// stored; `elapsed` is always within `[0, total]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub elapsed: Duration,
    pub total: Duration,
    pub title: String,
    pub author: String,
}

impl ProgressSnapshot {
    /// Completed fraction in `[0.0, 1.0]`.
    pub fn fraction(&self) -> f64 {
        if self.total.is_zero() {
            return 0.0;
        }
        (self.elapsed.as_secs_f64() / self.total.as_secs_f64()).clamp(0.0, 1.0)
    }
}

/// Spawn the progress reporter activity.
///
/// Ticks once a second while playback is still running, deriving elapsed
/// time from the session start instant and emitting a clamped snapshot to
/// the presenter. Emits a final snapshot pinned at `elapsed == total` when
/// the track runs out or playback ends. Purely observational: it never
/// signals cancellation.
pub(crate) fn spawn_progress_reporter(
    target: &PlaybackTarget,
    total: Duration,
    started_at: Instant,
    playback_done: SignalFlag,
    presenter: Arc<dyn Presenter>,
) -> JoinHandle<()> {
    let title = target.title.clone();
    let author = target.author.clone();
    tokio::spawn(async move {
        let snapshot = |elapsed: Duration| ProgressSnapshot {
            elapsed: elapsed.min(total),
            total,
            title: title.clone(),
            author: author.clone(),
        };

        loop {
            if playback_done.is_set() {
                break;
            }
            let elapsed = started_at.elapsed();
            if elapsed >= total {
                break;
            }
            presenter.progress(&snapshot(elapsed));
            tokio::time::sleep(TICK_PERIOD).await;
        }

        presenter.progress(&snapshot(total));
        debug!("Progress reporter finished");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingPresenter {
        snapshots: Mutex<Vec<ProgressSnapshot>>,
    }

    impl Presenter for RecordingPresenter {
        fn info(&self, _message: &str) {}
        fn warn(&self, _message: &str) {}
        fn error(&self, _message: &str) {}
        fn success(&self, _message: &str) {}
        fn progress(&self, snapshot: &ProgressSnapshot) {
            self.snapshots.lock().unwrap().push(snapshot.clone());
        }
    }

    fn target() -> PlaybackTarget {
        PlaybackTarget {
            stream_url: "https://example.com/audio".to_string(),
            title: "Title".to_string(),
            author: "Author".to_string(),
            duration: Some(Duration::from_secs(5)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn snapshots_are_monotone_and_clamped() {
        let presenter = Arc::new(RecordingPresenter::default());
        let handle = spawn_progress_reporter(
            &target(),
            Duration::from_secs(5),
            Instant::now(),
            SignalFlag::new(),
            presenter.clone(),
        );
        handle.await.unwrap();

        let snapshots = presenter.snapshots.lock().unwrap();
        assert!(!snapshots.is_empty());
        for pair in snapshots.windows(2) {
            assert!(pair[0].elapsed <= pair[1].elapsed);
        }
        for s in snapshots.iter() {
            assert!(s.elapsed <= s.total);
        }
        assert_eq!(snapshots.last().unwrap().elapsed, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn early_end_pins_final_snapshot_at_total() {
        let presenter = Arc::new(RecordingPresenter::default());
        let done = SignalFlag::new();
        let handle = spawn_progress_reporter(
            &target(),
            Duration::from_secs(300),
            Instant::now(),
            done.clone(),
            presenter.clone(),
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        done.set();
        handle.await.unwrap();

        let snapshots = presenter.snapshots.lock().unwrap();
        let last = snapshots.last().unwrap();
        assert_eq!(last.elapsed, last.total);
    }

    #[test]
    fn fraction_handles_zero_total() {
        let snapshot = ProgressSnapshot {
            elapsed: Duration::ZERO,
            total: Duration::ZERO,
            title: String::new(),
            author: String::new(),
        };
        assert_eq!(snapshot.fraction(), 0.0);
    }
}
