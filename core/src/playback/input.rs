use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use log::{debug, warn};
use tokio::task::JoinHandle;

use super::{SignalFlag, SharedStdin, write_stop_command};

/// Key that requests cancellation, matched case-insensitively.
pub const CANCEL_KEY: char = 'q';

const POLL_PERIOD: Duration = Duration::from_millis(100);

/// Non-blocking source of single keystrokes. Trait seam so the watcher can
/// be tested without a terminal.
pub trait KeySource: Send {
    /// Returns at most one pending keystroke without blocking.
    fn poll_key(&mut self) -> io::Result<Option<char>>;
}

/// Production key source backed by crossterm. The caller is responsible for
/// having raw mode enabled; without it keystrokes arrive line-buffered.
#[derive(Default)]
pub struct CrosstermKeys;

impl KeySource for CrosstermKeys {
    fn poll_key(&mut self) -> io::Result<Option<char>> {
        if !event::poll(Duration::ZERO)? {
            return Ok(None);
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                KeyCode::Char(c) => Ok(Some(c)),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }
}

/// Spawn the input watcher activity.
///
/// Polls for a keystroke every 100ms. On the cancel key it sets the shared
/// cancellation flag and best-effort writes the graceful-stop command to the
/// subprocess stdin, then ends. Ends immediately when the flag is set by
/// another path. Owns nothing; it only signals and writes.
pub(crate) fn spawn_input_watcher(
    mut keys: Box<dyn KeySource>,
    cancel: SignalFlag,
    stdin: SharedStdin,
    process_exited: SignalFlag,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if cancel.is_set() {
                debug!("Input watcher: cancellation already signalled, exiting");
                return;
            }
            match keys.poll_key() {
                Ok(Some(key)) if key.eq_ignore_ascii_case(&CANCEL_KEY) => {
                    debug!("Input watcher: cancel key pressed");
                    cancel.set();
                    // The controller retries / force-stops regardless, so a
                    // failed write here is only logged.
                    write_stop_command(&stdin, &process_exited);
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Input watcher: keystroke check failed: {}", e);
                    return;
                }
            }
            tokio::time::sleep(POLL_PERIOD).await;
        }
    })
}
