use std::io::{Write, stdout};
use std::time::Duration;

use crossterm::style::Stylize;
use crossterm::terminal;
use ytap_core::{Presenter, ProgressSnapshot};

const BAR_WIDTH: usize = 30;

/// Terminal-backed presenter: plain lines for messages, a `\r`-rewritten
/// progress bar for playback.
pub struct ConsolePresenter;

impl Presenter for ConsolePresenter {
    fn info(&self, message: &str) {
        println!("{}", message);
    }

    fn warn(&self, message: &str) {
        // Leading \r in case a progress line is on screen.
        eprintln!("\r{}", format!("Warning: {}", message).yellow());
    }

    fn error(&self, message: &str) {
        eprintln!("\r{}", format!("Error: {}", message).red());
    }

    fn success(&self, message: &str) {
        println!("\r{}", message.green());
    }

    fn progress(&self, snapshot: &ProgressSnapshot) {
        let filled = (snapshot.fraction() * BAR_WIDTH as f64).round() as usize;
        let bar = format!("{}{}", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled));
        print!(
            "\r[{}] {} / {}  {} - {}  (press q to stop)",
            bar,
            format_timestamp(snapshot.elapsed),
            format_timestamp(snapshot.total),
            snapshot.title,
            snapshot.author
        );
        let _ = stdout().flush();
    }
}

/// Puts the terminal in raw mode for the playback keystroke and restores it
/// on drop, so every exit path (including panics) leaves a usable terminal.
pub struct RawModeGuard {
    enabled: bool,
}

impl RawModeGuard {
    pub fn enable() -> Self {
        match terminal::enable_raw_mode() {
            Ok(()) => Self { enabled: true },
            Err(e) => {
                // Playback still works; 'q' just needs an Enter after it.
                log::warn!("Failed to enable raw mode: {}", e);
                Self { enabled: false }
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.enabled {
            if let Err(e) = terminal::disable_raw_mode() {
                eprintln!("Warning: failed to disable raw mode: {}", e);
            }
        }
    }
}

/// `mm:ss`, growing to `h:mm:ss` past an hour.
pub fn format_timestamp(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// Human-readable byte size for the verbose stream listing.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
