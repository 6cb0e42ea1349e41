use std::io::{self, Write};
use std::process::{Child, Command, Stdio};

use log::debug;

/// Handle to a running external player subprocess.
///
/// Exclusively owned by the playback session; the concurrent activities never
/// see this trait, only the shared stdin writer taken out of it. Every method
/// is non-blocking so the controller can drive it from its polling loop.
pub trait PlayerProcess: Send {
    /// Check for exit without blocking. `Ok(Some(code))` once the process
    /// has terminated; the code is None-mapped to -1.
    fn try_wait(&mut self) -> io::Result<Option<i32>>;

    /// Take the process's stdin writer. Yields once; the writer is shared
    /// with the input watcher for the graceful-stop command.
    fn take_stdin(&mut self) -> Option<Box<dyn Write + Send>>;

    /// Forcibly terminate the process. Safe to call after exit.
    fn kill(&mut self) -> io::Result<()>;
}

/// Launches an external player for a given stream URL.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, stream_url: &str) -> io::Result<Box<dyn PlayerProcess>>;
}

/// ffplay-backed implementation.
///
/// ffplay reads the network stream directly, runs without a video window
/// (`-nodisp`) and exits on its own when the stream ends (`-autoexit`).
/// stdin stays piped so a single `q` byte can request a clean stop.
pub struct FfplaySpawner;

impl FfplaySpawner {
    pub const BINARY: &'static str = "ffplay";

    /// PATH probe, run once at startup before any resolution work.
    pub fn is_available() -> bool {
        Command::new(Self::BINARY)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Remediation guidance shown when the binary is missing.
    pub fn install_hint() -> &'static str {
        "\
ffplay (part of FFmpeg) was not found. Please install it first:

For Debian/Ubuntu:
    sudo apt-get install ffmpeg

For macOS:
    brew install ffmpeg

For other systems, see https://ffmpeg.org/download.html"
    }
}

impl ProcessSpawner for FfplaySpawner {
    fn spawn(&self, stream_url: &str) -> io::Result<Box<dyn PlayerProcess>> {
        debug!("Starting ffplay for stream URL");
        let child = Command::new(Self::BINARY)
            .arg("-nodisp")
            .arg("-autoexit")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(stream_url)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        debug!("ffplay started with pid {}", child.id());
        Ok(Box::new(FfplayProcess { child }))
    }
}

struct FfplayProcess {
    child: Child,
}

impl PlayerProcess for FfplayProcess {
    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| status.code().unwrap_or(-1)))
    }

    fn take_stdin(&mut self) -> Option<Box<dyn Write + Send>> {
        self.child
            .stdin
            .take()
            .map(|stdin| Box::new(stdin) as Box<dyn Write + Send>)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()
    }
}

impl Drop for FfplayProcess {
    fn drop(&mut self) {
        // Last-resort reap so an early-return path never leaks the process.
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}
