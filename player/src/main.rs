mod cli;
mod ui;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::debug;
use ytap_core::resolver::{self, ResolvedVideo};
use ytap_core::{
    FfplaySpawner, PlaybackController, PlaybackOutcome, PlayerError, Presenter,
};

use cli::Cli;
use ui::{ConsolePresenter, RawModeGuard, format_size, format_timestamp};

fn main() -> ExitCode {
    env_logger::init();
    // try_parse instead of parse: usage errors should exit with code 1,
    // while --help/--version stay a success.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    let presenter = Arc::new(ConsolePresenter);

    match run(&cli, presenter.clone()) {
        Ok(PlaybackOutcome::Completed) => {
            presenter.success("Playback finished.");
            ExitCode::SUCCESS
        }
        Ok(PlaybackOutcome::Cancelled) => {
            presenter.success("Playback stopped.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            presenter.error(&e.to_string());
            if matches!(e, PlayerError::MissingDependency(_)) {
                presenter.info(FfplaySpawner::install_hint());
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, presenter: Arc<ConsolePresenter>) -> Result<PlaybackOutcome, PlayerError> {
    // Checked once, before any resolution work.
    if !FfplaySpawner::is_available() {
        return Err(PlayerError::MissingDependency(
            FfplaySpawner::BINARY.to_string(),
        ));
    }

    let request = cli.request()?;
    presenter.info("Looking up video...");
    let resolved = resolver::resolve(&request)?;

    if cli.verbose {
        list_streams(presenter.as_ref(), &resolved);
    }

    let target = &resolved.target;
    presenter.info(&format!("Now playing: {} - {}", target.title, target.author));
    if let Some(duration) = target.duration {
        presenter.info(&format!("Duration: {}", format_timestamp(duration)));
    }
    presenter.info("Press 'q' to stop.");

    let controller = PlaybackController::new(Arc::new(FfplaySpawner), presenter.clone());
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| PlayerError::Playback(format!("failed to start async runtime: {}", e)))?;

    let raw_mode = RawModeGuard::enable();
    let outcome = runtime.block_on(controller.play(target));
    drop(raw_mode);
    // Move off the progress line before the final message.
    println!();

    debug!("Playback outcome: {:?}", outcome);
    outcome
}

fn list_streams(presenter: &dyn Presenter, resolved: &ResolvedVideo) {
    let best = resolver::pick_best_audio(&resolved.streams);
    presenter.info("Available audio streams:");
    for stream in &resolved.streams {
        let size = stream
            .filesize
            .map(format_size)
            .unwrap_or_else(|| "unknown size".to_string());
        let marker = if best == Some(stream) { "  <- selected" } else { "" };
        presenter.info(&format!(
            "  {:<5} {:>4.0} kbps  {:>10}{}",
            stream.format, stream.bitrate_kbps, size, marker
        ));
    }
}
