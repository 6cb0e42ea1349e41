use clap::{ArgGroup, Parser};
use ytap_core::{PlayerError, ResolveRequest};

#[derive(Debug, Parser)]
#[command(name = "ytap", version, about = "Play the audio of a YouTube video in your terminal")]
#[command(group(ArgGroup::new("input").required(true).args(["url", "search"])))]
pub struct Cli {
    /// YouTube URL or bare video ID to play
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Search term; the first result is played
    #[arg(long, value_name = "TERM")]
    pub search: Option<String>,

    /// List all candidate audio streams before playback
    #[arg(long)]
    pub verbose: bool,
}

impl Cli {
    /// Turn the parsed arguments into a resolver request. clap already
    /// enforces exactly-one-of; blank values are rejected here, before any
    /// network call.
    pub fn request(&self) -> Result<ResolveRequest, PlayerError> {
        match (&self.url, &self.search) {
            (Some(url), None) if !url.trim().is_empty() => Ok(ResolveRequest::Url(url.clone())),
            (None, Some(term)) if !term.trim().is_empty() => {
                Ok(ResolveRequest::Search(term.clone()))
            }
            _ => Err(PlayerError::InvalidInput(
                "provide a non-empty --url or --search".to_string(),
            )),
        }
    }
}
