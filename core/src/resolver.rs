use std::time::Duration;

use log::{debug, info};
use youtube_dl::model::SingleVideo;
use youtube_dl::{SearchOptions, YoutubeDl, YoutubeDlOutput};

use crate::error::PlayerError;

/// Socket timeout passed to every yt-dlp invocation, in seconds.
const EXTRACTION_TIMEOUT_SECS: u64 = 30;

/// What the user asked to play.
#[derive(Debug, Clone)]
pub enum ResolveRequest {
    /// A direct URL (or bare video ID), used as-is after normalization.
    Url(String),
    /// A search term; the first provider result wins.
    Search(String),
}

/// One audio-only rendition from the stream manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioStream {
    /// Container format, e.g. "webm" or "m4a".
    pub format: String,
    /// Average audio bitrate in kbit/s.
    pub bitrate_kbps: f64,
    /// Size in bytes, when the provider reports one.
    pub filesize: Option<u64>,
    /// Direct fetchable media URL.
    pub url: String,
}

/// Everything the playback controller needs about one video.
/// Immutable once constructed.
#[derive(Debug, Clone)]
pub struct PlaybackTarget {
    /// URL of the selected audio-only stream.
    pub stream_url: String,
    pub title: String,
    pub author: String,
    /// Media duration; None when the provider does not report one
    /// (e.g. live streams).
    pub duration: Option<Duration>,
}

/// A resolved video: the chosen playback target plus the full list of
/// audio-only candidates, kept around for verbose stream listings.
#[derive(Debug, Clone)]
pub struct ResolvedVideo {
    pub target: PlaybackTarget,
    pub streams: Vec<AudioStream>,
}

/// Resolve a URL or search term to a playable audio stream.
///
/// Blocking: drives the yt-dlp executable under the hood. No process
/// management happens here; the result is pure data.
pub fn resolve(request: &ResolveRequest) -> Result<ResolvedVideo, PlayerError> {
    let video = match request {
        ResolveRequest::Url(url) => {
            let url = normalize_youtube_url(url)?;
            info!("Resolving URL: {}", url);
            fetch_video(&url)?
        }
        ResolveRequest::Search(term) => {
            info!("Searching for: {}", term);
            search_first(term)?
        }
    };

    let title = video.title.clone().unwrap_or_else(|| "Untitled".to_string());
    let author = video
        .uploader
        .clone()
        .or_else(|| video.channel.clone())
        .unwrap_or_else(|| "Unknown".to_string());
    let duration = video
        .duration
        .as_ref()
        .and_then(|d| d.as_f64())
        .filter(|secs| *secs > 0.0)
        .map(Duration::from_secs_f64);

    let streams = audio_streams(&video);
    debug!("Found {} audio-only stream(s) for '{}'", streams.len(), title);

    let best = pick_best_audio(&streams).ok_or(PlayerError::NoAudioStream)?;
    debug!(
        "Selected {} @ {:.0} kbps",
        best.format, best.bitrate_kbps
    );

    Ok(ResolvedVideo {
        target: PlaybackTarget {
            stream_url: best.url.clone(),
            title,
            author,
            duration,
        },
        streams,
    })
}

/// Normalize a YouTube URL or bare video ID into a full watch URL.
fn normalize_youtube_url(url_or_id: &str) -> Result<String, PlayerError> {
    if url_or_id.starts_with("http://") || url_or_id.starts_with("https://") {
        return Ok(url_or_id.to_string());
    }

    if let Some(id) = url_or_id.strip_prefix("youtu.be/") {
        return Ok(format!("https://www.youtube.com/watch?v={}", id));
    }

    // Bare video IDs are 11 characters of [A-Za-z0-9_-]
    if url_or_id.len() == 11
        && url_or_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Ok(format!("https://www.youtube.com/watch?v={}", url_or_id));
    }

    if url_or_id.contains("youtube.com/watch") {
        return Ok(format!(
            "https://{}",
            url_or_id
                .trim_start_matches("https://")
                .trim_start_matches("http://")
        ));
    }

    Err(PlayerError::InvalidInput(format!(
        "not a YouTube URL or video ID: {}",
        url_or_id
    )))
}

/// Fetch metadata and the stream manifest for a single video URL.
fn fetch_video(url: &str) -> Result<SingleVideo, PlayerError> {
    let output = YoutubeDl::new(url)
        .socket_timeout(EXTRACTION_TIMEOUT_SECS.to_string())
        .run()?;

    match output {
        YoutubeDlOutput::SingleVideo(video) => Ok(*video),
        YoutubeDlOutput::Playlist(_) => Err(PlayerError::InvalidInput(format!(
            "URL refers to a playlist, not a single video: {}",
            url
        ))),
    }
}

/// Run a YouTube search and return the first result.
fn search_first(term: &str) -> Result<SingleVideo, PlayerError> {
    let options = SearchOptions::youtube(term).with_count(1);
    let output = YoutubeDl::search_for(&options)
        .socket_timeout(EXTRACTION_TIMEOUT_SECS.to_string())
        .run()?;

    let entry = first_search_entry(output, term)?;

    if let Some(url) = manifest_refetch_url(&entry) {
        debug!("Search result has no manifest, refetching {}", url);
        return fetch_video(url);
    }
    Ok(entry)
}

/// Select the first entry out of a search response.
fn first_search_entry(output: YoutubeDlOutput, term: &str) -> Result<SingleVideo, PlayerError> {
    match output {
        YoutubeDlOutput::Playlist(playlist) => playlist
            .entries
            .and_then(|mut entries| {
                if entries.is_empty() {
                    None
                } else {
                    Some(entries.remove(0))
                }
            })
            .ok_or_else(|| PlayerError::NotFound(term.to_string())),
        YoutubeDlOutput::SingleVideo(video) => Ok(*video),
    }
}

/// Search entries sometimes come back without a manifest; the watch URL
/// to refetch from, in that case.
fn manifest_refetch_url(entry: &SingleVideo) -> Option<&str> {
    if entry.formats.is_none() {
        entry.webpage_url.as_deref()
    } else {
        None
    }
}

/// Extract the audio-only streams from a video's manifest.
fn audio_streams(video: &SingleVideo) -> Vec<AudioStream> {
    video
        .formats
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter(|f| is_audio_only(f.acodec.as_deref(), f.vcodec.as_deref()))
        .filter_map(|f| {
            Some(AudioStream {
                format: f.ext.clone().unwrap_or_else(|| "unknown".to_string()),
                bitrate_kbps: f.abr.unwrap_or(0.0),
                filesize: f.filesize.map(|s| s as u64),
                url: f.url.clone()?,
            })
        })
        .collect()
}

fn is_audio_only(acodec: Option<&str>, vcodec: Option<&str>) -> bool {
    let has_audio = acodec.is_some_and(|codec| codec != "none");
    let has_video = vcodec.is_some_and(|codec| codec != "none");
    has_audio && !has_video
}

/// Pick the highest-bitrate stream. Provider order breaks ties.
pub fn pick_best_audio(streams: &[AudioStream]) -> Option<&AudioStream> {
    streams.iter().max_by(|a, b| {
        a.bitrate_kbps
            .partial_cmp(&b.bitrate_kbps)
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}
