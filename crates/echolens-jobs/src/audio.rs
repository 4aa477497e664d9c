//! Audio acquisition: download, content sniffing and splitting for upload.
//!
//! Files live at `{upload_dir}/{podcast_slug}/{episode_id}/audio.{ext}`.
//! Files larger than the transcription upload limit are cut into mp3
//! segments under `chunks/` with `ffmpeg`, sized from the file's average
//! bitrate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use echolens_core::{defaults, Episode, Error, Result};
use echolens_inference::RetryPolicy;

/// Extensions kept from the source URL; anything else is saved as mp3.
const KNOWN_EXTENSIONS: [&str; 4] = ["mp3", "m4a", "wav", "ogg"];

/// Attempts at cutting a segment under the size limit before giving up.
const SEGMENT_ATTEMPTS: usize = 5;

/// Duration factor applied after a segment came out too large.
const SEGMENT_SHRINK: f64 = 0.7;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").expect("valid regex"));
static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-\s]+").expect("valid regex"));

/// Lowercase directory-safe slug, at most 100 characters.
pub fn slugify(text: &str) -> String {
    let lower = text.to_lowercase();
    let cleaned = NON_WORD.replace_all(&lower, "");
    let joined = SEPARATORS.replace_all(&cleaned, "_");
    let slug: String = joined.trim_matches('_').chars().take(100).collect();
    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug
    }
}

/// Audio file extension taken from the URL path, defaulting to `mp3`.
pub fn extension_from_url(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    match last.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_lowercase();
            KNOWN_EXTENSIONS
                .iter()
                .copied()
                .find(|known| *known == ext)
                .unwrap_or("mp3")
        }
        None => "mp3",
    }
}

pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        _ => "audio/mpeg",
    }
}

/// Segment length giving roughly `target_bytes` per segment, clamped to
/// `[min_secs, max_secs]`.
pub fn segment_duration_secs(
    file_size: u64,
    duration_secs: f64,
    target_bytes: u64,
    min_secs: u64,
    max_secs: u64,
) -> u64 {
    if duration_secs <= 0.0 || file_size == 0 {
        return max_secs;
    }
    let bytes_per_sec = file_size as f64 / duration_secs;
    let secs = (target_bytes as f64 / bytes_per_sec) as u64;
    secs.clamp(min_secs, max_secs)
}

/// One file ready for upload to the transcription endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    pub index: usize,
    pub path: PathBuf,
    pub file_name: String,
    pub mime_type: String,
}

impl AudioSegment {
    fn for_file(index: usize, path: PathBuf) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        Self {
            index,
            path,
            file_name,
            mime_type: mime_for_extension(&ext).to_string(),
        }
    }
}

/// Settings for audio acquisition.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub upload_dir: PathBuf,
    pub keep_chunks: bool,
    pub max_file_bytes: u64,
    pub segment_target_bytes: u64,
    pub segment_min_secs: u64,
    pub segment_max_secs: u64,
    pub download_timeout: Duration,
    pub download_retry: RetryPolicy,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from(defaults::UPLOAD_DIR),
            keep_chunks: false,
            max_file_bytes: defaults::TRANSCRIPTION_MAX_FILE_BYTES,
            segment_target_bytes: defaults::AUDIO_SEGMENT_TARGET_BYTES,
            segment_min_secs: defaults::AUDIO_SEGMENT_MIN_SECS,
            segment_max_secs: defaults::AUDIO_SEGMENT_MAX_SECS,
            download_timeout: Duration::from_secs(defaults::DOWNLOAD_TIMEOUT_SECS),
            download_retry: RetryPolicy::default(),
        }
    }
}

impl AudioConfig {
    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = dir.into();
        self
    }

    pub fn with_keep_chunks(mut self, keep: bool) -> Self {
        self.keep_chunks = keep;
        self
    }

    pub fn with_download_retry(mut self, retry: RetryPolicy) -> Self {
        self.download_retry = retry;
        self
    }
}

/// Downloads episode audio and prepares it for transcription.
pub struct AudioFetcher {
    client: reqwest::Client,
    config: AudioConfig,
}

impl AudioFetcher {
    pub fn new(config: AudioConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(defaults::DOWNLOAD_CONNECT_TIMEOUT_SECS))
            .timeout(config.download_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn episode_dir(&self, episode: &Episode) -> PathBuf {
        crate::cancel::episode_dir(&self.config.upload_dir, episode)
    }

    /// Download the episode audio unless it is already on disk.
    ///
    /// The body is streamed to a `.part` file and renamed once complete.
    /// Transient failures are retried; the token aborts between and during
    /// attempts.
    pub async fn download(&self, episode: &Episode, cancel: &CancellationToken) -> Result<PathBuf> {
        let url = episode.audio_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::InvalidInput(format!("Invalid audio URL: {}", url)));
        }

        let dir = self.episode_dir(episode);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("audio.{}", extension_from_url(url)));
        if file_size(&path).await > 0 {
            debug!(path = %path.display(), "Audio already downloaded");
            return Ok(path);
        }

        let partial = path.with_extension("part");
        let this = self;
        let target = partial.as_path();

        let bytes = tokio::select! {
            _ = cancel.cancelled() => {
                remove_partial(&partial).await;
                return Err(Error::Cancelled);
            }
            result = self.config.download_retry.run("download", move || this.try_download(url, target)) => result,
        };

        let bytes = match bytes {
            Ok(bytes) => bytes,
            Err(e) => {
                remove_partial(&partial).await;
                return Err(e);
            }
        };

        tokio::fs::rename(&partial, &path).await?;
        info!(
            subsystem = "jobs",
            component = "audio",
            op = "download",
            episode_id = %episode.id,
            bytes,
            path = %path.display(),
            "Audio downloaded"
        );
        Ok(path)
    }

    async fn try_download(&self, url: &str, target: &Path) -> Result<u64> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("Download failed with status: {}", status);
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                Error::Transient(message)
            } else {
                Error::InvalidInput(message)
            });
        }

        let content_length = response.content_length();
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(target).await?;
        let mut downloaded: u64 = 0;
        let mut sniffed = false;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if !sniffed {
                ensure_audio(&chunk)?;
                sniffed = true;
            }
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
        }
        file.flush().await?;

        if let Some(expected) = content_length {
            if downloaded != expected {
                return Err(Error::Transient(format!(
                    "Download incomplete: got {} bytes, expected {}",
                    downloaded, expected
                )));
            }
        }
        if downloaded == 0 {
            return Err(Error::InvalidInput("Downloaded audio file is empty".to_string()));
        }

        Ok(downloaded)
    }

    /// Files to upload for `audio`: the file itself when under the limit,
    /// otherwise ffmpeg-cut segments in playback order.
    pub async fn prepare_segments(&self, audio: &Path) -> Result<Vec<AudioSegment>> {
        let size = file_size(audio).await;
        if size == 0 {
            return Err(Error::NotFound(format!(
                "Audio file missing or empty: {}",
                audio.display()
            )));
        }
        if size < self.config.max_file_bytes {
            return Ok(vec![AudioSegment::for_file(0, audio.to_path_buf())]);
        }

        let duration = media_duration(audio).await?;
        let mut segment_secs = segment_duration_secs(
            size,
            duration,
            self.config.segment_target_bytes,
            self.config.segment_min_secs,
            self.config.segment_max_secs,
        ) as f64;

        info!(
            subsystem = "jobs",
            component = "audio",
            op = "split",
            size_bytes = size,
            duration_secs = duration,
            segment_secs,
            "Splitting audio for transcription"
        );

        let chunks_dir = chunks_dir(audio);
        tokio::fs::create_dir_all(&chunks_dir).await?;

        let mut segments = Vec::new();
        let mut offset = 0.0;
        while offset < duration {
            let index = segments.len();
            let wanted = segment_secs.min(duration - offset);

            let (path, actual) = self
                .cut_segment(audio, &chunks_dir, index, offset, wanted)
                .await?;
            if actual < wanted {
                segment_secs = actual;
            }
            segments.push(AudioSegment::for_file(index, path));
            offset += actual;
        }

        debug!(chunk_count = segments.len(), "Audio split complete");
        Ok(segments)
    }

    /// Cut one segment, reusing a previous cut of the same offset and length.
    /// Returns the segment path and the length actually used.
    async fn cut_segment(
        &self,
        audio: &Path,
        dir: &Path,
        index: usize,
        start: f64,
        secs: f64,
    ) -> Result<(PathBuf, f64)> {
        let mut attempt_secs = secs;
        for attempt in 1..=SEGMENT_ATTEMPTS {
            let path = dir.join(segment_file_name(index, start, attempt_secs));
            let existing = file_size(&path).await;
            if existing > 0 && existing <= self.config.max_file_bytes {
                debug!(path = %path.display(), "Reusing existing segment");
                return Ok((path, attempt_secs));
            }

            run_tool(
                "ffmpeg",
                &[
                    "-v".as_ref(),
                    "error".as_ref(),
                    "-i".as_ref(),
                    audio.as_os_str(),
                    "-ss".as_ref(),
                    format!("{:.3}", start).as_ref(),
                    "-t".as_ref(),
                    format!("{:.3}", attempt_secs).as_ref(),
                    "-acodec".as_ref(),
                    "libmp3lame".as_ref(),
                    "-y".as_ref(),
                    path.as_os_str(),
                ],
            )
            .await?;

            let size = file_size(&path).await;
            if size > 0 && size <= self.config.max_file_bytes {
                return Ok((path, attempt_secs));
            }

            warn!(
                path = %path.display(),
                attempt,
                size_bytes = size,
                "Segment too large, cutting shorter"
            );
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!(path = %path.display(), error = %e, "Oversized segment not removed");
            }
            attempt_secs = (attempt_secs * SEGMENT_SHRINK).floor().max(1.0);
        }

        Err(Error::InvalidInput(format!(
            "Cannot cut audio segment under {} bytes, bitrate too high",
            self.config.max_file_bytes
        )))
    }

    /// Remove split segments unless configured to keep them.
    pub async fn cleanup_segments(&self, audio: &Path) {
        if self.config.keep_chunks {
            return;
        }
        let dir = chunks_dir(audio);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(dir = %dir.display(), "Audio segments removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to remove audio segments"),
        }
    }
}

/// Segment file name keyed by position and length, so a cut of another
/// length left by an earlier run is never picked up for this one.
fn segment_file_name(index: usize, start: f64, secs: f64) -> String {
    let millis = |s: f64| (s * 1000.0).round().max(0.0) as u64;
    format!(
        "chunk_{:03}_{}ms_{}ms.mp3",
        index,
        millis(start),
        millis(secs)
    )
}

fn chunks_dir(audio: &Path) -> PathBuf {
    audio
        .parent()
        .map(|p| p.join("chunks"))
        .unwrap_or_else(|| PathBuf::from("chunks"))
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial download"),
    }
}

async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

/// Reject bodies that are not audio: anything whose magic bytes identify a
/// non-audio type, and text such as an HTML error page or a JSON error body.
/// Unrecognised binary content is accepted.
fn ensure_audio(head: &[u8]) -> Result<()> {
    if let Some(kind) = infer::get(head) {
        if matches!(
            kind.matcher_type(),
            infer::MatcherType::Audio | infer::MatcherType::Video
        ) {
            return Ok(());
        }
        return Err(Error::InvalidInput(format!(
            "Downloaded file is not audio (detected {})",
            kind.mime_type()
        )));
    }

    if looks_like_text(head) {
        let preview: String = String::from_utf8_lossy(head).chars().take(40).collect();
        return Err(Error::InvalidInput(format!(
            "Downloaded file is not audio (text content: {:?})",
            preview.trim()
        )));
    }
    Ok(())
}

/// Markup or JSON after an optional BOM and whitespace, or a head made only
/// of printable UTF-8.
fn looks_like_text(head: &[u8]) -> bool {
    let body = head.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(head);
    let Some(first) = body.iter().position(|b| !b.is_ascii_whitespace()) else {
        return false;
    };
    if matches!(body[first], b'<' | b'{' | b'[') {
        return true;
    }

    // A multi-byte character cut off at the end of the head is still text.
    let valid = match std::str::from_utf8(body) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    };
    valid
        && body
            .iter()
            .all(|b| !b.is_ascii_control() || b.is_ascii_whitespace())
}

async fn run_tool(program: &str, args: &[&std::ffi::OsStr]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Config(format!("{} not found on PATH", program))
            } else {
                Error::Io(e)
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Internal(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Duration of an audio file in seconds, via ffprobe.
pub async fn media_duration(audio: &Path) -> Result<f64> {
    let stdout = run_tool(
        "ffprobe",
        &[
            "-v".as_ref(),
            "error".as_ref(),
            "-show_entries".as_ref(),
            "format=duration".as_ref(),
            "-of".as_ref(),
            "default=noprint_wrappers=1:nokey=1".as_ref(),
            audio.as_os_str(),
        ],
    )
    .await?;

    stdout
        .trim()
        .parse::<f64>()
        .map_err(|_| Error::InvalidInput(format!("Unreadable audio duration: {:?}", stdout.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("The Rust Show!"), "the_rust_show");
        assert_eq!(slugify("  --Hello -- World--  "), "hello_world");
        assert_eq!(slugify("!!!"), "unknown");
        assert_eq!(slugify(&"a".repeat(150)).len(), 100);
    }

    #[test]
    fn test_extension_from_url() {
        assert_eq!(extension_from_url("https://cdn.example.com/ep1.M4A?token=x"), "m4a");
        assert_eq!(extension_from_url("https://cdn.example.com/ep1.ogg#t=10"), "ogg");
        assert_eq!(extension_from_url("https://cdn.example.com/ep1.flac"), "mp3");
        assert_eq!(extension_from_url("https://cdn.example.com/stream"), "mp3");
        assert_eq!(extension_from_url("https://cdn.example.com/v1.2/stream"), "mp3");
    }

    #[test]
    fn test_segment_duration_from_bitrate() {
        // 128 kbps = 16000 bytes/s; 20 MiB / 16000 ≈ 1310 s, capped at 1200.
        let secs = segment_duration_secs(16_000 * 3600, 3600.0, 20 * 1024 * 1024, 300, 1200);
        assert_eq!(secs, 1200);

        // 320 kbps = 40000 bytes/s; 20 MiB / 40000 ≈ 524 s.
        let secs = segment_duration_secs(40_000 * 3600, 3600.0, 20 * 1024 * 1024, 300, 1200);
        assert_eq!(secs, 524);

        // Very high bitrate floors at the minimum.
        let secs = segment_duration_secs(500_000 * 60, 60.0, 20 * 1024 * 1024, 300, 1200);
        assert_eq!(secs, 300);
    }

    #[test]
    fn test_ensure_audio_rejects_html() {
        let html = b"<!DOCTYPE html><html><body>Not found</body></html>";
        assert!(matches!(ensure_audio(html), Err(Error::InvalidInput(_))));

        let padded = b"\xEF\xBB\xBF\r\n  <html><head><title>403</title></head></html>";
        assert!(matches!(ensure_audio(padded), Err(Error::InvalidInput(_))));

        let json = br#"{"error": "quota exceeded"}"#;
        assert!(matches!(ensure_audio(json), Err(Error::InvalidInput(_))));

        let plain = b"Access denied. Please sign in to download this episode.";
        assert!(matches!(ensure_audio(plain), Err(Error::InvalidInput(_))));

        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert!(matches!(ensure_audio(&png), Err(Error::InvalidInput(_))));

        let mp3 = [b'I', b'D', b'3', 3, 0, 0, 0, 0, 0, 0];
        assert!(ensure_audio(&mp3).is_ok());

        let unknown_binary = [0x00, 0x13, 0x9C, 0xF0, 0x01, 0x02, 0x80, 0x7F];
        assert!(ensure_audio(&unknown_binary).is_ok());
    }

    #[test]
    fn test_segment_name_keyed_by_length() {
        assert_eq!(segment_file_name(2, 2400.0, 1200.0), "chunk_002_2400000ms_1200000ms.mp3");
        assert_ne!(
            segment_file_name(1, 1200.0, 1200.0),
            segment_file_name(1, 1200.0, 960.0)
        );
        assert_ne!(
            segment_file_name(1, 1200.0, 960.0),
            segment_file_name(1, 960.0, 960.0)
        );
    }

    #[tokio::test]
    async fn test_cut_reuses_only_matching_segment() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("audio.mp3");
        let chunks = dir.path().join("chunks");
        tokio::fs::create_dir_all(&chunks).await.unwrap();

        // A longer cut from an earlier run sits next to the one we want.
        tokio::fs::write(chunks.join(segment_file_name(0, 0.0, 1200.0)), b"old cut")
            .await
            .unwrap();
        let wanted = chunks.join(segment_file_name(0, 0.0, 600.0));
        tokio::fs::write(&wanted, b"matching cut").await.unwrap();

        let fetcher = AudioFetcher::new(AudioConfig::default()).unwrap();
        let (path, secs) = fetcher
            .cut_segment(&audio, &chunks, 0, 0.0, 600.0)
            .await
            .unwrap();
        assert_eq!(path, wanted);
        assert_eq!(secs, 600.0);
    }

    #[tokio::test]
    async fn test_small_file_is_single_segment() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("audio.mp3");
        tokio::fs::write(&audio, b"ID3 small file").await.unwrap();

        let fetcher = AudioFetcher::new(AudioConfig::default()).unwrap();
        let segments = fetcher.prepare_segments(&audio).await.unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].file_name, "audio.mp3");
        assert_eq!(segments[0].mime_type, "audio/mpeg");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let fetcher = AudioFetcher::new(AudioConfig::default()).unwrap();
        let err = fetcher
            .prepare_segments(Path::new("/nonexistent/audio.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
