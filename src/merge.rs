//! Request orchestration: validate, probe, compose, render, transcode,
//! deliver.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    composition::CompositionBuilder,
    config::MergeConfig,
    error::{MergeError, ERR_AUDIO_TRACK, ERR_FIRST_TRACK, ERR_URLS, ERR_VIDEO_TRACKS},
    export::{Exporter, FfmpegRenderer, Renderer},
    filler::{CacheFillerResolver, FillerResolver},
    media::{FfmpegProbe, MediaKind, MediaProbe, MediaSource},
    sink::{settle, ArtifactCleaner, FsCleaner, ResultSink},
    transcode::{FfmpegTranscodeBackend, TranscodeBackend, TranscodeSettings, Transcoder},
};

/// Turns a caller-supplied URI into a local path.
///
/// Accepts plain paths and `file://` URIs (empty or `localhost` host,
/// percent-encoded). Anything else is an "Error in URLs".
pub fn parse_media_uri(raw: &str) -> Result<PathBuf, MergeError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(MergeError::validation(ERR_URLS, "empty URI"));
    }
    if raw.chars().any(char::is_control) {
        return Err(MergeError::validation(
            ERR_URLS,
            format!("control character in {:?}", raw),
        ));
    }
    let Some((scheme, rest)) = raw.split_once("://") else {
        return Ok(PathBuf::from(raw));
    };
    if !scheme.eq_ignore_ascii_case("file") {
        return Err(MergeError::validation(
            ERR_URLS,
            format!("unsupported scheme {:?} in {}", scheme, raw),
        ));
    }
    let path = match rest.find('/') {
        Some(0) => rest,
        Some(i) if rest[..i].eq_ignore_ascii_case("localhost") => &rest[i..],
        _ => {
            return Err(MergeError::validation(
                ERR_URLS,
                format!("{} is not a local file", raw),
            ));
        }
    };
    let decoded = percent_encoding::percent_decode_str(path)
        .decode_utf8()
        .map_err(|e| MergeError::validation(ERR_URLS, format!("{}: {}", raw, e)))?;
    if decoded.chars().any(char::is_control) {
        return Err(MergeError::validation(
            ERR_URLS,
            format!("control character in {:?}", raw),
        ));
    }
    Ok(PathBuf::from(decoded.as_ref()))
}

/// Transcode targets for a config.
pub fn transcode_settings(config: &MergeConfig) -> TranscodeSettings {
    TranscodeSettings {
        video_bitrate: config.video_bitrate,
        audio_bitrate: config.audio_bitrate,
        sample_rate: config.profile.audio_sample_rate,
        channels: config.audio_channels,
        pump_timeout: config.pump_timeout(),
    }
}

#[derive(Default)]
struct Slot {
    busy: AtomicBool,
    current: Mutex<Option<CancellationToken>>,
}

/// Frees the slot when the request ends, however it ends.
struct SlotGuard(Arc<Slot>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Ok(mut current) = self.0.current.lock() {
            current.take();
        }
        self.0.busy.store(false, Ordering::SeqCst);
    }
}

/// A validated request holding the instance's single slot.
struct Request {
    first: Option<PathBuf>,
    audio: PathBuf,
    cancel: CancellationToken,
    _slot: SlotGuard,
}

/// Merges a video (or the filler) with an audio track into one movie.
/// One request at a time per instance.
pub struct MergeVideo<R, B> {
    config: MergeConfig,
    probe: Arc<dyn MediaProbe>,
    filler: Arc<dyn FillerResolver>,
    cleaner: Arc<dyn ArtifactCleaner>,
    exporter: Exporter<R>,
    transcoder: Transcoder<B>,
    slot: Arc<Slot>,
}

impl MergeVideo<FfmpegRenderer, FfmpegTranscodeBackend> {
    pub fn with_ffmpeg(config: MergeConfig) -> Self {
        let renderer = FfmpegRenderer {
            crf: config.render_crf,
            audio_bitrate: config.render_audio_bitrate,
            sample_rate: config.profile.audio_sample_rate,
            channels: config.audio_channels,
        };
        let filler = CacheFillerResolver::new(&config.cache_dir, &config.assets_dir);
        Self::new(
            config,
            Arc::new(FfmpegProbe),
            Arc::new(filler),
            Arc::new(FsCleaner),
            Arc::new(renderer),
            Arc::new(FfmpegTranscodeBackend),
        )
    }
}

impl<R: Renderer, B: TranscodeBackend> MergeVideo<R, B> {
    pub fn new(
        config: MergeConfig,
        probe: Arc<dyn MediaProbe>,
        filler: Arc<dyn FillerResolver>,
        cleaner: Arc<dyn ArtifactCleaner>,
        renderer: Arc<R>,
        backend: Arc<B>,
    ) -> Self {
        let exporter = Exporter::new(renderer, &config.temp_dir);
        let transcoder = Transcoder::new(backend, &config.output_dir, transcode_settings(&config));
        Self {
            config,
            probe,
            filler,
            cleaner,
            exporter,
            transcoder,
            slot: Arc::new(Slot::default()),
        }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Cancels the running request, if any.
    pub fn cancel(&self) {
        if let Ok(current) = self.slot.current.lock() {
            if let Some(token) = current.as_ref() {
                log::info!("cancelling running merge");
                token.cancel();
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot.busy.load(Ordering::SeqCst)
    }

    /// Runs one merge and returns the final file.
    pub async fn merge(&self, first: Option<&str>, audio: &str) -> Result<PathBuf, MergeError> {
        let request = self.begin(first, audio)?;
        self.run(request).await
    }

    /// Callback form of [`merge`](Self::merge). Exactly one callback fires.
    /// Validation errors fire synchronously and no task is spawned.
    pub fn merge_video<S, E>(
        self: &Arc<Self>,
        first: Option<&str>,
        audio: &str,
        on_success: S,
        on_error: E,
    ) -> Option<JoinHandle<()>>
    where
        S: FnOnce(String) + Send + 'static,
        E: FnOnce(String) + Send + 'static,
    {
        let sink = ResultSink::new(on_success, on_error);
        let request = match self.begin(first, audio) {
            Ok(request) => request,
            Err(e) => {
                sink.resolve(Err(e));
                return None;
            }
        };
        let this = self.clone();
        Some(tokio::spawn(async move {
            let outcome = this.run(request).await;
            sink.resolve(outcome);
        }))
    }

    /// Validates the URIs and claims the slot. No file I/O.
    fn begin(&self, first: Option<&str>, audio: &str) -> Result<Request, MergeError> {
        let audio = parse_media_uri(audio)?;
        let first = match first {
            Some(raw) => Some(parse_media_uri(raw)?),
            None if self.config.profile.first_video_optional => None,
            None => return Err(MergeError::validation(ERR_URLS, "a first video is required")),
        };

        if self
            .slot
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MergeError::Busy);
        }
        let guard = SlotGuard(self.slot.clone());
        let cancel = CancellationToken::new();
        if let Ok(mut current) = self.slot.current.lock() {
            *current = Some(cancel.clone());
        }
        Ok(Request {
            first,
            audio,
            cancel,
            _slot: guard,
        })
    }

    async fn run(&self, request: Request) -> Result<PathBuf, MergeError> {
        log::info!(
            "merge started: video {}, audio {}",
            request
                .first
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(filler)".to_string()),
            request.audio.display()
        );
        let cancel = request.cancel.clone();
        let (first, fallback, audio) = self.load_sources(&request).await?;
        let plan = CompositionBuilder::new(self.config.profile.canvas, self.config.frame_rate)
            .build(first.as_ref(), &fallback, &audio)?;

        let job = self.exporter.export(plan, &cancel).await;
        if cancel.is_cancelled() {
            self.discard(&job.output_path);
            return Err(MergeError::Cancelled);
        }
        let intermediate = job.into_output()?;

        let outcome = self.transcoder.transcode(&intermediate, &cancel).await;
        if outcome.is_err() {
            self.discard(&intermediate);
        }
        settle(self.cleaner.as_ref(), outcome)
    }

    async fn load_sources(
        &self,
        request: &Request,
    ) -> Result<(Option<MediaSource>, MediaSource, MediaSource), MergeError> {
        let probe = self.probe.clone();
        let resolver = self.filler.clone();
        let filler_name = self.config.filler_name.clone();
        let first_path = request.first.clone();
        let audio_path = request.audio.clone();
        // resolving may copy the filler into the cache
        tokio::task::spawn_blocking(move || {
            let filler = resolver.resolve(&filler_name).ok_or_else(|| {
                MergeError::validation(ERR_URLS, format!("filler {} not found", filler_name))
            })?;
            let first = match first_path {
                Some(path) => Some(probe.load(&path, MediaKind::Video).map_err(|e| {
                    MergeError::track(ERR_FIRST_TRACK, format!("{}: {:#}", path.display(), e))
                })?),
                None => None,
            };
            let audio = probe.load(&audio_path, MediaKind::Audio).map_err(|e| {
                MergeError::track(ERR_AUDIO_TRACK, format!("{}: {:#}", audio_path.display(), e))
            })?;
            let fallback = probe.load(&filler, MediaKind::Video).map_err(|e| {
                MergeError::track(ERR_VIDEO_TRACKS, format!("{}: {:#}", filler.display(), e))
            })?;
            Ok((first, fallback, audio))
        })
        .await
        .map_err(|e| MergeError::track(ERR_VIDEO_TRACKS, format!("probe task: {}", e)))?
    }

    fn discard(&self, intermediate: &std::path::Path) {
        if !intermediate.exists() {
            return;
        }
        if let Err(e) = self.cleaner.remove(intermediate) {
            log::warn!(
                "failed to remove intermediate {}: {}",
                intermediate.display(),
                e
            );
        }
    }
}

#[cfg(test)]
#[path = "merge_test.rs"]
mod merge_test;
