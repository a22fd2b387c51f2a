use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg_bus::input::AvInput;

use crate::transform::AffineTransform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub index: usize,
    pub kind: MediaKind,
    pub duration: Duration,
    /// Coded frame size; zero for audio.
    pub natural_size: Size,
    pub preferred_transform: AffineTransform,
}

/// A probed input file. Read-only once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSource {
    pub uri: PathBuf,
    pub kind: MediaKind,
    pub duration: Duration,
    pub tracks: Vec<TrackInfo>,
}

impl MediaSource {
    pub fn first_track(&self, kind: MediaKind) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.kind == kind)
    }
}

/// Loads track metadata for a local file.
pub trait MediaProbe: Send + Sync + 'static {
    fn load(&self, path: &Path, kind: MediaKind) -> anyhow::Result<MediaSource>;
}

pub struct FfmpegProbe;

impl MediaProbe for FfmpegProbe {
    fn load(&self, path: &Path, kind: MediaKind) -> anyhow::Result<MediaSource> {
        let input = AvInput::new(path)?;
        let mut tracks = Vec::new();
        let mut streams: Vec<_> = input.streams().values().collect();
        streams.sort_by_key(|s| s.index());
        for stream in streams {
            let kind = if stream.is_video() {
                MediaKind::Video
            } else if stream.is_audio() {
                MediaKind::Audio
            } else {
                continue;
            };
            let duration = stream
                .duration()
                .or_else(|| input.duration())
                .unwrap_or_default();
            let (natural_size, preferred_transform) = match kind {
                MediaKind::Video => (
                    Size::new(stream.width() as f64, stream.height() as f64),
                    AffineTransform::from(stream.display_matrix()),
                ),
                MediaKind::Audio => (Size::default(), AffineTransform::IDENTITY),
            };
            tracks.push(TrackInfo {
                index: stream.index(),
                kind,
                duration,
                natural_size,
                preferred_transform,
            });
        }

        let duration = input
            .duration()
            .or_else(|| tracks.iter().map(|t| t.duration).max())
            .unwrap_or_default();
        log::debug!(
            "probed {} ({}): {:?}, {} tracks",
            path.display(),
            kind,
            duration,
            tracks.len()
        );
        Ok(MediaSource {
            uri: path.to_path_buf(),
            kind,
            duration,
            tracks,
        })
    }
}
