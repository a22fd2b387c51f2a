use std::path::PathBuf;
use std::time::Duration;

use crate::{
    config::CanvasSpec,
    error::{MergeError, ERR_AUDIO_TRACK, ERR_FIRST_TRACK, ERR_VIDEO_TRACKS},
    media::{MediaKind, MediaSource, Size, TrackInfo},
    transform::{fit_transform, AffineTransform},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Duration,
    pub duration: Duration,
}

impl TimeRange {
    pub fn new(start: Duration, duration: Duration) -> Self {
        Self { start, duration }
    }

    pub fn end(&self) -> Duration {
        self.start + self.duration
    }

    pub fn contains(&self, t: Duration) -> bool {
        t >= self.start && t < self.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpacityKeyframe {
    pub at: Duration,
    pub opacity: f32,
}

/// One track of one input file.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRef {
    pub uri: PathBuf,
    pub track_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineSegment {
    pub source: TrackRef,
    pub source_range: TimeRange,
    pub insertion_point: Duration,
    pub transform: AffineTransform,
    pub natural_size: Size,
    pub opacity_keyframes: Vec<OpacityKeyframe>,
}

impl TimelineSegment {
    fn new(source: &MediaSource, track: &TrackInfo, source_range: TimeRange, at: Duration) -> Self {
        Self {
            source: TrackRef {
                uri: source.uri.clone(),
                track_index: track.index,
            },
            source_range,
            insertion_point: at,
            transform: AffineTransform::IDENTITY,
            natural_size: track.natural_size,
            opacity_keyframes: Vec::new(),
        }
    }

    /// Where the segment sits on the output timeline.
    pub fn timeline_range(&self) -> TimeRange {
        TimeRange::new(self.insertion_point, self.source_range.duration)
    }

    /// Maps an output timeline instant to the source instant it shows.
    pub fn source_time(&self, t: Duration) -> Duration {
        self.source_range.start + t.saturating_sub(self.insertion_point)
    }

    /// Opacity of the most recent keyframe at or before `t`; fully opaque otherwise.
    pub fn opacity_at(&self, t: Duration) -> f32 {
        self.opacity_keyframes
            .iter()
            .filter(|k| k.at <= t)
            .max_by_key(|k| k.at)
            .map(|k| k.opacity)
            .unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderDescriptor {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub frame_rate: u32,
}

impl RenderDescriptor {
    pub fn canvas(&self) -> Size {
        Size::new(self.canvas_width as f64, self.canvas_height as f64)
    }
}

/// Ordered, contiguous video segments spanning `[0, duration)` plus one
/// audio segment of the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionPlan {
    video: Vec<TimelineSegment>,
    audio: TimelineSegment,
    render: RenderDescriptor,
}

impl CompositionPlan {
    pub fn video_segments(&self) -> &[TimelineSegment] {
        &self.video
    }

    pub fn audio_segment(&self) -> &TimelineSegment {
        &self.audio
    }

    pub fn render(&self) -> RenderDescriptor {
        self.render
    }

    pub fn duration(&self) -> Duration {
        self.audio.source_range.duration
    }

    /// Number of output frames, rounding a partial last frame up.
    pub fn frame_count(&self) -> u64 {
        let nanos = self.duration().as_nanos() * self.render.frame_rate as u128;
        nanos.div_ceil(1_000_000_000) as u64
    }

    /// Output timestamp of frame `n`.
    pub fn frame_time(&self, n: u64) -> Duration {
        let nanos = n as u128 * 1_000_000_000 / self.render.frame_rate.max(1) as u128;
        Duration::from_nanos(nanos as u64)
    }

    /// How long frame `n` stays on screen. The last frame is shortened so
    /// the video ends exactly at [`duration`](Self::duration).
    pub fn frame_duration(&self, n: u64) -> Duration {
        self.frame_time(n + 1)
            .min(self.duration())
            .saturating_sub(self.frame_time(n))
    }
}

/// Lays out the request's sources on one timeline whose length is the
/// audio's duration.
pub struct CompositionBuilder {
    canvas: CanvasSpec,
    frame_rate: u32,
}

impl CompositionBuilder {
    pub fn new(canvas: CanvasSpec, frame_rate: u32) -> Self {
        Self { canvas, frame_rate }
    }

    pub fn build(
        &self,
        first: Option<&MediaSource>,
        fallback: &MediaSource,
        audio: &MediaSource,
    ) -> Result<CompositionPlan, MergeError> {
        let audio_track = audio.first_track(MediaKind::Audio).ok_or_else(|| {
            MergeError::track(
                ERR_AUDIO_TRACK,
                format!("no audio track in {}", audio.uri.display()),
            )
        })?;
        let total = audio.duration;
        if total.is_zero() {
            return Err(MergeError::track(
                ERR_AUDIO_TRACK,
                format!("{} has zero duration", audio.uri.display()),
            ));
        }

        let first = match first {
            Some(source) => {
                let track = source.first_track(MediaKind::Video).ok_or_else(|| {
                    MergeError::track(
                        ERR_FIRST_TRACK,
                        format!("no video track in {}", source.uri.display()),
                    )
                })?;
                Some((source, track))
            }
            None => None,
        };
        let fallback_track = || {
            fallback.first_track(MediaKind::Video).ok_or_else(|| {
                MergeError::track(
                    ERR_VIDEO_TRACKS,
                    format!("no video track in {}", fallback.uri.display()),
                )
            })
        };

        let canvas_size = match self.canvas {
            CanvasSpec::Fixed { width, height } => Size::new(width as f64, height as f64),
            CanvasSpec::FirstVideo => match first {
                Some((_, track)) => track.natural_size,
                None => fallback_track()?.natural_size,
            },
        };
        let render = RenderDescriptor {
            canvas_width: even(canvas_size.width),
            canvas_height: even(canvas_size.height),
            frame_rate: self.frame_rate,
        };
        let place = |source: &MediaSource, track: &TrackInfo, duration: Duration, at: Duration| {
            let mut segment =
                TimelineSegment::new(source, track, TimeRange::new(Duration::ZERO, duration), at);
            segment.transform =
                fit_transform(&track.preferred_transform, track.natural_size, render.canvas());
            segment
        };

        let mut segments = Vec::with_capacity(2);
        let mut cursor = Duration::ZERO;
        if let Some((source, track)) = first {
            let used = source.duration.min(total);
            if !used.is_zero() {
                segments.push(place(source, track, used, Duration::ZERO));
                cursor = used;
            }
        }
        if cursor < total {
            let gap = total - cursor;
            let track = fallback_track()?;
            if fallback.duration < gap {
                return Err(MergeError::track(
                    ERR_VIDEO_TRACKS,
                    format!(
                        "{} is {:?} long, {:?} needed",
                        fallback.uri.display(),
                        fallback.duration,
                        gap
                    ),
                ));
            }
            segments.push(place(fallback, track, gap, cursor));
        }
        if let Some(head) = segments.first_mut() {
            let end = head.timeline_range().end();
            head.opacity_keyframes.push(OpacityKeyframe {
                at: end,
                opacity: 0.0,
            });
        }

        let audio_segment = TimelineSegment::new(
            audio,
            audio_track,
            TimeRange::new(Duration::ZERO, total),
            Duration::ZERO,
        );

        log::info!(
            "composition: {:?} total, {} video segment(s), canvas {}x{} @ {} fps",
            total,
            segments.len(),
            render.canvas_width,
            render.canvas_height,
            render.frame_rate
        );
        Ok(CompositionPlan {
            video: segments,
            audio: audio_segment,
            render,
        })
    }
}

/// Encoders want even frame dimensions.
fn even(v: f64) -> u32 {
    let v = v.round().max(2.0) as u32;
    v - v % 2
}

#[cfg(test)]
#[path = "composition_test.rs"]
mod composition_test;
