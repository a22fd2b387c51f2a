use std::path::Path;
use std::time::Duration;

use ffmpeg_bus::{
    decoder::{DecodedTrack, Decoder},
    encoder::{AudioSettings, Encoder, VideoSettings},
    fifo::SampleFifo,
    frame::{RawAudioFrame, RawFrame, RawVideoFrame},
    input::{AvInput, StreamPacketSource},
    output::AvOutput,
    packet::RawPacket,
    resampler::Resampler,
    scaler::Scaler,
    stream::duration_to_ts,
};
use ffmpeg_next::{format::Pixel, ChannelLayout, Rational};
use tokio_util::sync::CancellationToken;

use super::{
    warp::{place, prescale, RgbaImage},
    Renderer,
};
use crate::{
    composition::{CompositionPlan, TimelineSegment},
    transform::AffineTransform,
};

/// Video ticks per output frame, so a shortened last frame can end exactly
/// at the timeline end.
const TICKS_PER_FRAME: i32 = 1000;

/// Renders plans with FFmpeg: every output frame is drawn on a black canvas
/// from the active segment's source frame, resampled by swscale to its size
/// on the canvas. The audio segment is decoded, resampled and cut to the
/// timeline length.
pub struct FfmpegRenderer {
    pub crf: u32,
    pub audio_bitrate: usize,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Renderer for FfmpegRenderer {
    fn render(
        &self,
        plan: &CompositionPlan,
        output_path: &Path,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let render = plan.render();
        let fps = render.frame_rate.max(1) as i32;
        let mut output = AvOutput::new(output_path, Some("mov"))?;
        let global_header = output.needs_global_header();

        let video_settings = VideoSettings {
            width: render.canvas_width,
            height: render.canvas_height,
            frame_rate: Rational::new(fps, 1),
            time_base: Rational::new(1, fps * TICKS_PER_FRAME),
            keyframe_interval: fps as u32,
            bitrate: None,
            crf: Some(self.crf),
            ..Default::default()
        };
        let audio_settings = AudioSettings {
            bitrate: self.audio_bitrate,
            sample_rate: self.sample_rate,
            channels: self.channels,
            ..Default::default()
        };
        let mut video_encoder = Encoder::video(&video_settings, global_header)?;
        let mut audio_encoder = Encoder::audio(&audio_settings, global_header)?;
        let video_index = output.add_encoder_stream(&video_encoder)?;
        let audio_index = output.add_encoder_stream(&audio_encoder)?;
        output.write_header()?;

        let audio_segment = plan.audio_segment();
        let total_samples = samples_for(plan.duration(), self.sample_rate);
        let mut audio = AudioCursor::open(audio_segment, &audio_settings)?;

        let mut canvas = RgbaImage::black(render.canvas_width, render.canvas_height);
        let mut active: Option<(usize, VideoCursor)> = None;
        let mut video_out = VideoWriter::new(video_index);
        let frames = plan.frame_count();
        for n in 0..frames {
            if cancel.is_cancelled() {
                anyhow::bail!("render cancelled at frame {}", n);
            }
            let t = plan.frame_time(n);
            canvas.clear();

            let position = plan
                .video_segments()
                .iter()
                .position(|s| s.timeline_range().contains(t));
            if let Some(position) = position {
                let segment = &plan.video_segments()[position];
                if active.as_ref().map(|(i, _)| *i) != Some(position) {
                    active = Some((position, VideoCursor::open(segment)?));
                }
                if let Some((_, cursor)) = active.as_mut() {
                    if let Some(frame) = cursor.frame_at(segment.source_time(t))? {
                        place(&mut canvas, &frame.image, &frame.transform, segment.opacity_at(t));
                    }
                }
            }

            let mut frame =
                RawVideoFrame::from_packed_rgba(&canvas.data, canvas.width, canvas.height)?;
            frame.get_mut().set_pts(Some(n as i64 * TICKS_PER_FRAME as i64));
            video_encoder.send_frame(RawFrame::Video(frame))?;
            video_out.drain(&mut output, &mut video_encoder)?;

            let audio_until = samples_for(plan.frame_time(n + 1), self.sample_rate).min(total_samples);
            audio.fill_until(audio_until, |chunk| {
                encode_audio(&mut output, audio_index, &mut audio_encoder, chunk)
            })?;
        }

        video_encoder.send_eof()?;
        video_out.drain(&mut output, &mut video_encoder)?;
        let last_frame = frames.saturating_sub(1);
        let last_ticks = duration_to_ts(plan.frame_duration(last_frame), video_encoder.time_base());
        video_out.finish(&mut output, last_ticks.max(1))?;

        audio.fill_until(total_samples, |chunk| {
            encode_audio(&mut output, audio_index, &mut audio_encoder, chunk)
        })?;
        audio_encoder.send_eof()?;
        output.write_encoded(audio_index, &mut audio_encoder)?;
        output.finish()?;
        log::debug!(
            "rendered {} frames, {} audio samples to {}",
            frames,
            audio.emitted,
            output_path.display()
        );
        Ok(())
    }
}

fn samples_for(at: Duration, rate: u32) -> u64 {
    (at.as_nanos() * rate as u128 / 1_000_000_000) as u64
}

/// Writes video packets one behind the encoder, so the final packet in
/// decode order can be shortened to end the track at the timeline end.
struct VideoWriter {
    index: usize,
    held: Option<RawPacket>,
}

impl VideoWriter {
    fn new(index: usize) -> Self {
        Self { index, held: None }
    }

    fn drain(&mut self, output: &mut AvOutput, encoder: &mut Encoder) -> anyhow::Result<()> {
        while let Some(mut packet) = encoder.receive_packet()? {
            packet.get_mut().set_duration(TICKS_PER_FRAME as i64);
            if let Some(previous) = self.held.replace(packet) {
                output.write_packet(self.index, previous)?;
            }
        }
        Ok(())
    }

    fn finish(&mut self, output: &mut AvOutput, last_ticks: i64) -> anyhow::Result<()> {
        if let Some(mut packet) = self.held.take() {
            packet.get_mut().set_duration(last_ticks);
            output.write_packet(self.index, packet)?;
        }
        Ok(())
    }
}

/// One chunk into the audio encoder, drained straight away: the codec holds
/// at most one pending frame.
fn encode_audio(
    output: &mut AvOutput,
    index: usize,
    encoder: &mut Encoder,
    chunk: ffmpeg_next::frame::Audio,
) -> anyhow::Result<()> {
    encoder.send_frame(RawFrame::Audio(RawAudioFrame::from(chunk)))?;
    output.write_encoded(index, encoder)?;
    Ok(())
}

/// Converts `frame` to packed RGBA at `width`x`height`, reusing `scaler`
/// while the source and target shapes stay the same.
fn resample(
    scaler: &mut Option<Scaler>,
    mut frame: RawVideoFrame,
    width: u32,
    height: u32,
) -> anyhow::Result<RgbaImage> {
    let untouched =
        frame.format() == Pixel::RGBA && frame.width() == width && frame.height() == height;
    let rgba = if untouched {
        frame
    } else {
        let src = frame.get_mut();
        let reusable = scaler
            .as_ref()
            .is_some_and(|s| s.accepts(src) && s.output() == (Pixel::RGBA, width, height));
        if !reusable {
            *scaler = Some(Scaler::new(src, Pixel::RGBA, width, height)?);
        }
        let scaler = scaler.as_mut().ok_or(anyhow::anyhow!("scaler missing"))?;
        RawVideoFrame::from(scaler.run(src)?)
    };
    Ok(RgbaImage {
        width,
        height,
        data: rgba.to_packed_rgba()?,
    })
}

fn open_track(segment: &TimelineSegment) -> anyhow::Result<DecodedTrack<StreamPacketSource>> {
    let mut input = AvInput::new(&segment.source.uri)?;
    let stream = input
        .streams()
        .get(&segment.source.track_index)
        .cloned()
        .ok_or(anyhow::anyhow!(
            "track {} missing in {}",
            segment.source.track_index,
            segment.source.uri.display()
        ))?;
    if !segment.source_range.start.is_zero() {
        input.seek(segment.source_range.start)?;
    }
    let decoder = Decoder::new(&stream)?;
    let index = stream.index();
    Ok(DecodedTrack::new(StreamPacketSource::new(input, index), decoder))
}

/// A source frame resampled to its size on the canvas, with the transform
/// that places it there.
struct PlacedFrame {
    image: RgbaImage,
    transform: AffineTransform,
}

/// Sequential access to one video segment's frames, ready for the canvas.
struct VideoCursor {
    track: DecodedTrack<StreamPacketSource>,
    time_base: Rational,
    transform: AffineTransform,
    scaler: Option<Scaler>,
    current: Option<PlacedFrame>,
    pending: Option<(Duration, RawVideoFrame)>,
    exhausted: bool,
}

impl VideoCursor {
    fn open(segment: &TimelineSegment) -> anyhow::Result<Self> {
        let track = open_track(segment)?;
        let time_base = track.decoder().time_base();
        log::debug!("video cursor opened on {}", segment.source.uri.display());
        Ok(Self {
            track,
            time_base,
            transform: segment.transform,
            scaler: None,
            current: None,
            pending: None,
            exhausted: false,
        })
    }

    /// The latest frame presented at or before `t`. Before the first frame,
    /// the first frame; after the last, the last.
    fn frame_at(&mut self, t: Duration) -> anyhow::Result<Option<&PlacedFrame>> {
        loop {
            if self.pending.is_none() && !self.exhausted {
                match self.track.next_frame()? {
                    Some(RawFrame::Video(frame)) => {
                        let at = frame.presentation_time(self.time_base).unwrap_or_default();
                        self.pending = Some((at, frame));
                    }
                    Some(RawFrame::Audio(_)) => continue,
                    None => self.exhausted = true,
                }
            }
            let take = match &self.pending {
                Some((at, _)) => *at <= t || self.current.is_none(),
                None => false,
            };
            if !take {
                break;
            }
            if let Some((_, frame)) = self.pending.take() {
                self.current = Some(self.place_frame(frame)?);
            }
        }
        Ok(self.current.as_ref())
    }

    /// Axis-aligned transforms are split into a filtered resample and an
    /// exact placement; other transforms keep the source size.
    fn place_frame(&mut self, frame: RawVideoFrame) -> anyhow::Result<PlacedFrame> {
        let (width, height) = (frame.width(), frame.height());
        let (w, h, transform) =
            prescale(&self.transform, width, height).unwrap_or((width, height, self.transform));
        Ok(PlacedFrame {
            image: resample(&mut self.scaler, frame, w, h)?,
            transform,
        })
    }
}

/// The audio segment, decoded to the encoder's format and padded with
/// silence if the source runs short.
struct AudioCursor {
    track: DecodedTrack<StreamPacketSource>,
    resampler: Option<Resampler>,
    fifo: SampleFifo,
    layout: ChannelLayout,
    rate: u32,
    exhausted: bool,
    emitted: u64,
}

impl AudioCursor {
    const CHUNK: usize = 1024;

    fn open(segment: &TimelineSegment, settings: &AudioSettings) -> anyhow::Result<Self> {
        let track = open_track(segment)?;
        Ok(Self {
            track,
            resampler: None,
            fifo: SampleFifo::new(settings.layout(), settings.sample_rate),
            layout: settings.layout(),
            rate: settings.sample_rate,
            exhausted: false,
            emitted: 0,
        })
    }

    fn decode_more(&mut self) -> anyhow::Result<()> {
        match self.track.next_frame()? {
            Some(RawFrame::Audio(frame)) => {
                let src = frame.as_audio();
                if self.resampler.is_none() {
                    self.resampler =
                        Some(Resampler::for_frame(src, SampleFifo::FORMAT, self.layout, self.rate)?);
                }
                if let Some(resampler) = self.resampler.as_mut() {
                    let converted = resampler.run(src)?;
                    self.fifo.push(&converted)?;
                }
            }
            Some(RawFrame::Video(_)) => {}
            None => {
                if let Some(rest) = self.resampler.as_mut().map(|r| r.flush()).transpose()?.flatten() {
                    self.fifo.push(&rest)?;
                }
                self.exhausted = true;
            }
        }
        Ok(())
    }

    fn silence(&self, samples: usize) -> ffmpeg_next::frame::Audio {
        let mut frame = ffmpeg_next::frame::Audio::new(SampleFifo::FORMAT, samples, self.layout);
        frame.set_rate(self.rate);
        for plane in 0..frame.planes() {
            frame.plane_mut::<f32>(plane).fill(0.0);
        }
        frame
    }

    /// Hands out chunks of at most [`CHUNK`](Self::CHUNK) samples until
    /// `target` samples per channel have been emitted.
    fn fill_until(
        &mut self,
        target: u64,
        mut emit: impl FnMut(ffmpeg_next::frame::Audio) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        while self.emitted < target {
            let want = ((target - self.emitted) as usize).min(Self::CHUNK);
            if self.fifo.is_empty() {
                if !self.exhausted {
                    self.decode_more()?;
                    continue;
                }
                let silence = self.silence(want);
                self.fifo.push(&silence)?;
            }
            if let Some(chunk) = self.fifo.pop(want) {
                self.emitted += chunk.samples() as u64;
                emit(chunk)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "render_test.rs"]
mod render_test;
