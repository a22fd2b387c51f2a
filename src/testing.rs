//! In-memory stand-ins for the FFmpeg-backed stages.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ffmpeg_bus::{
    decoder::{DecodedTrack, Decoder},
    encoder::{AudioSettings, Encoder, VideoSettings},
    fifo::SampleFifo,
    frame::{RawAudioFrame, RawFrame, RawVideoFrame},
    input::{AvInput, StreamPacketSource},
    output::AvOutput,
    scaler::Scaler,
};
use ffmpeg_next::{format::Pixel, Rational};
use tokio_util::sync::CancellationToken;

use crate::{
    composition::CompositionPlan,
    export::Renderer,
    filler::FillerResolver,
    media::{MediaKind, MediaProbe, MediaSource, Size, TrackInfo},
    sink::ArtifactCleaner,
    transcode::{
        ReaderHandle, SampleInput, SampleOutput, TrackPump, TranscodeBackend, TranscodeJob,
        TranscodeSession, WriterHandle,
    },
    transform::AffineTransform,
};

pub fn video_source(path: &str, duration: Duration, width: f64, height: f64) -> MediaSource {
    MediaSource {
        uri: PathBuf::from(path),
        kind: MediaKind::Video,
        duration,
        tracks: vec![TrackInfo {
            index: 0,
            kind: MediaKind::Video,
            duration,
            natural_size: Size::new(width, height),
            preferred_transform: AffineTransform::IDENTITY,
        }],
    }
}

pub fn audio_source(path: &str, duration: Duration) -> MediaSource {
    MediaSource {
        uri: PathBuf::from(path),
        kind: MediaKind::Audio,
        duration,
        tracks: vec![TrackInfo {
            index: 0,
            kind: MediaKind::Audio,
            duration,
            natural_size: Size::default(),
            preferred_transform: AffineTransform::IDENTITY,
        }],
    }
}

/// Serves registered sources by path.
#[derive(Default)]
pub struct FakeProbe {
    sources: Mutex<HashMap<PathBuf, MediaSource>>,
    calls: AtomicUsize,
}

impl FakeProbe {
    pub fn with(self, source: MediaSource) -> Self {
        if let Ok(mut sources) = self.sources.lock() {
            sources.insert(source.uri.clone(), source);
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MediaProbe for FakeProbe {
    fn load(&self, path: &Path, _kind: MediaKind) -> anyhow::Result<MediaSource> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sources
            .lock()
            .map_err(|_| anyhow::anyhow!("poisoned"))?
            .get(path)
            .cloned()
            .ok_or(anyhow::anyhow!("cannot open {}", path.display()))
    }
}

/// Always answers with the same path, or nothing.
pub struct StaticFiller(pub Option<PathBuf>);

impl FillerResolver for StaticFiller {
    fn resolve(&self, _name: &str) -> Option<PathBuf> {
        self.0.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    #[default]
    Write,
    Fail,
    NoFile,
    /// Leaves a truncated file behind, then fails.
    Partial,
}

/// Writes a text description of the plan instead of a movie:
/// `duration <ms>` then one `video <file name> <start ms> <end ms>` line per segment.
#[derive(Default)]
pub struct FakeRenderer {
    pub mode: RenderMode,
    plans: Mutex<Vec<CompositionPlan>>,
}

impl FakeRenderer {
    pub fn new(mode: RenderMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn plans(&self) -> Vec<CompositionPlan> {
        self.plans.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn describe(plan: &CompositionPlan) -> String {
        let mut text = format!("duration {}\n", plan.duration().as_millis());
        for segment in plan.video_segments() {
            let range = segment.timeline_range();
            let name = segment
                .source
                .uri
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            text.push_str(&format!(
                "video {} {} {}\n",
                name,
                range.start.as_millis(),
                range.end().as_millis()
            ));
        }
        text
    }
}

impl Renderer for FakeRenderer {
    fn render(
        &self,
        plan: &CompositionPlan,
        output: &Path,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        if let Ok(mut plans) = self.plans.lock() {
            plans.push(plan.clone());
        }
        match self.mode {
            RenderMode::Write => {
                std::fs::write(output, Self::describe(plan))?;
                Ok(())
            }
            RenderMode::Fail => anyhow::bail!("renderer exploded"),
            RenderMode::NoFile => Ok(()),
            RenderMode::Partial => {
                std::fs::write(output, "duration")?;
                anyhow::bail!("renderer died mid-file")
            }
        }
    }
}

/// What happened inside a fake transcode, in order.
#[derive(Default, Clone)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        if let Ok(mut events) = self.0.lock() {
            events.push(event.into());
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }
}

/// Transcode backend moving numbered samples. The writer copies the input
/// file to the output on finish.
pub struct FakeTranscodeBackend {
    pub video_samples: u32,
    pub audio_samples: Option<u32>,
    /// This pump holds its last sample until the other one has finished.
    pub finishes_last: Option<MediaKind>,
    pub fail_open: bool,
    pub fail_video_at: Option<u32>,
    pub never_ready: bool,
    pub log: EventLog,
    pub opened: AtomicUsize,
}

impl Default for FakeTranscodeBackend {
    fn default() -> Self {
        Self {
            video_samples: 30,
            audio_samples: Some(40),
            finishes_last: None,
            fail_open: false,
            fail_video_at: None,
            never_ready: false,
            log: EventLog::default(),
            opened: AtomicUsize::new(0),
        }
    }
}

struct CountingOutput {
    kind: MediaKind,
    next: u32,
    total: u32,
    fail_at: Option<u32>,
    wait_for: Option<Arc<AtomicBool>>,
}

impl SampleOutput<u32> for CountingOutput {
    fn copy_next_sample(&mut self) -> anyhow::Result<Option<u32>> {
        if Some(self.next) == self.fail_at {
            anyhow::bail!("{} decode error at {}", self.kind, self.next);
        }
        if self.next < self.total {
            self.next += 1;
            return Ok(Some(self.next));
        }
        if let Some(flag) = &self.wait_for {
            while !flag.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        Ok(None)
    }
}

struct RecordingInput {
    kind: MediaKind,
    received: u32,
    ready: bool,
    finished: Arc<AtomicBool>,
    log: EventLog,
}

impl SampleInput<u32> for RecordingInput {
    fn is_ready_for_more(&self) -> bool {
        self.ready
    }

    fn append(&mut self, sample: u32) -> anyhow::Result<()> {
        anyhow::ensure!(sample == self.received + 1, "sample out of order");
        self.received = sample;
        Ok(())
    }

    fn mark_finished(&mut self) -> anyhow::Result<()> {
        self.log.push(format!("{} finished {}", self.kind, self.received));
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeWriter {
    input: PathBuf,
    output: PathBuf,
    video_done: Arc<AtomicBool>,
    audio_done: Arc<AtomicBool>,
    log: EventLog,
}

impl WriterHandle for FakeWriter {
    fn finish_writing(&mut self) -> anyhow::Result<()> {
        let both = self.video_done.load(Ordering::SeqCst) && self.audio_done.load(Ordering::SeqCst);
        self.log.push(if both {
            "writer finished"
        } else {
            "writer finished early"
        });
        std::fs::copy(&self.input, &self.output)?;
        Ok(())
    }
}

struct FakeReader {
    log: EventLog,
}

impl ReaderHandle for FakeReader {
    fn cancel_reading(&mut self) {
        self.log.push("reader cancelled");
    }
}

impl TranscodeBackend for FakeTranscodeBackend {
    type Sample = u32;

    fn open(
        &self,
        job: &TranscodeJob,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<TranscodeSession<u32>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            anyhow::bail!("cannot open reader for {}", job.input_path.display());
        }
        anyhow::ensure!(job.input_path.is_file(), "missing {}", job.input_path.display());

        let video_done = Arc::new(AtomicBool::new(false));
        // without an audio track there is nothing to wait for
        let audio_done = Arc::new(AtomicBool::new(self.audio_samples.is_none()));
        let wait_for = |kind: MediaKind| match (self.finishes_last, kind) {
            (Some(MediaKind::Video), MediaKind::Video) => Some(audio_done.clone()),
            (Some(MediaKind::Audio), MediaKind::Audio) => Some(video_done.clone()),
            _ => None,
        };

        let video = TrackPump {
            kind: MediaKind::Video,
            output: Box::new(CountingOutput {
                kind: MediaKind::Video,
                next: 0,
                total: self.video_samples,
                fail_at: self.fail_video_at,
                wait_for: wait_for(MediaKind::Video),
            }) as Box<dyn SampleOutput<u32>>,
            input: Box::new(RecordingInput {
                kind: MediaKind::Video,
                received: 0,
                ready: !self.never_ready,
                finished: video_done.clone(),
                log: self.log.clone(),
            }) as Box<dyn SampleInput<u32>>,
        };
        let audio = self.audio_samples.map(|total| TrackPump {
            kind: MediaKind::Audio,
            output: Box::new(CountingOutput {
                kind: MediaKind::Audio,
                next: 0,
                total,
                fail_at: None,
                wait_for: wait_for(MediaKind::Audio),
            }) as Box<dyn SampleOutput<u32>>,
            input: Box::new(RecordingInput {
                kind: MediaKind::Audio,
                received: 0,
                ready: true,
                finished: audio_done.clone(),
                log: self.log.clone(),
            }) as Box<dyn SampleInput<u32>>,
        });

        Ok(TranscodeSession {
            video,
            audio,
            reader: Box::new(FakeReader {
                log: self.log.clone(),
            }),
            writer: Box::new(FakeWriter {
                input: job.input_path.clone(),
                output: job.output_path.clone(),
                video_done,
                audio_done,
                log: self.log.clone(),
            }),
        })
    }
}

/// Records removals; optionally fails them.
#[derive(Default)]
pub struct FakeCleaner {
    fail: bool,
    removed: Mutex<Vec<PathBuf>>,
}

impl FakeCleaner {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn removed(&self) -> Vec<PathBuf> {
        self.removed.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ArtifactCleaner for FakeCleaner {
    fn remove(&self, path: &Path) -> std::io::Result<()> {
        if let Ok(mut removed) = self.removed.lock() {
            removed.push(path.to_path_buf());
        }
        if self.fail {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only volume",
            ));
        }
        std::fs::remove_file(path).or_else(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Ok(()),
            _ => Err(e),
        })
    }
}

/// True once FFmpeg is initialised and can encode H.264 and AAC.
pub fn encoders_available() -> bool {
    ffmpeg_bus::init().is_ok()
        && ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::H264).is_some()
        && ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::AAC).is_some()
}

/// A small MOV written with the real encoders: solid-colour video frames
/// and/or a 440 Hz tone.
pub struct SyntheticMovie {
    pub size: (u32, u32),
    pub fps: i32,
    pub frames: Vec<[u8; 3]>,
    /// Sample rate and length of the tone.
    pub tone: Option<(u32, Duration)>,
}

impl SyntheticMovie {
    pub fn solid(colour: [u8; 3], frames: usize, fps: i32) -> Self {
        Self {
            size: (64, 48),
            fps,
            frames: vec![colour; frames],
            tone: None,
        }
    }

    pub fn tone(sample_rate: u32, length: Duration) -> Self {
        Self {
            size: (64, 48),
            fps: 10,
            frames: Vec::new(),
            tone: Some((sample_rate, length)),
        }
    }

    pub fn with_tone(mut self, sample_rate: u32, length: Duration) -> Self {
        self.tone = Some((sample_rate, length));
        self
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        let mut output = AvOutput::new(path, Some("mov"))?;
        let global = output.needs_global_header();
        let (width, height) = self.size;

        let mut video = if self.frames.is_empty() {
            None
        } else {
            let settings = VideoSettings {
                width,
                height,
                frame_rate: Rational::new(self.fps, 1),
                time_base: Rational::new(1, self.fps),
                keyframe_interval: self.fps as u32,
                preset: Some("ultrafast".to_string()),
                ..Default::default()
            };
            let encoder = Encoder::video(&settings, global)?;
            let index = output.add_encoder_stream(&encoder)?;
            Some((encoder, index))
        };
        let mut audio = match self.tone {
            Some((sample_rate, length)) => {
                let settings = AudioSettings {
                    sample_rate,
                    ..Default::default()
                };
                let encoder = Encoder::audio(&settings, global)?;
                let index = output.add_encoder_stream(&encoder)?;
                Some((encoder, index, settings, length))
            }
            None => None,
        };
        output.write_header()?;

        if let Some((encoder, index)) = video.as_mut() {
            for (n, colour) in self.frames.iter().enumerate() {
                let pixel = [colour[0], colour[1], colour[2], 255];
                let data = pixel.repeat(width as usize * height as usize);
                let mut frame = RawVideoFrame::from_packed_rgba(&data, width, height)?;
                frame.get_mut().set_pts(Some(n as i64));
                encoder.send_frame(RawFrame::Video(frame))?;
                output.write_encoded(*index, encoder)?;
            }
            encoder.send_eof()?;
            output.write_encoded(*index, encoder)?;
        }

        if let Some((encoder, index, settings, length)) = audio.as_mut() {
            let rate = settings.sample_rate;
            let total = (length.as_nanos() * rate as u128 / 1_000_000_000) as usize;
            let mut sent = 0;
            while sent < total {
                let n = 1024.min(total - sent);
                let mut frame = ffmpeg_next::frame::Audio::new(SampleFifo::FORMAT, n, settings.layout());
                frame.set_rate(rate);
                for plane in 0..frame.planes() {
                    for (i, sample) in frame.plane_mut::<f32>(plane).iter_mut().enumerate() {
                        let t = (sent + i) as f32 / rate as f32;
                        *sample = 0.25 * (2.0 * std::f32::consts::PI * 440.0 * t).sin();
                    }
                }
                encoder.send_frame(RawFrame::Audio(RawAudioFrame::from(frame)))?;
                output.write_encoded(*index, encoder)?;
                sent += n;
            }
            encoder.send_eof()?;
            output.write_encoded(*index, encoder)?;
        }

        output.finish()
    }
}

fn decoded_track(path: &Path, video: bool) -> anyhow::Result<DecodedTrack<StreamPacketSource>> {
    let input = AvInput::new(path)?;
    let stream = if video {
        input.best_video()
    } else {
        input.best_audio()
    }
    .ok_or(anyhow::anyhow!("no such track in {}", path.display()))?;
    let decoder = Decoder::new(&stream)?;
    Ok(DecodedTrack::new(StreamPacketSource::new(input, stream.index()), decoder))
}

/// Every decoded video frame of `path`: presentation time and centre pixel.
pub fn video_frames(path: &Path) -> anyhow::Result<Vec<(Duration, [u8; 4])>> {
    let mut track = decoded_track(path, true)?;
    let time_base = track.decoder().time_base();
    let mut scaler: Option<Scaler> = None;
    let mut frames = Vec::new();
    while let Some(frame) = track.next_frame()? {
        let RawFrame::Video(mut frame) = frame else {
            continue;
        };
        let at = frame.presentation_time(time_base).unwrap_or_default();
        let (width, height) = (frame.width(), frame.height());
        let src = frame.get_mut();
        if !scaler.as_ref().is_some_and(|s| s.accepts(src)) {
            scaler = Some(Scaler::new(src, Pixel::RGBA, width, height)?);
        }
        let scaler = scaler.as_mut().ok_or(anyhow::anyhow!("scaler missing"))?;
        let data = RawVideoFrame::from(scaler.run(src)?).to_packed_rgba()?;
        let i = ((height / 2 * width + width / 2) * 4) as usize;
        frames.push((at, [data[i], data[i + 1], data[i + 2], data[i + 3]]));
    }
    Ok(frames)
}

/// Sample rate and decoded samples per channel of the audio track of `path`.
pub fn audio_samples(path: &Path) -> anyhow::Result<(u32, u64)> {
    let mut track = decoded_track(path, false)?;
    let mut rate = 0;
    let mut samples = 0;
    while let Some(frame) = track.next_frame()? {
        if let RawFrame::Audio(frame) = frame {
            rate = frame.as_audio().rate();
            samples += frame.as_audio().samples() as u64;
        }
    }
    Ok((rate, samples))
}

/// Length of the best video or audio track of `path` as the container reports it.
pub fn track_duration(path: &Path, video: bool) -> anyhow::Result<Duration> {
    let input = AvInput::new(path)?;
    let stream = if video {
        input.best_video()
    } else {
        input.best_audio()
    }
    .ok_or(anyhow::anyhow!("no such track in {}", path.display()))?;
    stream
        .duration()
        .ok_or(anyhow::anyhow!("no duration for {}", path.display()))
}
