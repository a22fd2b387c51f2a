use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ffmpeg_bus::{
    decoder::{DecodedTrack, Decoder},
    encoder::{AudioSettings, Encoder, VideoSettings},
    fifo::SampleFifo,
    frame::{RawAudioFrame, RawFrame},
    input::{AvInput, AvInputTask},
    output::AvOutput,
    packet::ChannelPacketSource,
    resampler::Resampler,
};
use ffmpeg_next::{picture, ChannelLayout, Rational};
use tokio_util::sync::CancellationToken;

use super::{
    ReaderHandle, SampleInput, SampleOutput, TrackPump, TranscodeBackend, TranscodeJob,
    TranscodeSession, WriterHandle,
};
use crate::media::MediaKind;

/// Bounded per-track packet queue between the demuxer and a pump.
const PACKET_QUEUE: usize = 32;

/// Reads the intermediate with one demux task feeding a decoder per track,
/// and writes the final file through one muxer shared by both encoders.
pub struct FfmpegTranscodeBackend;

impl TranscodeBackend for FfmpegTranscodeBackend {
    type Sample = RawFrame;

    fn open(
        &self,
        job: &TranscodeJob,
        cancel: &CancellationToken,
    ) -> anyhow::Result<TranscodeSession<RawFrame>> {
        let settings = &job.settings;
        let input = AvInput::new(&job.input_path)?;
        let video_stream = input
            .best_video()
            .ok_or(anyhow::anyhow!("no video track in {}", job.input_path.display()))?;
        let audio_stream = input.best_audio();

        let mut output = AvOutput::new(&job.output_path, Some("mov"))?;
        let global_header = output.needs_global_header();

        let video_decoder = Decoder::new(&video_stream)?;
        let rate = video_stream.rate();
        let video_settings = VideoSettings {
            width: video_stream.width(),
            height: video_stream.height(),
            frame_rate: if rate.numerator() > 0 { rate } else { Rational::new(30, 1) },
            time_base: video_decoder.time_base(),
            keyframe_interval: 60,
            bitrate: Some(settings.video_bitrate),
            crf: None,
            ..Default::default()
        };
        let video_encoder = Encoder::video(&video_settings, global_header)?;
        let video_out = output.add_encoder_stream(&video_encoder)?;

        let audio_settings = AudioSettings {
            bitrate: settings.audio_bitrate,
            sample_rate: settings.sample_rate,
            channels: settings.channels,
            ..Default::default()
        };
        let audio = match &audio_stream {
            Some(stream) => {
                let decoder = Decoder::new(stream)?;
                let encoder = Encoder::audio(&audio_settings, global_header)?;
                let out_index = output.add_encoder_stream(&encoder)?;
                Some((stream.index(), decoder, encoder, out_index))
            }
            None => None,
        };
        output.write_header()?;
        let output = Arc::new(Mutex::new(output));

        let reader_cancel = cancel.child_token();
        let mut routes = HashMap::new();
        let (video_tx, video_rx) = std::sync::mpsc::sync_channel(PACKET_QUEUE);
        routes.insert(video_stream.index(), video_tx);

        let video = TrackPump {
            kind: MediaKind::Video,
            output: Box::new(VideoOutput {
                track: DecodedTrack::new(
                    ChannelPacketSource::new(video_rx, reader_cancel.clone()),
                    video_decoder,
                ),
            }),
            input: Box::new(EncoderInput {
                encoder: video_encoder,
                stream_index: video_out,
                output: output.clone(),
                finished: false,
            }),
        };

        let audio = audio.map(|(index, decoder, encoder, out_index)| {
            let (tx, rx) = std::sync::mpsc::sync_channel(PACKET_QUEUE);
            routes.insert(index, tx);
            TrackPump {
                kind: MediaKind::Audio,
                output: Box::new(AudioOutput {
                    track: DecodedTrack::new(
                        ChannelPacketSource::new(rx, reader_cancel.clone()),
                        decoder,
                    ),
                    resampler: None,
                    layout: audio_settings.layout(),
                    rate: audio_settings.sample_rate,
                    flushed: false,
                }),
                input: Box::new(EncoderInput {
                    encoder,
                    stream_index: out_index,
                    output: output.clone(),
                    finished: false,
                }),
            }
        });

        let demux = AvInputTask::new(reader_cancel);
        demux.start(input, routes);

        Ok(TranscodeSession {
            video,
            audio,
            reader: Box::new(DemuxHandle { task: demux }),
            writer: Box::new(MuxHandle { output }),
        })
    }
}

struct VideoOutput {
    track: DecodedTrack<ChannelPacketSource>,
}

impl SampleOutput<RawFrame> for VideoOutput {
    fn copy_next_sample(&mut self) -> anyhow::Result<Option<RawFrame>> {
        loop {
            match self.track.next_frame()? {
                Some(RawFrame::Video(mut frame)) => {
                    let inner = frame.get_mut();
                    inner.set_pts(inner.timestamp());
                    // let the encoder place its own keyframes
                    inner.set_kind(picture::Type::None);
                    return Ok(Some(RawFrame::Video(frame)));
                }
                Some(RawFrame::Audio(_)) => continue,
                None => return Ok(None),
            }
        }
    }
}

/// Decoded audio converted to planar float at the target rate and layout.
struct AudioOutput {
    track: DecodedTrack<ChannelPacketSource>,
    resampler: Option<Resampler>,
    layout: ChannelLayout,
    rate: u32,
    flushed: bool,
}

impl SampleOutput<RawFrame> for AudioOutput {
    fn copy_next_sample(&mut self) -> anyhow::Result<Option<RawFrame>> {
        loop {
            match self.track.next_frame()? {
                Some(RawFrame::Audio(frame)) => {
                    let src = frame.as_audio();
                    if self.resampler.is_none() {
                        self.resampler = Some(Resampler::for_frame(
                            src,
                            SampleFifo::FORMAT,
                            self.layout,
                            self.rate,
                        )?);
                    }
                    if let Some(resampler) = self.resampler.as_mut() {
                        let converted = resampler.run(src)?;
                        if converted.samples() > 0 {
                            return Ok(Some(RawFrame::Audio(RawAudioFrame::from(converted))));
                        }
                    }
                }
                Some(RawFrame::Video(_)) => continue,
                None => {
                    if self.flushed {
                        return Ok(None);
                    }
                    self.flushed = true;
                    let rest = match self.resampler.as_mut() {
                        Some(resampler) => resampler.flush()?,
                        None => None,
                    };
                    return Ok(rest.map(|f| RawFrame::Audio(RawAudioFrame::from(f))));
                }
            }
        }
    }
}

/// One encoder writing into the shared muxer.
struct EncoderInput {
    encoder: Encoder,
    stream_index: usize,
    output: Arc<Mutex<AvOutput>>,
    finished: bool,
}

impl EncoderInput {
    fn drain(&mut self) -> anyhow::Result<()> {
        let mut output = self
            .output
            .lock()
            .map_err(|_| anyhow::anyhow!("muxer lock poisoned"))?;
        output.write_encoded(self.stream_index, &mut self.encoder)?;
        Ok(())
    }
}

impl SampleInput<RawFrame> for EncoderInput {
    fn is_ready_for_more(&self) -> bool {
        !self.finished
    }

    fn append(&mut self, sample: RawFrame) -> anyhow::Result<()> {
        self.encoder.send_frame(sample)?;
        self.drain()
    }

    fn mark_finished(&mut self) -> anyhow::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.encoder.send_eof()?;
        self.drain()
    }
}

struct MuxHandle {
    output: Arc<Mutex<AvOutput>>,
}

impl WriterHandle for MuxHandle {
    fn finish_writing(&mut self) -> anyhow::Result<()> {
        let mut output = self
            .output
            .lock()
            .map_err(|_| anyhow::anyhow!("muxer lock poisoned"))?;
        output.finish()
    }
}

struct DemuxHandle {
    task: AvInputTask,
}

impl ReaderHandle for DemuxHandle {
    fn cancel_reading(&mut self) {
        self.task.stop();
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
