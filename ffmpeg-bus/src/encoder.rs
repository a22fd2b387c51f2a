use ffmpeg_next::{ChannelLayout, Dictionary, Rational, codec, format::Pixel};

use crate::{
    fifo::SampleFifo,
    frame::RawFrame,
    packet::RawPacket,
    scaler::Scaler,
};

pub enum EncoderType {
    Video(ffmpeg_next::codec::encoder::Video),
    Audio(ffmpeg_next::codec::encoder::Audio),
}

#[derive(Debug, Clone)]
pub struct VideoSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
    pub time_base: Rational,
    pub keyframe_interval: u32,
    pub codec: String,
    pub pixel_format: Pixel,
    // bps; None = quality-driven (crf)
    pub bitrate: Option<usize>,
    // libx264 crf, used when bitrate is None
    pub crf: Option<u32>,
    // "ultrafast", "medium", etc.
    pub preset: Option<String>,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frame_rate: Rational::new(30, 1),
            time_base: Rational::new(1, 30),
            keyframe_interval: 60,
            codec: "libx264".to_string(),
            pixel_format: Pixel::YUV420P,
            bitrate: None,
            crf: Some(23),
            preset: Some("medium".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioSettings {
    pub codec: String,
    // bps
    pub bitrate: usize,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            codec: "aac".to_string(),
            bitrate: 128_000,
            sample_rate: 44_100,
            channels: 2,
        }
    }
}

impl AudioSettings {
    pub fn layout(&self) -> ChannelLayout {
        ChannelLayout::default(self.channels as i32)
    }
}

/// An opened encoder. Video frames are converted to the encoder's pixel
/// format/size on the fly; audio frames must already be planar `f32` at the
/// encoder rate and are re-chunked to the codec frame size.
pub struct Encoder {
    inner: EncoderType,
    time_base: Rational,
    scaler: Option<Scaler>,
    fifo: Option<SampleFifo>,
    samples_sent: i64,
}

impl Encoder {
    pub fn video(settings: &VideoSettings, global_header: bool) -> anyhow::Result<Self> {
        let codec = ffmpeg_next::encoder::find_by_name(&settings.codec)
            .or_else(|| ffmpeg_next::encoder::find(codec::Id::H264))
            .ok_or(anyhow::anyhow!("codec not found: {}", settings.codec))?;
        let mut encoder = codec::Context::new_with_codec(codec).encoder().video()?;
        encoder.set_width(settings.width);
        encoder.set_height(settings.height);
        encoder.set_format(settings.pixel_format);
        encoder.set_frame_rate(Some(settings.frame_rate));
        encoder.set_time_base(settings.time_base);
        encoder.set_gop(settings.keyframe_interval);
        if let Some(bitrate) = settings.bitrate {
            encoder.set_bit_rate(bitrate);
            encoder.set_max_bit_rate(bitrate * 2);
        }
        if global_header {
            unsafe {
                (*encoder.as_mut_ptr()).flags |= codec::flag::Flags::GLOBAL_HEADER.bits() as i32;
            }
        }

        let mut opts = Dictionary::new();
        if let Some(preset) = &settings.preset {
            opts.set("preset", preset);
        }
        if settings.bitrate.is_none() {
            if let Some(crf) = settings.crf {
                opts.set("crf", &crf.to_string());
            }
        }
        let encoder = encoder.open_with(opts)?;
        log::info!(
            "video encoder opened: {} {}x{} bitrate={:?} crf={:?}",
            settings.codec,
            settings.width,
            settings.height,
            settings.bitrate,
            settings.crf
        );

        Ok(Self {
            inner: EncoderType::Video(encoder),
            time_base: settings.time_base,
            scaler: None,
            fifo: None,
            samples_sent: 0,
        })
    }

    pub fn audio(settings: &AudioSettings, global_header: bool) -> anyhow::Result<Self> {
        let codec = ffmpeg_next::encoder::find_by_name(&settings.codec)
            .or_else(|| ffmpeg_next::encoder::find(codec::Id::AAC))
            .ok_or(anyhow::anyhow!("codec not found: {}", settings.codec))?;
        let mut encoder = codec::Context::new_with_codec(codec).encoder().audio()?;
        let time_base = Rational::new(1, settings.sample_rate as i32);
        encoder.set_rate(settings.sample_rate as i32);
        encoder.set_channel_layout(settings.layout());
        encoder.set_format(SampleFifo::FORMAT);
        encoder.set_bit_rate(settings.bitrate);
        encoder.set_time_base(time_base);
        if global_header {
            unsafe {
                (*encoder.as_mut_ptr()).flags |= codec::flag::Flags::GLOBAL_HEADER.bits() as i32;
            }
        }
        let encoder = encoder.open_with(Dictionary::new())?;
        log::info!(
            "audio encoder opened: {} {}Hz {}ch bitrate={}",
            settings.codec,
            settings.sample_rate,
            settings.channels,
            settings.bitrate
        );

        Ok(Self {
            inner: EncoderType::Audio(encoder),
            time_base,
            scaler: None,
            fifo: Some(SampleFifo::new(settings.layout(), settings.sample_rate)),
            samples_sent: 0,
        })
    }

    pub fn kind(&self) -> &EncoderType {
        &self.inner
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    fn audio_frame_size(encoder: &ffmpeg_next::codec::encoder::Audio) -> usize {
        match encoder.frame_size() {
            0 => 1024,
            n => n as usize,
        }
    }

    /// Sends one frame. The caller drains packets with [`Encoder::receive_packet`].
    pub fn send_frame(&mut self, frame: RawFrame) -> anyhow::Result<()> {
        match (&mut self.inner, frame) {
            (EncoderType::Video(encoder), RawFrame::Video(mut frame)) => {
                let frame = frame.get_mut();
                let needs_conversion = frame.format() != encoder.format()
                    || frame.width() != encoder.width()
                    || frame.height() != encoder.height();
                if needs_conversion {
                    if !self.scaler.as_ref().is_some_and(|s| s.accepts(frame)) {
                        self.scaler = Some(Scaler::new(
                            frame,
                            encoder.format(),
                            encoder.width(),
                            encoder.height(),
                        )?);
                    }
                    let scaler = self
                        .scaler
                        .as_mut()
                        .ok_or(anyhow::anyhow!("scaler missing"))?;
                    let converted = scaler.run(frame)?;
                    encoder.send_frame(&converted)?;
                } else {
                    encoder.send_frame(frame)?;
                }
            }
            (EncoderType::Audio(encoder), RawFrame::Audio(frame)) => {
                let frame_size = Self::audio_frame_size(encoder);
                let fifo = self
                    .fifo
                    .as_mut()
                    .ok_or(anyhow::anyhow!("audio fifo missing"))?;
                fifo.push(frame.as_audio())?;
                while fifo.len() >= frame_size {
                    if let Some(mut chunk) = fifo.pop(frame_size) {
                        chunk.set_pts(Some(self.samples_sent));
                        self.samples_sent += chunk.samples() as i64;
                        encoder.send_frame(&chunk)?;
                    }
                }
            }
            _ => anyhow::bail!("invalid frame type"),
        };

        Ok(())
    }

    /// Flushes buffered audio (short last frame) and signals end of stream.
    pub fn send_eof(&mut self) -> anyhow::Result<()> {
        match &mut self.inner {
            EncoderType::Video(encoder) => encoder.send_eof()?,
            EncoderType::Audio(encoder) => {
                let frame_size = Self::audio_frame_size(encoder);
                if let Some(fifo) = self.fifo.as_mut() {
                    while let Some(mut chunk) = fifo.pop(frame_size) {
                        chunk.set_pts(Some(self.samples_sent));
                        self.samples_sent += chunk.samples() as i64;
                        encoder.send_frame(&chunk)?;
                    }
                }
                encoder.send_eof()?
            }
        }
        Ok(())
    }

    /// Samples per channel handed to the audio encoder so far.
    pub fn samples_sent(&self) -> i64 {
        self.samples_sent
    }

    pub fn receive_packet(&mut self) -> anyhow::Result<Option<RawPacket>> {
        let mut packet = ffmpeg_next::codec::packet::Packet::empty();
        let result = match &mut self.inner {
            EncoderType::Video(encoder) => encoder.receive_packet(&mut packet),
            EncoderType::Audio(encoder) => encoder.receive_packet(&mut packet),
        };
        let ready = crate::frame_ready(result)?;
        Ok(ready.then(|| RawPacket::from((packet, self.time_base))))
    }
}
