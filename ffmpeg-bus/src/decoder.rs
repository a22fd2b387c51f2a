use ffmpeg_next::Rational;

use crate::{
    frame::{RawAudioFrame, RawFrame, RawVideoFrame},
    packet::{PacketSource, RawPacket},
    stream::AvStream,
};

enum Codec {
    Video(ffmpeg_next::codec::decoder::Video),
    Audio(ffmpeg_next::codec::decoder::Audio),
}

impl std::ops::DerefMut for Codec {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Codec::Video(d) => d,
            Codec::Audio(d) => d,
        }
    }
}

impl std::ops::Deref for Codec {
    type Target = ffmpeg_next::codec::decoder::Opened;

    fn deref(&self) -> &Self::Target {
        match self {
            Codec::Video(d) => d,
            Codec::Audio(d) => d,
        }
    }
}

/// Decoder for one audio or video stream. Packets are rescaled from their
/// stream time base to the decoder's on the way in.
pub struct Decoder {
    stream: AvStream,
    codec: Codec,
    time_base: Rational,
}

impl Decoder {
    pub fn new(stream: &AvStream) -> anyhow::Result<Self> {
        let mut ctx = ffmpeg_next::codec::Context::new();
        unsafe {
            (*ctx.as_mut_ptr()).time_base = stream.time_base().into();
        }
        ctx.set_parameters(stream.parameters().clone())?;

        let codec = if stream.is_video() {
            let video = ctx.decoder().video()?;
            if video.format() == ffmpeg_next::format::Pixel::None
                || video.width() == 0
                || video.height() == 0
            {
                anyhow::bail!("stream {}: missing video codec parameters", stream.index());
            }
            Codec::Video(video)
        } else if stream.is_audio() {
            Codec::Audio(ctx.decoder().audio()?)
        } else {
            anyhow::bail!("stream {}: neither audio nor video", stream.index());
        };
        let time_base = codec.time_base();

        Ok(Self {
            stream: stream.clone(),
            codec,
            time_base,
        })
    }

    pub fn send_packet(&mut self, mut packet: RawPacket) -> anyhow::Result<()> {
        let from = packet.time_base();
        let inner = packet.get_mut();
        inner.rescale_ts(from, self.time_base);
        self.codec.send_packet(inner)?;
        Ok(())
    }

    pub fn send_eof(&mut self) -> anyhow::Result<()> {
        self.codec.send_eof()?;
        Ok(())
    }

    /// `Ok(None)` when the decoder needs more input or is drained.
    pub fn receive_frame(&mut self) -> anyhow::Result<Option<RawFrame>> {
        let frame = match &mut self.codec {
            Codec::Video(video) => {
                let mut frame = ffmpeg_next::frame::Video::empty();
                crate::frame_ready(video.receive_frame(&mut frame))?
                    .then(|| RawFrame::Video(RawVideoFrame::from(frame)))
            }
            Codec::Audio(audio) => {
                let mut frame = ffmpeg_next::frame::Audio::empty();
                crate::frame_ready(audio.receive_frame(&mut frame))?
                    .then(|| RawFrame::Audio(RawAudioFrame::from(frame)))
            }
        };
        Ok(frame)
    }

    pub fn stream(&self) -> &AvStream {
        &self.stream
    }

    /// Time base of the frames this decoder produces.
    pub fn time_base(&self) -> Rational {
        self.time_base
    }
}

/// Pull-based decoding of one track: each call returns the next decoded frame,
/// feeding the decoder from its packet source as needed.
pub struct DecodedTrack<P> {
    source: P,
    decoder: Decoder,
    eof_sent: bool,
    finished: bool,
}

impl<P: PacketSource> DecodedTrack<P> {
    pub fn new(source: P, decoder: Decoder) -> Self {
        Self {
            source,
            decoder,
            eof_sent: false,
            finished: false,
        }
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// `Ok(None)` once the source is exhausted and the decoder fully drained.
    pub fn next_frame(&mut self) -> anyhow::Result<Option<RawFrame>> {
        while !self.finished {
            if let Some(frame) = self.decoder.receive_frame()? {
                return Ok(Some(frame));
            }
            if self.eof_sent {
                self.finished = true;
                break;
            }
            match self.source.next_packet()? {
                // a corrupt packet costs one frame, not the track
                Some(packet) => {
                    if let Err(e) = self.decoder.send_packet(packet) {
                        log::warn!("stream {}: dropped packet: {}", self.decoder.stream().index(), e);
                    }
                }
                None => {
                    self.decoder.send_eof()?;
                    self.eof_sent = true;
                }
            }
        }
        Ok(None)
    }
}
