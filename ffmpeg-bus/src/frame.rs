use std::time::Duration;

use ffmpeg_next::Rational;

use crate::stream::ts_to_duration;

/// A decoded frame travelling between a reader output and a writer input.
pub enum RawFrame {
    Video(RawVideoFrame),
    Audio(RawAudioFrame),
}

impl RawFrame {
    pub fn is_video(&self) -> bool {
        matches!(self, RawFrame::Video(_))
    }
}

/// Decoded or synthesized audio. Encoders expect planar `f32`.
pub struct RawAudioFrame {
    frame: ffmpeg_next::frame::Audio,
}

impl RawAudioFrame {
    pub fn as_audio(&self) -> &ffmpeg_next::frame::Audio {
        &self.frame
    }
}

impl From<ffmpeg_next::frame::Audio> for RawAudioFrame {
    fn from(frame: ffmpeg_next::frame::Audio) -> Self {
        Self { frame }
    }
}

pub struct RawVideoFrame {
    frame: ffmpeg_next::frame::Video,
}

impl From<ffmpeg_next::frame::Video> for RawVideoFrame {
    fn from(frame: ffmpeg_next::frame::Video) -> Self {
        Self { frame }
    }
}

impl RawVideoFrame {
    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    pub fn format(&self) -> ffmpeg_next::format::Pixel {
        self.frame.format()
    }

    /// Presentation time of the frame, preferring the decoder's best-effort timestamp.
    pub fn presentation_time(&self, time_base: Rational) -> Option<Duration> {
        self.frame
            .timestamp()
            .or(self.frame.pts())
            .map(|ts| ts_to_duration(ts, time_base))
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::frame::Video {
        &mut self.frame
    }

    /// Copies plane 0 of an RGBA frame into a tightly packed buffer (stride removed).
    pub fn to_packed_rgba(&self) -> anyhow::Result<Vec<u8>> {
        if self.frame.format() != ffmpeg_next::format::Pixel::RGBA {
            anyhow::bail!("expected rgba frame, got {:?}", self.frame.format());
        }
        let width = self.frame.width() as usize;
        let height = self.frame.height() as usize;
        let row = width * 4;
        let stride = self.frame.stride(0);
        let src = self.frame.data(0);
        let mut out = Vec::with_capacity(row * height);
        for y in 0..height {
            out.extend_from_slice(&src[y * stride..y * stride + row]);
        }
        Ok(out)
    }

    /// Builds an RGBA frame from a tightly packed buffer.
    pub fn from_packed_rgba(data: &[u8], width: u32, height: u32) -> anyhow::Result<Self> {
        let row = width as usize * 4;
        if data.len() != row * height as usize {
            anyhow::bail!(
                "invalid rgba buffer: got {} bytes, expected {} ({}x{}x4)",
                data.len(),
                row * height as usize,
                width,
                height
            );
        }
        let mut frame =
            ffmpeg_next::frame::Video::new(ffmpeg_next::format::Pixel::RGBA, width, height);
        let stride = frame.stride(0);
        let dst = frame.data_mut(0);
        for y in 0..height as usize {
            dst[y * stride..y * stride + row].copy_from_slice(&data[y * row..(y + 1) * row]);
        }
        Ok(Self { frame })
    }
}
