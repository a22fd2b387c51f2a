use ffmpeg_next::{ChannelLayout, format::Sample, software::resampling};

/// Sample-format / rate / layout conversion for audio frames.
pub struct Resampler {
    context: resampling::Context,
    format: Sample,
    layout: ChannelLayout,
    rate: u32,
}

impl Resampler {
    /// Builds a resampler from the shape of the first decoded frame.
    pub fn for_frame(
        src: &ffmpeg_next::frame::Audio,
        format: Sample,
        layout: ChannelLayout,
        rate: u32,
    ) -> anyhow::Result<Self> {
        let src_layout = if src.channel_layout().is_empty() {
            ChannelLayout::default(src.channels() as i32)
        } else {
            src.channel_layout()
        };
        let context =
            resampling::Context::get(src.format(), src_layout, src.rate(), format, layout, rate)?;
        Ok(Self {
            context,
            format,
            layout,
            rate,
        })
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Converts one frame. The output buffer is sized for the rate ratio plus
    /// headroom so nothing is left behind inside the resampler.
    pub fn run(
        &mut self,
        frame: &ffmpeg_next::frame::Audio,
    ) -> anyhow::Result<ffmpeg_next::frame::Audio> {
        let src_rate = frame.rate().max(1) as u64;
        let capacity = (frame.samples() as u64 * self.rate as u64 / src_rate) as usize + 256;
        let mut out = ffmpeg_next::frame::Audio::new(self.format, capacity, self.layout);
        out.set_rate(self.rate);
        self.context.run(frame, &mut out)?;
        Ok(out)
    }

    /// Drains samples still buffered in the resampler.
    pub fn flush(&mut self) -> anyhow::Result<Option<ffmpeg_next::frame::Audio>> {
        let mut out = ffmpeg_next::frame::Audio::new(self.format, 4096, self.layout);
        out.set_rate(self.rate);
        self.context.flush(&mut out)?;
        if out.samples() == 0 {
            return Ok(None);
        }
        Ok(Some(out))
    }
}

unsafe impl Send for Resampler {}
