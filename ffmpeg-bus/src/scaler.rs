use ffmpeg_next::{format::Pixel, software::scaling};

/// Pixel-format / size conversion for video frames.
pub struct Scaler {
    context: scaling::Context,
    dst_format: Pixel,
    dst_width: u32,
    dst_height: u32,
}

impl Scaler {
    pub fn new(
        src: &ffmpeg_next::frame::Video,
        dst_format: Pixel,
        dst_width: u32,
        dst_height: u32,
    ) -> anyhow::Result<Self> {
        let context = scaling::Context::get(
            src.format(),
            src.width(),
            src.height(),
            dst_format,
            dst_width,
            dst_height,
            scaling::Flags::BILINEAR,
        )?;
        Ok(Self {
            context,
            dst_format,
            dst_width,
            dst_height,
        })
    }

    /// True when frames shaped like `src` can go through this scaler.
    pub fn accepts(&self, src: &ffmpeg_next::frame::Video) -> bool {
        let input = self.context.input();
        input.format == src.format() && input.width == src.width() && input.height == src.height()
    }

    pub fn output(&self) -> (Pixel, u32, u32) {
        (self.dst_format, self.dst_width, self.dst_height)
    }

    /// Converts `frame`, carrying its pts over.
    pub fn run(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
    ) -> anyhow::Result<ffmpeg_next::frame::Video> {
        let mut dst = ffmpeg_next::frame::Video::empty();
        self.context.run(frame, &mut dst)?;
        dst.set_pts(frame.pts());
        Ok(dst)
    }
}

unsafe impl Send for Scaler {}
