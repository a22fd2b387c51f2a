#![allow(dead_code)]

/// Registers FFmpeg components. Call once at startup before opening inputs.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod decoder;
pub mod encoder;
pub mod fifo;
pub mod frame;
pub mod input;
pub mod output;
pub mod packet;
pub mod resampler;
pub mod scaler;
pub mod stream;

pub use ffmpeg_next;

/// Maps a codec send/receive result to "did it produce something".
/// EAGAIN and EOF are the normal "nothing right now" answers.
pub(crate) fn frame_ready(result: Result<(), ffmpeg_next::Error>) -> anyhow::Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(ffmpeg_next::Error::Eof) => Ok(false),
        Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
