use std::path::Path;

use ffmpeg_next::Dictionary;

use crate::{
    encoder::{Encoder, EncoderType},
    packet::RawPacket,
};

pub struct AvOutput {
    inner: ffmpeg_next::format::context::Output,
    have_written_header: bool,
    have_written_trailer: bool,
}

unsafe impl Send for AvOutput {}

impl AvOutput {
    /// Opens `path` for writing. `format` forces the muxer (e.g. "mov"),
    /// otherwise it is guessed from the extension.
    pub fn new(path: &Path, format: Option<&str>) -> anyhow::Result<Self> {
        let output = match format {
            Some(format) => ffmpeg_next::format::output_as(&path, format),
            None => ffmpeg_next::format::output(&path),
        }
        .map_err(|e| anyhow::anyhow!("open output {}: {}", path.display(), e))?;
        Ok(Self {
            inner: output,
            have_written_header: false,
            have_written_trailer: false,
        })
    }

    /// Encoders must set the global header flag when the muxer asks for it.
    pub fn needs_global_header(&self) -> bool {
        self.inner
            .format()
            .flags()
            .contains(ffmpeg_next::format::flag::Flags::GLOBAL_HEADER)
    }

    /// Adds a stream carrying `encoder`'s output; returns the output stream index.
    pub fn add_encoder_stream(&mut self, encoder: &Encoder) -> anyhow::Result<usize> {
        let (codec, parameters) = match encoder.kind() {
            EncoderType::Video(e) => (e.codec(), ffmpeg_next::codec::Parameters::from(e)),
            EncoderType::Audio(e) => (e.codec(), ffmpeg_next::codec::Parameters::from(e)),
        };
        let mut stream = self.inner.add_stream(codec)?;
        stream.set_parameters(parameters);
        stream.set_time_base(encoder.time_base());
        let index = stream.index();
        Ok(index)
    }

    pub fn write_header(&mut self) -> anyhow::Result<()> {
        if self.have_written_header {
            return Ok(());
        }
        let mut opts = Dictionary::new();
        opts.set("movflags", "+faststart");
        self.inner.write_header_with(opts)?;
        self.have_written_header = true;
        Ok(())
    }

    pub fn write_packet(&mut self, stream_index: usize, mut packet: RawPacket) -> anyhow::Result<()> {
        if !self.have_written_header {
            self.write_header()?;
        }
        let time_base = packet.time_base();
        let out_time_base = self
            .inner
            .stream(stream_index)
            .ok_or(anyhow::anyhow!("stream {} not found", stream_index))?
            .time_base();

        let p = packet.get_mut();
        p.set_stream(stream_index);
        p.set_position(-1);
        p.rescale_ts(time_base, out_time_base);
        p.write_interleaved(&mut self.inner)?;
        Ok(())
    }

    /// Writes every packet the encoder has ready.
    pub fn write_encoded(&mut self, stream_index: usize, encoder: &mut Encoder) -> anyhow::Result<usize> {
        let mut written = 0;
        while let Some(packet) = encoder.receive_packet()? {
            self.write_packet(stream_index, packet)?;
            written += 1;
        }
        Ok(written)
    }

    pub fn finish(&mut self) -> anyhow::Result<()> {
        if self.have_written_header && !self.have_written_trailer {
            self.have_written_trailer = true;
            self.inner.write_trailer()?;
        }
        Ok(())
    }
}
