use std::collections::VecDeque;

use ffmpeg_next::{ChannelLayout, format::Sample, format::sample::Type};

/// Re-chunks planar `f32` audio into frames of the size an encoder expects
/// (AAC wants exactly `frame_size` samples per frame except the last).
pub struct SampleFifo {
    planes: Vec<VecDeque<f32>>,
    layout: ChannelLayout,
    rate: u32,
}

impl SampleFifo {
    pub const FORMAT: Sample = Sample::F32(Type::Planar);

    pub fn new(layout: ChannelLayout, rate: u32) -> Self {
        let channels = layout.channels().max(1) as usize;
        Self {
            planes: (0..channels).map(|_| VecDeque::new()).collect(),
            layout,
            rate,
        }
    }

    /// Samples per channel currently buffered.
    pub fn len(&self) -> usize {
        self.planes.first().map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, frame: &ffmpeg_next::frame::Audio) -> anyhow::Result<()> {
        if frame.format() != Self::FORMAT {
            anyhow::bail!("fifo expects planar f32, got {:?}", frame.format());
        }
        if frame.planes() < self.planes.len() {
            anyhow::bail!(
                "fifo expects {} planes, got {}",
                self.planes.len(),
                frame.planes()
            );
        }
        let samples = frame.samples();
        for (ch, plane) in self.planes.iter_mut().enumerate() {
            plane.extend(frame.plane::<f32>(ch).iter().take(samples));
        }
        Ok(())
    }

    /// Pops up to `count` samples per channel as one frame; `None` when empty.
    pub fn pop(&mut self, count: usize) -> Option<ffmpeg_next::frame::Audio> {
        let take = count.min(self.len());
        if take == 0 {
            return None;
        }
        let mut frame = ffmpeg_next::frame::Audio::new(Self::FORMAT, take, self.layout);
        frame.set_rate(self.rate);
        for (ch, plane) in self.planes.iter_mut().enumerate() {
            for (dst, src) in frame.plane_mut::<f32>(ch).iter_mut().zip(plane.drain(..take)) {
                *dst = src;
            }
        }
        Some(frame)
    }
}
