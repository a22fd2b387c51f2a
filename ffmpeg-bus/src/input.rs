use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{
    packet::{PacketSource, RawPacket, RawPacketCmd, RawPacketSender},
    stream::AvStream,
};

/// Demux loop that routes each stream's packets to its own bounded channel.
///
/// A full channel blocks the loop (backpressure); the loop never buffers beyond
/// the channel capacity. Packets of streams without a route are dropped.
pub struct AvInputTask {
    cancel: CancellationToken,
}

impl AvInputTask {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn start(&self, mut input: AvInput, routes: HashMap<usize, RawPacketSender>) {
        let cancel = self.cancel.clone();
        tokio::task::spawn_blocking(move || {
            let mut routed: u64 = 0;
            loop {
                if cancel.is_cancelled() {
                    log::debug!("demux cancelled after {} packets", routed);
                    return;
                }
                let Some(packet) = input.read_packet() else {
                    break;
                };
                let Some(route) = routes.get(&packet.index()) else {
                    continue;
                };
                if !Self::send_with_backpressure(route, RawPacketCmd::Data(packet), &cancel) {
                    continue;
                }
                routed += 1;
            }
            log::debug!("end of demux, {} packets routed", routed);
            for route in routes.values() {
                Self::send_with_backpressure(route, RawPacketCmd::EOF, &cancel);
            }
        });
    }

    fn send_with_backpressure(
        route: &RawPacketSender,
        mut cmd: RawPacketCmd,
        cancel: &CancellationToken,
    ) -> bool {
        loop {
            match route.try_send(cmd) {
                Ok(()) => return true,
                Err(std::sync::mpsc::TrySendError::Full(back)) => {
                    if cancel.is_cancelled() {
                        return false;
                    }
                    cmd = back;
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(std::sync::mpsc::TrySendError::Disconnected(_)) => return false,
            }
        }
    }

    /// Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

pub struct AvInput {
    inner: ffmpeg_next::format::context::Input,
    streams: HashMap<usize, AvStream>,
}

impl AvInput {
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let input = ffmpeg_next::format::input(&path)
            .map_err(|e| anyhow::anyhow!("open input {}: {}", path.display(), e))?;

        let mut streams = HashMap::new();
        for stream in input.streams() {
            streams.insert(stream.index(), AvStream::from(stream));
        }

        Ok(Self {
            inner: input,
            streams,
        })
    }

    pub fn streams(&self) -> &HashMap<usize, AvStream> {
        &self.streams
    }

    pub fn best_video(&self) -> Option<AvStream> {
        self.best(ffmpeg_next::media::Type::Video)
    }

    pub fn best_audio(&self) -> Option<AvStream> {
        self.best(ffmpeg_next::media::Type::Audio)
    }

    fn best(&self, kind: ffmpeg_next::media::Type) -> Option<AvStream> {
        let index = self.inner.streams().best(kind)?.index();
        self.streams.get(&index).cloned()
    }

    /// Container duration, if known.
    pub fn duration(&self) -> Option<Duration> {
        let d = self.inner.duration();
        if d == ffmpeg_next::ffi::AV_NOPTS_VALUE as i64 || d <= 0 {
            None
        } else {
            Some(Duration::from_micros(d as u64))
        }
    }

    /// Seeks to the nearest keyframe at or before `position`.
    pub fn seek(&mut self, position: Duration) -> anyhow::Result<()> {
        let ts = position.as_micros().min(i64::MAX as u128) as i64;
        self.inner.seek(ts, ..ts)?;
        Ok(())
    }

    pub fn read_packet(&mut self) -> Option<RawPacket> {
        self.inner
            .packets()
            .next()
            .map(|(stream, packet)| (packet, stream.time_base()).into())
    }
}

/// Reads one stream of a file directly, skipping the other streams' packets.
pub struct StreamPacketSource {
    input: AvInput,
    stream_index: usize,
}

impl StreamPacketSource {
    pub fn new(input: AvInput, stream_index: usize) -> Self {
        Self {
            input,
            stream_index,
        }
    }
}

impl PacketSource for StreamPacketSource {
    fn next_packet(&mut self) -> anyhow::Result<Option<RawPacket>> {
        while let Some(packet) = self.input.read_packet() {
            if packet.index() == self.stream_index {
                return Ok(Some(packet));
            }
        }
        Ok(None)
    }
}
