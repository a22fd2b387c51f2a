use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use ffmpeg_next::Rational;
use tokio_util::sync::CancellationToken;

pub type RawPacketSender = std::sync::mpsc::SyncSender<RawPacketCmd>;
pub type RawPacketReceiver = std::sync::mpsc::Receiver<RawPacketCmd>;

pub enum RawPacketCmd {
    Data(RawPacket),
    EOF,
}

/// A compressed packet tagged with the time base its timestamps are in.
pub struct RawPacket {
    packet: ffmpeg_next::codec::packet::Packet,
    time_base: Rational,
}

impl RawPacket {
    /// Index of the input stream the packet was read from.
    pub fn index(&self) -> usize {
        self.packet.stream()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::codec::packet::Packet {
        &mut self.packet
    }
}

impl From<(ffmpeg_next::codec::packet::Packet, Rational)> for RawPacket {
    fn from((packet, time_base): (ffmpeg_next::codec::packet::Packet, Rational)) -> Self {
        Self { packet, time_base }
    }
}

/// Anything a decoder can pull compressed packets from.
/// `Ok(None)` means the source is exhausted.
pub trait PacketSource: Send {
    fn next_packet(&mut self) -> anyhow::Result<Option<RawPacket>>;
}

const POLL: Duration = Duration::from_millis(1);

/// Packets routed to one track by an [`crate::input::AvInputTask`].
pub struct ChannelPacketSource {
    rx: RawPacketReceiver,
    cancel: CancellationToken,
}

impl ChannelPacketSource {
    pub fn new(rx: RawPacketReceiver, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }
}

impl PacketSource for ChannelPacketSource {
    fn next_packet(&mut self) -> anyhow::Result<Option<RawPacket>> {
        loop {
            if self.cancel.is_cancelled() {
                anyhow::bail!("packet source cancelled");
            }
            match self.rx.recv_timeout(POLL) {
                Ok(RawPacketCmd::Data(packet)) => return Ok(Some(packet)),
                // a vanished demuxer ends the track like an explicit EOF
                Ok(RawPacketCmd::EOF) | Err(RecvTimeoutError::Disconnected) => return Ok(None),
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }
}
