use bytes::Bytes;
use ffmpeg_next::Rational;

/// One demuxed access unit plus the time base its timestamps are expressed in.
#[derive(Clone)]
pub struct RawPacket {
    packet: ffmpeg_next::codec::packet::Packet,
    time_base: Rational,
}

impl RawPacket {
    pub fn pts(&self) -> Option<i64> {
        self.packet.pts()
    }

    pub fn size(&self) -> usize {
        self.packet.size()
    }

    pub fn index(&self) -> usize {
        self.packet.stream()
    }

    pub fn data(&self) -> Bytes {
        self.packet
            .data()
            .map(Bytes::copy_from_slice)
            .unwrap_or_default()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn packet(&self) -> &ffmpeg_next::codec::packet::Packet {
        &self.packet
    }
}

impl From<(ffmpeg_next::codec::packet::Packet, Rational)> for RawPacket {
    fn from((packet, time_base): (ffmpeg_next::codec::packet::Packet, Rational)) -> Self {
        Self { packet, time_base }
    }
}
