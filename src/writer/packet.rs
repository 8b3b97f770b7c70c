//! Access units as supplied by the caller, and the packets built from them

use crate::stream::StreamKind;
use ffmpeg_next as ffmpeg;
use std::ops::BitOr;

/// Per-unit flags, bit-compatible with the `flags` word of the host API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(u32);

impl PacketFlags {
    pub const NONE: PacketFlags = PacketFlags(0);
    /// Independently decodable unit; segment boundaries fall on these
    pub const KEY_FRAME: PacketFlags = PacketFlags(1);
    /// Parameter sets or decoder config rather than media
    pub const CODEC_CONFIG: PacketFlags = PacketFlags(2);
    /// Last unit of the stream
    pub const END_OF_STREAM: PacketFlags = PacketFlags(4);

    pub fn from_bits(bits: u32) -> Self {
        PacketFlags(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: PacketFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_key_frame(&self) -> bool {
        self.contains(Self::KEY_FRAME)
    }

    pub fn is_codec_config(&self) -> bool {
        self.contains(Self::CODEC_CONFIG)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.contains(Self::END_OF_STREAM)
    }
}

impl BitOr for PacketFlags {
    type Output = PacketFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        PacketFlags(self.0 | rhs.0)
    }
}

/// One compressed access unit handed over by the encoder.
///
/// `data` is only borrowed for the duration of the write call.
#[derive(Debug, Clone, Copy)]
pub struct EncodedAccessUnit<'a> {
    pub kind: StreamKind,
    pub data: &'a [u8],
    pub flags: PacketFlags,
    /// Presentation time in microseconds
    pub pts_micros: i64,
}

/// A packet ready for the container, in its stream's time base.
#[derive(Debug, Clone, Copy)]
pub struct ContainerPacket<'a> {
    pub stream_index: usize,
    pub pts: i64,
    pub dts: i64,
    pub time_base: ffmpeg::Rational,
    pub key: bool,
    pub data: &'a [u8],
}
