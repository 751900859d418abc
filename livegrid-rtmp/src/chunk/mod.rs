//! Chunked transport framing
//!
//! Messages travel as interleaved chunks, one logical series per chunk
//! stream id. Steady-state traffic compresses headers down to the 1-byte
//! format 3 by inheriting fields from the previous chunk on the same id.

pub mod errors;
pub mod packetizer;
pub mod unpacketizer;

pub use packetizer::ChunkPacketizer;
pub use unpacketizer::ChunkUnpacketizer;

use bytes::BytesMut;

/// Chunk size both sides assume until a `set_chunk_size` arrives.
pub const INIT_CHUNK_SIZE: usize = 128;

/// Hard ceiling on an assembled message; anything larger is fatal.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Timestamp field value signalling a 32-bit extended timestamp.
pub const EXTENDED_TIMESTAMP_SENTINEL: u32 = 0xFF_FFFF;

/// Chunk stream id reserved for protocol control messages.
pub const CONTROL_CSID: u32 = 2;

/// Chunk stream id used for command messages.
pub const COMMAND_CSID: u32 = 3;

/// Chunk stream id this server uses for outbound audio/video.
pub const MEDIA_CSID: u32 = 6;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ChunkBasicHeader {
    pub format: u8,
    pub chunk_stream_id: u32,
}

/// Which form of extended timestamp the last full header announced.
///
/// Format 3 chunks inherit this: they carry the same 4 extra bytes as the
/// most recent format 0/1/2 chunk on the stream did.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum ExtendedTimestampType {
    #[default]
    None,
    /// Extended field holds an absolute timestamp (after a format 0).
    Absolute,
    /// Extended field holds a timestamp delta (after a format 1 or 2).
    Delta,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ChunkMessageHeader {
    /// Absolute timestamp after delta folding.
    pub timestamp: u32,
    pub timestamp_delta: u32,
    pub msg_length: u32,
    pub msg_type_id: u8,
    pub msg_stream_id: u32,
    pub extended_timestamp_type: ExtendedTimestampType,
}

/// One fully reassembled message.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ChunkInfo {
    pub basic_header: ChunkBasicHeader,
    pub message_header: ChunkMessageHeader,
    pub payload: BytesMut,
}

impl ChunkInfo {
    #[must_use]
    pub fn new(
        chunk_stream_id: u32,
        format: u8,
        timestamp: u32,
        msg_length: u32,
        msg_type_id: u8,
        msg_stream_id: u32,
        payload: BytesMut,
    ) -> Self {
        Self {
            basic_header: ChunkBasicHeader {
                format,
                chunk_stream_id,
            },
            message_header: ChunkMessageHeader {
                timestamp,
                timestamp_delta: 0,
                msg_length,
                msg_type_id,
                msg_stream_id,
                extended_timestamp_type: ExtendedTimestampType::default(),
            },
            payload,
        }
    }
}
