//! Protocol control messages
//!
//! `set_chunk_size`, `window_ack_size` and `set_peer_bandwidth` payloads.
//! All three travel on chunk stream 2 with message stream id 0.

use byteorder::BigEndian;
use bytes::BytesMut;

use crate::bytesio::errors::BytesReadError;
use crate::bytesio::{BytesReader, BytesWriter};
use crate::chunk::{ChunkInfo, CONTROL_CSID};
use crate::messages::msg_type_id;

/// The chunk size field's top bit is reserved; anything above is masked.
pub const MAX_CHUNK_SIZE: u32 = 0x7FFF_FFFF;

pub mod peer_bandwidth_limit {
    pub const HARD: u8 = 0;
    pub const SOFT: u8 = 1;
    pub const DYNAMIC: u8 = 2;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SetChunkSize {
    pub chunk_size: u32,
}

impl SetChunkSize {
    #[must_use]
    pub fn to_message(self) -> ChunkInfo {
        let mut writer = BytesWriter::new();
        writer.write_u32::<BigEndian>(self.chunk_size & MAX_CHUNK_SIZE);
        control_message(msg_type_id::SET_CHUNK_SIZE, writer.extract_current_bytes())
    }

    pub fn parse(payload: &BytesMut) -> Result<Self, BytesReadError> {
        let mut reader = BytesReader::new(payload.clone());
        Ok(Self {
            chunk_size: reader.read_u32::<BigEndian>()? & MAX_CHUNK_SIZE,
        })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct WindowAckSize {
    pub ack_window_size: u32,
}

impl WindowAckSize {
    #[must_use]
    pub fn to_message(self) -> ChunkInfo {
        let mut writer = BytesWriter::new();
        writer.write_u32::<BigEndian>(self.ack_window_size);
        control_message(
            msg_type_id::WIN_ACKNOWLEDGEMENT_SIZE,
            writer.extract_current_bytes(),
        )
    }

    pub fn parse(payload: &BytesMut) -> Result<Self, BytesReadError> {
        let mut reader = BytesReader::new(payload.clone());
        Ok(Self {
            ack_window_size: reader.read_u32::<BigEndian>()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SetPeerBandwidth {
    pub window_size: u32,
    pub limit_type: u8,
}

impl SetPeerBandwidth {
    #[must_use]
    pub fn to_message(self) -> ChunkInfo {
        let mut writer = BytesWriter::new();
        writer.write_u32::<BigEndian>(self.window_size);
        writer.write_u8(self.limit_type);
        control_message(
            msg_type_id::SET_PEER_BANDWIDTH,
            writer.extract_current_bytes(),
        )
    }

    pub fn parse(payload: &BytesMut) -> Result<Self, BytesReadError> {
        let mut reader = BytesReader::new(payload.clone());
        Ok(Self {
            window_size: reader.read_u32::<BigEndian>()?,
            limit_type: reader.read_u8()?,
        })
    }
}

fn control_message(type_id: u8, payload: BytesMut) -> ChunkInfo {
    let length = payload.len() as u32;
    ChunkInfo::new(CONTROL_CSID, 0, 0, length, type_id, 0, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_chunk_size_round_trip() {
        let message = SetChunkSize { chunk_size: 4096 }.to_message();
        assert_eq!(message.basic_header.chunk_stream_id, CONTROL_CSID);
        assert_eq!(message.message_header.msg_type_id, msg_type_id::SET_CHUNK_SIZE);
        assert_eq!(
            SetChunkSize::parse(&message.payload).unwrap().chunk_size,
            4096
        );
    }

    #[test]
    fn test_window_ack_size_round_trip() {
        let message = WindowAckSize {
            ack_window_size: 2_500_000,
        }
        .to_message();
        assert_eq!(
            WindowAckSize::parse(&message.payload).unwrap().ack_window_size,
            2_500_000
        );
    }

    #[test]
    fn test_set_peer_bandwidth_round_trip() {
        let message = SetPeerBandwidth {
            window_size: 2_500_000,
            limit_type: peer_bandwidth_limit::DYNAMIC,
        }
        .to_message();
        let parsed = SetPeerBandwidth::parse(&message.payload).unwrap();
        assert_eq!(parsed.window_size, 2_500_000);
        assert_eq!(parsed.limit_type, peer_bandwidth_limit::DYNAMIC);
    }
}
