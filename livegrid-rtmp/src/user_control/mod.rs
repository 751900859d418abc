//! User control events (message type 4)
//!
//! Stream lifecycle signals the server sends to players. Each event is a
//! 16-bit type followed by its payload; all of the ones used here carry a
//! single 32-bit stream id.

use byteorder::BigEndian;
use bytes::BytesMut;

use crate::bytesio::errors::BytesReadError;
use crate::bytesio::{BytesReader, BytesWriter};
use crate::chunk::{ChunkInfo, CONTROL_CSID};
use crate::messages::msg_type_id;

pub mod event_type {
    pub const STREAM_BEGIN: u16 = 0;
    pub const STREAM_EOF: u16 = 1;
    pub const STREAM_DRY: u16 = 2;
    pub const SET_BUFFER_LENGTH: u16 = 3;
    pub const STREAM_IS_RECORDED: u16 = 4;
    pub const PING_REQUEST: u16 = 6;
    pub const PING_RESPONSE: u16 = 7;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct UserControlEvent {
    pub event: u16,
    pub stream_id: u32,
}

impl UserControlEvent {
    #[must_use]
    pub const fn stream_begin(stream_id: u32) -> Self {
        Self {
            event: event_type::STREAM_BEGIN,
            stream_id,
        }
    }

    #[must_use]
    pub const fn stream_eof(stream_id: u32) -> Self {
        Self {
            event: event_type::STREAM_EOF,
            stream_id,
        }
    }

    #[must_use]
    pub fn to_message(self) -> ChunkInfo {
        let mut writer = BytesWriter::new();
        writer.write_u16::<BigEndian>(self.event);
        writer.write_u32::<BigEndian>(self.stream_id);
        let payload = writer.extract_current_bytes();
        let length = payload.len() as u32;
        ChunkInfo::new(
            CONTROL_CSID,
            0,
            0,
            length,
            msg_type_id::USER_CONTROL_EVENT,
            0,
            payload,
        )
    }

    pub fn parse(payload: &BytesMut) -> Result<Self, BytesReadError> {
        let mut reader = BytesReader::new(payload.clone());
        Ok(Self {
            event: reader.read_u16::<BigEndian>()?,
            stream_id: reader.read_u32::<BigEndian>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_begin_round_trip() {
        let message = UserControlEvent::stream_begin(1).to_message();
        assert_eq!(message.basic_header.chunk_stream_id, CONTROL_CSID);
        assert_eq!(
            message.message_header.msg_type_id,
            msg_type_id::USER_CONTROL_EVENT
        );

        let parsed = UserControlEvent::parse(&message.payload).unwrap();
        assert_eq!(parsed.event, event_type::STREAM_BEGIN);
        assert_eq!(parsed.stream_id, 1);
    }

    #[test]
    fn test_stream_eof_round_trip() {
        let message = UserControlEvent::stream_eof(7).to_message();
        let parsed = UserControlEvent::parse(&message.payload).unwrap();
        assert_eq!(parsed, UserControlEvent::stream_eof(7));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let payload = BytesMut::from(&[0u8, 0, 0][..]);
        assert!(UserControlEvent::parse(&payload).is_err());
    }
}
