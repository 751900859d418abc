//! Incremental chunk decoder
//!
//! Bytes are appended as they arrive off the socket; [`ChunkUnpacketizer::read_message`]
//! hands back one reassembled message at a time. A parse attempt either
//! consumes a whole chunk or nothing, so a short read simply means "wait for
//! more bytes". Per-stream header state lives in a map keyed by chunk
//! stream id, which is what makes the compressed format 1/2/3 headers
//! decodable.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use bytes::{Buf, BytesMut};
use std::collections::HashMap;
use tracing::trace;

use super::errors::UnpackError;
use super::{
    ChunkBasicHeader, ChunkInfo, ChunkMessageHeader, ExtendedTimestampType,
    EXTENDED_TIMESTAMP_SENTINEL, INIT_CHUNK_SIZE, MAX_MESSAGE_SIZE,
};
use crate::messages::msg_type_id;

/// Reassembly state for one chunk stream id.
#[derive(Default)]
struct ChunkStreamState {
    header: ChunkMessageHeader,
    payload: BytesMut,
}

/// Signals an incomplete chunk; the caller retries after more bytes arrive.
struct Incomplete;

/// Non-consuming cursor over the receive buffer.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], Incomplete> {
        if self.data.len() - self.pos < count {
            return Err(Incomplete);
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, Incomplete> {
        Ok(self.take(1)?[0])
    }

    fn read_u24_be(&mut self) -> Result<u32, Incomplete> {
        Ok(BigEndian::read_u24(self.take(3)?))
    }

    fn read_u32_be(&mut self) -> Result<u32, Incomplete> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    fn read_u32_le(&mut self) -> Result<u32, Incomplete> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }
}

struct ParsedChunk {
    chunk_stream_id: u32,
    format: u8,
    header: ChunkMessageHeader,
    header_len: usize,
    piece_len: usize,
}

pub struct ChunkUnpacketizer {
    buffer: BytesMut,
    streams: HashMap<u32, ChunkStreamState>,
    chunk_size: usize,
    max_message_size: usize,
}

impl Default for ChunkUnpacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkUnpacketizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            streams: HashMap::new(),
            chunk_size: INIT_CHUNK_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    pub fn extend_data(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn update_chunk_size(&mut self, chunk_size: usize) {
        trace!(chunk_size, "reader chunk size updated");
        self.chunk_size = chunk_size;
    }

    /// Drop all per-stream state, e.g. when the connection closes.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.streams.clear();
    }

    /// Pull the next complete message out of the buffered bytes.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A received
    /// `set_chunk_size` takes effect before the following chunk is parsed.
    pub fn read_message(&mut self) -> Result<Option<ChunkInfo>, UnpackError> {
        loop {
            let Some(parsed) = self.try_parse_chunk()? else {
                return Ok(None);
            };

            // Commit: the chunk is fully buffered.
            self.buffer.advance(parsed.header_len);
            let piece = self.buffer.split_to(parsed.piece_len);

            let state = self.streams.entry(parsed.chunk_stream_id).or_default();
            state.header = parsed.header;
            state.payload.extend_from_slice(&piece);

            if state.payload.len() < state.header.msg_length as usize {
                continue;
            }

            let message = ChunkInfo {
                basic_header: ChunkBasicHeader {
                    format: parsed.format,
                    chunk_stream_id: parsed.chunk_stream_id,
                },
                message_header: state.header.clone(),
                payload: std::mem::take(&mut state.payload),
            };

            if message.message_header.msg_type_id == msg_type_id::SET_CHUNK_SIZE {
                self.apply_chunk_size(&message)?;
            }

            return Ok(Some(message));
        }
    }

    fn apply_chunk_size(&mut self, message: &ChunkInfo) -> Result<(), UnpackError> {
        if message.payload.len() < 4 {
            return Err(UnpackError::InvalidChunkSize(0));
        }
        // Top bit is reserved and must be zero.
        let declared = BigEndian::read_u32(&message.payload) & 0x7FFF_FFFF;
        if declared == 0 {
            return Err(UnpackError::InvalidChunkSize(declared));
        }
        self.update_chunk_size(declared as usize);
        Ok(())
    }

    fn try_parse_chunk(&self) -> Result<Option<ParsedChunk>, UnpackError> {
        let mut cursor = Cursor::new(&self.buffer);

        let Ok(lead) = cursor.read_u8() else {
            return Ok(None);
        };
        let format = lead >> 6;
        let parsed = match u32::from(lead & 0b0011_1111) {
            0 => cursor.read_u8().map(|b| 64 + u32::from(b)),
            1 => cursor.take(2).map(|b| 64 + u32::from(b[0]) + u32::from(b[1]) * 256),
            id => Ok(id),
        };
        let Ok(chunk_stream_id) = parsed else {
            return Ok(None);
        };

        let state = self.streams.get(&chunk_stream_id);
        if state.is_none() && format != 0 {
            return Err(UnpackError::MissingInitialHeader {
                csid: chunk_stream_id,
                format,
            });
        }
        let mut header = state.map(|s| s.header.clone()).unwrap_or_default();
        let assembled = state.map_or(0, |s| s.payload.len());
        let starting_message = assembled == 0;

        match self.parse_message_header(&mut cursor, format, starting_message, &mut header) {
            Ok(()) => {}
            Err(Incomplete) => return Ok(None),
        }

        let msg_length = header.msg_length as usize;
        if msg_length > self.max_message_size {
            return Err(UnpackError::MessageTooLarge {
                size: msg_length,
                max: self.max_message_size,
            });
        }

        let header_len = cursor.pos;
        let piece_len = std::cmp::min(self.chunk_size, msg_length - assembled);
        if cursor.take(piece_len).is_err() {
            return Ok(None);
        }

        Ok(Some(ParsedChunk {
            chunk_stream_id,
            format,
            header,
            header_len,
            piece_len,
        }))
    }

    fn parse_message_header(
        &self,
        cursor: &mut Cursor<'_>,
        format: u8,
        starting_message: bool,
        header: &mut ChunkMessageHeader,
    ) -> Result<(), Incomplete> {
        match format {
            0 => {
                let timestamp = cursor.read_u24_be()?;
                header.msg_length = cursor.read_u24_be()?;
                header.msg_type_id = cursor.read_u8()?;
                header.msg_stream_id = cursor.read_u32_le()?;
                header.timestamp_delta = 0;
                if timestamp >= EXTENDED_TIMESTAMP_SENTINEL {
                    header.timestamp = cursor.read_u32_be()?;
                    header.extended_timestamp_type = ExtendedTimestampType::Absolute;
                } else {
                    header.timestamp = timestamp;
                    header.extended_timestamp_type = ExtendedTimestampType::None;
                }
            }
            1 => {
                let delta = cursor.read_u24_be()?;
                header.msg_length = cursor.read_u24_be()?;
                header.msg_type_id = cursor.read_u8()?;
                let delta = if delta >= EXTENDED_TIMESTAMP_SENTINEL {
                    header.extended_timestamp_type = ExtendedTimestampType::Delta;
                    cursor.read_u32_be()?
                } else {
                    header.extended_timestamp_type = ExtendedTimestampType::None;
                    delta
                };
                header.timestamp_delta = delta;
                header.timestamp = header.timestamp.wrapping_add(delta);
            }
            2 => {
                let delta = cursor.read_u24_be()?;
                let delta = if delta >= EXTENDED_TIMESTAMP_SENTINEL {
                    header.extended_timestamp_type = ExtendedTimestampType::Delta;
                    cursor.read_u32_be()?
                } else {
                    header.extended_timestamp_type = ExtendedTimestampType::None;
                    delta
                };
                header.timestamp_delta = delta;
                header.timestamp = header.timestamp.wrapping_add(delta);
            }
            _ => {
                // Format 3 inherits every field. The extended timestamp is
                // re-sent whenever the last full header carried one.
                match header.extended_timestamp_type {
                    ExtendedTimestampType::None => {
                        if starting_message {
                            header.timestamp =
                                header.timestamp.wrapping_add(header.timestamp_delta);
                        }
                    }
                    ExtendedTimestampType::Absolute => {
                        header.timestamp = cursor.read_u32_be()?;
                    }
                    ExtendedTimestampType::Delta => {
                        let delta = cursor.read_u32_be()?;
                        if starting_message {
                            header.timestamp = header.timestamp.wrapping_add(delta);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_chunk_message() {
        let mut unpacketizer = ChunkUnpacketizer::new();

        let data: [u8; 16] = [
            3,  // format 0, csid 3
            0, 0, 0, // timestamp
            0, 0, 4, // length
            20, // type id (command)
            0, 0, 0, 0, // stream id
            1, 2, 3, 4, // payload
        ];
        unpacketizer.extend_data(&data);

        let message = unpacketizer.read_message().expect("parse").expect("complete");
        assert_eq!(message.basic_header.chunk_stream_id, 3);
        assert_eq!(message.message_header.msg_type_id, 20);
        assert_eq!(message.message_header.msg_length, 4);
        assert_eq!(&message.payload[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_partial_chunk_waits_for_more_bytes() {
        let mut unpacketizer = ChunkUnpacketizer::new();
        let data: [u8; 16] = [
            3, 0, 0, 0, 0, 0, 4, 20, 0, 0, 0, 0, 9, 8, 7, 6,
        ];

        unpacketizer.extend_data(&data[..6]);
        assert!(unpacketizer.read_message().expect("parse").is_none());

        unpacketizer.extend_data(&data[6..]);
        let message = unpacketizer.read_message().expect("parse").expect("complete");
        assert_eq!(&message.payload[..], &[9, 8, 7, 6]);
    }

    #[test]
    fn test_set_chunk_size_applies_immediately() {
        let mut unpacketizer = ChunkUnpacketizer::new();

        // set_chunk_size(8) on the control stream.
        let control: [u8; 16] = [
            2, 0, 0, 0, 0, 0, 4, 1, 0, 0, 0, 0, 0, 0, 0, 8,
        ];
        unpacketizer.extend_data(&control);
        let message = unpacketizer.read_message().expect("parse").expect("complete");
        assert_eq!(message.message_header.msg_type_id, 1);
        assert_eq!(unpacketizer.chunk_size(), 8);
    }

    #[test]
    fn test_format1_inherits_and_folds_delta() {
        let mut unpacketizer = ChunkUnpacketizer::new();

        let first: [u8; 14] = [
            3, 0, 0, 100, 0, 0, 2, 8, 1, 0, 0, 0, 0xAA, 0xBB,
        ];
        unpacketizer.extend_data(&first);
        let message = unpacketizer.read_message().expect("parse").expect("complete");
        assert_eq!(message.message_header.timestamp, 100);

        // format 1: delta 25, same length/type.
        let second: [u8; 10] = [
            0b0100_0011, 0, 0, 25, 0, 0, 2, 8, 0xCC, 0xDD,
        ];
        unpacketizer.extend_data(&second);
        let message = unpacketizer.read_message().expect("parse").expect("complete");
        assert_eq!(message.message_header.timestamp, 125);
        assert_eq!(message.message_header.msg_stream_id, 1);
        assert_eq!(&message.payload[..], &[0xCC, 0xDD]);
    }

    #[test]
    fn test_format3_starts_next_message_with_inherited_delta() {
        let mut unpacketizer = ChunkUnpacketizer::new();

        let first: [u8; 13] = [
            3, 0, 0, 50, 0, 0, 1, 8, 0, 0, 0, 0, 0xAA,
        ];
        unpacketizer.extend_data(&first);
        let _ = unpacketizer.read_message().expect("parse").expect("complete");

        let second: [u8; 9] = [0b0100_0011, 0, 0, 10, 0, 0, 1, 8, 0xBB];
        unpacketizer.extend_data(&second);
        let message = unpacketizer.read_message().expect("parse").expect("complete");
        assert_eq!(message.message_header.timestamp, 60);

        // Bare format 3 chunk: whole header inherited, delta folds again.
        let third: [u8; 2] = [0b1100_0011, 0xCC];
        unpacketizer.extend_data(&third);
        let message = unpacketizer.read_message().expect("parse").expect("complete");
        assert_eq!(message.message_header.timestamp, 70);
        assert_eq!(&message.payload[..], &[0xCC]);
    }

    #[test]
    fn test_two_byte_basic_header() {
        let mut unpacketizer = ChunkUnpacketizer::new();

        // csid 70 = 64 + 6, encoded as (fmt 0, field 0) + byte 6.
        let data: [u8; 14] = [
            0, 6, 0, 0, 0, 0, 0, 1, 8, 0, 0, 0, 0, 0x42,
        ];
        unpacketizer.extend_data(&data);
        let message = unpacketizer.read_message().expect("parse").expect("complete");
        assert_eq!(message.basic_header.chunk_stream_id, 70);
    }

    #[test]
    fn test_oversize_message_is_fatal() {
        let mut unpacketizer = ChunkUnpacketizer::new();
        // Declared length 0xFFFFFF (16777215) fits, so push it over with a
        // decoder configured lower.
        unpacketizer.max_message_size = 1024;

        let data: [u8; 12] = [
            3, 0, 0, 0, 0, 8, 0, 8, 0, 0, 0, 0,
        ];
        unpacketizer.extend_data(&data);
        assert!(matches!(
            unpacketizer.read_message(),
            Err(UnpackError::MessageTooLarge { .. })
        ));
    }
}
