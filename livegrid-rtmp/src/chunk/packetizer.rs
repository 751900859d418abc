//! Chunk encoder
//!
//! Splits a message payload into `chunk_size` pieces. The first piece
//! carries a full format 0 header; every continuation piece is a bare
//! format 3 header (plus the repeated extended timestamp when one is in
//! play).

use byteorder::{BigEndian, LittleEndian};

use super::errors::PackError;
use super::{ChunkInfo, EXTENDED_TIMESTAMP_SENTINEL, INIT_CHUNK_SIZE};
use crate::bytesio::BytesWriter;

pub struct ChunkPacketizer {
    chunk_size: usize,
}

impl Default for ChunkPacketizer {
    fn default() -> Self {
        Self::new(INIT_CHUNK_SIZE)
    }
}

impl ChunkPacketizer {
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Takes effect for messages written after the corresponding
    /// `set_chunk_size` control message has been sent.
    pub fn update_chunk_size(&mut self, chunk_size: usize) {
        self.chunk_size = chunk_size.max(1);
    }

    /// Encode one message as a chunk sequence into `writer`.
    pub fn write_message(
        &self,
        message: &ChunkInfo,
        writer: &mut BytesWriter,
    ) -> Result<(), PackError> {
        let csid = message.basic_header.chunk_stream_id;
        let header = &message.message_header;
        let timestamp = header.timestamp;
        let extended = timestamp >= EXTENDED_TIMESTAMP_SENTINEL;

        write_basic_header(0, csid, writer)?;
        let timestamp_field = if extended {
            EXTENDED_TIMESTAMP_SENTINEL
        } else {
            timestamp
        };
        writer.write_u24::<BigEndian>(timestamp_field)?;
        writer.write_u24::<BigEndian>(message.payload.len() as u32)?;
        writer.write_u8(header.msg_type_id);
        writer.write_u32::<LittleEndian>(header.msg_stream_id);
        if extended {
            writer.write_u32::<BigEndian>(timestamp);
        }

        let mut pieces = message.payload.chunks(self.chunk_size);
        if let Some(first) = pieces.next() {
            writer.write(first);
        }
        for piece in pieces {
            write_basic_header(3, csid, writer)?;
            if extended {
                writer.write_u32::<BigEndian>(timestamp);
            }
            writer.write(piece);
        }

        Ok(())
    }
}

fn write_basic_header(format: u8, csid: u32, writer: &mut BytesWriter) -> Result<(), PackError> {
    match csid {
        2..=63 => writer.write_u8((format << 6) | csid as u8),
        64..=319 => {
            writer.write_u8(format << 6);
            writer.write_u8((csid - 64) as u8);
        }
        320..=65599 => {
            writer.write_u8((format << 6) | 1);
            writer.write_u16::<LittleEndian>((csid - 64) as u16);
        }
        _ => return Err(PackError::CsidOutOfRange(csid)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkUnpacketizer;
    use bytes::BytesMut;

    fn round_trip(message: ChunkInfo, chunk_size: usize) -> ChunkInfo {
        let packetizer = ChunkPacketizer::new(chunk_size);
        let mut writer = BytesWriter::new();
        packetizer.write_message(&message, &mut writer).expect("pack");

        let mut unpacketizer = ChunkUnpacketizer::new();
        unpacketizer.update_chunk_size(chunk_size);
        unpacketizer.extend_data(&writer.extract_current_bytes());
        unpacketizer
            .read_message()
            .expect("unpack")
            .expect("complete message")
    }

    fn assert_equivalent(decoded: &ChunkInfo, original: &ChunkInfo) {
        assert_eq!(
            decoded.basic_header.chunk_stream_id,
            original.basic_header.chunk_stream_id
        );
        assert_eq!(
            decoded.message_header.timestamp,
            original.message_header.timestamp
        );
        assert_eq!(
            decoded.message_header.msg_type_id,
            original.message_header.msg_type_id
        );
        assert_eq!(
            decoded.message_header.msg_stream_id,
            original.message_header.msg_stream_id
        );
        assert_eq!(decoded.payload, original.payload);
    }

    #[test]
    fn test_round_trip_single_chunk() {
        let message = ChunkInfo::new(3, 0, 1000, 4, 20, 1, BytesMut::from(&[1u8, 2, 3, 4][..]));
        let decoded = round_trip(message.clone(), 128);
        assert_equivalent(&decoded, &message);
    }

    #[test]
    fn test_round_trip_multi_chunk_payload() {
        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let message = ChunkInfo::new(
            6,
            0,
            42,
            payload.len() as u32,
            9,
            1,
            BytesMut::from(&payload[..]),
        );
        let decoded = round_trip(message.clone(), 128);
        assert_equivalent(&decoded, &message);
    }

    #[test]
    fn test_round_trip_extended_timestamp() {
        let payload: Vec<u8> = vec![7u8; 300];
        let message = ChunkInfo::new(
            4,
            0,
            0x0100_0000, // past the 24-bit sentinel
            payload.len() as u32,
            8,
            1,
            BytesMut::from(&payload[..]),
        );
        let decoded = round_trip(message.clone(), 128);
        assert_equivalent(&decoded, &message);
    }

    #[test]
    fn test_round_trip_wide_chunk_stream_ids() {
        for csid in [2u32, 63, 64, 319, 320, 65599] {
            let message = ChunkInfo::new(csid, 0, 5, 2, 20, 0, BytesMut::from(&[1u8, 2][..]));
            let decoded = round_trip(message.clone(), 128);
            assert_equivalent(&decoded, &message);
        }
    }

    #[test]
    fn test_csid_out_of_range_rejected() {
        let packetizer = ChunkPacketizer::default();
        let message = ChunkInfo::new(65600, 0, 0, 1, 20, 0, BytesMut::from(&[0u8][..]));
        let mut writer = BytesWriter::new();
        assert!(matches!(
            packetizer.write_message(&message, &mut writer),
            Err(PackError::CsidOutOfRange(65600))
        ));
    }

    #[test]
    fn test_large_payload_round_trip() {
        let payload: Vec<u8> = (0..262_144u32).map(|i| (i % 127) as u8).collect();
        let message = ChunkInfo::new(
            6,
            0,
            90_000,
            payload.len() as u32,
            9,
            7,
            BytesMut::from(&payload[..]),
        );
        let decoded = round_trip(message.clone(), 4096);
        assert_equivalent(&decoded, &message);
    }
}
