//! RTMP handshake
//!
//! Three fixed-size messages in each direction: a version byte (C0/S0) and
//! two 1536-byte blocks (C1/S1, C2/S2). The blocks open with a 4-byte
//! timestamp and 4 zero bytes, the rest is random filler. The server treats
//! the client's block as opaque and echoes it back as S2.

pub mod errors;

use byteorder::BigEndian;
use bytes::BytesMut;
use rand::Rng;

use crate::bytesio::{BytesReader, BytesWriter};
use errors::HandshakeError;

pub const RTMP_VERSION: u8 = 3;
pub const HANDSHAKE_BLOCK_SIZE: usize = 1536;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum ServerHandshakeState {
    ReadC0C1,
    ReadC2,
    Done,
}

/// Server side of the plain handshake.
///
/// Feed inbound bytes with [`extend_data`](Self::extend_data), call
/// [`advance`](Self::advance), then flush whatever
/// [`take_output`](Self::take_output) returns. Complete once
/// [`is_done`](Self::is_done).
pub struct SimpleHandshakeServer {
    reader: BytesReader,
    writer: BytesWriter,
    state: ServerHandshakeState,
}

impl Default for SimpleHandshakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleHandshakeServer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            reader: BytesReader::new(BytesMut::new()),
            writer: BytesWriter::new(),
            state: ServerHandshakeState::ReadC0C1,
        }
    }

    pub fn extend_data(&mut self, data: &[u8]) {
        self.reader.extend_from_slice(data);
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == ServerHandshakeState::Done
    }

    /// Drain bytes queued for the peer.
    pub fn take_output(&mut self) -> BytesMut {
        self.writer.extract_current_bytes()
    }

    /// Bytes the client pipelined behind C2; they belong to the chunk
    /// stream and must be replayed into the decoder.
    pub fn take_residual(&mut self) -> BytesMut {
        let len = self.reader.len();
        self.reader.read_bytes(len).unwrap_or_default()
    }

    /// Drive the state machine as far as the buffered input allows.
    pub fn advance(&mut self) -> Result<(), HandshakeError> {
        loop {
            match self.state {
                ServerHandshakeState::ReadC0C1 => {
                    if self.reader.len() < 1 + HANDSHAKE_BLOCK_SIZE {
                        return Ok(());
                    }
                    let version = self.reader.read_u8()?;
                    if version != RTMP_VERSION {
                        return Err(HandshakeError::UnsupportedVersion(version));
                    }
                    let c1 = self.reader.read_bytes(HANDSHAKE_BLOCK_SIZE)?;
                    self.write_s0_s1();
                    // S2 echoes C1.
                    self.writer.write(&c1);
                    self.state = ServerHandshakeState::ReadC2;
                }
                ServerHandshakeState::ReadC2 => {
                    if self.reader.len() < HANDSHAKE_BLOCK_SIZE {
                        return Ok(());
                    }
                    let _c2 = self.reader.read_bytes(HANDSHAKE_BLOCK_SIZE)?;
                    self.state = ServerHandshakeState::Done;
                }
                ServerHandshakeState::Done => return Ok(()),
            }
        }
    }

    fn write_s0_s1(&mut self) {
        self.writer.write_u8(RTMP_VERSION);
        self.writer.write(&handshake_block(current_millis()));
    }
}

/// Build a 1536-byte handshake block: timestamp, 4 zero bytes, random tail.
fn handshake_block(timestamp: u32) -> BytesMut {
    let mut writer = BytesWriter::new();
    writer.write_u32::<BigEndian>(timestamp);
    writer.write_u32::<BigEndian>(0);

    let mut filler = [0u8; HANDSHAKE_BLOCK_SIZE - 8];
    rand::thread_rng().fill(&mut filler[..]);
    writer.write(&filler);
    writer.extract_current_bytes()
}

fn current_millis() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u32)
        .unwrap_or(0)
}
