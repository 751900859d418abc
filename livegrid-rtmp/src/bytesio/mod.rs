//! Growable byte buffers with typed reads and writes
//!
//! The reader consumes from the front of a [`BytesMut`] and fails with
//! `NotEnoughBytes` without consuming anything when a read cannot be
//! satisfied, which lets the chunk decoder retry once more data arrives.

pub mod errors;

use byteorder::ByteOrder;
use bytes::{BufMut, BytesMut};

use errors::{BytesReadError, BytesWriteError};

#[derive(Default)]
pub struct BytesReader {
    buffer: BytesMut,
}

impl BytesReader {
    #[must_use]
    pub fn new(buffer: BytesMut) -> Self {
        Self { buffer }
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Peek without consuming.
    pub fn peek_u8(&self) -> Result<u8, BytesReadError> {
        self.require(1)?;
        Ok(self.buffer[0])
    }

    pub fn read_u8(&mut self) -> Result<u8, BytesReadError> {
        self.require(1)?;
        let byte = self.buffer[0];
        let _ = self.buffer.split_to(1);
        Ok(byte)
    }

    pub fn read_u16<T: ByteOrder>(&mut self) -> Result<u16, BytesReadError> {
        let bytes = self.read_bytes(2)?;
        Ok(T::read_u16(&bytes))
    }

    pub fn read_u24<T: ByteOrder>(&mut self) -> Result<u32, BytesReadError> {
        let bytes = self.read_bytes(3)?;
        Ok(T::read_u24(&bytes))
    }

    pub fn read_u32<T: ByteOrder>(&mut self) -> Result<u32, BytesReadError> {
        let bytes = self.read_bytes(4)?;
        Ok(T::read_u32(&bytes))
    }

    pub fn read_f64<T: ByteOrder>(&mut self) -> Result<f64, BytesReadError> {
        let bytes = self.read_bytes(8)?;
        Ok(T::read_f64(&bytes))
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<BytesMut, BytesReadError> {
        self.require(count)?;
        Ok(self.buffer.split_to(count))
    }

    fn require(&self, need: usize) -> Result<(), BytesReadError> {
        if self.buffer.len() < need {
            return Err(BytesReadError::NotEnoughBytes {
                need,
                have: self.buffer.len(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct BytesWriter {
    buffer: BytesMut,
}

impl BytesWriter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    pub fn write_u8(&mut self, byte: u8) {
        self.buffer.put_u8(byte);
    }

    pub fn write_u16<T: ByteOrder>(&mut self, value: u16) {
        let mut bytes = [0u8; 2];
        T::write_u16(&mut bytes, value);
        self.buffer.extend_from_slice(&bytes);
    }

    pub fn write_u24<T: ByteOrder>(&mut self, value: u32) -> Result<(), BytesWriteError> {
        if value > 0x00FF_FFFF {
            return Err(BytesWriteError::OutOfRange {
                field: "u24",
                value: u64::from(value),
            });
        }
        let mut bytes = [0u8; 3];
        T::write_u24(&mut bytes, value);
        self.buffer.extend_from_slice(&bytes);
        Ok(())
    }

    pub fn write_u32<T: ByteOrder>(&mut self, value: u32) {
        let mut bytes = [0u8; 4];
        T::write_u32(&mut bytes, value);
        self.buffer.extend_from_slice(&bytes);
    }

    pub fn write_f64<T: ByteOrder>(&mut self, value: f64) {
        let mut bytes = [0u8; 8];
        T::write_f64(&mut bytes, value);
        self.buffer.extend_from_slice(&bytes);
    }

    pub fn write(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Take everything written so far, leaving the writer empty.
    pub fn extract_current_bytes(&mut self) -> BytesMut {
        self.buffer.split()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, LittleEndian};

    #[test]
    fn test_typed_round_trip() {
        let mut writer = BytesWriter::new();
        writer.write_u8(7);
        writer.write_u16::<BigEndian>(0x0102);
        writer.write_u24::<BigEndian>(0x0A0B0C).unwrap();
        writer.write_u32::<LittleEndian>(0xDEAD_BEEF);
        writer.write_f64::<BigEndian>(1935.5);

        let mut reader = BytesReader::new(writer.extract_current_bytes());
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert_eq!(reader.read_u16::<BigEndian>().unwrap(), 0x0102);
        assert_eq!(reader.read_u24::<BigEndian>().unwrap(), 0x0A0B0C);
        assert_eq!(reader.read_u32::<LittleEndian>().unwrap(), 0xDEAD_BEEF);
        assert!((reader.read_f64::<BigEndian>().unwrap() - 1935.5).abs() < f64::EPSILON);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_short_read_consumes_nothing() {
        let mut reader = BytesReader::new(BytesMut::from(&[1u8, 2][..]));
        assert_eq!(
            reader.read_u32::<BigEndian>(),
            Err(BytesReadError::NotEnoughBytes { need: 4, have: 2 })
        );
        assert_eq!(reader.len(), 2);
        assert_eq!(reader.read_u16::<BigEndian>().unwrap(), 0x0102);
    }

    #[test]
    fn test_u24_overflow_rejected() {
        let mut writer = BytesWriter::new();
        assert!(writer.write_u24::<BigEndian>(0x0100_0000).is_err());
    }
}
