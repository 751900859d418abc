//! AMF0 value codec
//!
//! Typed self-describing serialization used by the command and metadata
//! channels. Object properties keep insertion order so an encode/decode
//! round trip is byte-stable.

pub mod errors;

use byteorder::BigEndian;
use indexmap::IndexMap;

use crate::bytesio::{BytesReader, BytesWriter};
use errors::Amf0Error;

mod marker {
    pub const NUMBER: u8 = 0x00;
    pub const BOOLEAN: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const OBJECT: u8 = 0x03;
    pub const NULL: u8 = 0x05;
    pub const UNDEFINED: u8 = 0x06;
    pub const ECMA_ARRAY: u8 = 0x08;
    pub const OBJECT_END: u8 = 0x09;
    pub const LONG_STRING: u8 = 0x0C;
}

/// Strings longer than this are promoted to `LongString` on encode.
const SHORT_STRING_MAX: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq)]
pub enum Amf0Value {
    Number(f64),
    Boolean(bool),
    String(String),
    Object(IndexMap<String, Amf0Value>),
    Null,
    Undefined,
    EcmaArray(IndexMap<String, Amf0Value>),
    LongString(String),
}

impl Amf0Value {
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::LongString(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&IndexMap<String, Amf0Value>> {
        match self {
            Self::Object(map) | Self::EcmaArray(map) => Some(map),
            _ => None,
        }
    }

    /// Property lookup on objects and ECMA arrays.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Amf0Value> {
        self.as_object().and_then(|map| map.get(key))
    }
}

/// Decode a single value.
pub fn decode(reader: &mut BytesReader) -> Result<Amf0Value, Amf0Error> {
    let tag = reader.read_u8()?;
    match tag {
        marker::NUMBER => Ok(Amf0Value::Number(reader.read_f64::<BigEndian>()?)),
        marker::BOOLEAN => Ok(Amf0Value::Boolean(reader.read_u8()? != 0)),
        marker::STRING => Ok(Amf0Value::String(read_short_string(reader)?)),
        marker::OBJECT => Ok(Amf0Value::Object(read_properties(reader)?)),
        marker::NULL => Ok(Amf0Value::Null),
        marker::UNDEFINED => Ok(Amf0Value::Undefined),
        marker::ECMA_ARRAY => {
            // The declared element count is advisory; the body is delimited
            // by the object end marker like a plain object.
            let _count = reader.read_u32::<BigEndian>()?;
            Ok(Amf0Value::EcmaArray(read_properties(reader)?))
        }
        marker::LONG_STRING => {
            let len = reader.read_u32::<BigEndian>()? as usize;
            let bytes = reader.read_bytes(len)?;
            let text =
                String::from_utf8(bytes.to_vec()).map_err(|_| Amf0Error::MalformedString)?;
            Ok(Amf0Value::LongString(text))
        }
        other => Err(Amf0Error::UnknownMarker(other)),
    }
}

/// Decode values until the reader is exhausted (command message bodies).
pub fn decode_all(reader: &mut BytesReader) -> Result<Vec<Amf0Value>, Amf0Error> {
    let mut values = Vec::new();
    while !reader.is_empty() {
        values.push(decode(reader)?);
    }
    Ok(values)
}

/// Encode a single value.
pub fn encode(value: &Amf0Value, writer: &mut BytesWriter) -> Result<(), Amf0Error> {
    match value {
        Amf0Value::Number(n) => {
            writer.write_u8(marker::NUMBER);
            writer.write_f64::<BigEndian>(*n);
        }
        Amf0Value::Boolean(b) => {
            writer.write_u8(marker::BOOLEAN);
            writer.write_u8(u8::from(*b));
        }
        Amf0Value::String(s) if s.len() > SHORT_STRING_MAX => {
            write_long_string(s, writer);
        }
        Amf0Value::String(s) => {
            writer.write_u8(marker::STRING);
            write_string_body(s, writer);
        }
        Amf0Value::Object(map) => {
            writer.write_u8(marker::OBJECT);
            write_properties(map, writer)?;
        }
        Amf0Value::Null => writer.write_u8(marker::NULL),
        Amf0Value::Undefined => writer.write_u8(marker::UNDEFINED),
        Amf0Value::EcmaArray(map) => {
            writer.write_u8(marker::ECMA_ARRAY);
            writer.write_u32::<BigEndian>(map.len() as u32);
            write_properties(map, writer)?;
        }
        Amf0Value::LongString(s) => write_long_string(s, writer),
    }
    Ok(())
}

/// Encode a sequence of values back to back.
pub fn encode_all(values: &[Amf0Value], writer: &mut BytesWriter) -> Result<(), Amf0Error> {
    for value in values {
        encode(value, writer)?;
    }
    Ok(())
}

fn read_short_string(reader: &mut BytesReader) -> Result<String, Amf0Error> {
    let len = reader.read_u16::<BigEndian>()? as usize;
    let bytes = reader.read_bytes(len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| Amf0Error::MalformedString)
}

fn read_properties(
    reader: &mut BytesReader,
) -> Result<IndexMap<String, Amf0Value>, Amf0Error> {
    let mut map = IndexMap::new();
    loop {
        // Property names carry no marker, just a u16 length prefix.
        let key = read_short_string(reader)?;
        if key.is_empty() {
            let end = reader.read_u8()?;
            if end != marker::OBJECT_END {
                return Err(Amf0Error::MissingObjectEnd(end));
            }
            return Ok(map);
        }
        let value = decode(reader)?;
        map.insert(key, value);
    }
}

fn write_properties(
    map: &IndexMap<String, Amf0Value>,
    writer: &mut BytesWriter,
) -> Result<(), Amf0Error> {
    for (key, value) in map {
        write_string_body(key, writer);
        encode(value, writer)?;
    }
    writer.write_u16::<BigEndian>(0);
    writer.write_u8(marker::OBJECT_END);
    Ok(())
}

fn write_string_body(s: &str, writer: &mut BytesWriter) {
    writer.write_u16::<BigEndian>(s.len() as u16);
    writer.write(s.as_bytes());
}

fn write_long_string(s: &str, writer: &mut BytesWriter) {
    writer.write_u8(marker::LONG_STRING);
    writer.write_u32::<BigEndian>(s.len() as u32);
    writer.write(s.as_bytes());
}
