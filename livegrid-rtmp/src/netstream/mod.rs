//! NetStream status payloads

use indexmap::IndexMap;

use crate::amf0::{self, errors::Amf0Error, Amf0Value};
use crate::bytesio::BytesWriter;
use bytes::BytesMut;

pub const PUBLISH_START: &str = "NetStream.Publish.Start";
pub const PUBLISH_BAD_NAME: &str = "NetStream.Publish.BadName";
pub const PLAY_START: &str = "NetStream.Play.Start";
pub const PLAY_FAILED: &str = "NetStream.Play.Failed";

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StatusLevel {
    Status,
    Error,
}

impl StatusLevel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Error => "error",
        }
    }
}

/// `onStatus` command payload.
pub fn on_status(
    level: StatusLevel,
    code: &str,
    description: &str,
) -> Result<BytesMut, Amf0Error> {
    let mut info = IndexMap::new();
    info.insert(
        "level".to_string(),
        Amf0Value::String(level.as_str().to_string()),
    );
    info.insert("code".to_string(), Amf0Value::String(code.to_string()));
    info.insert(
        "description".to_string(),
        Amf0Value::String(description.to_string()),
    );

    let mut writer = BytesWriter::new();
    amf0::encode_all(
        &[
            Amf0Value::String("onStatus".to_string()),
            Amf0Value::Number(0.0),
            Amf0Value::Null,
            Amf0Value::Object(info),
        ],
        &mut writer,
    )?;
    Ok(writer.extract_current_bytes())
}
