//! NetConnection command payloads

use indexmap::IndexMap;

use crate::amf0::{self, errors::Amf0Error, Amf0Value};
use crate::bytesio::BytesWriter;
use bytes::BytesMut;

pub const CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";

/// `_result` for a `connect` invocation.
pub fn connect_result(transaction_id: f64) -> Result<BytesMut, Amf0Error> {
    let mut properties = IndexMap::new();
    properties.insert(
        "fmsVer".to_string(),
        Amf0Value::String("FMS/3,0,1,123".to_string()),
    );
    properties.insert("capabilities".to_string(), Amf0Value::Number(31.0));

    let mut information = IndexMap::new();
    information.insert(
        "level".to_string(),
        Amf0Value::String("status".to_string()),
    );
    information.insert(
        "code".to_string(),
        Amf0Value::String(CONNECT_SUCCESS.to_string()),
    );
    information.insert(
        "description".to_string(),
        Amf0Value::String("Connection succeeded.".to_string()),
    );
    information.insert("objectEncoding".to_string(), Amf0Value::Number(0.0));

    let mut writer = BytesWriter::new();
    amf0::encode_all(
        &[
            Amf0Value::String("_result".to_string()),
            Amf0Value::Number(transaction_id),
            Amf0Value::Object(properties),
            Amf0Value::Object(information),
        ],
        &mut writer,
    )?;
    Ok(writer.extract_current_bytes())
}

/// `_result` for a `createStream` invocation.
pub fn create_stream_result(transaction_id: f64, stream_id: u32) -> Result<BytesMut, Amf0Error> {
    let mut writer = BytesWriter::new();
    amf0::encode_all(
        &[
            Amf0Value::String("_result".to_string()),
            Amf0Value::Number(transaction_id),
            Amf0Value::Null,
            Amf0Value::Number(f64::from(stream_id)),
        ],
        &mut writer,
    )?;
    Ok(writer.extract_current_bytes())
}
