//! RTMP ingest engine
//!
//! Chunked transport codec, AMF0 command serialization, the per-connection
//! protocol state machine, and the TCP accept loop. Audio and video
//! payloads are opaque: the engine frames and routes them but never parses
//! codec data.

pub mod amf0;
pub mod bytesio;
pub mod chunk;
pub mod events;
pub mod gop;
pub mod handshake;
pub mod messages;
pub mod netconnection;
pub mod netstream;
pub mod protocol_control;
pub mod registry;
pub mod server;
pub mod session;
pub mod user_control;

pub use events::{MediaFrame, MediaKind, NullEventSink, SessionEvent, SessionEventSink};
pub use registry::StreamRegistry;
pub use server::RtmpServer;
