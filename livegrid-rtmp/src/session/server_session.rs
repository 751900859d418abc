//! Server-side RTMP session
//!
//! Owns one accepted connection end to end: handshake, control message
//! burst, and the command loop. Every failure here is fatal to this
//! connection only; the accept loop keeps running.

use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::errors::SessionError;
use crate::amf0::{self, Amf0Value};
use crate::bytesio::{BytesReader, BytesWriter};
use crate::chunk::{ChunkInfo, ChunkPacketizer, ChunkUnpacketizer, COMMAND_CSID, MEDIA_CSID};
use crate::events::{MediaFrame, MediaKind, SessionEvent, SessionEventSink};
use crate::handshake::SimpleHandshakeServer;
use crate::messages::msg_type_id;
use crate::netconnection;
use crate::netstream::{self, StatusLevel};
use crate::protocol_control::{
    peer_bandwidth_limit, SetChunkSize, SetPeerBandwidth, WindowAckSize,
};
use crate::registry::StreamRegistry;
use crate::user_control::UserControlEvent;

const READ_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Outbound chunk size announced after `connect`.
    pub chunk_size: u32,
    pub window_ack_size: u32,
    pub peer_bandwidth: u32,
    pub handshake_timeout: Duration,
    /// Frame buffer for playing sessions before frames are dropped.
    pub media_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            window_ack_size: 2_500_000,
            peer_bandwidth: 2_500_000,
            handshake_timeout: Duration::from_secs(10),
            media_channel_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SessionState {
    Init,
    Handshake,
    Connected,
    Publishing,
    Playing,
    Closed,
}

impl SessionState {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Handshake => "handshake",
            Self::Connected => "connected",
            Self::Publishing => "publishing",
            Self::Playing => "playing",
            Self::Closed => "closed",
        }
    }
}

enum Input {
    Socket(std::io::Result<usize>),
    Media(Option<MediaFrame>),
}

pub struct ServerSession {
    id: Uuid,
    state: SessionState,
    socket: TcpStream,
    unpacketizer: ChunkUnpacketizer,
    packetizer: ChunkPacketizer,
    registry: Arc<StreamRegistry>,
    sink: Arc<dyn SessionEventSink>,
    config: SessionConfig,
    app_name: String,
    stream_key: Option<String>,
    next_stream_id: u32,
    active_stream_id: u32,
    media_rx: Option<mpsc::Receiver<MediaFrame>>,
}

impl ServerSession {
    pub fn new(
        socket: TcpStream,
        registry: Arc<StreamRegistry>,
        sink: Arc<dyn SessionEventSink>,
        config: SessionConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Init,
            socket,
            unpacketizer: ChunkUnpacketizer::new(),
            packetizer: ChunkPacketizer::default(),
            registry,
            sink,
            config,
            app_name: String::new(),
            stream_key: None,
            next_stream_id: 1,
            active_stream_id: 0,
            media_rx: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn stream_key(&self) -> Option<&str> {
        self.stream_key.as_deref()
    }

    /// Drive the session until the peer disconnects or a fatal protocol
    /// error occurs. Publisher/player registrations are always cleaned up.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        let result = self.run_inner().await;
        self.cleanup();
        self.state = SessionState::Closed;
        result
    }

    async fn run_inner(&mut self) -> Result<(), SessionError> {
        self.state = SessionState::Handshake;
        let timeout = self.config.handshake_timeout;
        tokio::time::timeout(timeout, self.handshake())
            .await
            .map_err(|_| SessionError::HandshakeTimeout)??;
        self.state = SessionState::Connected;
        debug!(session_id = %self.id, "handshake complete");

        self.command_loop().await
    }

    async fn handshake(&mut self) -> Result<(), SessionError> {
        let mut handshake = SimpleHandshakeServer::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let read = self.socket.read(&mut buf).await?;
            if read == 0 {
                return Err(SessionError::ConnectionClosed);
            }
            handshake.extend_data(&buf[..read]);
            handshake.advance()?;

            let output = handshake.take_output();
            if !output.is_empty() {
                self.socket.write_all(&output).await?;
                self.socket.flush().await?;
            }

            if handshake.is_done() {
                // Clients may pipeline the connect command behind C2.
                let residual = handshake.take_residual();
                if !residual.is_empty() {
                    self.unpacketizer.extend_data(&residual);
                }
                return Ok(());
            }
        }
    }

    async fn command_loop(&mut self) -> Result<(), SessionError> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut media_rx = None;

        loop {
            while let Some(message) = self.unpacketizer.read_message()? {
                self.dispatch(message).await?;
            }
            if self.media_rx.is_some() {
                media_rx = self.media_rx.take();
            }

            let input = if let Some(rx) = media_rx.as_mut() {
                tokio::select! {
                    read = self.socket.read(&mut buf) => Input::Socket(read),
                    frame = rx.recv() => Input::Media(frame),
                }
            } else {
                Input::Socket(self.socket.read(&mut buf).await)
            };

            match input {
                Input::Socket(Ok(0)) => return Ok(()),
                Input::Socket(Ok(read)) => self.unpacketizer.extend_data(&buf[..read]),
                Input::Socket(Err(e)) => return Err(e.into()),
                Input::Media(Some(frame)) => self.send_media(&frame).await?,
                Input::Media(None) => {
                    // Publisher went away; the player keeps the connection.
                    media_rx = None;
                }
            }
        }
    }

    async fn dispatch(&mut self, message: ChunkInfo) -> Result<(), SessionError> {
        match message.message_header.msg_type_id {
            // Already applied inside the unpacketizer.
            msg_type_id::SET_CHUNK_SIZE => {
                debug!(
                    session_id = %self.id,
                    chunk_size = self.unpacketizer.chunk_size(),
                    "peer chunk size updated"
                );
                Ok(())
            }
            msg_type_id::ABORT
            | msg_type_id::ACKNOWLEDGEMENT
            | msg_type_id::USER_CONTROL_EVENT
            | msg_type_id::WIN_ACKNOWLEDGEMENT_SIZE
            | msg_type_id::SET_PEER_BANDWIDTH => Ok(()),
            msg_type_id::COMMAND_AMF0 => self.handle_command(&message.payload).await,
            // AMF3 command bodies start with a format byte, then plain AMF0.
            msg_type_id::COMMAND_AMF3 if !message.payload.is_empty() => {
                let payload = BytesMut::from(&message.payload[1..]);
                self.handle_command(&payload).await
            }
            msg_type_id::DATA_AMF0 => self.handle_data(&message.payload),
            msg_type_id::AUDIO => self.handle_media(MediaKind::Audio, message),
            msg_type_id::VIDEO => self.handle_media(MediaKind::Video, message),
            other => {
                debug!(session_id = %self.id, type_id = other, "ignoring message");
                Ok(())
            }
        }
    }

    async fn handle_command(&mut self, payload: &BytesMut) -> Result<(), SessionError> {
        let mut reader = BytesReader::new(payload.clone());
        let values = amf0::decode_all(&mut reader)?;

        let command = values
            .first()
            .and_then(Amf0Value::as_str)
            .ok_or(SessionError::MalformedCommand {
                command: "<unnamed>",
                reason: "missing command name",
            })?
            .to_string();
        let transaction_id = values.get(1).and_then(Amf0Value::as_number).unwrap_or(0.0);

        match command.as_str() {
            "connect" => self.on_connect(transaction_id, values.get(2)).await,
            "createStream" => self.on_create_stream(transaction_id).await,
            "publish" => self.on_publish(values.get(3), values.get(4)).await,
            "play" => self.on_play(values.get(3)).await,
            "deleteStream" | "closeStream" => {
                self.stop_stream();
                Ok(())
            }
            other => {
                debug!(session_id = %self.id, command = other, "unhandled command");
                Ok(())
            }
        }
    }

    async fn on_connect(
        &mut self,
        transaction_id: f64,
        command_object: Option<&Amf0Value>,
    ) -> Result<(), SessionError> {
        self.app_name = command_object
            .and_then(|obj| obj.property("app"))
            .and_then(Amf0Value::as_str)
            .unwrap_or_default()
            .to_string();

        // Server settings burst before the connect result.
        self.write_message(
            WindowAckSize {
                ack_window_size: self.config.window_ack_size,
            }
            .to_message(),
        )
        .await?;
        self.write_message(
            SetPeerBandwidth {
                window_size: self.config.peer_bandwidth,
                limit_type: peer_bandwidth_limit::DYNAMIC,
            }
            .to_message(),
        )
        .await?;
        self.write_message(
            SetChunkSize {
                chunk_size: self.config.chunk_size,
            }
            .to_message(),
        )
        .await?;
        self.packetizer
            .update_chunk_size(self.config.chunk_size as usize);

        let payload = netconnection::connect_result(transaction_id)?;
        self.write_command(payload).await?;

        info!(session_id = %self.id, app = %self.app_name, "client connected");
        Ok(())
    }

    async fn on_create_stream(&mut self, transaction_id: f64) -> Result<(), SessionError> {
        let stream_id = self.next_stream_id;
        self.next_stream_id += 1;
        self.active_stream_id = stream_id;

        let payload = netconnection::create_stream_result(transaction_id, stream_id)?;
        self.write_command(payload).await
    }

    async fn on_publish(
        &mut self,
        stream_name: Option<&Amf0Value>,
        publish_type: Option<&Amf0Value>,
    ) -> Result<(), SessionError> {
        let name = stream_name
            .and_then(Amf0Value::as_str)
            .ok_or(SessionError::MalformedCommand {
                command: "publish",
                reason: "missing stream name",
            })?
            .to_string();

        if self.state != SessionState::Connected {
            self.write_status(
                StatusLevel::Error,
                netstream::PUBLISH_BAD_NAME,
                "publish is only legal on a connected session",
            )
            .await?;
            return Err(SessionError::IllegalState {
                command: "publish",
                state: self.state.as_str(),
            });
        }

        let publish_type = publish_type
            .and_then(Amf0Value::as_str)
            .unwrap_or("live")
            .to_string();
        let stream_key = self.qualified_key(&name);

        if self.registry.publish(&stream_key, self.id).is_err() {
            warn!(session_id = %self.id, stream_key = %stream_key, "rejecting duplicate publisher");
            self.write_status(
                StatusLevel::Error,
                netstream::PUBLISH_BAD_NAME,
                "stream key is already live",
            )
            .await?;
            return Err(SessionError::PublishRejected(stream_key));
        }

        self.state = SessionState::Publishing;
        self.stream_key = Some(stream_key.clone());
        self.sink.handle(SessionEvent::Published {
            session_id: self.id,
            stream_key: stream_key.clone(),
        });

        info!(
            session_id = %self.id,
            stream_key = %stream_key,
            publish_type = %publish_type,
            "publish started"
        );
        self.write_status(
            StatusLevel::Status,
            netstream::PUBLISH_START,
            "stream is now publishing",
        )
        .await
    }

    async fn on_play(&mut self, stream_name: Option<&Amf0Value>) -> Result<(), SessionError> {
        let name = stream_name
            .and_then(Amf0Value::as_str)
            .ok_or(SessionError::MalformedCommand {
                command: "play",
                reason: "missing stream name",
            })?
            .to_string();

        if self.state != SessionState::Connected {
            self.write_status(
                StatusLevel::Error,
                netstream::PLAY_FAILED,
                "play is only legal on a connected session",
            )
            .await?;
            return Err(SessionError::IllegalState {
                command: "play",
                state: self.state.as_str(),
            });
        }

        let stream_key = self.qualified_key(&name);
        let (media_tx, media_rx) = mpsc::channel(self.config.media_channel_capacity);
        self.media_rx = Some(media_rx);
        self.state = SessionState::Playing;
        self.stream_key = Some(stream_key.clone());
        self.sink.handle(SessionEvent::Played {
            session_id: self.id,
            stream_key: stream_key.clone(),
            media: media_tx,
        });

        info!(session_id = %self.id, stream_key = %stream_key, "play started");
        self.write_message(
            UserControlEvent::stream_begin(self.active_stream_id.max(1)).to_message(),
        )
        .await?;
        self.write_status(StatusLevel::Status, netstream::PLAY_START, "stream is playing")
            .await
    }

    fn handle_data(&mut self, payload: &BytesMut) -> Result<(), SessionError> {
        let mut reader = BytesReader::new(payload.clone());
        let values = amf0::decode_all(&mut reader)?;

        let mut iter = values.iter();
        let first = iter.next().and_then(Amf0Value::as_str);
        if first == Some("@setDataFrame") {
            iter.next(); // "onMetaData"
        } else if first != Some("onMetaData") {
            return Ok(());
        }

        let Some(metadata) = iter.next().and_then(Amf0Value::as_object).cloned() else {
            return Ok(());
        };
        let Some(stream_key) = self.stream_key.clone() else {
            return Ok(());
        };

        self.registry
            .set_metadata(&stream_key, self.id, metadata.clone());
        self.sink.handle(SessionEvent::Metadata {
            stream_key,
            metadata,
        });
        Ok(())
    }

    fn handle_media(&mut self, kind: MediaKind, message: ChunkInfo) -> Result<(), SessionError> {
        if self.state != SessionState::Publishing {
            return Err(SessionError::IllegalState {
                command: "media",
                state: self.state.as_str(),
            });
        }
        let Some(stream_key) = self.stream_key.clone() else {
            return Ok(());
        };

        self.sink.handle(SessionEvent::Frame {
            stream_key,
            frame: MediaFrame {
                kind,
                timestamp: message.message_header.timestamp,
                payload: Bytes::from(message.payload),
            },
        });
        Ok(())
    }

    /// Write an audio/video message to a playing peer.
    async fn send_media(&mut self, frame: &MediaFrame) -> Result<(), SessionError> {
        let type_id = match frame.kind {
            MediaKind::Audio => msg_type_id::AUDIO,
            MediaKind::Video => msg_type_id::VIDEO,
        };
        let message = ChunkInfo::new(
            MEDIA_CSID,
            0,
            frame.timestamp,
            frame.payload.len() as u32,
            type_id,
            self.active_stream_id.max(1),
            BytesMut::from(&frame.payload[..]),
        );
        self.write_message(message).await
    }

    fn stop_stream(&mut self) {
        match self.state {
            SessionState::Publishing => {
                if let Some(stream_key) = self.stream_key.take() {
                    self.registry.unpublish(&stream_key, self.id);
                    self.sink.handle(SessionEvent::Unpublished {
                        session_id: self.id,
                        stream_key,
                    });
                }
                self.state = SessionState::Connected;
            }
            SessionState::Playing => {
                self.media_rx = None;
                if let Some(stream_key) = self.stream_key.take() {
                    self.sink.handle(SessionEvent::Stopped {
                        session_id: self.id,
                        stream_key,
                    });
                }
                self.state = SessionState::Connected;
            }
            _ => {}
        }
    }

    fn cleanup(&mut self) {
        self.stop_stream();
    }

    fn qualified_key(&self, stream_name: &str) -> String {
        if self.app_name.is_empty() {
            stream_name.to_string()
        } else {
            format!("{}/{}", self.app_name, stream_name)
        }
    }

    async fn write_command(&mut self, payload: BytesMut) -> Result<(), SessionError> {
        let length = payload.len() as u32;
        let message = ChunkInfo::new(
            COMMAND_CSID,
            0,
            0,
            length,
            msg_type_id::COMMAND_AMF0,
            0,
            payload,
        );
        self.write_message(message).await
    }

    async fn write_status(
        &mut self,
        level: StatusLevel,
        code: &str,
        description: &str,
    ) -> Result<(), SessionError> {
        let payload = netstream::on_status(level, code, description)?;
        let length = payload.len() as u32;
        let message = ChunkInfo::new(
            COMMAND_CSID,
            0,
            0,
            length,
            msg_type_id::COMMAND_AMF0,
            self.active_stream_id,
            payload,
        );
        self.write_message(message).await
    }

    async fn write_message(&mut self, message: ChunkInfo) -> Result<(), SessionError> {
        let mut writer = BytesWriter::new();
        self.packetizer.write_message(&message, &mut writer)?;
        self.socket.write_all(&writer.extract_current_bytes()).await?;
        self.socket.flush().await?;
        Ok(())
    }
}
