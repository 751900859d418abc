//! RTMP TCP accept loop

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::StreamRegistry;
use crate::session::{ServerSession, SessionConfig};
use crate::SessionEventSink;

/// Default max concurrent RTMP connections.
const DEFAULT_MAX_CONNECTIONS: usize = 1000;

pub struct RtmpServer {
    address: String,
    registry: Arc<StreamRegistry>,
    sink: Arc<dyn SessionEventSink>,
    session_config: SessionConfig,
    max_connections: usize,
}

impl RtmpServer {
    #[must_use]
    pub fn new(
        address: String,
        registry: Arc<StreamRegistry>,
        sink: Arc<dyn SessionEventSink>,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            address,
            registry,
            sink,
            session_config,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    #[must_use]
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Accept connections until the token is cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), std::io::Error> {
        let socket_addr: SocketAddr = self.address.parse().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid address '{}': {e}", self.address),
            )
        })?;
        let listener = TcpListener::bind(&socket_addr).await?;
        let active_connections = Arc::new(AtomicUsize::new(0));

        info!(
            "RTMP server listening on tcp://{socket_addr} (max_connections: {})",
            self.max_connections
        );
        loop {
            let accepted = tokio::select! {
                () = cancel.cancelled() => {
                    info!("RTMP server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };
            let (tcp_stream, remote_addr) = accepted?;

            let current = active_connections.load(Ordering::Relaxed);
            if current >= self.max_connections {
                warn!(
                    "RTMP connection rejected from {remote_addr}: at capacity ({current}/{})",
                    self.max_connections,
                );
                drop(tcp_stream);
                continue;
            }

            active_connections.fetch_add(1, Ordering::Relaxed);
            let conn_counter = Arc::clone(&active_connections);

            let mut session = ServerSession::new(
                tcp_stream,
                Arc::clone(&self.registry),
                Arc::clone(&self.sink),
                self.session_config.clone(),
            );
            tokio::spawn(async move {
                if let Err(err) = session.run().await {
                    info!(
                        session_id = %session.id(),
                        remote_addr = %remote_addr,
                        stream_key = session.stream_key().unwrap_or(""),
                        "session ended: {err}"
                    );
                }
                conn_counter.fetch_sub(1, Ordering::Relaxed);
            });
        }
    }
}
