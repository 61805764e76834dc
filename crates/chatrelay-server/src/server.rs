//! Core server: accepts connections and runs one dispatch loop per session.
//!
//! Owns the listener, the connection registry and the keepalive service, and
//! coordinates shutdown: cancel every loop, close the listener, then wait for
//! all in-flight sessions and the keepalive task to finish.

use crate::config::ServerConfig;
use crate::connection::{ConnectionHandle, SessionId};
use crate::dispatcher::Dispatcher;
use crate::error::{ServerError, ServerResult};
use crate::keepalive::KeepAliveService;
use crate::registry::ConnectionRegistry;
use chatrelay_core::{CodecConfig, FrameReader, RelayError, RelayResult};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// The chat relay server instance.
pub struct ChatServer {
    listener: TcpListener,
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    /// Cancelled to begin shutdown.
    shutdown: CancellationToken,
    /// Tracks session tasks, keepalive and keepalive writes.
    tracker: TaskTracker,
    next_session_id: AtomicU64,
}

impl ChatServer {
    /// Bind the listener. Failing here is fatal to startup.
    pub async fn bind(config: ServerConfig) -> ServerResult<Self> {
        let listener = TcpListener::bind(&config.bind)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind.clone(),
                source,
            })?;

        Ok(Self {
            listener,
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            next_session_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Token that stops [`ChatServer::run`] when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[cfg(test)]
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Accept connections until the shutdown token fires, then wait for every
    /// spawned task to finish.
    pub async fn run(self) {
        let keepalive = KeepAliveService::new(
            self.registry.clone(),
            self.config.keepalive_interval,
            self.tracker.clone(),
        );
        self.tracker.spawn(keepalive.run(self.shutdown.clone()));

        info!(addr = %self.config.bind, "chatrelay-server ready");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => self.spawn_session(stream, remote),
                    Err(e) => error!(error = %e, "accept error"),
                },
            }
        }

        info!("shutting down, waiting for sessions");
        let ChatServer { listener, tracker, .. } = self;
        drop(listener);
        tracker.close();
        tracker.wait().await;
        info!("chatrelay-server stopped");
    }

    fn spawn_session(&self, stream: TcpStream, remote: SocketAddr) {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = stream.set_nodelay(true) {
            debug!(session = id, error = %e, "set_nodelay failed");
        }

        let registry = self.registry.clone();
        let codec = self.config.codec;
        let write_timeout = self.config.write_timeout;
        let shutdown = self.shutdown.clone();
        self.tracker.spawn(async move {
            run_session(id, stream, remote, registry, codec, write_timeout, shutdown).await;
        });
    }
}

/// Drive one connection from accept to teardown.
///
/// Teardown runs on every exit path, exactly once: the session's registry
/// bindings are removed, then its connection is closed.
async fn run_session(
    id: SessionId,
    stream: TcpStream,
    remote: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    codec: CodecConfig,
    write_timeout: Duration,
    shutdown: CancellationToken,
) {
    info!(session = id, remote = %remote, "session started");

    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half, codec);
    let conn = ConnectionHandle::new(id, write_half, write_timeout);
    let mut dispatcher = Dispatcher::new(conn.clone(), registry.clone());

    let result = session_loop(&mut reader, &mut dispatcher, &shutdown).await;

    let name = registry.unregister(id).await;
    conn.close().await;

    match result {
        Ok(()) => info!(session = id, name = ?name, "session closed"),
        Err(e) => warn!(session = id, name = ?name, error = %e, "session terminated"),
    }
}

/// Read and dispatch frames until the peer leaves, a fatal error occurs, or
/// shutdown is requested. Read timeouts just loop. Shutdown also interrupts a
/// dispatch that is waiting on another connection's write gate.
async fn session_loop<R: AsyncRead + Unpin>(
    reader: &mut FrameReader<R>,
    dispatcher: &mut Dispatcher,
    shutdown: &CancellationToken,
) -> RelayResult<()> {
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            frame = reader.read_frame() => frame,
        };

        match frame {
            Ok(payload) => tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                handled = dispatcher.dispatch(&payload) => handled?,
            },
            Err(RelayError::Timeout) => continue,
            Err(RelayError::Closed) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}
