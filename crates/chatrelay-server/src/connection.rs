//! Shared write side of one client connection.
//!
//! A connection receives frames from its own session (replies, relayed
//! messages from other sessions) and from the keepalive broadcaster. The
//! write gate serializes those so frames never interleave on the wire.
//!
//! Every write is bounded by a deadline that covers both waiting for the gate
//! and writing the frame. A write that times out after it started may have
//! left half a frame on the wire, so the connection is closed.

use chatrelay_core::{FrameWriter, RelayError, RelayResult};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Opaque identifier assigned to a session when its connection is accepted.
pub type SessionId = u64;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// `None` once the connection has been closed.
type Gate = Option<FrameWriter<BoxedWriter>>;

/// Cloneable handle for writing frames to one connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: SessionId,
    writer: Arc<Mutex<Gate>>,
    write_timeout: Duration,
}

impl ConnectionHandle {
    pub fn new<W>(id: SessionId, writer: W, write_timeout: Duration) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let boxed: BoxedWriter = Box::new(writer);
        Self {
            id,
            writer: Arc::new(Mutex::new(Some(FrameWriter::new(boxed)))),
            write_timeout,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Write one frame. The gate is held only for this frame.
    pub async fn write_frame(&self, payload: &[u8]) -> RelayResult<()> {
        let deadline = Instant::now() + self.write_timeout;
        let guard = tokio::time::timeout_at(deadline, self.writer.clone().lock_owned())
            .await
            .map_err(|_| RelayError::WriteTimeout)?;
        write_gated(self.id, guard, payload, deadline).await
    }

    /// Take the gate only if nobody holds it.
    ///
    /// The returned slot can be moved into a task; while it is alive every
    /// other writer waits, and further `try_reserve` calls return `None`.
    pub fn try_reserve(&self) -> Option<WriteSlot> {
        let guard = self.writer.clone().try_lock_owned().ok()?;
        Some(WriteSlot {
            id: self.id,
            guard,
            write_timeout: self.write_timeout,
        })
    }

    /// Shut down the write side. Returns `false` if it was already closed.
    pub async fn close(&self) -> bool {
        let Some(mut writer) = self.writer.lock().await.take() else {
            return false;
        };
        if let Err(e) = writer.shutdown().await {
            debug!(session = self.id, error = %e, "shutdown on close failed");
        }
        true
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle").field("id", &self.id).finish()
    }
}

/// Exclusive, already acquired right to write one frame.
pub struct WriteSlot {
    id: SessionId,
    guard: OwnedMutexGuard<Gate>,
    write_timeout: Duration,
}

impl WriteSlot {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub async fn write_frame(self, payload: &[u8]) -> RelayResult<()> {
        let deadline = Instant::now() + self.write_timeout;
        write_gated(self.id, self.guard, payload, deadline).await
    }
}

async fn write_gated(
    id: SessionId,
    mut guard: OwnedMutexGuard<Gate>,
    payload: &[u8],
    deadline: Instant,
) -> RelayResult<()> {
    let Some(writer) = guard.as_mut() else {
        return Err(RelayError::Closed);
    };

    match tokio::time::timeout_at(deadline, writer.write_frame(payload)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(session = id, "write deadline passed, closing connection");
            // Dropping the writer closes the socket's write half.
            guard.take();
            Err(RelayError::WriteTimeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::{CodecConfig, FrameReader};

    const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn concurrent_writers_never_interleave() {
        let (server_side, client_side) = tokio::io::duplex(1 << 20);
        let conn = ConnectionHandle::new(1, server_side, WRITE_TIMEOUT);

        let mut tasks = Vec::new();
        for i in 0..16u8 {
            let conn = conn.clone();
            tasks.push(tokio::spawn(async move {
                let payload = vec![i; 4096];
                conn.write_frame(&payload).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mut reader = FrameReader::new(client_side, CodecConfig::default());
        for _ in 0..16 {
            let frame = reader.read_frame().await.unwrap();
            assert_eq!(frame.len(), 4096);
            assert!(frame.iter().all(|b| *b == frame[0]));
        }
    }

    #[tokio::test]
    async fn close_happens_once_and_blocks_writes() {
        let (server_side, client_side) = tokio::io::duplex(64);
        let conn = ConnectionHandle::new(7, server_side, WRITE_TIMEOUT);

        assert!(conn.close().await);
        assert!(!conn.close().await);
        assert!(matches!(conn.write_frame(b"PING").await, Err(RelayError::Closed)));

        let mut reader = FrameReader::new(client_side, CodecConfig::default());
        assert!(matches!(reader.read_frame().await, Err(RelayError::Closed)));
    }

    #[tokio::test]
    async fn stalled_peer_times_out_and_is_closed() {
        // Nobody reads the client side, so the second frame cannot fit.
        let (server_side, _client_side) = tokio::io::duplex(8);
        let conn = ConnectionHandle::new(3, server_side, Duration::from_millis(50));

        conn.write_frame(b"PING").await.unwrap();
        let started = std::time::Instant::now();
        let err = conn.write_frame(b"stuck frame").await.unwrap_err();
        assert!(matches!(err, RelayError::WriteTimeout));
        assert!(started.elapsed() < Duration::from_secs(1));

        assert!(matches!(conn.write_frame(b"PING").await, Err(RelayError::Closed)));
        assert!(!conn.close().await);
    }

    #[tokio::test]
    async fn waiting_for_a_held_gate_is_bounded() {
        let (server_side, _client_side) = tokio::io::duplex(64);
        let conn = ConnectionHandle::new(4, server_side, Duration::from_millis(50));

        let slot = conn.try_reserve().unwrap();
        assert!(conn.try_reserve().is_none());
        assert!(matches!(conn.write_frame(b"x").await, Err(RelayError::WriteTimeout)));

        slot.write_frame(b"PING").await.unwrap();
        assert!(conn.try_reserve().is_some());
    }
}
