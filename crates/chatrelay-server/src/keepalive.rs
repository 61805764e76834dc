//! Periodic `PING` broadcast to every registered connection.
//!
//! Writes are fire-and-forget: each one runs in its own task so a stalled
//! connection cannot delay the others, and failures are only logged. A
//! connection whose write gate is busy is skipped for the round, so at most
//! one ping per connection is ever pending. `PONG` replies are not tracked.

use crate::registry::ConnectionRegistry;
use chatrelay_core::PING;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

pub struct KeepAliveService {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    tracker: TaskTracker,
}

impl KeepAliveService {
    /// Per-connection writes are spawned on `tracker` so shutdown can wait
    /// for them.
    pub fn new(registry: Arc<ConnectionRegistry>, interval: Duration, tracker: TaskTracker) -> Self {
        Self {
            registry,
            interval,
            tracker,
        }
    }

    /// Issue one round of pings. Returns the number of writes started.
    pub async fn tick(&self) -> usize {
        let conns = self.registry.snapshot_connections().await;
        let mut started = 0;

        for conn in conns {
            let Some(slot) = conn.try_reserve() else {
                trace!(session = conn.id(), "write gate busy, skipping ping");
                continue;
            };
            let registry = Arc::clone(&self.registry);
            self.tracker.spawn(async move {
                let id = slot.id();
                if let Err(e) = slot.write_frame(PING).await {
                    let name = registry.lookup_name_by_conn(id).await;
                    debug!(session = id, name = ?name, error = %e, "keepalive write failed");
                }
            });
            started += 1;
        }
        started
    }

    /// Tick every interval until `cancel` fires. The first round goes out
    /// one interval after start.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_ms = self.interval.as_millis() as u64, "keepalive started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let sent = self.tick().await;
                    debug!(sent, "keepalive round");
                }
            }
        }
        info!("keepalive stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionHandle;
    use chatrelay_core::{CodecConfig, FrameReader};

    const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn tick_pings_every_registered_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut readers = Vec::new();
        for (id, name) in [(1, "client1"), (2, "client2")] {
            let (server_side, client_side) = tokio::io::duplex(1024);
            let conn = ConnectionHandle::new(id, server_side, WRITE_TIMEOUT);
            registry.try_register(&conn, name).await.unwrap();
            readers.push(FrameReader::new(client_side, CodecConfig::default()));
        }

        let tracker = TaskTracker::new();
        let service = KeepAliveService::new(registry, Duration::from_secs(1), tracker.clone());
        assert_eq!(service.tick().await, 2);

        for reader in &mut readers {
            assert_eq!(reader.read_frame().await.unwrap(), PING.to_vec());
        }
        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test]
    async fn closed_connection_does_not_disturb_others() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (dead_side, _dead_client) = tokio::io::duplex(1024);
        let dead = ConnectionHandle::new(1, dead_side, WRITE_TIMEOUT);
        registry.try_register(&dead, "gone").await.unwrap();
        dead.close().await;

        let (live_side, live_client) = tokio::io::duplex(1024);
        let live = ConnectionHandle::new(2, live_side, WRITE_TIMEOUT);
        registry.try_register(&live, "here").await.unwrap();

        let tracker = TaskTracker::new();
        let service = KeepAliveService::new(registry, Duration::from_secs(1), tracker.clone());
        service.tick().await;

        let mut reader = FrameReader::new(live_client, CodecConfig::default());
        assert_eq!(reader.read_frame().await.unwrap(), PING.to_vec());
        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test]
    async fn stuck_connection_holds_at_most_one_pending_ping() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (server_side, client_side) = tokio::io::duplex(8);
        let conn = ConnectionHandle::new(1, server_side, Duration::from_secs(30));
        registry.try_register(&conn, "sleepy").await.unwrap();
        // Fill the pipe; nobody reads it.
        conn.write_frame(b"FILLER").await.unwrap();

        let tracker = TaskTracker::new();
        let service = KeepAliveService::new(registry, Duration::from_secs(1), tracker.clone());
        assert_eq!(service.tick().await, 1);
        for _ in 0..100 {
            assert_eq!(service.tick().await, 0);
            tokio::task::yield_now().await;
        }
        assert_eq!(tracker.len(), 1);

        // Dropping the peer fails the pending write.
        drop(client_side);
        tracker.close();
        tokio::time::timeout(Duration::from_secs(1), tracker.wait())
            .await
            .expect("pending ping did not finish");
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let registry = Arc::new(ConnectionRegistry::new());
        let service = KeepAliveService::new(registry, Duration::from_millis(10), TaskTracker::new());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(service.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("keepalive did not stop")
            .unwrap();
    }
}
