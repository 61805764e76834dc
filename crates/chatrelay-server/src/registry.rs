//! Name registry for authenticated sessions.
//!
//! Keeps two mappings, name to connection and session to name, that are
//! always changed together under one lock. The lock is never held across
//! socket I/O; callers get cloned handles and write after it is released.

use crate::connection::{ConnectionHandle, SessionId};
use chatrelay_core::SYSTEM_NAME;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Why a registration was refused. The registry is unchanged in every case.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("not possible to take SYSTEM name")]
    Reserved,

    #[error("empty name")]
    EmptyName,

    #[error("the name already taken")]
    NameTaken,

    #[error("already authenticated")]
    AlreadyBound,
}

#[derive(Default)]
struct Bindings {
    by_name: HashMap<String, ConnectionHandle>,
    by_session: HashMap<SessionId, String>,
}

/// Registry of named, live connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    bindings: RwLock<Bindings>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `conn`.
    ///
    /// Re-registering the name a connection already holds succeeds without
    /// change; a connection can never hold two names.
    pub async fn try_register(
        &self,
        conn: &ConnectionHandle,
        name: &str,
    ) -> Result<(), RegistryError> {
        if name == SYSTEM_NAME {
            return Err(RegistryError::Reserved);
        }
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }

        let mut bindings = self.bindings.write().await;
        if let Some(existing) = bindings.by_name.get(name) {
            if existing.id() == conn.id() {
                return Ok(());
            }
            return Err(RegistryError::NameTaken);
        }
        if bindings.by_session.contains_key(&conn.id()) {
            return Err(RegistryError::AlreadyBound);
        }

        bindings.by_name.insert(name.to_string(), conn.clone());
        bindings.by_session.insert(conn.id(), name.to_string());
        info!(session = conn.id(), name = %name, "client registered");
        Ok(())
    }

    /// Remove both bindings of `session`, returning the name it held.
    pub async fn unregister(&self, session: SessionId) -> Option<String> {
        let mut bindings = self.bindings.write().await;
        let name = bindings.by_session.remove(&session)?;
        bindings.by_name.remove(&name);
        debug!(session, name = %name, "client unregistered");
        Some(name)
    }

    pub async fn lookup_conn_by_name(&self, name: &str) -> Option<ConnectionHandle> {
        self.bindings.read().await.by_name.get(name).cloned()
    }

    pub async fn lookup_name_by_conn(&self, session: SessionId) -> Option<String> {
        self.bindings.read().await.by_session.get(&session).cloned()
    }

    /// Copy of all bound names, in no particular order.
    pub async fn snapshot_names(&self) -> Vec<String> {
        self.bindings.read().await.by_name.keys().cloned().collect()
    }

    /// Copy of all bound connections, in no particular order.
    pub async fn snapshot_connections(&self) -> Vec<ConnectionHandle> {
        self.bindings.read().await.by_name.values().cloned().collect()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.bindings.read().await.by_name.len()
    }
}
