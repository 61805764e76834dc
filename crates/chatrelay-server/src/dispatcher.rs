//! Per-session command dispatch.
//!
//! A session starts unauthenticated and becomes authenticated on the first
//! accepted `HI`; it never goes back. Only a failed reply to the session's
//! own connection is returned as an error, which ends the session.

use crate::connection::{ConnectionHandle, SessionId};
use crate::registry::ConnectionRegistry;
use chatrelay_core::{build_msg, Command, RelayResult, Response};
use std::sync::Arc;
use tracing::{debug, info, warn};

const HI_REQUIRED: &str = "HI required";
const ALREADY_AUTHENTICATED: &str = "already authenticated";
const UNKNOWN_RECEIVER: &str = "unknown receiver of message";
const UNKNOWN_COMMAND: &str = "unknown command";

/// Authentication state of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated { name: String },
}

/// Interprets commands for one connection against the shared registry.
pub struct Dispatcher {
    conn: ConnectionHandle,
    registry: Arc<ConnectionRegistry>,
    state: SessionState,
}

impl Dispatcher {
    pub fn new(conn: ConnectionHandle, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            conn,
            registry,
            state: SessionState::Unauthenticated,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.conn.id()
    }

    #[cfg(test)]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Handle one frame payload received from this session's connection.
    pub async fn dispatch(&mut self, payload: &[u8]) -> RelayResult<()> {
        let command = match Command::parse(payload) {
            Ok(command) => command,
            Err(e) => {
                debug!(session = self.session_id(), error = %e, "unparseable command");
                return self.reply(Response::error(UNKNOWN_COMMAND)).await;
            }
        };

        let sender = match &self.state {
            SessionState::Unauthenticated => None,
            SessionState::Authenticated { name } => Some(name.clone()),
        };

        let response = match sender {
            None => match command {
                Command::Hi { name } => Some(self.authenticate(name).await),
                _ => Some(Response::error(HI_REQUIRED)),
            },
            Some(from) => self.handle_authenticated(&from, command).await,
        };

        match response {
            Some(response) => self.reply(response).await,
            None => Ok(()),
        }
    }

    async fn authenticate(&mut self, name: String) -> Response {
        match self.registry.try_register(&self.conn, &name).await {
            Ok(()) => {
                let response = Response::ok(name.as_str());
                self.state = SessionState::Authenticated { name };
                response
            }
            Err(e) => {
                debug!(session = self.session_id(), name = %name, reason = %e, "HI rejected");
                Response::error(e.to_string())
            }
        }
    }

    async fn handle_authenticated(&self, from: &str, command: Command) -> Option<Response> {
        match command {
            Command::Hi { .. } => Some(Response::error(ALREADY_AUTHENTICATED)),
            Command::Clients => {
                let names = self.registry.snapshot_names().await;
                Some(Response::ok(names.join("\n")))
            }
            Command::Msg { to, text } => Some(self.relay(from, to, &text).await),
            Command::Pong => None,
        }
    }

    /// Deliver `text` to `to`. A failed delivery is only logged.
    async fn relay(&self, from: &str, to: String, text: &str) -> Response {
        let Some(recipient) = self.registry.lookup_conn_by_name(&to).await else {
            return Response::error(UNKNOWN_RECEIVER);
        };

        match recipient.write_frame(&build_msg(from, text)).await {
            Ok(()) => info!(from = %from, to = %to, "message relayed"),
            Err(e) => warn!(from = %from, to = %to, error = %e, "send message to receiver"),
        }
        Response::ok(to)
    }

    async fn reply(&self, response: Response) -> RelayResult<()> {
        self.conn.write_frame(&response.to_payload()).await
    }
}
