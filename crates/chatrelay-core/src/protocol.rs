//! Space-delimited command language carried inside frames.
//!
//! Client to server: `HI <name>`, `CLIENTS`, `MSG <to> <text>`, `PONG`.
//! Server to client: `OK <param>`, `ERROR <param>`, `MSG <from> <text>`, `PING`.

use crate::error::{RelayError, RelayResult};
use std::fmt;

/// Separator between a keyword and its parameters.
pub const DELIMITER: char = ' ';

/// Name reserved for the server itself; no client may register it.
pub const SYSTEM_NAME: &str = "SYSTEM";

/// Payload of the unsolicited keepalive frame.
pub const PING: &[u8] = b"PING";

/// Keyword of an incoming command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Hi,
    Clients,
    Msg,
    Pong,
    Unknown,
}

impl CommandKind {
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "HI" => CommandKind::Hi,
            "CLIENTS" => CommandKind::Clients,
            "MSG" => CommandKind::Msg,
            "PONG" => CommandKind::Pong,
            _ => CommandKind::Unknown,
        }
    }

    /// Number of parameters following the keyword.
    pub fn param_count(self) -> usize {
        match self {
            CommandKind::Hi => 1,
            CommandKind::Msg => 2,
            CommandKind::Clients | CommandKind::Pong | CommandKind::Unknown => 0,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandKind::Hi => "HI",
            CommandKind::Clients => "CLIENTS",
            CommandKind::Msg => "MSG",
            CommandKind::Pong => "PONG",
            CommandKind::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Split a payload into its keyword and parameters.
///
/// Only the first `param_count` delimiters are significant; the last
/// parameter keeps any further spaces verbatim.
pub fn parse(payload: &[u8]) -> RelayResult<(CommandKind, Vec<String>)> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| RelayError::Malformed(format!("payload is not UTF-8: {e}")))?;

    let keyword = text.split(DELIMITER).next().unwrap_or_default();
    let kind = CommandKind::from_keyword(keyword);
    if kind == CommandKind::Unknown {
        return Err(RelayError::UnknownCommand(keyword.to_string()));
    }

    let count = kind.param_count();
    if count == 0 {
        return Ok((kind, Vec::new()));
    }

    let parts: Vec<&str> = text.splitn(count + 1, DELIMITER).collect();
    if parts.len() != count + 1 {
        return Err(RelayError::Malformed(format!(
            "{kind} expects {count} parameter(s)"
        )));
    }

    let params = parts[1..].iter().map(|p| p.to_string()).collect();
    Ok((kind, params))
}

/// A typed command ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Hi { name: String },
    Clients,
    Msg { to: String, text: String },
    Pong,
}

impl Command {
    pub fn parse(payload: &[u8]) -> RelayResult<Self> {
        let (kind, params) = parse(payload)?;
        let mut params = params.into_iter();
        let mut next = || params.next().unwrap_or_default();

        let command = match kind {
            CommandKind::Hi => Command::Hi { name: next() },
            CommandKind::Clients => Command::Clients,
            CommandKind::Msg => Command::Msg {
                to: next(),
                text: next(),
            },
            CommandKind::Pong => Command::Pong,
            CommandKind::Unknown => return Err(RelayError::UnknownCommand(kind.to_string())),
        };
        Ok(command)
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Hi { .. } => CommandKind::Hi,
            Command::Clients => CommandKind::Clients,
            Command::Msg { .. } => CommandKind::Msg,
            Command::Pong => CommandKind::Pong,
        }
    }
}

/// Reply sent back to the connection that issued a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(String),
    Error(String),
}

impl Response {
    pub fn ok(param: impl Into<String>) -> Self {
        Response::Ok(param.into())
    }

    pub fn error(param: impl Into<String>) -> Self {
        Response::Error(param.into())
    }

    /// Serialize as `OK <param>` or `ERROR <param>`.
    pub fn to_payload(&self) -> Vec<u8> {
        let (keyword, param) = match self {
            Response::Ok(p) => ("OK", p),
            Response::Error(p) => ("ERROR", p),
        };
        format!("{keyword}{DELIMITER}{param}").into_bytes()
    }
}

/// Serialize a relayed message as `MSG <from> <text>`.
pub fn build_msg(from: &str, text: &str) -> Vec<u8> {
    format!("MSG{DELIMITER}{from}{DELIMITER}{text}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hi() {
        let (kind, params) = parse(b"HI Tim").unwrap();
        assert_eq!(kind, CommandKind::Hi);
        assert_eq!(params, vec!["Tim"]);
    }

    #[test]
    fn parse_hi_keeps_spaces_in_name() {
        let (_, params) = parse(b"HI Tim Smith").unwrap();
        assert_eq!(params, vec!["Tim Smith"]);
    }

    #[test]
    fn parse_clients_has_no_params() {
        let (kind, params) = parse(b"CLIENTS").unwrap();
        assert_eq!(kind, CommandKind::Clients);
        assert!(params.is_empty());
    }

    #[test]
    fn parse_msg_keeps_text_verbatim() {
        let (kind, params) = parse(b"MSG bob hello world").unwrap();
        assert_eq!(kind, CommandKind::Msg);
        assert_eq!(params, vec!["bob", "hello world"]);

        let (_, params) = parse(b"MSG bob  two  spaces ").unwrap();
        assert_eq!(params, vec!["bob", " two  spaces "]);
    }

    #[test]
    fn parse_pong() {
        assert_eq!(parse(b"PONG").unwrap(), (CommandKind::Pong, Vec::new()));
    }

    #[test]
    fn parse_rejects_empty_and_unknown() {
        assert!(matches!(parse(b""), Err(RelayError::UnknownCommand(_))));
        assert!(matches!(parse(b"BOGUS x"), Err(RelayError::UnknownCommand(_))));
        assert!(matches!(parse(b"hi Tim"), Err(RelayError::UnknownCommand(_))));
    }

    #[test]
    fn parse_rejects_missing_params() {
        assert!(matches!(parse(b"HI"), Err(RelayError::Malformed(_))));
        assert!(matches!(parse(b"MSG bob"), Err(RelayError::Malformed(_))));
    }

    #[test]
    fn parse_rejects_invalid_utf8() {
        assert!(matches!(parse(&[0x48, 0x49, 0x20, 0xFF]), Err(RelayError::Malformed(_))));
    }

    #[test]
    fn typed_command() {
        assert_eq!(
            Command::parse(b"MSG client2 Hi client1 !!!").unwrap(),
            Command::Msg {
                to: "client2".into(),
                text: "Hi client1 !!!".into()
            }
        );
        assert_eq!(Command::parse(b"HI Tim").unwrap().kind(), CommandKind::Hi);
        assert_eq!(Command::parse(b"PONG").unwrap(), Command::Pong);
    }

    #[test]
    fn responses_and_msg() {
        assert_eq!(Response::ok("client2").to_payload(), b"OK client2".to_vec());
        assert_eq!(
            Response::error("HI required").to_payload(),
            b"ERROR HI required".to_vec()
        );
        assert_eq!(build_msg("client1", "hi there"), b"MSG client1 hi there".to_vec());
    }
}
