//! chatrelay-core: framing and command protocol for the chat relay.
//!
//! Provides the 16-bit length-prefixed frame codec, the space-delimited
//! command language, and the shared error type.

pub mod codec;
pub mod error;
pub mod protocol;

// Re-export commonly used items at crate root.
pub use codec::{encode_frame, CodecConfig, FrameReader, FrameWriter, MAX_FRAME_LEN};
pub use error::{RelayError, RelayResult};
pub use protocol::{build_msg, parse, Command, CommandKind, Response, PING, SYSTEM_NAME};
