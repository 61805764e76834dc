//! Length-prefixed framing over a raw byte stream.
//!
//! Wire format: `[2-byte big-endian length][payload]`

use crate::error::{RelayError, RelayResult};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

/// Largest payload the 16-bit length prefix can describe.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Size of the length prefix on the wire.
pub const PREFIX_LEN: usize = 2;

/// Read deadlines applied by [`FrameReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    /// Deadline for the 2-byte length prefix.
    pub read_length_timeout: Duration,
    /// Deadline for the payload that follows the prefix.
    pub read_packet_timeout: Duration,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            read_length_timeout: Duration::from_secs(2),
            read_packet_timeout: Duration::from_secs(2),
        }
    }
}

/// Prepend the length prefix to `payload`.
pub fn encode_frame(payload: &[u8]) -> RelayResult<Vec<u8>> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(RelayError::FrameTooLarge(payload.len()));
    }

    let len = payload.len() as u16;
    let mut frame = Vec::with_capacity(PREFIX_LEN + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Reading half of a framed connection.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    config: CodecConfig,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, config: CodecConfig) -> Self {
        Self { inner, config }
    }

    /// Read one complete frame and return its payload.
    ///
    /// `Timeout` is only returned when the prefix deadline passes before any
    /// byte arrived. Once the prefix is consumed, any shortfall in the payload
    /// is `BadPacket`: a retry would read payload bytes as a new prefix.
    pub async fn read_frame(&mut self) -> RelayResult<Vec<u8>> {
        let mut len_buf = [0u8; PREFIX_LEN];
        read_unit(
            &mut self.inner,
            &mut len_buf,
            self.config.read_length_timeout,
            Unit::Prefix,
        )
        .await?;

        let len = u16::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        read_unit(
            &mut self.inner,
            &mut payload,
            self.config.read_packet_timeout,
            Unit::Payload,
        )
        .await?;

        Ok(payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Prefix,
    Payload,
}

impl Unit {
    fn describe(self) -> &'static str {
        match self {
            Unit::Prefix => "length prefix",
            Unit::Payload => "payload",
        }
    }
}

/// Fill `buf` completely before `timeout` elapses.
async fn read_unit<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    timeout: Duration,
    unit: Unit,
) -> RelayResult<()> {
    let deadline = Instant::now() + timeout;
    let what = unit.describe();
    let mut filled = 0;

    while filled < buf.len() {
        match tokio::time::timeout_at(deadline, reader.read(&mut buf[filled..])).await {
            Err(_) if filled == 0 && unit == Unit::Prefix => return Err(RelayError::Timeout),
            Err(_) => {
                return Err(RelayError::BadPacket(format!(
                    "{what}: {filled} of {} bytes before deadline",
                    buf.len()
                )));
            }
            Ok(Ok(0)) if filled == 0 => return Err(RelayError::Closed),
            Ok(Ok(0)) => {
                return Err(RelayError::BadPacket(format!(
                    "{what}: {filled} of {} bytes before EOF",
                    buf.len()
                )));
            }
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => return Err(e.into()),
        }
    }

    Ok(())
}

/// Writing half of a framed connection.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write `payload` as a single frame with one write call.
    ///
    /// A short write is reported as `Mismatch`; the remainder is not retried.
    pub async fn write_frame(&mut self, payload: &[u8]) -> RelayResult<()> {
        let frame = encode_frame(payload)?;
        let written = self.inner.write(&frame).await?;
        if written != frame.len() {
            return Err(RelayError::Mismatch {
                expected: frame.len(),
                written,
            });
        }
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the underlying stream for writing.
    pub async fn shutdown(&mut self) -> RelayResult<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
