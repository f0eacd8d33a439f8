//! JSON framing over a byte stream.
//!
//! The TCP protocol has no length prefix: a JSON value is self-delimiting, so
//! the reader accumulates bytes and lets the streaming deserializer decide
//! where one frame ends and the next begins. Whitespace between frames is
//! allowed and ignored.

use bytes::{Buf, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::utils::error::FrameError;

const READ_CHUNK: usize = 4 * 1024;

/// Incremental JSON frame reader over any byte stream.
pub struct JsonReader<R> {
    io: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> JsonReader<R> {
    pub fn new(io: R) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Reads the next frame.
    ///
    /// `Ok(None)` is a clean end of stream (only trailing whitespace left);
    /// an error is either malformed input or the connection dying mid-frame.
    pub async fn next<T: DeserializeOwned>(&mut self) -> Result<Option<T>, FrameError> {
        loop {
            let parsed = {
                let mut frames = serde_json::Deserializer::from_slice(&self.buf).into_iter::<T>();
                match frames.next() {
                    Some(Ok(frame)) => Some((frame, frames.byte_offset())),
                    // an eof error means the buffered bytes stop mid-value
                    Some(Err(e)) if e.is_eof() => None,
                    Some(Err(e)) => return Err(FrameError::Decode(e)),
                    None => None,
                }
            };
            if let Some((frame, consumed)) = parsed {
                self.buf.advance(consumed);
                return Ok(Some(frame));
            }
            if self.io.read_buf(&mut self.buf).await? == 0 {
                if self.buf.iter().all(|b| b.is_ascii_whitespace()) {
                    return Ok(None);
                }
                return Err(FrameError::Truncated);
            }
        }
    }
}

/// Writes one frame followed by a newline, matching the line-oriented output
/// of the stock JSON encoders clients usually pair with this protocol.
pub async fn write_frame<W, T>(io: &mut W, frame: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut out = serde_json::to_vec(frame)?;
    out.push(b'\n');
    io.write_all(&out).await?;
    io.flush().await?;
    Ok(())
}
