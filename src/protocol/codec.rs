//! Line codec for the wire protocol
//!
//! Every exchange is one JSON object per direction, newline-terminated.
//! The reader caps line length so a misbehaving peer cannot grow the buffer
//! without bound.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::MAX_LINE_BYTES;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed before a request line arrived")]
    UnexpectedEof,

    #[error("line exceeds {} bytes", MAX_LINE_BYTES)]
    LineTooLong,
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Read one newline-terminated JSON value.
///
/// A line terminated by EOF instead of '\n' is still accepted if it parses;
/// the original driver closed its write side without always sending the
/// terminator.
pub async fn read_json_line<R, T>(reader: &mut R) -> CodecResult<T>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    let mut limited = reader.take((MAX_LINE_BYTES + 1) as u64);
    let n = limited.read_line(&mut line).await?;

    if n == 0 {
        return Err(CodecError::UnexpectedEof);
    }
    if n > MAX_LINE_BYTES {
        return Err(CodecError::LineTooLong);
    }

    Ok(serde_json::from_str(line.trim_end())?)
}

/// Serialize `value` as a single JSON line and flush it.
pub async fn write_json_line<W, T>(writer: &mut W, value: &T) -> CodecResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
