//! Newline-delimited JSON framing over TCP.
//!
//! One frame is one JSON object on one `\n`-terminated line. These helpers
//! are the only place the crate touches raw socket bytes; everything above
//! works with [`String`] lines or serde types.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Reads one frame line from the stream.
///
/// Returns `Ok(None)` on a clean EOF. The trailing newline (and any `\r`)
/// is stripped from the returned payload.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end().to_string()))
}

/// Writes one already-serialized frame line followed by `\n`.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Serializes `frame` to JSON and writes it as one line.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let line = serde_json::to_string(frame)?;
    write_line(writer, &line).await
}
