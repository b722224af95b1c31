use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::message::{Headers, Message};

/// Largest frame a stream socket will accept (100 MiB)
pub const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

#[derive(Serialize)]
struct FrameRef<'a> {
    headers: &'a Headers,
    data: &'a [u8],
}

#[derive(Deserialize)]
struct Frame {
    headers: Headers,
    data: Vec<u8>,
}

/// Write one message with a 4-byte big-endian length prefix
pub(crate) async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = bincode::serialize(&FrameRef {
        headers: &message.headers,
        data: &message.data,
    })
    .map_err(|e| Error::Codec(e.to_string()))?;

    if bytes.len() > MAX_FRAME_LEN {
        return Err(Error::InvalidFrame(format!(
            "Message too large: {} bytes",
            bytes.len()
        )));
    }

    writer.write_u32(bytes.len() as u32).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;

    Ok(())
}

/// Read one length-prefixed message
pub(crate) async fn read_frame<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await.map_err(eof_as_closed)? as usize;

    if len > MAX_FRAME_LEN {
        return Err(Error::InvalidFrame(format!(
            "Message too large: {} bytes",
            len
        )));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(eof_as_closed)?;

    let frame: Frame =
        bincode::deserialize(&buf).map_err(|e| Error::InvalidFrame(e.to_string()))?;

    Ok(Message {
        headers: frame.headers,
        data: frame.data,
    })
}

/// Bound `op` by `timeout` if one is set
pub(crate) async fn with_timeout<T, F>(timeout: Option<Duration>, what: &str, op: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, op)
            .await
            .map_err(|_| Error::Custom(format!("{what} timeout exceeded")))?,
        None => op.await,
    }
}

fn eof_as_closed(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        e.into()
    }
}
