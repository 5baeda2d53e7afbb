// codec.rs
//! Wire codec for the gateway protocol.
//!
//! Every message is a protobuf record written with a single `write` call and
//! read back with a single `read` call; no length prefix is added. Messages
//! are small (a few hundred bytes) so one read always carries one message on
//! the connections this protocol uses.

use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;

/// Upper bound for a single protocol message.
pub const MAX_MESSAGE_SIZE: usize = 4096;

pub fn encode<M: Message>(message: &M) -> Vec<u8> {
    message.encode_to_vec()
}

pub fn decode<M: Message + Default>(bytes: &[u8]) -> Result<M> {
    Ok(M::decode(bytes)?)
}

/// Writes one message and flushes it.
pub async fn write_message<W, M>(writer: &mut W, message: &M) -> Result<()>
where
    W: AsyncWrite + Unpin,
    M: Message,
{
    writer.write_all(&encode(message)).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one message. Returns `Ok(None)` when the peer closed the connection
/// before sending anything.
pub async fn read_message<R, M>(reader: &mut R) -> Result<Option<M>>
where
    R: AsyncRead + Unpin,
    M: Message + Default,
{
    let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
    let n = reader.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    decode(&buf[..n]).map(Some)
}
