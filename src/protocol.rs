//! Protocol Definition Module
//!
//! Message types for the four remote-copy operations and the length-prefixed
//! framing that carries them. One connection carries exactly one RPC session:
//!
//! ```text
//! Client                                 Server
//!   |                                      |
//!   |-- Call::Upload --------------------->|
//!   |-- Item(UploadRequest) ... ---------->|
//!   |-- End ------------------------------>|
//!   |<----------- Ok(UploadResponse) ------|
//!
//!   |-- Call::Download(filename) --------->|
//!   |<------- Item(DownloadResponse) ... --|
//!   |<------------------- End | Error -----|
//!
//!   |-- Call::Ping / Call::Shutdown ------>|
//!   |<---------------------- Ok | Err -----|
//! ```
//!
//! Chunk content travels base64-encoded inside the JSON payload.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransferError;

/// Maximum frame payload (16 MiB) - bounds memory per in-flight message
pub const MAX_MESSAGE_SIZE: u64 = 16 * 1024 * 1024;

/// Default chunk buffer capacity (1 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Room reserved in a chunk frame for everything except the content itself.
pub const CHUNK_FRAME_OVERHEAD: u64 = 64 * 1024;

/// Magic bytes to identify our protocol
pub const PROTOCOL_MAGIC: &[u8; 4] = b"RCP1";

/// Fixed acknowledgement returned by `Ping`.
pub const PING_REPLY: &str = "pong";

/// Acknowledgement returned by a successful `Upload`.
pub const UPLOAD_REPLY: &str = "Upload received successfully";

/// First frame of every session: which operation the client is invoking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Call {
    /// Client-streaming upload; chunks follow as `StreamFrame<UploadRequest>`.
    Upload,
    /// Server-streaming download.
    Download(DownloadRequest),
    Ping(PingRequest),
    Shutdown(ShutdownRequest),
}

/// One upload chunk. `size` is the declared total and is read from the first
/// chunk only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub filename: String,
}

/// One download chunk. `size` is the total file size, repeated on every chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadResponse {
    #[serde(default)]
    pub message: String,
    pub filename: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingRequest {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResponse {
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShutdownRequest {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShutdownResponse {}

/// One element of a streamed direction of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamFrame<T> {
    Item(T),
    /// Normal end of stream.
    End,
    /// Stream terminated by a failure on the sending side.
    Error(Status),
}

/// Terminal outcome of a unary or client-streaming call.
pub type Reply<T> = Result<T, Status>;

/// Error codes for structured error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Code {
    FileOpen,
    Read,
    Write,
    SizeMismatch,
    Transfer,
    Protocol,
    Internal,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Code::FileOpen => "file open",
            Code::Read => "read",
            Code::Write => "write",
            Code::SizeMismatch => "size mismatch",
            Code::Transfer => "transfer",
            Code::Protocol => "protocol",
            Code::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Failure reported to the peer as the terminal outcome of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: Code,
    pub message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Largest frame a chunk of `buffer_size` content bytes can produce.
pub fn chunk_frame_len(buffer_size: usize) -> u64 {
    let encoded = (buffer_size as u64).div_ceil(3) * 4;
    encoded + CHUNK_FRAME_OVERHEAD
}

/// Protocol message with framing
///
/// Wire format:
/// ```text
/// +----------+----------+----------+
/// | Magic(4) | Length(4)| Payload  |
/// +----------+----------+----------+
/// ```
pub struct MessageFramer;

impl MessageFramer {
    /// Write a message with length prefix
    pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), TransferError>
    where
        W: AsyncWrite + Unpin,
        T: Serialize,
    {
        let payload = serde_json::to_vec(message)
            .map_err(|e| TransferError::Protocol(format!("failed to encode message: {e}")))?;
        let len = payload.len() as u64;

        if len > MAX_MESSAGE_SIZE {
            return Err(TransferError::Protocol(format!(
                "message too large: {len} bytes (max: {MAX_MESSAGE_SIZE})"
            )));
        }

        writer.write_all(PROTOCOL_MAGIC).await.map_err(send_error)?;
        writer.write_u32(len as u32).await.map_err(send_error)?;
        writer.write_all(&payload).await.map_err(send_error)?;
        writer.flush().await.map_err(send_error)?;

        Ok(())
    }

    /// Read a message with length prefix
    pub async fn read_message<R, T>(reader: &mut R) -> Result<T, TransferError>
    where
        R: AsyncRead + Unpin,
        T: for<'de> Deserialize<'de>,
    {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).await.map_err(recv_error)?;

        if &magic != PROTOCOL_MAGIC {
            return Err(TransferError::Protocol("invalid protocol magic".into()));
        }

        let len = reader.read_u32().await.map_err(recv_error)? as u64;

        if len > MAX_MESSAGE_SIZE {
            return Err(TransferError::Protocol(format!(
                "message too large: {len} bytes (max: {MAX_MESSAGE_SIZE})"
            )));
        }

        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).await.map_err(recv_error)?;

        serde_json::from_slice(&payload)
            .map_err(|e| TransferError::Protocol(format!("failed to decode message: {e}")))
    }
}

fn send_error(e: std::io::Error) -> TransferError {
    TransferError::Transfer(format!("failed to send message: {e}"))
}

fn recv_error(e: std::io::Error) -> TransferError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        TransferError::Transfer("connection closed before end of stream".into())
    } else {
        TransferError::Transfer(format!("failed to receive message: {e}"))
    }
}

/// Base64 encoding for byte content inside JSON payloads.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
