//! Cluster wire format — on-wire framing and message envelope.
//!
//! Every message exchanged between a client, a storage node, and the
//! coordinator is one frame:
//!
//! ```text
//! [4 bytes big-endian: total length N]
//! [4 bytes big-endian: envelope length E]
//! [E bytes: UTF-8 JSON envelope]
//! [N - 4 - E bytes: opaque binary payload]
//! ```
//!
//! N counts everything after the first four length bytes. A frame whose
//! declared N exceeds MAX_FRAME_SIZE, or whose envelope fails to parse,
//! is a protocol violation — the connection is closed, never resynced.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum total frame size: 100 MiB.
pub const MAX_FRAME_SIZE: u32 = 100 * 1024 * 1024;

/// Every message type the protocol carries, exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    RegisterNode,
    NodeRegistered,
    Heartbeat,
    HeartbeatAck,
    RegisterChunk,
    ChunkRegistered,
    UploadFile,
    UploadAck,
    StoreChunk,
    ChunkStored,
    GetChunk,
    ChunkData,
    ReplicateChunk,
    DownloadFile,
    FileData,
    DiscoverNodes,
    NodesList,
    GetStatus,
    StatusResponse,
    Error,
}

/// The JSON header of a frame. `data` carries type-specific fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub msg_type: MessageType,
    #[serde(default = "default_data")]
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sender_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_id: Option<String>,
}

fn default_data() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl Envelope {
    pub fn new(msg_type: MessageType, data: serde_json::Value) -> Self {
        Self {
            msg_type,
            data,
            sender_id: None,
            request_id: None,
        }
    }

    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn reply_to(&self, msg_type: MessageType, data: serde_json::Value) -> Self {
        let mut reply = Envelope::new(msg_type, data);
        reply.request_id = self.request_id.clone();
        reply
    }

    pub fn error(code: WireErrorCode, message: impl Into<String>, request_id: Option<String>) -> Self {
        let data = serde_json::json!({ "code": code.as_str(), "message": message.into() });
        Self {
            msg_type: MessageType::Error,
            data,
            sender_id: None,
            request_id,
        }
    }
}

/// A complete frame: envelope plus the opaque binary payload it describes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub envelope: Envelope,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(envelope: Envelope) -> Self {
        Self {
            envelope,
            payload: Bytes::new(),
        }
    }

    pub fn with_payload(envelope: Envelope, payload: Bytes) -> Self {
        Self { envelope, payload }
    }
}

/// Error kinds named in the protocol's ERROR envelope `code` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireErrorCode {
    ProtocolError,
    NotFound,
    AccessDenied,
    InsufficientStorage,
    NoBandwidth,
    ChecksumMismatch,
    NoCapacity,
    DataLost,
    Transient,
}

impl WireErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            WireErrorCode::ProtocolError => "PROTOCOL_ERROR",
            WireErrorCode::NotFound => "NOT_FOUND",
            WireErrorCode::AccessDenied => "ACCESS_DENIED",
            WireErrorCode::InsufficientStorage => "INSUFFICIENT_STORAGE",
            WireErrorCode::NoBandwidth => "NO_BANDWIDTH",
            WireErrorCode::ChecksumMismatch => "CHECKSUM_MISMATCH",
            WireErrorCode::NoCapacity => "NO_CAPACITY",
            WireErrorCode::DataLost => "DATA_LOST",
            WireErrorCode::Transient => "TRANSIENT",
        }
    }
}

/// Errors that can arise while framing or deframing wire messages.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame of {0} bytes exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(u32),

    #[error("envelope length {envelope_len} exceeds total frame length {total_len}")]
    EnvelopeTooLarge { envelope_len: u32, total_len: u32 },

    #[error("malformed envelope JSON: {0}")]
    BadEnvelope(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Write one frame to `writer`. Closes neither the stream nor the caller's
/// ownership of it — the caller decides when to drop the connection.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<(), WireError> {
    let envelope_bytes = serde_json::to_vec(&frame.envelope)?;
    let envelope_len = envelope_bytes.len() as u32;
    let total_len = 4 + envelope_len + frame.payload.len() as u32;
    if total_len > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(total_len));
    }

    writer.write_all(&total_len.to_be_bytes()).await?;
    writer.write_all(&envelope_len.to_be_bytes()).await?;
    writer.write_all(&envelope_bytes).await?;
    writer.write_all(&frame.payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame from `reader`. A malformed or oversize frame is always a
/// hard error — callers MUST close the connection rather than attempt to
/// resynchronize on the byte stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, WireError> {
    let mut len_buf = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut len_buf).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(WireError::Closed);
        }
        return Err(e.into());
    }
    let total_len = u32::from_be_bytes(len_buf);
    if total_len > MAX_FRAME_SIZE || total_len < 4 {
        return Err(WireError::FrameTooLarge(total_len));
    }

    let mut envelope_len_buf = [0u8; 4];
    reader.read_exact(&mut envelope_len_buf).await?;
    let envelope_len = u32::from_be_bytes(envelope_len_buf);
    if envelope_len > total_len - 4 {
        return Err(WireError::EnvelopeTooLarge { envelope_len, total_len });
    }

    let mut envelope_buf = vec![0u8; envelope_len as usize];
    reader.read_exact(&mut envelope_buf).await?;
    let envelope: Envelope = serde_json::from_slice(&envelope_buf)?;

    let payload_len = (total_len - 4 - envelope_len) as usize;
    let mut payload_buf = vec![0u8; payload_len];
    reader.read_exact(&mut payload_buf).await?;

    Ok(Frame::with_payload(envelope, Bytes::from(payload_buf)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trip() {
        let envelope = Envelope::new(MessageType::Heartbeat, serde_json::json!({"node_id": "n1"}))
            .with_sender("n1")
            .with_request_id("req-1");
        let frame = Frame::with_payload(envelope, Bytes::from_static(b"hello"));

        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let recovered = read_frame(&mut cursor).await.unwrap();

        assert_eq!(recovered.envelope.msg_type, MessageType::Heartbeat);
        assert_eq!(recovered.envelope.sender_id.as_deref(), Some("n1"));
        assert_eq!(recovered.envelope.request_id.as_deref(), Some("req-1"));
        assert_eq!(recovered.payload, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn oversize_frame_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_SIZE + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(WireError::FrameTooLarge(_))));
    }

    #[tokio::test]
    async fn truncated_stream_is_closed_not_resynced() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&20u32.to_be_bytes());
        buf.extend_from_slice(&4u32.to_be_bytes());
        // envelope/payload never arrive
        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn envelope_longer_than_frame_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&8u32.to_be_bytes());
        buf.extend_from_slice(&100u32.to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(WireError::EnvelopeTooLarge { .. })));
    }
}
