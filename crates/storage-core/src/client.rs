//! Minimal wire-protocol client helper shared by storage nodes (pulling
//! chunks from peers during re-replication) and the administrative CLI.

use tokio::net::TcpStream;

use crate::wire::{read_frame, write_frame, Envelope, Frame, WireError};

/// Open a connection and perform one request/response round trip.
pub async fn roundtrip(addr: &str, envelope: Envelope) -> Result<Frame, WireError> {
    let mut stream = TcpStream::connect(addr).await?;
    write_frame(&mut stream, &Frame::new(envelope)).await?;
    read_frame(&mut stream).await
}

/// Same as [`roundtrip`] but attaches a binary payload to the request.
pub async fn roundtrip_with_payload(
    addr: &str,
    envelope: Envelope,
    payload: bytes::Bytes,
) -> Result<Frame, WireError> {
    let mut stream = TcpStream::connect(addr).await?;
    write_frame(&mut stream, &Frame::with_payload(envelope, payload)).await?;
    read_frame(&mut stream).await
}
