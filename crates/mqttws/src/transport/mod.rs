//! Transport layer: one established connection carrying MQTT packets.
//!
//! A transport is built already connected, then split into a read half and a
//! write half so the reader task and writers never contend. The WebSocket
//! transport maps packets onto binary frames; the in-memory transport exists
//! for exercising the session layer without a network.

mod mem;
mod signing;
mod websocket;

pub use mem::InMemoryTransport;
pub use signing::{HeaderSigner, UpgradeSigner};
pub use websocket::{WebSocketConfig, WebSocketTransport};

use bytes::BytesMut;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{Result, SessionError};
use crate::packet::Packet;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const READ_CHUNK_SIZE: usize = 8192;

/// An established transport, ready to be split into halves.
pub enum TransportType {
    WebSocket(Box<WebSocketTransport>),
    InMemory(InMemoryTransport),
}

impl TransportType {
    pub fn into_split(self) -> (PacketReader, PacketWriter) {
        match self {
            TransportType::WebSocket(ws) => {
                let (sink, stream) = ws.into_stream().split();
                (
                    PacketReader::WebSocket {
                        stream,
                        buffer: BytesMut::new(),
                    },
                    PacketWriter::WebSocket(sink),
                )
            }
            TransportType::InMemory(mem) => {
                let (read, write) = tokio::io::split(mem.into_stream());
                (
                    PacketReader::InMemory {
                        read,
                        buffer: BytesMut::new(),
                    },
                    PacketWriter::InMemory(write),
                )
            }
        }
    }
}

/// Read half of a transport. Owned by the session's reader task.
pub enum PacketReader {
    WebSocket {
        stream: SplitStream<WsStream>,
        buffer: BytesMut,
    },
    InMemory {
        read: ReadHalf<tokio::io::DuplexStream>,
        buffer: BytesMut,
    },
}

impl PacketReader {
    /// Reads the next complete packet.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectionClosedByPeer`] on an orderly close
    /// and [`SessionError::Io`] on transport failure.
    pub async fn read_packet(&mut self) -> Result<Packet> {
        match self {
            PacketReader::WebSocket { stream, buffer } => loop {
                if let Some(packet) = Packet::decode(buffer)? {
                    return Ok(packet);
                }
                match stream.next().await {
                    Some(Ok(WsMessage::Binary(data))) => buffer.extend_from_slice(&data),
                    Some(Ok(WsMessage::Close(_))) | None => {
                        return Err(SessionError::ConnectionClosedByPeer);
                    }
                    // Control frames are handled by tungstenite; text frames
                    // are not valid MQTT and are skipped.
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(SessionError::Io(err.to_string())),
                }
            },
            PacketReader::InMemory { read, buffer } => loop {
                if let Some(packet) = Packet::decode(buffer)? {
                    return Ok(packet);
                }
                let mut chunk = [0u8; READ_CHUNK_SIZE];
                let n = read.read(&mut chunk).await?;
                if n == 0 {
                    return Err(SessionError::ConnectionClosedByPeer);
                }
                buffer.extend_from_slice(&chunk[..n]);
            },
        }
    }
}

/// Write half of a transport. Shared behind an async mutex by the session.
pub enum PacketWriter {
    WebSocket(SplitSink<WsStream, WsMessage>),
    InMemory(WriteHalf<tokio::io::DuplexStream>),
}

impl PacketWriter {
    pub async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf)?;
        tracing::trace!(packet_type = ?packet.packet_type(), len = buf.len(), "sending packet");

        match self {
            PacketWriter::WebSocket(sink) => sink
                .send(WsMessage::Binary(buf.to_vec()))
                .await
                .map_err(|e| SessionError::Io(e.to_string())),
            PacketWriter::InMemory(write) => {
                write.write_all(&buf).await?;
                write.flush().await?;
                Ok(())
            }
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        match self {
            PacketWriter::WebSocket(sink) => sink
                .close()
                .await
                .map_err(|e| SessionError::Io(e.to_string())),
            PacketWriter::InMemory(write) => {
                write.shutdown().await?;
                Ok(())
            }
        }
    }
}
