//! Networking primitives.
//!
//! Goals:
//! - One reliable, ordered channel (TCP) carrying length-prefixed JSON frames.
//! - Envelope types for requests, acknowledgements, and pushed events.
//! - Keep serialization explicit and versionable.
//!
//! Event payloads stay as `serde_json::Value` on the wire; typed decoding of
//! the events the client understands happens on the client side.

use std::net::SocketAddr;

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a single frame payload.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Who is speaking. Attached to every request so the authority can route it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
}

impl SessionContext {
    /// Overwrites only the fields that are given and non-empty.
    pub fn update(&mut self, player_id: Option<&str>, player_name: Option<&str>, game_id: Option<&str>) {
        fn set(slot: &mut Option<String>, value: Option<&str>) {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                *slot = Some(v.to_string());
            }
        }
        set(&mut self.player_id, player_id);
        set(&mut self.player_name, player_name);
        set(&mut self.game_id, game_id);
    }
}

/// Client -> authority envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Opens the session handshake.
    Hello {
        protocol: u32,
        #[serde(default)]
        session: SessionContext,
    },
    /// Named request. `id` is set when the sender wants an acknowledgement.
    Request {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        event: String,
        #[serde(default)]
        payload: Value,
        #[serde(default)]
        session: SessionContext,
    },
}

/// Authority -> client envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Completes the handshake.
    Welcome { session_id: String },
    /// Pushed event, e.g. `gameStateUpdate`.
    Event {
        event: String,
        #[serde(default)]
        payload: Value,
    },
    /// Acknowledgement for the request with the same id.
    Ack {
        id: u64,
        #[serde(default)]
        payload: Value,
    },
    /// The authority is intentionally closing this session.
    Disconnect,
}

/// Why a link went down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The authority closed the session on purpose.
    ServerDisconnect,
    /// This client closed the session on purpose.
    ClientDisconnect,
    /// The peer closed the stream.
    TransportClose,
    /// Read/write failure on the stream.
    TransportError,
    /// No traffic within the liveness window.
    PingTimeout,
    Other(String),
}

impl DisconnectReason {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "io server disconnect" => Self::ServerDisconnect,
            "io client disconnect" => Self::ClientDisconnect,
            "transport close" => Self::TransportClose,
            "transport error" => Self::TransportError,
            "ping timeout" => Self::PingTimeout,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::ServerDisconnect => "io server disconnect",
            Self::ClientDisconnect => "io client disconnect",
            Self::TransportClose => "transport close",
            Self::TransportError => "transport error",
            Self::PingTimeout => "ping timeout",
            Self::Other(s) => s,
        }
    }

    /// True when the remote side ended the session intentionally.
    pub fn is_remote_close(&self) -> bool {
        matches!(self, Self::ServerDisconnect)
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writes one length-prefixed JSON frame.
pub async fn write_frame<W, M>(w: &mut W, msg: &M) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    M: Serialize,
{
    let payload = encode_to_bytes(msg).context("serialize frame")?;
    anyhow::ensure!(payload.len() <= MAX_FRAME_LEN, "frame too large: {} bytes", payload.len());
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

/// Reads one length-prefixed JSON frame.
pub async fn read_frame<R, M>(r: &mut R) -> anyhow::Result<M>
where
    R: AsyncRead + Unpin,
    M: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    anyhow::ensure!(len <= MAX_FRAME_LEN, "frame too large: {len} bytes");
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await.context("tcp read payload")?;
    decode_from_bytes(&payload).context("deserialize frame")
}

/// True if the error chain bottoms out in a clean end-of-stream.
pub fn is_eof(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|e| e.kind() == std::io::ErrorKind::UnexpectedEof)
    })
}

/// Framed connection over TCP.
#[derive(Debug)]
pub struct FramedConn {
    stream: TcpStream,
}

impl FramedConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn send<M: Serialize>(&mut self, msg: &M) -> anyhow::Result<()> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv<M: DeserializeOwned>(&mut self) -> anyhow::Result<M> {
        read_frame(&mut self.stream).await
    }
}

/// TCP listener yielding framed connections.
pub struct FramedListener {
    listener: TcpListener,
}

impl FramedListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(FramedConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        Ok((FramedConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// JSON body codec shared by the frame reader and writer.
pub fn encode_to_bytes<M: Serialize>(msg: &M) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes<M: DeserializeOwned>(b: &[u8]) -> anyhow::Result<M> {
    serde_json::from_slice(b).context("deserialize")
}
