//! Link transports.
//!
//! A [`Transport`] opens links out of band and reports everything that
//! happens on them as [`LinkSignal`]s through the channel handed to
//! [`Transport::open`]. The connection manager owns the receiving end, so
//! signals are consumed in the order the transport produced them.

use std::time::Duration;

use anyhow::Context;
use metro_shared::net::{
    is_eof, read_frame, write_frame, ClientFrame, DisconnectReason, ServerFrame, SessionContext,
    PROTOCOL_VERSION,
};
use tokio::{
    net::TcpStream,
    sync::mpsc,
    task::JoinHandle,
    time,
};
use tracing::{debug, info, warn};

/// Something that happened on the link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkSignal {
    /// Handshake completed.
    Established,
    /// Link went down after being established.
    Lost(DisconnectReason),
    /// Link could not be established.
    Error(String),
    /// Inbound frame from the authority.
    Frame(ServerFrame),
}

pub type SignalSender = mpsc::UnboundedSender<LinkSignal>;
pub type SignalReceiver = mpsc::UnboundedReceiver<LinkSignal>;

/// Transport seam used by the connection manager.
pub trait Transport {
    /// Starts establishing a link. Must not block; completion is reported as
    /// a signal. Any previous link is torn down first. An `Err` means the
    /// attempt could not even be started.
    fn open(&mut self, session: &SessionContext, signals: SignalSender) -> anyhow::Result<()>;

    /// Queues a frame on the open link.
    fn send(&mut self, frame: ClientFrame) -> anyhow::Result<()>;

    /// Tears down the link, if any. No further signals are expected.
    fn close(&mut self);
}

/// TCP transport speaking length-prefixed JSON frames.
///
/// Each `open` spawns one tokio task that connects, handshakes, then pumps
/// frames both ways until either side ends the link.
pub struct TcpTransport {
    addr: String,
    connect_timeout: Duration,
    outbound: Option<mpsc::UnboundedSender<ClientFrame>>,
    task: Option<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            outbound: None,
            task: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Transport for TcpTransport {
    fn open(&mut self, session: &SessionContext, signals: SignalSender) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Handle::try_current().context("no tokio runtime")?;
        self.close();

        let (tx, rx) = mpsc::unbounded_channel();
        let hello = ClientFrame::Hello {
            protocol: PROTOCOL_VERSION,
            session: session.clone(),
        };
        debug!(addr = %self.addr, "Opening link");
        self.task = Some(runtime.spawn(run_link(
            self.addr.clone(),
            self.connect_timeout,
            hello,
            rx,
            signals,
        )));
        self.outbound = Some(tx);
        Ok(())
    }

    fn send(&mut self, frame: ClientFrame) -> anyhow::Result<()> {
        let outbound = self.outbound.as_ref().context("link not open")?;
        outbound
            .send(frame)
            .map_err(|_| anyhow::anyhow!("link task has stopped"))
    }

    fn close(&mut self) {
        self.outbound = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn handshake(
    addr: &str,
    connect_timeout: Duration,
    hello: &ClientFrame,
) -> anyhow::Result<TcpStream> {
    let mut stream = time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .context("connect timed out")?
        .with_context(|| format!("tcp connect {addr}"))?;

    write_frame(&mut stream, hello).await?;
    let welcome = time::timeout(connect_timeout, read_frame::<_, ServerFrame>(&mut stream))
        .await
        .context("handshake timed out")??;
    match welcome {
        ServerFrame::Welcome { session_id } => {
            info!(addr, session_id = %session_id, "Link established");
            Ok(stream)
        }
        other => anyhow::bail!("expected Welcome, got {other:?}"),
    }
}

async fn run_link(
    addr: String,
    connect_timeout: Duration,
    hello: ClientFrame,
    mut outbound: mpsc::UnboundedReceiver<ClientFrame>,
    signals: SignalSender,
) {
    let stream = match handshake(&addr, connect_timeout, &hello).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = signals.send(LinkSignal::Error(format!("{e:#}")));
            return;
        }
    };
    if signals.send(LinkSignal::Established).is_err() {
        return;
    }

    let (mut rd, mut wr) = stream.into_split();

    let reader = async {
        loop {
            match read_frame::<_, ServerFrame>(&mut rd).await {
                Ok(ServerFrame::Disconnect) => break DisconnectReason::ServerDisconnect,
                Ok(frame) => {
                    if signals.send(LinkSignal::Frame(frame)).is_err() {
                        break DisconnectReason::ClientDisconnect;
                    }
                }
                Err(e) if is_eof(&e) => break DisconnectReason::TransportClose,
                Err(e) => {
                    warn!(error = %e, "Link read failed");
                    break DisconnectReason::TransportError;
                }
            }
        }
    };

    let writer = async {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = write_frame(&mut wr, &frame).await {
                warn!(error = %e, "Link write failed");
                return DisconnectReason::TransportError;
            }
        }
        DisconnectReason::ClientDisconnect
    };

    let reason = tokio::select! {
        reason = reader => reason,
        reason = writer => reason,
    };
    debug!(addr = %addr, reason = %reason, "Link task finished");
    let _ = signals.send(LinkSignal::Lost(reason));
}
