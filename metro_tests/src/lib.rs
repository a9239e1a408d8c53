//! Test harness: a scripted game authority on an ephemeral port.
//!
//! Tests accept client links one at a time and push frames by hand, so the
//! client's behavior can be checked against exact authority behavior.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use metro_client::{
    connection::{ConnectionManager, SnapshotSink},
    transport::Transport,
};
use metro_shared::{
    config::ClientConfig,
    map::{Line, MapData, Station},
    net::{ClientFrame, FramedConn, FramedListener, ServerFrame, SessionContext, PROTOCOL_VERSION},
};
use serde_json::{json, Value};
use tokio::time::{self, Instant};
use tracing::info;

/// Listening authority.
pub struct ScriptedAuthority {
    listener: FramedListener,
    accepted: u32,
}

impl ScriptedAuthority {
    /// Binds to an ephemeral localhost port.
    pub async fn bind() -> anyhow::Result<Self> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        Ok(Self {
            listener: FramedListener::bind(addr).await?,
            accepted: 0,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts one link and completes the handshake.
    pub async fn accept(&mut self) -> anyhow::Result<AuthoritySession> {
        let (mut conn, peer) = self.listener.accept().await?;
        let session = read_hello(&mut conn).await?;
        self.accepted += 1;
        let session_id = format!("s{}", self.accepted);
        conn.send(&ServerFrame::Welcome {
            session_id: session_id.clone(),
        })
        .await?;
        info!(%peer, session_id = %session_id, "Authority accepted link");
        Ok(AuthoritySession { conn, session })
    }

    /// Accepts one link and answers its hello with `reply` instead of a
    /// welcome. `None` leaves the handshake unanswered.
    pub async fn accept_with_reply(&mut self, reply: Option<ServerFrame>) -> anyhow::Result<AuthoritySession> {
        let (mut conn, peer) = self.listener.accept().await?;
        let session = read_hello(&mut conn).await?;
        self.accepted += 1;
        if let Some(frame) = &reply {
            conn.send(frame).await?;
        }
        info!(%peer, ?reply, "Authority withheld welcome");
        Ok(AuthoritySession { conn, session })
    }

    /// Accepts one link, or `None` if nobody connects within `within`.
    pub async fn try_accept(&mut self, within: Duration) -> anyhow::Result<Option<AuthoritySession>> {
        match time::timeout(within, self.accept()).await {
            Ok(session) => session.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Links accepted so far.
    pub fn accepted(&self) -> u32 {
        self.accepted
    }
}

async fn read_hello(conn: &mut FramedConn) -> anyhow::Result<SessionContext> {
    match conn.recv::<ClientFrame>().await? {
        ClientFrame::Hello { protocol, session } if protocol == PROTOCOL_VERSION => Ok(session),
        other => anyhow::bail!("unexpected handshake msg: {other:?}"),
    }
}

/// One accepted link, seen from the authority.
pub struct AuthoritySession {
    conn: FramedConn,
    /// Session context the client announced in its hello.
    pub session: SessionContext,
}

impl AuthoritySession {
    pub async fn recv_request(&mut self) -> anyhow::Result<ClientFrame> {
        self.conn.recv().await
    }

    pub async fn push_event(&mut self, event: &str, payload: Value) -> anyhow::Result<()> {
        self.conn
            .send(&ServerFrame::Event {
                event: event.to_string(),
                payload,
            })
            .await
    }

    pub async fn ack(&mut self, id: u64, payload: Value) -> anyhow::Result<()> {
        self.conn.send(&ServerFrame::Ack { id, payload }).await
    }

    /// Ends the session on purpose, the way an authority kicks a client.
    pub async fn close_session(mut self) -> anyhow::Result<()> {
        self.conn.send(&ServerFrame::Disconnect).await
    }
}

/// Client config pointing at `addr` with short timeouts.
pub fn client_config(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        server_addr: addr.to_string(),
        player_name: "Tester".to_string(),
        connect_timeout_ms: 1000,
        ..Default::default()
    }
}

/// Three stations chained by two lines.
pub fn sample_snapshot() -> Value {
    let map = MapData {
        stations: vec![
            Station::new("s1").at(10.0, 10.0),
            Station::new("s2").at(50.0, 10.0),
            Station::new("s3").at(90.0, 10.0),
        ],
        lines: vec![
            Line::new("red", ["s1", "s2", "s3"]),
            Line::new("blue", ["s3", "s2", "s1"]),
        ],
        connections: None,
    };
    json!({
        "map": map,
        "players": [
            { "id": "p1", "name": "Ada", "stationId": "s1" },
            { "id": "p2", "name": "Lin", "stationId": "s1" }
        ],
        "currentPlayerIndex": 0
    })
}

/// Processes client signals until `done` holds or `within` elapses.
pub async fn drive_until<T, S, F>(
    client: &mut ConnectionManager<T, S>,
    within: Duration,
    mut done: F,
) -> anyhow::Result<()>
where
    T: Transport,
    S: SnapshotSink,
    F: FnMut(&ConnectionManager<T, S>) -> bool,
{
    let deadline = Instant::now() + within;
    while !done(client) {
        anyhow::ensure!(client.has_link(), "client has no link");
        time::timeout_at(deadline, client.next_signal())
            .await
            .context("timed out waiting for client state")?;
    }
    Ok(())
}
