//! Full socket-based integration tests for client ↔ authority communication.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use metro_client::{
    connection::{ConnError, EventKind},
    ConnectionManager, Lifecycle, MapStore, TcpTransport,
};
use metro_shared::{
    config::ClientConfig,
    map::SubwayMap,
    math::Size,
    net::{ClientFrame, ServerFrame},
};
use metro_tests::{client_config, drive_until, sample_snapshot, ScriptedAuthority};
use serde_json::json;

type Client = ConnectionManager<TcpTransport, MapStore<SubwayMap>>;

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

fn client(cfg: &ClientConfig) -> Client {
    let transport = TcpTransport::new(
        cfg.server_addr.clone(),
        Duration::from_millis(cfg.connect_timeout_ms),
    );
    ConnectionManager::new(cfg, transport, MapStore::default())
}

/// Handshake, acknowledged request, then a game start that moves the view.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn join_and_start_game_roundtrip() -> anyhow::Result<()> {
    init_tracing();

    let mut authority = ScriptedAuthority::bind().await?;
    let cfg = client_config(authority.addr()?);

    let authority_task = tokio::spawn(async move {
        let mut session = authority.accept().await?;
        let request = session.recv_request().await?;
        let ClientFrame::Request { id, event, session: ctx, .. } = request else {
            anyhow::bail!("expected a request frame");
        };
        anyhow::ensure!(event == "joinGame", "unexpected event {event}");
        anyhow::ensure!(ctx.game_id.as_deref() == Some("g1"), "missing game id");
        session
            .ack(id.unwrap_or_default(), json!({ "success": true }))
            .await?;
        session.push_event("gameStateUpdate", sample_snapshot()).await?;
        session.push_event("gameStarted", sample_snapshot()).await?;
        // Keep the link open until the client has read everything.
        let _ = session.recv_request().await;
        Ok::<_, anyhow::Error>(session.session)
    });

    let mut client = client(&cfg);
    client.set_player_info(Some("p1"), Some("Ada"), Some("g1"));
    client.connect();
    drive_until(&mut client, WAIT, |c| c.is_connected()).await?;

    let updates = Rc::new(RefCell::new(0));
    let counter = updates.clone();
    client.on(EventKind::GameStateUpdate, move |_| *counter.borrow_mut() += 1)?;

    let acked = Rc::new(RefCell::new(None));
    let slot = acked.clone();
    client.emit_with_ack("joinGame", json!({ "seat": 1 }), move |r| *slot.borrow_mut() = Some(r))?;

    drive_until(&mut client, WAIT, |c| !c.sink().router.current().is_metro()).await?;

    assert_eq!(*acked.borrow(), Some(Ok(json!({ "success": true }))));
    assert_eq!(*updates.borrow(), 1);

    let store = client.sink();
    assert_eq!(store.router.current().path(), "/game/g1");
    assert_eq!(store.subway_map.station_count(), 3);
    assert_eq!(store.subway_map.line_count(), 2);
    assert_eq!(store.subway_map.connection_count(), 4);
    assert_eq!(store.cur_player().map(|p| p.id.as_str()), Some("p1"));

    let layout = store.player_layout(Size::new(100.0, 100.0), &cfg.layout)?;
    assert_eq!(layout.len(), 2);
    assert!(!layout[0].moved());
    assert!(layout[1].moved());

    client.disconnect();
    let hello = authority_task.await??;
    assert_eq!(hello.player_id.as_deref(), Some("p1"));
    Ok(())
}

/// The authority closing the session on purpose triggers one reconnect.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_disconnect_reconnects() -> anyhow::Result<()> {
    init_tracing();

    let mut authority = ScriptedAuthority::bind().await?;
    let cfg = client_config(authority.addr()?);

    let authority_task = tokio::spawn(async move {
        let first = authority.accept().await?;
        first.close_session().await?;
        let mut second = authority.accept().await?;
        let _ = second.recv_request().await;
        Ok::<_, anyhow::Error>(authority.accepted())
    });

    let mut client = client(&cfg);
    client.connect();
    drive_until(&mut client, WAIT, |c| c.is_connected()).await?;

    // Lost(io server disconnect) -> Connecting -> Connected again.
    drive_until(&mut client, WAIT, |c| c.lifecycle() == Lifecycle::Connecting).await?;
    drive_until(&mut client, WAIT, |c| c.is_connected()).await?;
    assert_eq!(client.reconnect_attempts(), 0);

    client.disconnect();
    assert_eq!(authority_task.await??, 2);
    Ok(())
}

/// A plain stream close leaves the client disconnected with no retry.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transport_close_waits_for_explicit_connect() -> anyhow::Result<()> {
    init_tracing();

    let mut authority = ScriptedAuthority::bind().await?;
    let cfg = client_config(authority.addr()?);

    let mut client = client(&cfg);
    client.connect();
    let session = authority.accept().await?;
    drive_until(&mut client, WAIT, |c| c.is_connected()).await?;

    drop(session);
    drive_until(&mut client, WAIT, |c| !c.has_link()).await?;
    assert_eq!(client.lifecycle(), Lifecycle::Disconnected);
    assert_eq!(client.emit("ready", json!({})), Err(ConnError::NotConnected));
    assert!(authority.try_accept(Duration::from_millis(200)).await?.is_none());

    client.connect();
    let _session = authority.accept().await?;
    drive_until(&mut client, WAIT, |c| c.is_connected()).await?;
    Ok(())
}

/// Nobody listening: bounded retries, then the client gives up.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_connection_gives_up_after_cap() -> anyhow::Result<()> {
    init_tracing();

    let addr = {
        let authority = ScriptedAuthority::bind().await?;
        authority.addr()?
    };
    let cfg = ClientConfig {
        max_reconnect_attempts: 2,
        ..client_config(addr)
    };

    let mut client = client(&cfg);
    client.connect();
    drive_until(&mut client, WAIT, |c| !c.has_link()).await?;

    assert_eq!(client.lifecycle(), Lifecycle::Disconnected);
    assert_eq!(client.reconnect_attempts(), 2);
    Ok(())
}

/// A hello answered with something other than a welcome fails the attempt,
/// and the single retry that follows connects normally.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bad_handshake_reply_retries_once() -> anyhow::Result<()> {
    init_tracing();

    let mut authority = ScriptedAuthority::bind().await?;
    let cfg = client_config(authority.addr()?);

    let authority_task = tokio::spawn(async move {
        let _first = authority
            .accept_with_reply(Some(ServerFrame::Ack { id: 0, payload: json!({}) }))
            .await?;
        let mut second = authority.accept().await?;
        let _ = second.recv_request().await;
        Ok::<_, anyhow::Error>(authority.accepted())
    });

    let mut client = client(&cfg);
    client.connect();
    drive_until(&mut client, WAIT, |c| c.reconnect_attempts() == 1).await?;
    assert_eq!(client.lifecycle(), Lifecycle::Connecting);

    drive_until(&mut client, WAIT, |c| c.is_connected()).await?;
    assert_eq!(client.reconnect_attempts(), 0);

    client.disconnect();
    assert_eq!(authority_task.await??, 2);
    Ok(())
}

/// An unanswered hello times out, retries up to the cap, then gives up.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_handshake_times_out_and_gives_up() -> anyhow::Result<()> {
    init_tracing();

    let mut authority = ScriptedAuthority::bind().await?;
    let cfg = ClientConfig {
        connect_timeout_ms: 200,
        max_reconnect_attempts: 1,
        ..client_config(authority.addr()?)
    };

    let authority_task = tokio::spawn(async move {
        let mut held = Vec::new();
        for _ in 0..2 {
            held.push(authority.accept_with_reply(None).await?);
        }
        let extra = authority.try_accept(Duration::from_millis(500)).await?;
        anyhow::ensure!(extra.is_none(), "client retried past the cap");
        drop(held);
        Ok::<_, anyhow::Error>(authority.accepted())
    });

    let mut client = client(&cfg);
    client.connect();
    drive_until(&mut client, WAIT, |c| !c.has_link()).await?;

    assert_eq!(client.lifecycle(), Lifecycle::Disconnected);
    assert_eq!(client.reconnect_attempts(), 1);
    assert_eq!(authority_task.await??, 2);
    Ok(())
}
