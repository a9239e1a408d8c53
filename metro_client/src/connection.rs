//! Connection manager.
//!
//! Owns the single link to the game authority and drives its lifecycle:
//!
//! ```text
//! Disconnected --connect()--> Connecting --Established--> Connected
//!      ^                          |                           |
//!      +------- Error / Lost -----+---------------------------+
//! ```
//!
//! Recovery policy:
//! - `Error` (handshake failed) and `Lost` with the authority closing the
//!   session on purpose both trigger one immediate reopen of the same link.
//! - Consecutive automatic reopens are capped by `max_reconnect_attempts`;
//!   the counter resets once a link is established.
//! - Any other `Lost` reason drops the link and waits for an explicit
//!   `connect()`.
//!
//! Authoritative snapshots (`gameStateUpdate`, `gameStarted`) are decoded into
//! [`InboundEvent`]s and pushed into the [`SnapshotSink`] before user
//! subscriptions run.

use std::collections::HashMap;

use metro_shared::{
    config::ClientConfig,
    game::GameSnapshot,
    net::{ClientFrame, DisconnectReason, ServerFrame, SessionContext},
};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

use crate::transport::{LinkSignal, SignalReceiver, Transport};

/// Connectivity status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Connection errors. None of these are fatal to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnError {
    /// Operation needs a `Connected` link.
    NotConnected,
    /// Handshake or transport failure.
    LinkError(String),
    /// The authority closed the session on purpose.
    RemoteInitiatedClose,
    /// The link went down for any other reason.
    OtherDisconnect(String),
    /// Event name outside the known inbound set.
    UnknownEvent(String),
}

impl std::fmt::Display for ConnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnError::NotConnected => f.write_str("not connected"),
            ConnError::LinkError(e) => write!(f, "link error: {e}"),
            ConnError::RemoteInitiatedClose => f.write_str("session closed by server"),
            ConnError::OtherDisconnect(reason) => write!(f, "disconnected: {reason}"),
            ConnError::UnknownEvent(name) => write!(f, "unknown event '{name}'"),
        }
    }
}

impl std::error::Error for ConnError {}

/// Inbound event kinds the client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    GameStateUpdate,
    GameStarted,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::GameStateUpdate, EventKind::GameStarted];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            EventKind::GameStateUpdate => "gameStateUpdate",
            EventKind::GameStarted => "gameStarted",
        }
    }
}

/// Decoded inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    GameStateUpdate(GameSnapshot),
    GameStarted(GameSnapshot),
}

impl InboundEvent {
    pub fn decode(name: &str, payload: Value) -> Result<Self, DecodeError> {
        let kind = EventKind::from_name(name).ok_or_else(|| DecodeError::UnknownEvent(name.to_string()))?;
        let snapshot: GameSnapshot =
            serde_json::from_value(payload).map_err(|e| DecodeError::BadPayload {
                event: kind.name(),
                error: e.to_string(),
            })?;
        Ok(match kind {
            EventKind::GameStateUpdate => InboundEvent::GameStateUpdate(snapshot),
            EventKind::GameStarted => InboundEvent::GameStarted(snapshot),
        })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::GameStateUpdate(_) => EventKind::GameStateUpdate,
            InboundEvent::GameStarted(_) => EventKind::GameStarted,
        }
    }

    pub fn snapshot(&self) -> &GameSnapshot {
        match self {
            InboundEvent::GameStateUpdate(s) | InboundEvent::GameStarted(s) => s,
        }
    }
}

/// Inbound event decoding failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    UnknownEvent(String),
    BadPayload { event: &'static str, error: String },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::UnknownEvent(name) => write!(f, "unknown event '{name}'"),
            DecodeError::BadPayload { event, error } => write!(f, "bad {event} payload: {error}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Receives authoritative state.
pub trait SnapshotSink {
    /// Merges a full snapshot into local state. May be called repeatedly
    /// with the same or older data.
    fn apply_snapshot(&mut self, snapshot: &GameSnapshot);

    /// Called once per `gameStarted`, after the snapshot was applied.
    fn game_started(&mut self, game_id: Option<&str>);
}

/// Outcome delivered to an acknowledgement callback.
pub type AckResult = Result<Value, ConnError>;

type AckCallback = Box<dyn FnOnce(AckResult)>;
type Subscriber = Box<dyn FnMut(&GameSnapshot)>;

struct Link {
    signals: SignalReceiver,
}

/// Single-owner manager for one logical link.
pub struct ConnectionManager<T, S> {
    transport: T,
    sink: S,
    link: Option<Link>,
    lifecycle: Lifecycle,
    session: SessionContext,

    max_reconnect_attempts: u32,
    reconnect_attempts: u32,

    next_request_id: u64,
    pending_acks: HashMap<u64, AckCallback>,
    subscriptions: HashMap<EventKind, Vec<Subscriber>>,
}

impl<T: Transport, S: SnapshotSink> ConnectionManager<T, S> {
    pub fn new(cfg: &ClientConfig, transport: T, sink: S) -> Self {
        let mut session = SessionContext::default();
        session.update(None, Some(&cfg.player_name), None);
        Self {
            transport,
            sink,
            link: None,
            lifecycle: Lifecycle::Disconnected,
            session,
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            reconnect_attempts: 0,
            next_request_id: 1,
            pending_acks: HashMap::new(),
            subscriptions: HashMap::new(),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_connected(&self) -> bool {
        self.lifecycle == Lifecycle::Connected
    }

    /// True while a link is being established or is up.
    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Updates the session context. Missing or empty values keep the
    /// current ones.
    pub fn set_player_info(&mut self, player_id: Option<&str>, player_name: Option<&str>, game_id: Option<&str>) {
        self.session.update(player_id, player_name, game_id);
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Automatic reopens since the last established link.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Requests still waiting for an acknowledgement.
    pub fn pending_requests(&self) -> usize {
        self.pending_acks.len()
    }

    /// Opens the link. Ignored while a link exists or is being established.
    pub fn connect(&mut self) {
        if self.link.is_some() {
            debug!(lifecycle = ?self.lifecycle, "connect ignored: link already exists");
            return;
        }
        info!(player = ?self.session.player_name, "Connecting");
        self.reconnect_attempts = 0;
        self.open_link();
    }

    /// Closes the link on our side. No automatic recovery follows.
    pub fn disconnect(&mut self) {
        if self.link.is_none() {
            return;
        }
        info!("Closing link");
        self.drop_link();
        self.fail_pending(&ConnError::OtherDisconnect(
            DisconnectReason::ClientDisconnect.to_string(),
        ));
    }

    /// Sends a request without asking for an acknowledgement.
    pub fn emit(&mut self, event: &str, payload: Value) -> Result<(), ConnError> {
        self.send_request(event, payload, None)
    }

    /// Sends a request and routes the authority's acknowledgement to
    /// `callback`. When the request cannot be sent, `callback` runs before
    /// this returns.
    pub fn emit_with_ack<F>(&mut self, event: &str, payload: Value, callback: F) -> Result<(), ConnError>
    where
        F: FnOnce(AckResult) + 'static,
    {
        self.send_request(event, payload, Some(Box::new(callback)))
    }

    /// Subscribes to an inbound event kind. Requires a connected link, same
    /// as `emit`. Subscriptions survive reconnects.
    pub fn on<F>(&mut self, kind: EventKind, callback: F) -> Result<(), ConnError>
    where
        F: FnMut(&GameSnapshot) + 'static,
    {
        if !self.is_connected() {
            warn!(event = kind.name(), "Not connected; cannot subscribe");
            return Err(ConnError::NotConnected);
        }
        self.subscriptions.entry(kind).or_default().push(Box::new(callback));
        Ok(())
    }

    /// [`on`](Self::on) by wire name; unknown names are rejected.
    pub fn on_named<F>(&mut self, name: &str, callback: F) -> Result<(), ConnError>
    where
        F: FnMut(&GameSnapshot) + 'static,
    {
        let Some(kind) = EventKind::from_name(name) else {
            warn!(event = name, "Refusing subscription to unknown event");
            return Err(ConnError::UnknownEvent(name.to_string()));
        };
        self.on(kind, callback)
    }

    /// Processes every queued signal without waiting. Returns how many were
    /// handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Some(link) = self.link.as_mut() {
            let signal = match link.signals.try_recv() {
                Ok(signal) => signal,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!("Transport went away without reporting");
                    LinkSignal::Lost(DisconnectReason::TransportClose)
                }
            };
            self.handle_signal(signal);
            handled += 1;
        }
        handled
    }

    /// Waits for the next signal and processes it. Returns false right away
    /// when there is no link.
    pub async fn next_signal(&mut self) -> bool {
        let Some(link) = self.link.as_mut() else {
            return false;
        };
        let signal = match link.signals.recv().await {
            Some(signal) => signal,
            None => {
                warn!("Transport went away without reporting");
                LinkSignal::Lost(DisconnectReason::TransportClose)
            }
        };
        self.handle_signal(signal);
        true
    }

    /// Applies one link signal to the state machine.
    pub fn handle_signal(&mut self, signal: LinkSignal) {
        match signal {
            LinkSignal::Established => {
                self.lifecycle = Lifecycle::Connected;
                self.reconnect_attempts = 0;
                info!("Connected");
            }
            LinkSignal::Lost(reason) => {
                self.lifecycle = Lifecycle::Disconnected;
                if reason.is_remote_close() {
                    warn!(reason = %reason, "Server closed the session");
                    self.fail_pending(&ConnError::RemoteInitiatedClose);
                    self.retry(reason.as_str());
                } else {
                    warn!(reason = %reason, "Disconnected");
                    self.fail_pending(&ConnError::OtherDisconnect(reason.to_string()));
                    self.drop_link();
                }
            }
            LinkSignal::Error(e) => {
                self.lifecycle = Lifecycle::Disconnected;
                error!(error = %e, "Connection error");
                self.fail_pending(&ConnError::LinkError(e.clone()));
                self.retry(&e);
            }
            LinkSignal::Frame(frame) => self.handle_frame(frame),
        }
    }

    fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Event { event, payload } => match InboundEvent::decode(&event, payload) {
                Ok(inbound) => self.dispatch(inbound),
                Err(e) => warn!(error = %e, "Dropping inbound event"),
            },
            ServerFrame::Ack { id, payload } => match self.pending_acks.remove(&id) {
                Some(callback) => callback(Ok(payload)),
                None => debug!(id, "Ack for unknown request"),
            },
            ServerFrame::Disconnect => {
                self.handle_signal(LinkSignal::Lost(DisconnectReason::ServerDisconnect))
            }
            ServerFrame::Welcome { .. } => debug!("Unexpected welcome on open link"),
        }
    }

    fn dispatch(&mut self, event: InboundEvent) {
        let kind = event.kind();
        let snapshot = event.snapshot();
        debug!(
            event = kind.name(),
            players = snapshot.players.len(),
            stations = snapshot.map.stations.len(),
            "Received event"
        );

        self.sink.apply_snapshot(snapshot);
        if kind == EventKind::GameStarted {
            self.sink.game_started(self.session.game_id.as_deref());
        }
        if let Some(subscribers) = self.subscriptions.get_mut(&kind) {
            for subscriber in subscribers.iter_mut() {
                subscriber(snapshot);
            }
        }
    }

    fn send_request(&mut self, event: &str, payload: Value, callback: Option<AckCallback>) -> Result<(), ConnError> {
        if !self.is_connected() {
            warn!(event, "Not connected; cannot emit");
            return Self::fail(callback, ConnError::NotConnected);
        }

        let id = callback.as_ref().map(|_| {
            let id = self.next_request_id;
            self.next_request_id += 1;
            id
        });
        debug!(event, ?id, "Emitting request");

        let frame = ClientFrame::Request {
            id,
            event: event.to_string(),
            payload,
            session: self.session.clone(),
        };
        if let Err(e) = self.transport.send(frame) {
            warn!(event, error = %e, "Request send failed");
            return Self::fail(callback, ConnError::LinkError(e.to_string()));
        }
        if let (Some(id), Some(callback)) = (id, callback) {
            self.pending_acks.insert(id, callback);
        }
        Ok(())
    }

    fn fail(callback: Option<AckCallback>, err: ConnError) -> Result<(), ConnError> {
        if let Some(callback) = callback {
            callback(Err(err.clone()));
        }
        Err(err)
    }

    fn fail_pending(&mut self, err: &ConnError) {
        for (_, callback) in self.pending_acks.drain() {
            callback(Err(err.clone()));
        }
    }

    /// Registers a fresh signal channel, then asks the transport to open.
    /// Signals from earlier attempts land in the dropped receiver.
    fn open_link(&mut self) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.link = Some(Link { signals: rx });
        self.lifecycle = Lifecycle::Connecting;
        if let Err(e) = self.transport.open(&self.session, tx) {
            error!(error = %e, "Link initialization failed");
            self.drop_link();
        }
    }

    fn retry(&mut self, cause: &str) {
        if self.reconnect_attempts >= self.max_reconnect_attempts {
            error!(
                attempts = self.reconnect_attempts,
                cause, "Reconnect limit reached; waiting for explicit connect"
            );
            self.drop_link();
            return;
        }
        self.reconnect_attempts += 1;
        info!(
            attempt = self.reconnect_attempts,
            max = self.max_reconnect_attempts,
            cause,
            "Reconnecting"
        );
        self.open_link();
    }

    fn drop_link(&mut self) {
        self.transport.close();
        self.link = None;
        self.lifecycle = Lifecycle::Disconnected;
    }
}
