//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p metro_client -- [--addr 127.0.0.1:5000] [--name Ada]
//!       [--player-id p1] [--game-id g1] [--config client.json]
//!
//! The client connects to the game authority, mirrors pushed game state, and
//! lets you send requests from the console.
//!
//! Console commands:
//!   connect                 - Open the link (no-op while one exists)
//!   disconnect              - Close the link
//!   status                  - Show connection and game status
//!   station <id>            - Show a station and its connections
//!   view <path>             - Navigate to `/` or `/game/<id>`
//!   back                    - Return to the previous view
//!   player <id> <name> [g]  - Set session info
//!   emit <event> [json]     - Send a request and print the acknowledgement
//!   layout                  - Print decluttered player token positions
//!   mode <normal|select>    - Set the station mode
//!   quit                    - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use metro_client::{
    route::{Navigator, Route},
    store::StationMode,
    ConnectionManager, MapStore, TcpTransport,
};
use metro_shared::{config::ClientConfig, math::Size};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::info;

/// Map plane used for console token layout.
const PLANE: Size = Size::new(1000.0, 1000.0);

type Client = ConnectionManager<TcpTransport, MapStore>;

#[derive(Default)]
struct Args {
    config: Option<PathBuf>,
    addr: Option<String>,
    name: Option<String>,
    player_id: Option<String>,
    game_id: Option<String>,
}

fn parse_args() -> Args {
    let mut out = Args::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1).cloned();
        match (args[i].as_str(), value) {
            ("--config", Some(v)) => out.config = Some(PathBuf::from(v)),
            ("--addr", Some(v)) => out.addr = Some(v),
            ("--name", Some(v)) => out.name = Some(v),
            ("--player-id", Some(v)) => out.player_id = Some(v),
            ("--game-id", Some(v)) => out.game_id = Some(v),
            _ => {
                i += 1;
                continue;
            }
        }
        i += 2;
    }
    out
}

fn load_config(args: &Args) -> anyhow::Result<ClientConfig> {
    let mut cfg = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(addr) = &args.addr {
        cfg.server_addr = addr.clone();
    }
    if let Some(name) = &args.name {
        cfg.player_name = name.clone();
    }
    Ok(cfg)
}

/// Outcome of one console line.
enum Reply {
    Lines(Vec<String>),
    Quit,
}

fn exec_console(client: &mut Client, cfg: &ClientConfig, line: &str) -> anyhow::Result<Reply> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&command) = tokens.first() else {
        return Ok(Reply::Lines(Vec::new()));
    };
    if matches!(command, "quit" | "exit") {
        return Ok(Reply::Quit);
    }
    exec_command(client, cfg, line, &tokens).map(Reply::Lines)
}

fn exec_command(
    client: &mut Client,
    cfg: &ClientConfig,
    line: &str,
    tokens: &[&str],
) -> anyhow::Result<Vec<String>> {
    let command = tokens[0];

    match command {
        "connect" => {
            client.connect();
            Ok(vec![format!("State: {:?}", client.lifecycle())])
        }
        "disconnect" => {
            client.disconnect();
            Ok(vec!["Disconnected".to_string()])
        }
        "status" => {
            let store = client.sink();
            let mut out = vec![
                format!("State: {:?}", client.lifecycle()),
                format!("Session: {:?}", client.session()),
                format!("View: {}", store.router.current().path()),
                format!(
                    "Map: {} stations, {} lines, {} connections",
                    store.subway_map.station_count(),
                    store.subway_map.line_count(),
                    store.subway_map.connection_count()
                ),
                format!("Station mode: {:?}", store.station_mode()),
            ];
            for p in &store.game.players {
                let marker = if store.game.is_turn_of(&p.id) { "*" } else { " " };
                out.push(format!("{marker} {} ({}) at {:?}", p.name, p.id, p.station_id));
            }
            Ok(out)
        }
        "station" => {
            let Some(&id) = tokens.get(1) else {
                return Ok(vec!["Usage: station <id>".to_string()]);
            };
            let map = &client.sink().subway_map;
            let Some(station) = map.station(id) else {
                return Ok(vec![format!("No station {id}")]);
            };
            let mut out = vec![format!(
                "{} ({}) at {:?}",
                station.name.as_deref().unwrap_or(&station.id),
                station.id,
                station.position()
            )];
            out.extend(
                map.connections_of(id)
                    .into_iter()
                    .map(|(other, line, distance)| format!("  -> {other} on {line} ({distance})")),
            );
            Ok(out)
        }
        "view" => {
            let Some(route) = tokens.get(1).and_then(|path| Route::parse(path)) else {
                return Ok(vec!["Usage: view </|/game/<id>>".to_string()]);
            };
            let router = &mut client.sink_mut().router;
            router.navigate(route);
            Ok(vec![format!("View: {}", router.current().path())])
        }
        "back" => {
            let router = &mut client.sink_mut().router;
            match router.back() {
                Some(_) => Ok(vec![format!("View: {}", router.current().path())]),
                None => Ok(vec!["Already at the first view".to_string()]),
            }
        }
        "player" => {
            if tokens.len() < 3 {
                return Ok(vec!["Usage: player <id> <name> [game_id]".to_string()]);
            }
            client.set_player_info(Some(tokens[1]), Some(tokens[2]), tokens.get(3).copied());
            Ok(vec![format!("Session: {:?}", client.session())])
        }
        "emit" => {
            if tokens.len() < 2 {
                return Ok(vec!["Usage: emit <event> [json]".to_string()]);
            }
            let raw = line
                .splitn(3, char::is_whitespace)
                .nth(2)
                .map(str::trim)
                .unwrap_or("");
            let payload: Value = if raw.is_empty() {
                Value::Null
            } else {
                serde_json::from_str(raw).context("parse payload json")?
            };
            let event = tokens[1].to_string();
            let label = event.clone();
            match client.emit_with_ack(&event, payload, move |result| match result {
                Ok(ack) => println!("ack {label}: {ack}"),
                Err(e) => println!("ack {label} failed: {e}"),
            }) {
                Ok(()) => Ok(vec![format!("Sent {event}")]),
                Err(e) => Ok(vec![format!("Not sent: {e}")]),
            }
        }
        "layout" => {
            let placements = client.sink().player_layout(PLANE, &cfg.layout)?;
            Ok(placements
                .iter()
                .map(|p| {
                    format!(
                        "{}: ({}, {}){}",
                        p.key,
                        p.position.x,
                        p.position.y,
                        if p.moved() { " moved" } else { "" }
                    )
                })
                .collect())
        }
        "mode" => {
            let mode = match tokens.get(1).copied() {
                Some("normal") => StationMode::Normal,
                Some("select") => StationMode::Select,
                _ => return Ok(vec!["Usage: mode <normal|select>".to_string()]),
            };
            client.sink_mut().set_station_mode(mode);
            Ok(vec![format!("Station mode: {mode:?}")])
        }
        other => Ok(vec![format!("Unknown command: {other}")]),
    }
}

enum Wake {
    Console(Option<String>),
    Signal,
    Idle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    let cfg = load_config(&args).context("load config")?;
    info!(server = %cfg.server_addr, player = %cfg.player_name, "Starting client");

    let transport = TcpTransport::new(
        cfg.server_addr.clone(),
        Duration::from_millis(cfg.connect_timeout_ms),
    );
    let mut client: Client = ConnectionManager::new(&cfg, transport, MapStore::default());
    client.set_player_info(args.player_id.as_deref(), args.name.as_deref(), args.game_id.as_deref());
    client.connect();

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Client started. Type 'status' for info, 'quit' to exit.");
    println!();

    loop {
        let has_link = client.has_link();
        let wake = tokio::select! {
            line = console_rx.recv() => Wake::Console(line),
            _ = client.next_signal(), if has_link => Wake::Signal,
            _ = tokio::time::sleep(Duration::from_millis(250)), if !has_link => Wake::Idle,
        };

        match wake {
            Wake::Console(None) => break,
            Wake::Console(Some(line)) => match exec_console(&mut client, &cfg, &line) {
                Ok(Reply::Quit) => break,
                Ok(Reply::Lines(output)) => {
                    for line in output {
                        println!("{}", line);
                    }
                }
                Err(e) => {
                    println!("Error: {}", e);
                }
            },
            Wake::Signal | Wake::Idle => {}
        }
    }

    client.disconnect();
    Ok(())
}
