//! Terminal chat over peerlink sessions.
//!
//! ```text
//! chat-demo server [port]
//! chat-demo client <name> [host:port]
//! ```
//!
//! Set `PEERLINK_CONFIG` to a JSON file to override connection parameters.

use std::{
    io::BufRead,
    sync::mpsc::{self, TryRecvError},
    thread,
};

use anyhow::{Context, bail};
use peerlink_core::{EventLabel, Mode, SessionParams};
use peerlink_session::{Session, SessionState};
use serde_json::{Value, json};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_ADDRESS: &str = "127.0.0.1:7000";

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (mode, params) = parse_args(&args)?;

    let mut session = Session::new(mode, params);
    match mode {
        Mode::Server => install_server(&mut session),
        Mode::Client => install_client(&mut session),
    }
    session.start();

    let lines = spawn_stdin_reader()?;
    let interval = session.peer().params().tick_interval();

    loop {
        match lines.try_recv() {
            Ok(line) if line.trim() == "/quit" => break,
            Ok(line) => say(&mut session, line)?,
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => break,
        }

        session.pump();
        if mode == Mode::Client && session.state() == SessionState::Stopped {
            break;
        }
        thread::sleep(interval);
    }

    session.stop();
    Ok(())
}

fn parse_args(args: &[String]) -> anyhow::Result<(Mode, SessionParams)> {
    let base = match std::env::var("PEERLINK_CONFIG") {
        Ok(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config {path}"))?;
            SessionParams::from_json(&json)?
        }
        Err(_) => SessionParams::default(),
    };

    match args.first().map(String::as_str) {
        Some("server") => {
            let mut params = base;
            if let Some(port) = args.get(1) {
                params.port = port.parse().context("Invalid port")?;
            }
            Ok((Mode::Server, params))
        }
        Some("client") => {
            let Some(name) = args.get(1) else {
                bail!("usage: chat-demo client <name> [host:port]");
            };
            let address = args.get(2).map_or(DEFAULT_ADDRESS, String::as_str);
            let (host, port) = address
                .rsplit_once(':')
                .context("Address must be host:port")?;
            let mut params = base.with_identity(name.clone());
            params.host = host.to_string();
            params.port = port.parse().context("Invalid port")?;
            Ok((Mode::Client, params))
        }
        _ => bail!("usage: chat-demo server [port] | chat-demo client <name> [host:port]"),
    }
}

/// Relay every chat line to all clients, tagged with the sender's name.
fn install_server(session: &mut Session) {
    session.on("chat", |content, event, peer| {
        let from = event
            .client()
            .and_then(|id| peer.client(id))
            .and_then(|record| record.synced_id.clone())
            .unwrap_or_else(|| "anonymous".to_string());
        let text = content.as_str().unwrap_or_default();
        println!("<{from}> {text}");
        peer.trigger("chat", json!({ "from": from, "text": text }))?;
        Ok(())
    });

    session.on_event(EventLabel::InitSuccess, |event, _| {
        tracing::info!(address = %event.payload()["address"], "Chat server listening");
        Ok(())
    });
    session.on_event(EventLabel::Disconnected, |event, peer| {
        let name = event
            .client()
            .and_then(|id| peer.client(id))
            .and_then(|record| record.synced_id.clone());
        tracing::info!(name = name.as_deref().unwrap_or("anonymous"), "Client left");
        Ok(())
    });
}

fn install_client(session: &mut Session) {
    session.on("chat", |content, _, _| {
        let from = content["from"].as_str().unwrap_or("?");
        let text = content["text"].as_str().unwrap_or_default();
        println!("<{from}> {text}");
        Ok(())
    });

    session.on_event(EventLabel::Connected, |_, peer| {
        tracing::info!(identity = %peer.identity(), "Connected to chat server");
        Ok(())
    });
    session.on_event(EventLabel::ServerFull, |_, _| {
        tracing::warn!("Chat server is full");
        Ok(())
    });
    session.on_event(EventLabel::Closed, |event, _| {
        tracing::info!(reason = reason(event.payload()), "Connection closed");
        Ok(())
    });
    session.on_event(EventLabel::InitFailure, |event, _| {
        tracing::error!(reason = reason(event.payload()), "Could not connect");
        Ok(())
    });
}

fn say(session: &mut Session, line: String) -> anyhow::Result<()> {
    if line.trim().is_empty() {
        return Ok(());
    }
    match session.mode() {
        // The server speaks as itself, straight to every client.
        Mode::Server => session.trigger("chat", json!({ "from": "server", "text": line }))?,
        Mode::Client => session.trigger("chat", Value::String(line))?,
    }
    Ok(())
}

fn reason(payload: &Value) -> &str {
    payload
        .get("reason")
        .or_else(|| payload.get("error"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
}

fn spawn_stdin_reader() -> anyhow::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}
