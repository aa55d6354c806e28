//! WebSocket echo client
//!
//! Connects to a WebSocket server through the pool, sends every remaining
//! argument as a text message and logs what comes back.
//!
//! Usage: ws_echo [--config <path>] <ws-url> [message...]

use anyhow::{bail, Context, Result};
use crossbeam_channel::{unbounded, Sender};
use tracing::{info, warn};
use wirepool_runtime::bin_common::{parse_args, BinaryRunner, RunConfig};
use wirepool_runtime::config::RuntimeConfig;
use wirepool_runtime::wirepool::{ConnectionRef, EventSink, OpCode, WirePoolError, WsPool};

enum Event {
    Open,
    Message(String),
    Closed(u16, String),
    Failed(String),
}

struct ChannelSink {
    tx: Sender<Event>,
}

impl EventSink for ChannelSink {
    fn on_open(&mut self, conn: &mut ConnectionRef<'_>) {
        if let Some(protocol) = conn.protocol() {
            info!("Server selected subprotocol {}", protocol);
        }
        let _ = self.tx.send(Event::Open);
    }

    fn on_message(&mut self, _conn: &mut ConnectionRef<'_>, payload: &[u8], opcode: OpCode) {
        let text = match opcode {
            OpCode::Text => String::from_utf8_lossy(payload).into_owned(),
            _ => format!("<{} binary bytes>", payload.len()),
        };
        let _ = self.tx.send(Event::Message(text));
    }

    fn on_close(&mut self, _conn: &mut ConnectionRef<'_>, code: u16, reason: &str) {
        let _ = self.tx.send(Event::Closed(code, reason.to_string()));
    }

    fn on_failed(&mut self, error: &WirePoolError) {
        let _ = self.tx.send(Event::Failed(error.to_string()));
    }
}

struct EchoClient {
    run: RunConfig,
    url: String,
    messages: Vec<String>,
}

impl BinaryRunner for EchoClient {
    fn run(&mut self, runtime: &RuntimeConfig) -> Result<()> {
        let pool = WsPool::new(runtime.websocket.clone())?;
        let (tx, rx) = unbounded();
        let client = pool.connect(ChannelSink { tx }, &self.url)?;

        for message in &self.messages {
            client.send_text(message)?;
        }

        let mut echoed = 0;
        let mut closing = false;
        let mut stats = None;
        loop {
            let event = rx
                .recv_timeout(self.run.run_timeout)
                .context("timed out waiting for the server")?;
            match event {
                Event::Open => info!("Connected to {}", self.url),
                Event::Message(text) => {
                    echoed += 1;
                    info!("<- {}", text);
                }
                Event::Closed(code, reason) => {
                    info!("Closed ({}) {}", code, reason);
                    break;
                }
                Event::Failed(reason) => bail!("connection failed: {}", reason),
            }
            if echoed >= self.messages.len() && !closing {
                // the slot and its counters go away once the close completes
                stats = client.stats();
                client.close(1000, "done")?;
                closing = true;
            }
        }

        if let Some(stats) = stats {
            info!(
                "Sent {} / received {} messages ({} / {} bytes)",
                stats.messages_sent, stats.messages_received, stats.bytes_sent, stats.bytes_received
            );
        } else {
            warn!("Connection stats unavailable");
        }
        Ok(())
    }

    fn config(&self) -> &RunConfig {
        &self.run
    }
}

fn main() -> Result<()> {
    let args = parse_args()?;
    let mut positional = args.positional.into_iter();
    let Some(url) = positional.next() else {
        bail!("usage: ws_echo [--config <path>] <ws-url> [message...]");
    };
    let mut messages: Vec<String> = positional.collect();
    if messages.is_empty() {
        messages.push("hello".to_string());
    }

    let runtime = RuntimeConfig::load(args.config.resolve())?;
    let mut client = EchoClient {
        run: RunConfig::new("ws_echo"),
        url,
        messages,
    };
    client.execute(runtime)
}
