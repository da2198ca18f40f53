//! Hostwatch companion agent.
//!
//! Minimal UDP request/response server that answers process-liveness
//! queries from the `processes` probe. One datagram in, one datagram out;
//! a malformed request gets an error response and the loop keeps serving.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::process::Command;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hostwatch::net::agent::{AgentRequest, AgentResponse, DEFAULT_AGENT_PORT};

/// Process-liveness agent for hostwatch
#[derive(Parser)]
#[command(name = "hostwatch-agent")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to bind
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// UDP port to listen on
    #[arg(short, long, default_value_t = DEFAULT_AGENT_PORT)]
    port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();

    let socket = UdpSocket::bind((cli.bind.as_str(), cli.port))
        .with_context(|| format!("bind {}:{}", cli.bind, cli.port))?;
    info!(bind = %cli.bind, port = cli.port, "agent listening");

    serve(&socket)
}

/// Serve forever. Per-datagram errors are logged and never end the loop.
fn serve(socket: &UdpSocket) -> Result<()> {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(err) => {
                warn!(%err, "receive error");
                continue;
            }
        };

        let response = handle_request(&buf[..len]);
        if let Err(err) = reply(socket, peer, &response) {
            warn!(%peer, %err, "reply failed");
        }
    }
}

fn reply(socket: &UdpSocket, peer: SocketAddr, response: &AgentResponse) -> Result<()> {
    let payload = serde_json::to_vec(response)?;
    socket.send_to(&payload, peer)?;
    Ok(())
}

fn handle_request(raw: &[u8]) -> AgentResponse {
    match serde_json::from_slice::<AgentRequest>(raw) {
        Ok(AgentRequest::Health) => AgentResponse::health_ok(),
        Ok(AgentRequest::Check { name }) => {
            let name = name.trim();
            if name.is_empty() {
                return AgentResponse::failure("empty process name");
            }
            match process_running(name) {
                Ok(running) => {
                    debug!(process = %name, running, "check");
                    AgentResponse::check(name, running)
                }
                Err(err) => AgentResponse::failure(format!("check failed: {err:#}")),
            }
        }
        Err(err) => AgentResponse::failure(format!("bad request: {err}")),
    }
}

/// Exact-name process lookup via `pgrep -x`.
fn process_running(name: &str) -> Result<bool> {
    let status = Command::new("pgrep")
        .arg("-x")
        .arg(name)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .context("spawn pgrep")?;
    // Exit 0 means at least one match, 1 means none; anything else is a
    // pgrep failure.
    match status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        other => anyhow::bail!("pgrep exited with {other:?}"),
    }
}
