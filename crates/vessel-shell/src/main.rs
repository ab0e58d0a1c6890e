//! Minimal shell around a single worker: load a script, feed it messages
//! from the command line, print what comes back.
//!
//! Usage: vessel-shell [v8 flags] <script.js> [message ...]
//!
//! V8 flags (e.g. `--expose-gc`, `--max-old-space-size=64`) are consumed
//! before the script path; everything after the script is sent into the
//! worker as a message, and replies are printed to stdout (pretty-printed
//! when they parse as JSON). The host receive callback echoes whatever the
//! script sends out.

use std::env;
use std::io;

use anyhow::{Context, Result};
use tracing::{error, info};
use vessel::WorkerHandle;

fn main() -> Result<()> {
    // Tracing goes to stderr; stdout carries replies only.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    args = vessel::set_flags(args);
    if args.is_empty() {
        error!("usage: vessel-shell [v8 flags] <script.js> [message ...]");
        std::process::exit(1);
    }

    let script_path = args.remove(0);
    let source = std::fs::read_to_string(&script_path)
        .with_context(|| format!("failed to read {script_path}"))?;

    info!(engine = %vessel::version(), script = %script_path, "starting worker");

    let worker = WorkerHandle::new(|msg| {
        info!(bytes = msg.len(), "script sent a message; echoing");
        Some(msg.to_vec())
    })?;

    worker
        .load(&script_path, &source)
        .with_context(|| format!("failed to run {script_path}"))?;

    for message in &args {
        match worker.send_bytes(message.as_bytes()) {
            Ok(reply) => println!("{}", render_reply(&reply)),
            Err(err) => error!(%err, "message delivery failed"),
        }
    }

    worker.dispose();
    Ok(())
}

fn render_reply(reply: &[u8]) -> String {
    if reply.is_empty() {
        return "(no reply)".to_string();
    }
    match serde_json::from_slice::<serde_json::Value>(reply) {
        Ok(value) => value.to_string(),
        Err(_) => String::from_utf8_lossy(reply).into_owned(),
    }
}
