//! Line-delimited JSON host for a provider port.
//!
//! Reads inbound messages from stdin, one per line:
//!
//! ```text
//! {"source": "default", "message": {"channel": "egress"}}
//! {"source": "default", "message": {"to": "i1", "message": {"type": "construct"}}}
//! {"source": "default", "message": {"to": "i1", "message": {"action": "method", "type": "ping", "value": "ab", "reqId": 1}}}
//! ```
//!
//! and writes every outbound message to stdout as
//! `{"channel": ..., "message": ...}`. The hosted provider implements every
//! method the schema declares by echoing its arguments back.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: tracing filter (default: "info")
//! - `CAPABILITY_PORT_*`: port configuration overrides (see `PortConfig`)
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin stdio_host -- schemas/echo.yaml < session.jsonl
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use capability_port::config::PortConfig;
use capability_port::port::{ChannelSink, Provider, ProviderPort, Source};
use capability_port::schema::CapabilitySchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, Deserialize)]
struct Envelope {
    source: String,
    message: Value,
}

/// Answers every declared method with its own arguments.
struct EchoProvider {
    methods: Arc<HashSet<String>>,
}

impl Provider for EchoProvider {
    fn responds_to(&self, method: &str) -> bool {
        self.methods.contains(method)
    }

    fn call(&mut self, _method: &str, mut args: Vec<Value>) -> Value {
        if args.len() == 1 {
            args.remove(0)
        } else {
            Value::Array(args)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let schema_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .ok_or("usage: stdio_host <schema.yaml>")?;
    let content = std::fs::read_to_string(&schema_path)?;
    let schema = if schema_path.extension().map_or(false, |ext| ext == "json") {
        CapabilitySchema::from_json(&content)?
    } else {
        CapabilitySchema::from_yaml(&content)?
    };
    tracing::info!(
        "Loaded schema {} ({} members)",
        schema_path.display(),
        schema.len()
    );

    let methods: Arc<HashSet<String>> =
        Arc::new(schema.method_names().into_iter().map(String::from).collect());

    let (sink, mut rx) = ChannelSink::new();
    let port = ProviderPort::builder(schema, sink)
        .config(PortConfig::default().with_env_overrides())
        .build();
    port.get_interface().provide_synchronous(move || EchoProvider {
        methods: methods.clone(),
    });

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some((channel, message)) = rx.recv().await {
            let mut line = json!({"channel": channel, "message": message}).to_string();
            line.push('\n');
            if let Err(e) = stdout.write_all(line.as_bytes()).await {
                tracing::error!("Failed to write to stdout: {}", e);
                break;
            }
        }
        let _ = stdout.flush().await;
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let envelope: Envelope = match serde_json::from_str(&line) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!("Skipping malformed line: {}", e);
                continue;
            }
        };
        match envelope.source.parse::<Source>() {
            Ok(source) => port.on_message(source, envelope.message),
            Err(e) => tracing::warn!("Skipping message: {}", e),
        }
    }

    tracing::info!("stdin closed, shutting down {}", port);
    port.close();
    drop(port);
    writer.await?;
    Ok(())
}
