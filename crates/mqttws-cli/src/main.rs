//! Round-trip check against an MQTT-over-WebSocket broker: connect,
//! subscribe, publish, wait for the message to come back, then tear down.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use mqttws::{
    CachingProvider, ConnectionEvent, CredentialsProvider, EnvProvider, MqttSession,
    ProviderChain, QoS, SessionOptions, StaticProvider, WebSocketConfig,
};

#[derive(Parser)]
#[command(name = "mqttws", version, about = "Round-trip check for MQTT-over-WebSocket brokers")]
struct Cli {
    /// Broker endpoint, e.g. wss://broker.example:443/mqtt
    endpoint: String,

    /// PEM file with extra CA certificates to trust
    #[arg(long, value_name = "FILE")]
    cacert: Option<PathBuf>,

    /// PEM client certificate for mutual TLS
    #[arg(long, value_name = "FILE", requires = "key")]
    cert: Option<PathBuf>,

    /// PEM private key matching --cert
    #[arg(long, value_name = "FILE", requires = "cert")]
    key: Option<PathBuf>,

    /// Connect timeout in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 3000)]
    connect_timeout: u64,

    /// Write logs to FILE instead of stderr
    #[arg(short = 'l', long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Log verbosity
    #[arg(short, long, value_enum, default_value_t = Verbosity::Error)]
    verbose: Verbosity,

    /// Topic used for the round trip
    #[arg(long, default_value = "test/topic/1")]
    topic: String,

    /// Payload to publish
    #[arg(long, default_value = "hello")]
    message: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Verbosity {
    Error,
    Info,
    Debug,
    Trace,
}

impl Verbosity {
    fn as_directive(self) -> &'static str {
        match self {
            Verbosity::Error => "error",
            Verbosity::Info => "info",
            Verbosity::Debug => "debug",
            Verbosity::Trace => "trace",
        }
    }
}

fn init_logging(cli: &Cli) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.verbose.as_directive()));

    if let Some(path) = &cli.log {
        let file = std::fs::File::create(path)
            .with_context(|| format!("cannot open log file {}", path.display()))?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Ok(Some(guard))
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(None)
    }
}

fn build_session(cli: &Cli) -> MqttSession {
    let options = SessionOptions::with_random_client_id()
        .with_clean_session(false)
        .with_connect_timeout(Duration::from_millis(cli.connect_timeout));

    let mut ws_config = WebSocketConfig::default()
        .with_connect_timeout(Duration::from_millis(cli.connect_timeout));
    if let Some(cacert) = &cli.cacert {
        ws_config = ws_config.with_ca_file(cacert);
    }
    if let (Some(cert), Some(key)) = (&cli.cert, &cli.key) {
        ws_config = ws_config.with_client_cert(cert, key);
    }

    // Environment credentials when present, anonymous otherwise.
    let chain: Arc<dyn CredentialsProvider> = Arc::new(
        ProviderChain::new()
            .push(Arc::new(EnvProvider::new()))
            .push(Arc::new(StaticProvider::anonymous())),
    );

    MqttSession::builder(options)
        .websocket_config(ws_config)
        .credentials_provider(Arc::new(CachingProvider::new(chain)))
        .build()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli)?;

    let session = build_session(&cli);

    // Lifecycle events are consumed off the I/O tasks via the event channel.
    let mut events = session.event_stream();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Connected { session_present } => {
                    println!("connected (session present: {session_present})");
                }
                ConnectionEvent::Interrupted { reason } => {
                    println!("connection interrupted: {reason}");
                }
                ConnectionEvent::Resumed { session_present } => {
                    println!("connection resumed (session present: {session_present})");
                }
                ConnectionEvent::Closed => {
                    println!("session closed");
                    break;
                }
            }
        }
    });

    session
        .connect(&cli.endpoint)
        .await
        .with_context(|| format!("failed to connect to {}", cli.endpoint))?;

    let (delivered_tx, delivered_rx) = tokio::sync::oneshot::channel();
    let delivered_tx = Mutex::new(Some(delivered_tx));
    let granted = session
        .subscribe(cli.topic.clone(), QoS::AtLeastOnce, move |msg| {
            println!(
                "received on {}: {}",
                msg.topic,
                String::from_utf8_lossy(&msg.payload)
            );
            if let Some(tx) = delivered_tx.lock().ok().and_then(|mut tx| tx.take()) {
                let _ = tx.send(());
            }
        })
        .await
        .with_context(|| format!("failed to subscribe to {}", cli.topic))?;
    println!("subscribed to {} (granted QoS {:?})", cli.topic, granted);

    session
        .publish_qos(cli.topic.clone(), cli.message.as_bytes(), QoS::AtLeastOnce)
        .await
        .context("publish failed")?;
    println!("published {:?}", cli.message);

    tokio::time::timeout(Duration::from_secs(10), delivered_rx)
        .await
        .context("timed out waiting for the message to come back")?
        .ok();

    session
        .unsubscribe(cli.topic.clone())
        .await
        .context("unsubscribe failed")?;
    session.close().await.context("close failed")?;
    Ok(())
}
