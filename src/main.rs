use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use uart_ws_bridge::config::{ConfigLoader, LogFormat, LoggingConfig};
use uart_ws_bridge::engine::{engine_channel, run_engine, EngineEvent, FixedMemoryProbe};
use uart_ws_bridge::rest_api::{self, ServerContext};
use uart_ws_bridge::uart::{SerialUart, UartChannel};
use uart_ws_bridge::BridgeEngine;

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Bridge a UART to WebSocket viewers",
    long_about = "Streams a serial console to one or more WebSocket viewers, \
writes viewer input back to the UART, and serves the UART configuration over \
HTTP. Flow control keeps the bridge alive under pressure; autobaud recovers \
an unknown line rate."
)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial device to bridge (overrides the config file).
    #[arg(short, long)]
    device: Option<String>,

    /// Initial baud rate (overrides the config file).
    #[arg(short, long)]
    baud: Option<u32>,

    /// Port for the HTTP/WebSocket server (overrides the config file).
    #[arg(short, long)]
    port: Option<u16>,

    /// Probe for the baud rate at startup.
    #[arg(long)]
    autobaud: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loader = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let mut config = loader.into_config();
    if let Some(device) = args.device {
        config.uart.device = device;
    }
    if let Some(baud) = args.baud {
        config.uart.baud = baud;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    init_tracing(&config.logging);

    let format = config.uart.frame_format();
    let backend = SerialUart::open(&config.uart.device, config.uart.baud, format)?;
    let channel = UartChannel::new(Box::new(backend), config.uart.baud, format)?;
    info!(device = %config.uart.device, baud = config.uart.baud, "UART open");

    // Host builds have no meaningful heap ceiling; the memory loop stays
    // quiescent unless a real probe is wired in.
    let engine = BridgeEngine::new(
        config.engine_config(),
        channel,
        Box::new(FixedMemoryProbe(usize::MAX)),
        Instant::now(),
    );

    let (handle, events) = engine_channel();
    if config.uart.autobaud_on_start || args.autobaud {
        handle.send(EngineEvent::StartAutobaud);
    }
    let engine_task = tokio::spawn(run_engine(engine, events, config.uart.poll_interval()));

    let app = rest_api::router(ServerContext {
        engine: handle.clone(),
    });

    let host: IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::from((host, config.server.port));
    info!(%addr, "web server is up");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    drop(handle);
    engine_task.await?;
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

// --- Graceful Shutdown Handler ---
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, starting graceful shutdown");
}
