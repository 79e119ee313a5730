use arduino_relay::config::{Config, ConfigLoader, LogFormat, LoggingConfig};
use arduino_relay::port::{SerialBackend, SystemSerialBackend};
use arduino_relay::service::RelayService;
use arduino_relay::state::ConnectionMode;
use arduino_relay::stdio;
use arduino_relay::RelayError;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Relays text commands to an Arduino over serial or WebSocket.",
    long_about = "Connects to an Arduino over USB serial or WebSocket, prints everything it \
                  reports as JSON lines, and optionally runs a WebSocket server whose clients' \
                  messages are forwarded to the device."
)]
struct Args {
    /// Configuration file (defaults to the standard search path)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Connection mode: serial, websocket or none
    #[arg(short, long)]
    mode: Option<String>,

    /// Serial interface to use instead of the first Arduino found
    #[arg(long)]
    serial_interface: Option<String>,

    /// Device URL for websocket mode
    #[arg(long)]
    remote_url: Option<String>,

    /// Enable the relay WebSocket server
    #[arg(short, long)]
    server: bool,

    /// Port for the relay WebSocket server
    #[arg(short = 'p', long)]
    server_port: Option<u16>,

    /// List attached Arduino boards and exit
    #[arg(long)]
    list_ports: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(ref mode) = self.mode {
            config.relay.mode = mode.clone();
        }
        if let Some(ref interface) = self.serial_interface {
            config.relay.serial_interface = interface.clone();
        }
        if let Some(ref url) = self.remote_url {
            config.relay.remote_url = url.clone();
        }
        if self.server {
            config.server.enabled = true;
        }
        if let Some(port) = self.server_port {
            config.server.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    let args = Args::parse();

    let loader = match args.config {
        Some(ref path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let config_path = loader.config_path.clone();
    let mut config = loader.into_config();
    args.apply(&mut config);

    init_logging(&config.logging);
    match config_path {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => info!("Using built-in configuration"),
    }

    let backend: Arc<dyn SerialBackend> = Arc::new(SystemSerialBackend);

    if args.list_ports {
        for port in backend.arduino_ports() {
            println!("{port}");
        }
        return Ok(());
    }

    let (service, handle) =
        RelayService::new(config.relay_settings(), config.relay_options(), backend);
    let printer = stdio::spawn_event_printer(handle.subscribe());
    let service_task = tokio::spawn(service.run());

    if config.relay.connection_mode() != ConnectionMode::None {
        handle.set_connection_mode(config.relay.mode.clone()).await?;
    }

    let console = stdio::run_console(handle.clone(), stdio::spawn_stdin_reader());
    tokio::select! {
        _ = console => info!("Console closed, shutting down"),
        _ = shutdown_signal() => info!("Signal received, shutting down"),
    }

    // The service may already be gone; either way wait for it to release resources
    let _ = handle.shutdown().await;
    if let Err(e) = service_task.await {
        error!("Relay service ended abnormally: {}", e);
    }
    printer.abort();

    Ok(())
}

/// Logs go to stderr; stdout carries the event stream.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
