//! gotimed - travel-time monitoring service
//!
//! Wires together:
//! - Configuration loading
//! - Google Maps provider and geocoder
//! - Monitor engine (registry, scheduler, event bus)
//! - Event output as JSON lines on stdout

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use gotime_api::{EventKind, SessionEvent, SessionRequest, TravelMode, Waypoint};
use gotime_config::{load_config_or_default, Config};
use gotime_core::{EventHandler, HandlerError, MonitorEngine};
use gotime_provider::GoogleMapsProvider;
use gotime_util::{default_config_path, format_duration};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// gotimed - wait until a route's travel time drops below a target
#[derive(Parser, Debug)]
#[command(name = "gotimed")]
#[command(about = "Travel-time monitoring service", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/gotime/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch one route until the target is reached, the wait runs out, or a signal arrives
    Watch(WatchArgs),
}

#[derive(clap::Args, Debug)]
struct WatchArgs {
    /// Origin: address or "lat,lng"
    #[arg(long)]
    from: Waypoint,

    /// Destination: address or "lat,lng"
    #[arg(long)]
    to: Waypoint,

    /// Target travel time in minutes
    #[arg(long)]
    target_minutes: u64,

    /// Extra minutes still counted as reaching the target
    #[arg(long, default_value_t = 0)]
    tolerance_minutes: u64,

    /// Seconds between polls (default from config)
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Give up after this many minutes (default from config)
    #[arg(long)]
    max_wait_minutes: Option<u64>,

    /// Travel mode: driving, walking or transit
    #[arg(long, default_value = "driving")]
    mode: TravelMode,
}

impl WatchArgs {
    fn to_request(&self) -> SessionRequest {
        let minutes = |m: u64| Duration::from_secs(m.saturating_mul(60));

        let mut request = SessionRequest::new(
            self.from.clone(),
            self.to.clone(),
            minutes(self.target_minutes),
        )
        .with_tolerance(minutes(self.tolerance_minutes))
        .with_mode(self.mode);

        if let Some(secs) = self.interval_secs {
            request = request.with_poll_interval(Duration::from_secs(secs));
        }
        if let Some(m) = self.max_wait_minutes {
            request = request.with_max_wait(minutes(m));
        }
        request
    }
}

/// Writes each event to stdout as one JSON line
struct JsonLinePrinter;

#[async_trait]
impl EventHandler for JsonLinePrinter {
    fn name(&self) -> &str {
        "json-stdout"
    }

    async fn handle(&self, event: &SessionEvent) -> Result<(), HandlerError> {
        let line = serde_json::to_string(event)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}")?;
        stdout.flush()?;
        Ok(())
    }
}

/// Main service state
struct Service {
    engine: MonitorEngine,
}

impl Service {
    fn new(args: &Args) -> Result<Self> {
        let config: Config = load_config_or_default(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            poll_interval = %format_duration(config.engine.default_poll_interval),
            max_wait = %format_duration(config.engine.default_max_wait),
            "Configuration loaded"
        );

        let api_key = config.provider.resolve_api_key().context(
            "No API key configured: set provider.api_key or GOOGLE_MAPS_API_KEY",
        )?;

        let google = Arc::new(
            GoogleMapsProvider::with_options(
                api_key,
                config.provider.base_url.clone(),
                config.provider.request_timeout,
            )
            .context("Failed to create Google Maps client")?,
        );

        let engine = MonitorEngine::new(config.engine, google.clone(), Some(google));
        Ok(Self { engine })
    }

    async fn watch(self, watch: &WatchArgs) -> Result<ExitCode> {
        let printer = self.engine.events().subscribe_handler(Arc::new(JsonLinePrinter));
        let mut events = self.engine.events().subscribe();

        let session_id = self
            .engine
            .start_session(watch.to_request())
            .await
            .context("Failed to start monitoring")?;

        info!(session_id = %session_id, "Watching route");

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;

        let outcome = loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break None;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break None;
                }
                received = events.recv() => match received {
                    Ok(event) if event.session_id == session_id => {
                        info!(kind = %event.kind, "{}", event.message);
                        break Some(event.kind);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed events while watching");
                    }
                    Err(RecvError::Closed) => break None,
                },
            }
        };

        self.engine.shutdown().await;
        drop(self.engine);

        // The printer exits once the bus is gone
        if tokio::time::timeout(Duration::from_secs(1), printer).await.is_err() {
            warn!("Event printer did not finish");
        }

        info!("Shutdown complete");
        Ok(match outcome {
            Some(EventKind::ThresholdMet) => ExitCode::SUCCESS,
            Some(_) => ExitCode::from(1),
            None => ExitCode::from(130),
        })
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "gotimed starting");

    let service = Service::new(&args)?;
    match &args.command {
        Command::Watch(watch) => service.watch(watch).await,
    }
}
