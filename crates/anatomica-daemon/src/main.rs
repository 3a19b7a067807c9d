//! Anatomica Daemon - Main entry point
//!
//! Hosts one patient session: landmark tracking, zone streaming and voice
//! commands, with the visualization state served over REST and WebSocket.

mod api;
mod config;
mod server;
mod session;
mod ws;

use anatomica_assets::HttpCatalog;
use anatomica_core::{PatientCatalog, PatientLandmarkProvider, SharedState, StructureProvider};
use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::session::{Session, SessionCommand};

#[derive(Parser, Debug)]
#[command(name = "anatomica")]
#[command(about = "Anatomical registration and zone-streaming session host")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "anatomica.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Patient to load (overrides the configuration file)
    #[arg(short, long)]
    patient: Option<String>,

    /// Run the session without the REST/WebSocket server
    #[arg(long)]
    no_server: bool,

    /// Write a default configuration file and exit
    #[arg(long)]
    init_config: bool,
}

type Providers = (Arc<dyn PatientLandmarkProvider>, Arc<dyn StructureProvider>);

/// Local catalog, optionally fronted by the remote patient data service
fn build_providers(config: &Config) -> Result<Providers> {
    let catalog_path = Path::new(&config.session.catalog);
    let catalog = if catalog_path.exists() {
        PatientCatalog::from_file(catalog_path)?
    } else {
        info!(path = %catalog_path.display(), "Patient catalog not found, using demo catalog");
        PatientCatalog::demo()
    };
    let catalog = Arc::new(catalog);

    match &config.session.provider_url {
        Some(url) => {
            info!(url = %url, "Using remote patient data service");
            let http = Arc::new(HttpCatalog::new(
                url,
                Duration::from_secs(config.session.provider_timeout_secs),
                Some(catalog),
            )?);
            let landmarks: Arc<dyn PatientLandmarkProvider> = http.clone();
            let structures: Arc<dyn StructureProvider> = http;
            Ok((landmarks, structures))
        }
        None => {
            let landmarks: Arc<dyn PatientLandmarkProvider> = catalog.clone();
            let structures: Arc<dyn StructureProvider> = catalog;
            Ok((landmarks, structures))
        }
    }
}

/// Forward stdin lines to the session as voice utterances
fn spawn_stdin_voice(commands: mpsc::Sender<SessionCommand>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let text = line.trim().to_string();
                    if text.is_empty() {
                        continue;
                    }
                    let command = SessionCommand::Voice { text, reply: None };
                    if commands.send(command).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read voice input");
                    break;
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Anatomica v{}", env!("CARGO_PKG_VERSION"));

    if args.init_config {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Wrote default configuration");
        return Ok(());
    }

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(patient) = args.patient {
        config.session.patient = patient;
    }

    info!(
        patient = %config.session.patient,
        source = %config.tracking.source,
        "Configuration loaded"
    );

    let (landmarks, structures) = build_providers(&config)?;
    let state = SharedState::new();
    let mut session = Session::new(&config, state.clone(), landmarks, structures)?;
    session.start().await;

    let (commands, receiver) = mpsc::channel(64);

    if config.session.stdin_voice {
        spawn_stdin_voice(commands.clone());
    }

    let shutdown = commands.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping session");
            let _ = shutdown.send(SessionCommand::Shutdown).await;
        }
    });

    if !args.no_server {
        let app_state = Arc::new(server::AppState {
            shared: state,
            commands: commands.clone(),
            session_id: session.id(),
            patient_id: session.patient_id().to_string(),
            push_interval: Duration::from_millis(config.server.push_interval_ms.max(10)),
        });
        let bind = config.server.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = server::run(app_state, &bind).await {
                error!(error = %e, "Web server failed");
            }
        });
    }

    drop(commands);
    session.run(receiver).await
}
