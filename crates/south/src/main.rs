//! South Service
//!
//! Hosts one south plugin, registers with the management core and forwards
//! the plugin's readings until told to shut down.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use south::ingest::TracingSink;
use south::management;
use south::registration::{HttpCoreClient, RegistrationClient};
use south::service::SouthService;
use south::settings::SouthSettings;
use south_plugin::PluginRegistry;

/// South service hosting one device plugin
#[derive(Parser, Debug)]
#[command(name = "south")]
#[command(about = "South service hosting one device plugin", long_about = None)]
struct Args {
    /// Service name to register under
    #[arg(long)]
    name: Option<String>,

    /// Core management address
    #[arg(long)]
    address: Option<String>,

    /// Core management port
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Plugin to host
    #[arg(long)]
    plugin: Option<String>,

    /// Port for the management API (0 picks a free port)
    #[arg(long)]
    management_port: Option<u16>,

    /// Log as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let settings = load_settings(&args)?;
    info!(
        "Starting south service '{}' v{} with plugin '{}'",
        settings.service.name,
        env!("CARGO_PKG_VERSION"),
        settings.service.plugin
    );

    // Bind first so the registration carries the real management port
    let listener = TcpListener::bind((settings.management.host.as_str(), settings.management.port)).await?;
    let management_port = listener.local_addr()?.port();

    let core = Arc::new(HttpCoreClient::new());
    let service = SouthService::new(
        settings.service_spec(management_port)?,
        PluginRegistry::with_builtins(),
        RegistrationClient::new(core, settings.registration.clone()),
        Arc::new(TracingSink),
    );

    let server = tokio::spawn({
        let stopped = service.clone();
        management::serve(listener, Arc::new(service.clone()), async move {
            stopped.wait_for_shutdown().await
        })
    });

    let endpoint = settings.core_endpoint();
    if let Err(e) = service.start(endpoint).await {
        error!("South service '{}' failed to start: {}", service.name(), e);
        std::process::exit(1);
    }

    tokio::select! {
        _ = shutdown_signal() => {
            if let Err(e) = service.shutdown().await {
                warn!("Service did not shut down cleanly: {}", e);
            }
        }
        _ = service.wait_for_shutdown() => {
            info!("Shutdown requested by core");
        }
    }
    service.wait_for_shutdown().await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Management API stopped with error: {}", e),
        Err(e) => warn!("Management API task failed: {}", e),
    }

    let stats = service.stats();
    info!(
        produced = stats.produced,
        forwarded = stats.forwarded,
        dropped = stats.dropped,
        "South service stopped"
    );
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("south=info,south_plugin=info,tower_http=info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Layer CLI arguments over the loaded settings
fn load_settings(args: &Args) -> Result<SouthSettings> {
    let mut settings = match &args.config {
        Some(path) => SouthSettings::load_from(path)?,
        None => SouthSettings::load()?,
    };

    if let Some(name) = &args.name {
        settings.service.name = name.clone();
    }
    if let Some(plugin) = &args.plugin {
        settings.service.plugin = plugin.clone();
    }
    if let Some(address) = &args.address {
        settings.core.address = address.clone();
    }
    if let Some(port) = args.port {
        settings.core.port = port;
    }
    if let Some(port) = args.management_port {
        settings.management.port = port;
    }

    settings.validate()?;
    Ok(settings)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
