use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cubediag::access::Caller;
use cubediag::config::AppConfig;
use cubediag::diagnosis::{DiagnosisRequest, DiagnosisService};
use cubediag::server::{create_router, AppState};
use cubediag::shutdown::{shutdown_signal, wait_for_shutdown};
use cubediag::workspace::janitor::run_janitor;

#[derive(Parser)]
#[command(name = "cubediag", about = "Diagnostic bundle service for analytics clusters")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Generate a diagnosis package for a project and print its path
    Project {
        name: String,
        /// User to check project permissions for
        #[arg(short, long)]
        user: String,
    },
    /// Generate a diagnosis package for a job and print its path
    Job {
        id: String,
        /// User to check project permissions for
        #[arg(short, long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Project { name, user } => {
            dump_once(&config, Caller::new(user), DiagnosisRequest::project(name)).await
        }
        Command::Job { id, user } => {
            dump_once(&config, Caller::new(user), DiagnosisRequest::job(id)).await
        }
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        home_dir = %config.diagnosis.home_dir.display(),
        "Starting cubediag server"
    );

    let state = Arc::new(AppState::new(config.clone()));

    // Reclaim workspaces nobody picked up
    tokio::spawn(run_janitor(
        state.diagnosis.workspaces().clone(),
        Duration::from_secs(config.workspace.sweep_interval_secs),
        Duration::from_secs(config.workspace.retention_secs),
        state.shutdown.clone(),
    ));

    let app = create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        config.server.host, config.server.port
    ))
    .await?;

    tracing::info!("Listening on {}", listener.local_addr()?);

    // Cancel running scripts as soon as the signal arrives so in-flight requests finish
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&state)))
        .await?;

    Ok(())
}

/// Run one diagnosis from the command line. The workspace is left for the operator.
async fn dump_once(
    config: &AppConfig,
    caller: Caller,
    request: DiagnosisRequest,
) -> anyhow::Result<()> {
    let service = DiagnosisService::from_config(config);
    let cancel = tokio_util::sync::CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        trigger.cancel();
    });

    let bundle = service.diagnose(&caller, &request, &cancel).await?;
    println!("{}", bundle.path.display());
    Ok(())
}
