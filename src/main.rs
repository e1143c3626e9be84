//! Main entry point for the try-on service

use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, fmt::writer::BoxMakeWriter, prelude::*, EnvFilter};
use tryon_serving::{
    api, codec,
    config::{LoadPolicy, LoggingConfig, Settings},
    dispatch::RequestDispatcher,
    job::JobHandler,
    model::hub::{ArtifactReport, HubClient, HubLoader},
    model::{InferenceResource, SystemProbe},
    AppState,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Virtual try-on serving")]
struct Cli {
    /// Configuration file (defaults to config/default.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,

    /// Run serverless jobs, one JSON object per stdin line
    Job {
        /// Handle a single job given inline and exit
        #[arg(long)]
        test_input: Option<String>,
    },

    /// Run one try-on on local image files
    TryLocal {
        #[arg(long)]
        person: PathBuf,
        #[arg(long)]
        cloth: PathBuf,
        #[arg(long, default_value = "output.png")]
        output: PathBuf,
    },

    /// Check a model repository for VAE and UNet weights
    Inspect {
        /// Repository to inspect (defaults to the configured primary model)
        #[arg(long)]
        model_id: Option<String>,
    },
}

fn init_logging(config: &LoggingConfig, to_stderr: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    // stdout carries job results in job mode
    let writer = if to_stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };

    if config.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(writer))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(writer))
            .init();
    }
}

fn build_resource(settings: &Settings) -> anyhow::Result<Arc<InferenceResource>> {
    let loader = Arc::new(HubLoader::new(&settings.model)?);
    Ok(Arc::new(InferenceResource::new(
        settings.model.clone(),
        loader,
        Arc::new(SystemProbe),
    )))
}

/// Job handler with load-on-first-job semantics
fn build_job_handler(settings: &Settings) -> anyhow::Result<JobHandler> {
    let resource = build_resource(settings)?;
    let dispatcher = Arc::new(RequestDispatcher::new(resource, LoadPolicy::OnFirstRequest));
    Ok(JobHandler::new(dispatcher))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    let resource = build_resource(&settings)?;
    let policy = settings.model.load_policy;
    let addr = format!("{}:{}", settings.server.host, settings.server.port);

    let app_state = Arc::new(AppState::new(settings, resource.clone()));
    let app = api::routes::create_router(app_state);

    // Bind first so health checks answer while the model loads
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    if policy == LoadPolicy::Startup {
        tokio::spawn(async move {
            if let Err(e) = resource.ensure_loaded().await {
                error!(error = %e, "Model unavailable; health endpoints stay up");
            }
        });
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn run_jobs(settings: Settings, test_input: Option<String>) -> anyhow::Result<()> {
    let handler = build_job_handler(&settings)?;

    match test_input {
        Some(raw) => {
            let job = serde_json::from_str(&raw)?;
            println!("{}", handler.handle(job).await);
        }
        None => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            handler.run_lines(stdin, tokio::io::stdout()).await?;
        }
    }

    Ok(())
}

async fn try_local(
    settings: Settings,
    person: PathBuf,
    cloth: PathBuf,
    output: PathBuf,
) -> anyhow::Result<ExitCode> {
    let handler = build_job_handler(&settings)?;

    let job = json!({
        "input": {
            "person": codec::base64::encode(&tokio::fs::read(&person).await?),
            "cloth": codec::base64::encode(&tokio::fs::read(&cloth).await?),
        }
    });

    let result = handler.handle(job).await;
    match result.get("result").and_then(|r| r.as_str()) {
        Some(b64) => {
            tokio::fs::write(&output, codec::base64::decode(b64)?).await?;
            info!(path = %output.display(), "Saved try-on result");
            Ok(ExitCode::SUCCESS)
        }
        None => {
            error!(response = %result, "Try-on failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn inspect(settings: Settings, model_id: Option<String>) -> anyhow::Result<ExitCode> {
    let model_id = model_id.unwrap_or_else(|| settings.model.primary_id.clone());
    let hub = HubClient::new(reqwest::Client::new(), &settings.model.hub_endpoint);

    let files = match hub
        .list_files(&model_id, &settings.model.revision, settings.model.auth_token.as_deref())
        .await
    {
        Ok(files) => files,
        Err(e) => {
            println!("Failed to list files for model {}: {}", model_id, e);
            return Ok(ExitCode::from(1));
        }
    };

    let report = ArtifactReport::from_files(&model_id, &files);
    println!("Model: {}", report.model_id);
    println!("Has 'vae/' folder: {}", report.has_vae_dir);
    println!("Has 'unet/' folder: {}", report.has_unet_dir);
    println!("VAE weight files found:");
    for f in &report.vae_weights {
        println!("   {}", f);
    }
    println!("UNet weight files found:");
    for f in &report.unet_weights {
        println!("   {}", f);
    }

    if report.vae_weights.is_empty() {
        println!("\nNo VAE weights found; loading without an external VAE will fail with missing files.");
        return Ok(ExitCode::from(2));
    }
    if report.unet_weights.is_empty() {
        println!("\nNo UNet weights found; the model will fail to load.");
        return Ok(ExitCode::from(3));
    }

    println!("\nModel contains the expected weights.");
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from_path(path)?,
        None => Settings::load()?,
    };
    settings.validate()?;

    let command = cli.command.unwrap_or(Command::Serve);
    init_logging(&settings.logging, matches!(command, Command::Job { .. }));

    info!(
        primary = %settings.model.primary_id,
        fallback = ?settings.model.fallback_identifier(),
        device = %settings.model.device,
        "Loaded configuration"
    );

    match command {
        Command::Serve => serve(settings).await.map(|_| ExitCode::SUCCESS),
        Command::Job { test_input } => run_jobs(settings, test_input).await.map(|_| ExitCode::SUCCESS),
        Command::TryLocal { person, cloth, output } => try_local(settings, person, cloth, output).await,
        Command::Inspect { model_id } => inspect(settings, model_id).await,
    }
}
