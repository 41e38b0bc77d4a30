use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::{Parser, Subcommand};
use todosync_core::{AppError, Config, ConfigError, NetworkError, StorageError, StorageKind};
use todosync_services::{
    CsvError, KeyringCredentials, Preferences, RemoteClient, RemoteSettings, RetryConfig,
    StorageBackend, SyncEngine, SyncEngineParts, SyncEvent, SyncOutcome, TokioTimer,
};

#[derive(Parser)]
#[command(name = "todosync", version, about = "Local-first task list sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Sync with the server and print a summary (default)
    Sync,
    /// Write the local task list to a CSV file
    Export { path: PathBuf },
    /// Merge tasks from a CSV file and reconcile with the server
    Import { path: PathBuf },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        tracing::error!("{}", e);
        eprintln!("todosync: {}", e.user_message());
        eprintln!("  ({})", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config_path = Config::config_path()?;
    let config = Config::load_from(&config_path)
        .map_err(|e| ConfigError::ParseError(format!("{:#}", e)))?;

    todosync_core::init(&config.logging.filter)?;

    let validation = config.validate();
    for warning in &validation.warnings {
        tracing::warn!("Config warning: {}", warning);
    }
    if !validation.is_valid() {
        return Err(ConfigError::Invalid(validation.error_summary()).into());
    }

    let (engine, mut events) = build_engine(&config)?;

    let listener = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SyncEvent::StoreChanged => tracing::debug!("Task list changed"),
                SyncEvent::Alert { message } => eprintln!("! {}", message),
                SyncEvent::Connectivity { offline: true } => tracing::warn!("Server unreachable"),
                SyncEvent::Connectivity { offline: false } => tracing::info!("Server reachable"),
            }
        }
    });

    tracing::info!("todosync started");
    match cli.command.unwrap_or(Command::Sync) {
        Command::Sync => {
            let outcome = engine.start().await.map_err(anyhow::Error::from)?;
            if !outcome.is_success() {
                tracing::warn!("Startup sync did not complete, using the local copy");
            }

            println!("todosync - local-first task sync");
            println!("  Config:    {}", config_path.display());
            println!("  Data:      {}", config.storage.effective_data_dir().display());
            println!("  Startup:   {}", describe(&outcome));
            println!("  Tasks:     {} ({} done)", engine.tasks().len(), engine.done_count());
            println!("  Sections:  {}", engine.sections().len());
            println!("  Revision:  {}", engine.revision());
            println!("  Dirty:     {}", engine.is_dirty());
        }
        Command::Export { path } => {
            let file = File::create(&path)?;
            let count = engine.export_csv(file).map_err(csv_error)?;
            println!("Exported {} tasks to {}", count, path.display());
        }
        Command::Import { path } => {
            let file = File::open(&path)?;
            let (count, handle) = engine.import_csv(file).map_err(csv_error)?;
            let outcome = handle.await.map_err(anyhow::Error::from)?;
            println!("Imported {} tasks from {}", count, path.display());
            if !outcome.is_success() {
                println!("  Not yet on the server: {}", describe(&outcome));
            }
        }
    }

    engine.shutdown().await;
    drop(engine);
    if let Err(e) = listener.await {
        tracing::warn!("Event listener ended abnormally: {}", e);
    }

    Ok(())
}

fn build_engine(
    config: &Config,
) -> Result<(SyncEngine, tokio::sync::mpsc::UnboundedReceiver<SyncEvent>), AppError> {
    let data_dir = config.storage.effective_data_dir();

    let backend = match config.storage.backend {
        StorageKind::Sqlite => StorageBackend::Sqlite,
        StorageKind::Document => StorageBackend::Document,
    };
    let persistence = backend
        .open(&data_dir)
        .map_err(|e| StorageError::OpenFailed(format!("{:#}", e)))?;
    let preferences = Preferences::open(data_dir.join("preferences.json"));

    let credentials = KeyringCredentials::new(&config.remote.keyring_service, &config.remote.device_id)
        .with_fallback(config.remote.token.clone());

    let remote = RemoteClient::new(
        RemoteSettings {
            base_url: config.remote.base_url.clone(),
            device_id: config.remote.device_id.clone(),
            request_timeout: Duration::from_secs(config.remote.request_timeout_secs),
        },
        Arc::new(credentials),
    )
    .map_err(|e| NetworkError::InvalidEndpoint(format!("{:#}", e)))?;

    let retry = RetryConfig::new(
        config.retry.initial_delay_secs,
        config.retry.factor,
        config.retry.jitter,
        config.retry.max_delay_secs,
    );

    Ok(SyncEngine::new(SyncEngineParts {
        persistence,
        preferences,
        remote: Arc::new(remote),
        retry,
        timer: Arc::new(TokioTimer),
        offset: *Local::now().offset(),
    }))
}

fn csv_error(e: CsvError) -> AppError {
    match e {
        CsvError::Io(io) => AppError::Io(io),
        other => AppError::Other(other.into()),
    }
}

fn describe(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Confirmed => "loaded from server".to_string(),
        SyncOutcome::Reconciled => "reconciled with server".to_string(),
        SyncOutcome::Failed(e) => format!("offline copy ({})", e.user_message()),
        SyncOutcome::Cancelled => "cancelled".to_string(),
    }
}
