use clap::Parser;
use evetap::browser;
use evetap::config::{
    Config, DatabaseConfig, IngestConfig, RetentionConfig, ServerConfig, DEFAULT_BATCH_SIZE,
    DEFAULT_PORT, DEFAULT_PURGE_LIMIT,
};
use evetap::eve::filters::{EveFilter, GeoIpFilter, NullGeoIpResolver, TagsFilter, UserAgentFilter};
use evetap::ingest::coordinator::IngestCoordinator;
use evetap::ingest::IngestRunner;
use evetap::mikrotik::MikrotikClient;
use evetap::server::{bind_with_retry, run_server};
use evetap::storage::purger::RetentionPurger;
use evetap::storage::sink::SqliteEventSink;
use evetap::storage::SqliteService;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "evetap")]
#[command(version)]
#[command(about = "Load eve.json files into SQLite and browse them", long_about = None)]
struct Cli {
    /// eve.json files to ingest, processed in order
    #[arg(value_name = "EVE_FILE", required = true)]
    inputs: Vec<PathBuf>,

    /// Port to bind to
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Database filename (a temporary file is used if not given)
    #[arg(long)]
    database_filename: Option<PathBuf>,

    /// Use an in-memory database
    #[arg(long)]
    in_memory: bool,

    /// Do not wait for all events to load before starting the server
    #[arg(long)]
    no_wait: bool,

    /// Don't open the browser
    #[arg(long)]
    no_open: bool,

    /// Delete events older than this age (e.g. "7d"); 0 disables purging
    #[arg(long, value_parser = humantime::parse_duration, default_value = "0s")]
    retention_period: Duration,

    /// Maximum events deleted per purge cycle
    #[arg(long, default_value_t = DEFAULT_PURGE_LIMIT)]
    purge_limit: u64,

    /// Verbose (debug) logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "evetap=debug"
    } else {
        "evetap=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config {
        database: DatabaseConfig {
            filename: cli.database_filename.clone(),
        },
        retention: RetentionConfig {
            period: cli.retention_period,
            purge_limit: cli.purge_limit,
        },
        server: ServerConfig {
            host: cli.host.clone(),
            port: cli.port,
        },
        ingest: IngestConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            inputs: cli.inputs.clone(),
        },
        mikrotik: mikrotik_config_from_env(),
    };

    // Resolve the database. A temporary file is removed on exit along with
    // its WAL/shm siblings; a named file is left in place.
    let mut temp_database: Option<PathBuf> = None;
    let db = if cli.in_memory {
        info!("Using in-memory database");
        SqliteService::in_memory()?
    } else if let Some(filename) = &config.database.filename {
        info!(path = %filename.display(), "Using database file");
        SqliteService::open(filename)?
    } else {
        let (file, path) = tempfile::Builder::new()
            .prefix("evetap-oneshot-")
            .suffix(".sqlite")
            .tempfile()?
            .keep()?;
        drop(file);
        info!(path = %path.display(), "Using temporary database file");
        let db = SqliteService::open(&path)?;
        temp_database = Some(path);
        db
    };
    db.init_schema().await?;

    let coordinator = Arc::new(IngestCoordinator::new());
    let (stop_tx, stop_rx) = watch::channel(false);

    let filters: Vec<Box<dyn EveFilter>> = vec![
        Box::new(TagsFilter),
        Box::new(GeoIpFilter::new(Arc::new(NullGeoIpResolver))),
        Box::new(UserAgentFilter),
    ];
    let sink = Arc::new(SqliteEventSink::new(db.clone()));
    let runner = IngestRunner::new(
        &config.ingest,
        filters,
        sink,
        coordinator.clone(),
        stop_rx,
    );
    // A fatal ingestion error ends the run, not the process: the server
    // still comes up so whatever landed before the failure can be queried.
    let ingest_handle = tokio::spawn({
        let coordinator = coordinator.clone();
        async move {
            match runner.run().await {
                Ok(count) => info!(events = count, "Ingestion complete"),
                Err(e) => {
                    error!(error = %e, "Ingestion failed");
                    coordinator.cancel();
                }
            }
        }
    });

    if config.retention.is_enabled() {
        let purger = RetentionPurger::new(db.clone(), &config.retention);
        tokio::spawn(purger.run());
    }

    if !cli.no_wait {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Interrupt received, stopping ingestion");
                let _ = stop_tx.send(true);
                coordinator.cancel();
            }
            _ = coordinator.wait() => {}
        }
    }

    let mikrotik = config
        .mikrotik
        .clone()
        .map(|c| Arc::new(MikrotikClient::new(c)));

    let listener = bind_with_retry(&config.server.host, config.server.port).await?;
    let port = listener.local_addr()?.port();
    info!(port, "Bound to port");

    let server_db = db.clone();
    tokio::spawn(async move {
        if let Err(e) = run_server(server_db, mikrotik, listener).await {
            error!(error = %e, "Server error");
        }
    });

    let url = format!("http://{}:{}", config.server.host, port);
    if !cli.no_open {
        if let Err(e) = browser::open(&url) {
            warn!(error = %e, "Failed to launch browser");
        }
    }
    println!("\nIf your browser didn't open, go to {}", url);
    println!("\n** Press CTRL-C to exit and clean up **\n");

    signal::ctrl_c().await?;
    info!("Cleaning up and exiting");
    let _ = stop_tx.send(true);
    coordinator.cancel();
    // Give the ingestion loop a moment to commit a partial batch.
    let _ = tokio::time::timeout(Duration::from_secs(5), ingest_handle).await;

    if let Some(path) = temp_database {
        remove_database_files(&path);
    }

    Ok(())
}

fn mikrotik_config_from_env() -> Option<evetap::config::MikrotikConfig> {
    let address = std::env::var("EVETAP_MIKROTIK_ADDRESS").ok()?;
    Some(evetap::config::MikrotikConfig {
        address,
        username: std::env::var("EVETAP_MIKROTIK_USERNAME").unwrap_or_default(),
        password: std::env::var("EVETAP_MIKROTIK_PASSWORD").unwrap_or_default(),
        list: std::env::var("EVETAP_MIKROTIK_LIST").unwrap_or_else(|_| "evetap".to_string()),
    })
}

/// Remove a SQLite database along with its WAL and shm sidecars.
fn remove_database_files(path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let target = PathBuf::from(format!("{}{}", path.display(), suffix));
        if target.exists() {
            match std::fs::remove_file(&target) {
                Ok(()) => info!(path = %target.display(), "Deleted"),
                Err(e) => warn!(path = %target.display(), error = %e, "Failed to delete"),
            }
        }
    }
}
