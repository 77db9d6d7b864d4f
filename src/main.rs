use clap::Parser;
use decoy::config::Config;
use decoy::persistence::{
    load_initialization_file, spawn_initialization_watcher, FilePersistence,
};
use decoy::server::MockServer;
use decoy::store::ExpectationStore;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "decoy", about = "Programmable HTTP mock server")]
struct Args {
    /// Bind address; overrides HOST.
    #[arg(long)]
    host: Option<String>,
    /// Listen port; overrides PORT.
    #[arg(short, long)]
    port: Option<u16>,
    /// Debug logging; overrides LOG_LEVEL.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            std::process::exit(1);
        }
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.verbose {
        config.log_level = Level::DEBUG;
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    if let Err(e) = start(config).await {
        error!("startup failed: {e:#}");
        std::process::exit(1);
    }
}

async fn start(config: Config) -> anyhow::Result<()> {
    let persistence = if config.persist_expectations {
        Some(Arc::new(FilePersistence::new(
            config.persisted_expectations_path.clone(),
        )?))
    } else {
        None
    };

    let store = Arc::new(ExpectationStore::new(persistence));
    store.initialize().await;

    let (shutdown_tx, server_rx) = broadcast::channel(1);
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(());
            }
        });
    }

    if let Some(init_path) = &config.initialization_json_path {
        let initial_hash = load_initialization_file(&store, init_path).await;
        if config.watch_initialization_json {
            // Detached; the watcher exits with the shutdown broadcast.
            let _watcher = spawn_initialization_watcher(
                Arc::clone(&store),
                init_path.clone(),
                initial_hash,
                shutdown_tx.subscribe(),
            );
            info!("watching initialization file {}", init_path.display());
        }
    }

    let server = MockServer::new(config, store);
    let listener = server.bind().await?;
    server.serve(listener, server_rx).await
}
