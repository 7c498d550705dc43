use clap::{Parser, ValueEnum};
use edhr_service::{build_router, ServiceConfig, ServiceState};
use edhr_core::StorageConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "edhrd", version, about = "District employee management REST service")]
struct Cli {
    /// Socket address to bind, e.g. 127.0.0.1:8090
    #[arg(long, default_value = "127.0.0.1:8090")]
    listen: SocketAddr,
    /// Persistence backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = StorageMode::Auto, env = "EDHR_STORAGE")]
    storage: StorageMode,
    /// PostgreSQL url mirroring organization state and the audit ledger.
    #[arg(long, env = "EDHR_DATABASE_URL")]
    database_url: Option<String>,
    /// Max PostgreSQL pool connections.
    #[arg(long, default_value_t = 5, env = "EDHR_PG_MAX_CONNECTIONS")]
    pg_max_connections: u32,
    /// Bound, in seconds, on each transactional operation.
    #[arg(long, default_value_t = 10, env = "EDHR_OP_TIMEOUT_SECS")]
    op_timeout_secs: u64,
}

fn resolve_storage(cli: &Cli) -> anyhow::Result<StorageConfig> {
    let resolved_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.storage {
        StorageMode::Memory => StorageConfig::Memory,
        StorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!("storage=postgres requires --database-url or DATABASE_URL")
            })?;
            StorageConfig::postgres(database_url, cli.pg_max_connections)
        }
        StorageMode::Auto => {
            if let Some(database_url) = resolved_url {
                StorageConfig::postgres(database_url, cli.pg_max_connections)
            } else {
                StorageConfig::Memory
            }
        }
    };

    Ok(storage)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "edhr_service=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let storage = resolve_storage(&cli)?;
    info!(backend = storage.label(), "bootstrapping organization store");

    let config = ServiceConfig {
        storage,
        op_timeout: Duration::from_secs(cli.op_timeout_secs.max(1)),
    };
    let state = ServiceState::bootstrap(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("edhr-service listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
