//! db-toolkit - Main entry point.
//!
//! Small command-line front end over the library: resolve connection
//! parameters, apply a declared schema, and load rows by key.

use clap::Parser;
use db_toolkit::config::{Command, Config, TargetArgs};
use db_toolkit::db::{
    BatchLoader, ConnectionResolver, DbConnection, ResolveOptions, SchemaSynchronizer,
};
use db_toolkit::error::DbResult;
use db_toolkit::models::{QueryParam, Row, Schema};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // stdout carries command output
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn connect(target: &TargetArgs, options: &ResolveOptions) -> DbResult<DbConnection> {
    match (&target.url, &target.name) {
        (Some(url), _) => DbConnection::open(url).await,
        (None, Some(name)) => {
            let profile = ConnectionResolver::from_process_env().resolve(name, options)?;
            DbConnection::open_profile(&profile).await
        }
        (None, None) => Err(db_toolkit::DbError::invalid_input(
            "Either --url or --name is required",
        )),
    }
}

async fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Resolve {
            name,
            read_only,
            write,
        } => {
            let options = ResolveOptions {
                read_only,
                force_write: write,
                request_method: None,
            };
            let profile = ConnectionResolver::from_process_env().resolve(&name, &options)?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        Command::Install { schema, target } => {
            let raw = std::fs::read_to_string(&schema)?;
            let declared: Schema = serde_json::from_str(&raw)?;
            info!(
                file = %schema.display(),
                tables = declared.tables.len(),
                "Installing declared schema"
            );

            let mut connection = connect(&target, &ResolveOptions::write()).await?;
            let result = SchemaSynchronizer::install(&mut connection.session(), &[&declared]).await;
            connection.close().await?;
            result?;
        }
        Command::Load {
            table,
            ids,
            key,
            target,
        } => {
            let params: Vec<QueryParam> = ids.iter().map(|id| QueryParam::parse_lenient(id)).collect();

            let mut connection = connect(&target, &ResolveOptions::read_only()).await?;
            let result =
                BatchLoader::load_multiple_by::<Row>(&mut connection.session(), &table, &key, &params)
                    .await;
            connection.close().await?;
            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!("Starting db-toolkit v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(config.command).await {
        error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}
