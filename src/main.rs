//! # Linktrail Integrations Entry Point

use anyhow::Context;
use clap::{Parser, Subcommand};
use linktrail::{
    config::ConfigLoader,
    db, migration::{Migrator, MigratorTrait},
    server::run_server,
    telemetry,
};

#[derive(Debug, Parser)]
#[command(name = "linktrail", version, about = "Linktrail integration service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve {
        /// Skip applying pending migrations before serving
        #[arg(long)]
        skip_migrations: bool,
    },
    /// Apply pending migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from layered env files and variables
    let config = ConfigLoader::new().load().context("loading configuration")?;

    telemetry::init_tracing(&config).context("initializing tracing")?;
    tracing::info!(profile = %config.profile, "Configuration loaded");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    match cli.command.unwrap_or(Command::Serve {
        skip_migrations: false,
    }) {
        Command::Migrate => {
            Migrator::up(&db, None).await.context("applying migrations")?;
            tracing::info!("Migrations applied");
            Ok(())
        }
        Command::Serve { skip_migrations } => {
            if !skip_migrations {
                Migrator::up(&db, None).await.context("applying migrations")?;
            }
            run_server(config, db).await
        }
    }
}
