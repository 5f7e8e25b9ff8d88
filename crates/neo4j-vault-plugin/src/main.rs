//! CLI entry point for the Neo4j credential plugin.
//!
//! Runs as a subprocess of the secrets manager: requests arrive as JSON
//! lines on stdin, responses leave on stdout, logs go to stderr.

use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing_subscriber::{fmt, EnvFilter};

use neo4j_vault_plugin::request::InitializeRequest;
use neo4j_vault_plugin::settings::load_settings;
use neo4j_vault_plugin::{server, Neo4jDatabase, REPORTED_VERSION};

#[derive(Parser)]
#[command(name = "neo4j-vault-plugin")]
#[command(about = "Database credential plugin for Neo4j")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file prefix (default: neo4j-vault).
    #[arg(short, long, default_value = "neo4j-vault", global = true)]
    config: String,
}

#[derive(Subcommand)]
enum Command {
    /// Serve host requests over stdin/stdout (the default).
    Serve,
    /// Print the plugin version.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Version => {
            println!("{REPORTED_VERSION}");
        }
        Command::Serve => {
            let settings = load_settings(&cli.config)?;
            let db = Neo4jDatabase::new();

            if let Some(config) = settings.connection {
                db.initialize(InitializeRequest {
                    config,
                    verify_connection: settings.verify_connection,
                })
                .await?;
            }

            tracing::info!(version = REPORTED_VERSION, "Serving requests on stdin");
            let served = server::serve(&db, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await;

            if let Err(e) = db.close().await {
                tracing::warn!(error = %e, "Failed to close connection on shutdown");
            }
            served?;
        }
    }

    Ok(())
}
