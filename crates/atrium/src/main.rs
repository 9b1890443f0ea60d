//! Atrium command-line entry point.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use atrium_logging::{atrium_home, init_logging, LogConfig};

mod cli;

#[derive(Parser, Debug)]
#[command(name = "atrium", about = "Schema-driven admin data core", version)]
struct Cli {
    /// SQLite database file (default: $ATRIUM_HOME/atrium.sqlite3)
    #[arg(long, global = true, env = "ATRIUM_DB")]
    db: Option<PathBuf>,

    /// Directory of schema definition files (default: $ATRIUM_HOME/schemas)
    #[arg(long = "schemas", global = true, env = "ATRIUM_SCHEMAS")]
    schema_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Also write logs to $ATRIUM_HOME/logs
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile database tables with the schema definitions
    Migrate(cli::migrate::MigrateArgs),
    /// List loaded schemas, or show one in detail
    Schemas(cli::schemas::SchemasArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(LogConfig {
        app_name: "atrium",
        verbose: cli.verbose,
        log_to_file: cli.log_file,
    })?;

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| atrium_home().join("atrium.sqlite3"));
    let schema_dir = cli
        .schema_dir
        .clone()
        .unwrap_or_else(|| atrium_home().join("schemas"));

    match cli.command {
        Commands::Migrate(args) => cli::migrate::run(&db_path, &schema_dir, args).await,
        Commands::Schemas(args) => cli::schemas::run(&db_path, &schema_dir, args).await,
    }
}
