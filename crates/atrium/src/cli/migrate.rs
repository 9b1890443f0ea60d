//! Migrate command - reconcile tables with the schema definitions.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use tracing::info;

use atrium_schema::Migrator;

#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Execute the changes (default: report only)
    #[arg(long)]
    pub apply: bool,

    /// Allow dropping undeclared columns and tables
    #[arg(long)]
    pub drop: bool,
}

pub async fn run(db_path: &Path, schema_dir: &Path, args: MigrateArgs) -> Result<()> {
    let registry = super::open_registry(db_path, schema_dir).await?;
    let migrator =
        Migrator::new(registry.database(), registry.structures()).allow_drops(args.drop);

    let report = if args.apply {
        info!(db = %db_path.display(), "Applying migration");
        migrator.apply().await?
    } else {
        migrator.plan().await?
    };

    print!("{}", report);
    if !args.apply && report.changed {
        println!("Dry run; pass --apply to execute.");
    }
    Ok(())
}
