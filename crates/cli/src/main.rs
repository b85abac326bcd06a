mod commands;
mod config;
mod logging;

use clap::{ArgAction, Parser, Subcommand};
use drift::MigrationId;
use std::path::PathBuf;

use commands::*;
use config::{ConfigOverrides, DriftConfig};

#[derive(Parser)]
#[command(name = "drift")]
#[command(version, about = "Manage SQL migrations")]
struct Cli {
    /// Directory containing migration files [default: migrations]
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    /// Config file to read instead of ./drift.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log more detail (-v for debug, -vv for trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations
    Migrate {
        /// PostgreSQL connection URL
        #[arg(long)]
        database_url: Option<String>,

        /// Leave migrations with a greater ID pending
        #[arg(long)]
        until: Option<MigrationId>,
    },

    /// Create a new migration file
    New {
        /// Short text describing the migration
        #[arg(long)]
        slug: String,

        /// Migration ID override (defaults to the current Unix time)
        #[arg(long)]
        id: Option<MigrationId>,

        /// File whose content is used for the new migration
        #[arg(long)]
        template: Option<PathBuf>,
    },

    /// Set up the migrations directory
    #[command(alias = "init")]
    Setup,

    /// Renumber migrations to fix filesystem sorting
    Renumber {
        /// Rename the files instead of only listing the renames
        #[arg(long)]
        write: bool,
    },
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let database_url = match &self.command {
            Commands::Migrate { database_url, .. } => database_url.clone(),
            _ => None,
        };
        ConfigOverrides {
            config_path: self.config.clone(),
            migrations_dir: self.migrations_dir.clone(),
            database_url,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.quiet)?;
    let config = DriftConfig::load(&cli.overrides())?;

    match cli.command {
        Commands::Migrate { until, .. } => {
            migrate::run(&config, until).await?;
        }
        Commands::New { slug, id, template } => {
            new::run(&config, id, &slug, template.as_deref())?;
        }
        Commands::Setup => {
            setup::run(&config)?;
        }
        Commands::Renumber { write } => {
            renumber::run(&config, write)?;
        }
    }

    Ok(())
}
