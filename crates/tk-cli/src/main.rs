use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tk_cli::commands::{self, profile, records, status};
use tk_cli::{Cli, Commands, Config, ProfileAction, RecordsAction};
use tk_db::Database;
use tk_sync::SqliteStore;

/// Load config, ensuring the database directory exists.
fn load_config(cli: &Cli) -> Result<Config> {
    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    Ok(config)
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // try_init: tests may have installed a subscriber already
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = load_config(&cli)?;
    let mut stdout = std::io::stdout().lock();

    match command {
        Commands::Status => {
            let db = Database::open(&config.database_path)
                .with_context(|| format!("failed to open {}", config.database_path.display()))?;
            status::run(&mut stdout, &db, &config)?;
        }
        Commands::Profile(ProfileAction::Show { kind, json }) => {
            let store = open_store(&config)?;
            profile::show(&mut stdout, &store, &config, *kind, *json).await?;
        }
        Commands::Profile(ProfileAction::Set { kind, entries }) => {
            let store = open_store(&config)?;
            profile::set(&mut stdout, &store, &config, *kind, entries).await?;
        }
        Commands::Records(RecordsAction::Add(new)) => {
            let store = open_store(&config)?;
            let coordinator = commands::coordinator(&store, false);
            records::add(&mut stdout, &coordinator, &config, new).await?;
        }
        Commands::Records(RecordsAction::List { kind, json }) => {
            let store = open_store(&config)?;
            records::list(&mut stdout, &store, &config, *kind, *json).await?;
        }
        Commands::Records(RecordsAction::Delete { id, yes }) => {
            let store = open_store(&config)?;
            let coordinator = commands::coordinator(&store, *yes);
            records::delete(&mut stdout, &coordinator, id).await?;
        }
    }

    Ok(())
}
