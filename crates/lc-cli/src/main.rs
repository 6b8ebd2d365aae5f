//! link-checker entry point.
//!
//! `link-checker [exclusion-file]` runs the continuous checker; `db` and
//! `config-hash` subcommands cover operational maintenance. This file stays
//! thin: argument parsing, tracing setup, and wiring of the Postgres-backed
//! stores into the runtime.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use lc_config::CheckerConfig;
use lc_db::{PgIdentifierSource, PgLinkStore, PgOwnerResolver};
use lc_exclusions::ExclusionRegistry;
use lc_runtime::Checker;

#[derive(Parser)]
#[command(name = "link-checker")]
#[command(about = "Continuous link checker for persistent identifier targets", long_about = None)]
struct Cli {
    /// Owner exclusion file: lines of "<username> permanent|temporary".
    exclusion_file: Option<PathBuf>,

    /// Layered config YAML paths in merge order; defaults apply when omitted.
    #[arg(long = "config")]
    config_paths: Vec<String>,

    #[command(subcommand)]
    cmd: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides)
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Some(Commands::Db { cmd }) => {
            let pool = lc_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = lc_db::status(&pool).await?;
                    println!("db_ok={} has_link_rows_table={}", s.ok, s.has_link_rows_table);
                }
                DbCmd::Migrate => {
                    lc_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Some(Commands::ConfigHash { paths }) => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = lc_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        None => run_checker(cli).await?,
    }

    Ok(())
}

async fn run_checker(cli: Cli) -> Result<()> {
    let config = if cli.config_paths.is_empty() {
        CheckerConfig::default()
    } else {
        let path_refs: Vec<&str> = cli.config_paths.iter().map(|s| s.as_str()).collect();
        CheckerConfig::from_files(&path_refs)?
    };

    let pool = lc_db::connect_from_env().await?;
    lc_db::migrate(&pool).await?;
    let source_pool = lc_db::connect_source_from_env().await?;

    let store = Arc::new(PgLinkStore::new(pool));
    let source = Arc::new(PgIdentifierSource::new(source_pool.clone()));
    let resolver = Arc::new(PgOwnerResolver::new(source_pool));
    let exclusions = Arc::new(ExclusionRegistry::new(cli.exclusion_file, resolver));

    info!(
        num_workers = config.num_workers,
        table_update_cycle = config.table_update_cycle,
        "link checker starting"
    );

    let checker = Checker::new(config, store, source, exclusions);
    checker.run().await
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
