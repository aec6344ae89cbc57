/// Clap argument definitions
mod args;

/// `init` command
mod init;

/// `journal` command (record dump)
mod journal;

/// `insert`, `update`, `remove`, `get`, `list` and `count` commands
mod object;

/// Terminal progress indicator
mod progress;

/// `sync` and `status` commands
mod sync;

use std::path::{Path, PathBuf};

use clap::Parser;
use log::LevelFilter;

use tandem_core::Result;
use tandem_core::config::Config;
use tandem_core::session::{ReplicaSession, open_replica};

pub use args::Cli;
use args::Commands;

/// Helper to run async operations in sync context
fn block_on<F: std::future::Future>(f: F) -> F::Output {
    futures_lite::future::block_on(f)
}

/// Main entry point for the CLI
pub fn run_cli() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = match cli.config.map(Ok).unwrap_or_else(Config::default_path) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("✗ {}", e);
            std::process::exit(1);
        }
    };

    let success = match cli.command {
        Commands::Init {
            data_dir,
            remote,
            replica_id,
            sqlite,
            force,
        } => init::handle_init(&config_path, data_dir, remote, replica_id, sqlite, force),

        Commands::Insert {
            id,
            object_type,
            set,
        } => object::handle_insert(&config_path, &id, &object_type, set),

        Commands::Update { id, set } => object::handle_update(&config_path, &id, set),

        Commands::Remove { id } => object::handle_remove(&config_path, &id),

        Commands::Get { id } => object::handle_get(&config_path, &id),

        Commands::List {
            object_type,
            filters,
            limit,
        } => object::handle_list(&config_path, object_type.as_deref(), filters, limit),

        Commands::Count {
            object_type,
            filters,
        } => object::handle_count(&config_path, object_type.as_deref(), filters),

        Commands::Sync => sync::handle_sync(&config_path),

        Commands::Status => sync::handle_status(&config_path),

        Commands::Journal { id, offset, limit } => {
            journal::handle_journal(&config_path, id, offset, limit)
        }
    };

    if !success {
        std::process::exit(1);
    }
}

/// `warn` by default, `RUST_LOG` when set, `debug` with `--verbose`.
fn init_logging(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.format_timestamp(None).init();
}

/// Load the config at `config_path` and open its replica.
fn open_session(config_path: &Path) -> Result<(Config, ReplicaSession)> {
    let config = Config::load_from(config_path)?;
    let session = open_replica(&config)?;
    Ok((config, session))
}

/// Print the error, if any. Returns true on success.
fn report(result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            eprintln!("✗ {}", e);
            false
        }
    }
}

/// `data_dir` from the command line, or the platform default.
fn resolve_data_dir(data_dir: Option<PathBuf>) -> PathBuf {
    data_dir.unwrap_or_else(Config::default_data_dir)
}
