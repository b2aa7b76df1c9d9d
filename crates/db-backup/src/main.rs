//! # db-backup
//!

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    process::ExitCode,
};

use backup_core::init_logger;
use chrono::Local;
use clap::Parser;
use db_backup::{
    config::{Actions, Config},
    orchestrator::Orchestrator,
    store::{LocalStore, S3Store},
};
use mimalloc::MiMalloc;
use tracing::{Level, error, info};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const EXIT_NO_CONFIG: u8 = 1;
const EXIT_STEP_FAILED: u8 = 5;
const EXIT_LOGGER: u8 = 6;

/// Dump a database and thin out old backups.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the JSON or TOML config file.
    config: PathBuf,

    /// Dump the database into the configured stores.
    #[arg(short = 'c', long)]
    create_dump: bool,

    /// Apply retention to the remote store.
    #[arg(long)]
    delete_remote: bool,

    /// Clean up the local directory.
    #[arg(long)]
    delete_local: bool,

    /// Only report what cleanup would delete.
    #[arg(long)]
    simulate_delete: bool,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,

    /// Also write logs to a daily rolling file in this directory.
    #[arg(long)]
    log_directory: Option<PathBuf>,

    /// Write a default config to the config path and exit.
    #[arg(long)]
    init: bool,
}

impl Cli {
    fn actions(&self) -> Actions {
        Actions {
            create_dump: self.create_dump,
            clean_remote: self.delete_remote,
            clean_local: self.delete_local,
            simulate: self.simulate_delete,
            verbose: self.verbose,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = if cli.init {
        None
    } else {
        Some(Config::load(&cli.config))
    };

    let verbose = cli.verbose
        || loaded
            .as_ref()
            .is_some_and(|config| config.as_ref().is_ok_and(|config| config.actions.verbose));
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let _logger = match init_logger(level, cli.log_directory.as_deref()) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("Could not initialize logger: {e}");
            return ExitCode::from(EXIT_LOGGER);
        }
    };

    let Some(loaded) = loaded else {
        return write_default_config(&cli.config);
    };

    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("Could not load config {:?}: {e}", cli.config);
            return ExitCode::from(e.exit_code());
        }
    };
    config.actions = config.actions.merge(cli.actions());

    let series = match config.validate() {
        Ok(series) => series,
        Err(e) => {
            error!("Invalid config: {e}");
            return ExitCode::from(e.exit_code());
        }
    };

    let actions = config.actions;
    if !(actions.create_dump || actions.clean_remote || actions.clean_local) {
        info!("Nothing to do");
        return ExitCode::SUCCESS;
    }

    let local = config
        .local
        .as_ref()
        .map(|local| (LocalStore::new(&local.directory), local.cleanup));

    // Only connect when a step needs the remote store.
    let needs_remote = actions.create_dump || actions.clean_remote;
    let remote = match config.remote.as_ref().filter(|_| needs_remote) {
        Some(remote_config) => match S3Store::connect(remote_config) {
            Ok(store) => Some(store),
            Err(e) => {
                error!("Could not connect to the remote store: {e}");
                None
            }
        },
        None => None,
    };

    let mut orchestrator = Orchestrator::new(&config.database, series, &config.retention);
    if let Some(remote) = &remote {
        orchestrator = orchestrator.with_remote(remote);
    }
    if let Some((store, cleanup)) = &local {
        orchestrator = orchestrator.with_local(store, *cleanup);
    }

    info!("Running for {}", orchestrator.series());
    let report = orchestrator.run(&actions, Local::now().naive_local());

    if report.is_success() {
        info!("Run complete");
        return ExitCode::SUCCESS;
    }

    for (step, e) in report.failures() {
        error!("The {step} step failed: {e}");
    }

    ExitCode::from(EXIT_STEP_FAILED)
}

/// Write the default config to `path`, refusing to replace an existing file.
fn write_default_config(path: &Path) -> ExitCode {
    let config = Config::default();

    let is_toml = path
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("toml"));
    let contents = if is_toml {
        toml::to_string_pretty(&config).map_err(|e| e.to_string())
    } else {
        serde_json::to_string_pretty(&config).map_err(|e| e.to_string())
    };
    let contents = match contents {
        Ok(contents) => contents,
        Err(e) => {
            error!("Could not serialize the default config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .and_then(|mut file| file.write_all(contents.as_bytes()));

    match result {
        Ok(()) => {
            info!("Wrote default config to {path:?}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Could not create config file {path:?}: {e}");
            ExitCode::from(EXIT_NO_CONFIG)
        }
    }
}
