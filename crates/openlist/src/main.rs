//! `openlist-updater`: keeps an OpenList binary on a router current.
//!
//! Every command prints one JSON `{success, message, data}` object on stdout
//! and exits non-zero on failure.

mod error;
mod install_lock;
mod logging;
mod logs;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info};
use openlist_core::{ConfigStore, OperationResult, ResponseCache, Updater};
use openlist_platform::{AppPaths, detect_host_arch};
use serde_json::json;

use crate::error::CliError;
use crate::install_lock::InstallLock;
use crate::settings::{Settings, SettingsFile};

/// Download, install and track OpenList releases.
#[derive(Debug, Parser)]
#[command(name = "openlist-updater", version, about)]
struct Cli {
    /// Echo log records to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the installed binary, its version and the asset this host maps to.
    Status,

    /// Compare the installed version against the latest release.
    Check,

    /// Download and install a release, the latest one when no version is given.
    Update {
        /// Release version or tag, e.g. `4.0.8` or `v4.0.8`.
        #[arg(value_name = "VERSION")]
        release: Option<String>,
    },

    /// Install a local archive or binary.
    Install {
        /// Path to a `.tar.gz`, `.zip` or bare `openlist` binary.
        artifact: PathBuf,
    },

    /// Show or clear the updater log.
    Logs {
        /// Number of trailing lines to print.
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,

        /// Truncate the log instead of printing it.
        #[arg(long)]
        clear: bool,
    },

    /// Read or change persisted settings.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Print the current settings.
    Show,

    /// Change one setting.
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match run(cli).await {
        Ok(result) => result,
        Err(err) => {
            error!("{err}");
            OperationResult::failure(err.to_string())
        }
    };

    match serde_json::to_string_pretty(&result) {
        Ok(output) => println!("{output}"),
        Err(err) => eprintln!("failed to serialize result: {err}"),
    }

    if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run(cli: Cli) -> Result<OperationResult, CliError> {
    let paths = AppPaths::new()?;
    let store = Arc::new(SettingsFile::new(paths.settings_file()));
    let settings = store.read()?;

    logging::init_logging(
        &paths,
        settings.debug_logging,
        settings.max_log_size_bytes,
        cli.verbose,
    );

    match cli.command {
        Command::Logs { lines, clear } => show_logs(&paths, lines, clear),
        Command::Config { action } => configure(&store, settings, action),
        Command::Status => {
            let updater = build_updater(&paths, &store, &settings)?;
            let status = updater.status().await;
            let message = match &status.installed_version {
                Some(version) => format!("OpenList {version} installed"),
                None if status.installed => "OpenList installed, version unknown".to_string(),
                None => "OpenList is not installed".to_string(),
            };
            Ok(OperationResult::ok(message, status))
        }
        Command::Check => {
            let updater = build_updater(&paths, &store, &settings)?;
            let check = updater.check().await?;
            let message = if check.update_available {
                format!("Update available: {}", check.latest_version)
            } else {
                format!("OpenList is up to date ({})", check.latest_version)
            };
            Ok(OperationResult::ok(message, check))
        }
        Command::Update { release } => {
            let _lock = InstallLock::acquire(&paths.install_lock_file())?;
            let updater = build_updater(&paths, &store, &settings)?;
            let report = updater.update(release.as_deref()).await?;
            info!("OpenList updated to {}", report.version);
            Ok(OperationResult::ok(
                format!("OpenList updated to {}", report.version),
                report,
            ))
        }
        Command::Install { artifact } => {
            let _lock = InstallLock::acquire(&paths.install_lock_file())?;
            let updater = build_updater(&paths, &store, &settings)?;
            let outcome = updater.install_local(&artifact).await?;
            Ok(OperationResult::ok(
                format!("Installed {}", outcome.binary_path.display()),
                outcome,
            ))
        }
    }
}

fn build_updater(
    paths: &AppPaths,
    store: &Arc<SettingsFile>,
    settings: &Settings,
) -> Result<Updater, CliError> {
    let config_store: Arc<dyn ConfigStore> = store.clone();
    Ok(Updater::new(
        settings.to_updater_config(),
        config_store,
        Arc::new(ResponseCache::default()),
        paths.download_dir(),
        detect_host_arch(),
    )?)
}

fn show_logs(paths: &AppPaths, lines: usize, clear: bool) -> Result<OperationResult, CliError> {
    let log_path = paths.log_file();
    let log_error = |source| CliError::Logs {
        path: log_path.display().to_string(),
        source,
    };

    if clear {
        logs::clear(&log_path).map_err(log_error)?;
        return Ok(OperationResult::ok("Log cleared", json!({ "path": log_path })));
    }

    let tail = logs::tail(&log_path, lines).map_err(log_error)?;
    Ok(OperationResult::ok(
        format!("{} log lines", tail.lines.len()),
        tail,
    ))
}

fn configure(
    store: &SettingsFile,
    mut settings: Settings,
    action: ConfigAction,
) -> Result<OperationResult, CliError> {
    match action {
        ConfigAction::Show => Ok(OperationResult::ok(
            format!("Settings from {}", store.path().display()),
            settings.redacted(),
        )),
        ConfigAction::Set { key, value } => {
            settings.set(&key, &value)?;
            store.write(&settings)?;
            info!("Setting {key} updated");
            Ok(OperationResult::ok(
                format!("{key} updated"),
                settings.redacted(),
            ))
        }
    }
}
