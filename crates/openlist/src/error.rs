use openlist_core::{ConfigError, UpdateFlowError};
use openlist_platform::AppPathsError;
use thiserror::Error;

use crate::install_lock::LockError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to resolve updater directories: {0}")]
    Paths(#[from] AppPathsError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Update(#[from] UpdateFlowError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("failed to access log file {path}: {source}")]
    Logs {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
