use thiserror::Error;

use crate::package::CommandResult;

/// Failures of a package operation.
///
/// These never escape a backend method: they are rendered into a
/// [`CommandResult`] so callers only branch on `success`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A native tool or the privilege helper is not on PATH
    #[error("{program} not found. Please install {package}")]
    ToolMissing { program: String, package: String },

    /// The OS could not start the process at all
    #[error("{0}")]
    Spawn(String),

    /// The command ran and exited non-zero
    #[error("{message}")]
    ProcessFailed { exit_code: i32, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("timed out after {0}s")]
    TimedOut(u64),

    #[error("another package operation is already in progress")]
    Busy,

    #[error("no packages specified")]
    NoPackages,

    #[error("invalid catalog: {0}")]
    Catalog(String),
}

impl Error {
    /// Exit code reported for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ProcessFailed { exit_code, .. } => *exit_code,
            _ => -1,
        }
    }
}

impl From<Error> for CommandResult {
    fn from(err: Error) -> Self {
        CommandResult::failure(err.exit_code(), err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
