use std::io;
use std::path::PathBuf;

use thiserror::Error as ThisError;

/// Errors that can occur in the logging library
#[derive(ThisError, Debug)]
pub enum Error {
    /// The log directory could not be created.
    #[error("failed to create log directory {}: {}", .path.display(), .source)]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The active log file could not be opened.
    #[error("failed to open log file {}: {}", .path.display(), .source)]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Writing or flushing the active log file failed.
    #[error("failed to write log file {}: {}", .path.display(), .source)]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Renaming the active file into a backup failed.
    #[error("failed to rename {} to {}: {}", .from.display(), .to.display(), .source)]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Removing a backup during the retention sweep failed.
    #[error("failed to delete backup {}: {}", .path.display(), .source)]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The writer was closed and has not been reopened.
    #[error("log writer is closed")]
    Closed,
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),
    /// Initialization failed.
    #[error("Initialization error: {0}")]
    Init(String),
    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    fn io_kind(&self) -> io::ErrorKind {
        match self {
            Error::DirectoryCreation { source, .. }
            | Error::FileOpen { source, .. }
            | Error::Write { source, .. }
            | Error::Rename { source, .. }
            | Error::Delete { source, .. }
            | Error::Io(source) => source.kind(),
            Error::Closed => io::ErrorKind::BrokenPipe,
            Error::Config(_) => io::ErrorKind::InvalidInput,
            Error::Init(_) => io::ErrorKind::Other,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(source) => source,
            other => io::Error::new(other.io_kind(), other),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_conversion_keeps_kind() {
        let err = Error::FileOpen {
            path: PathBuf::from("/nope/app.log"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::PermissionDenied);
        assert!(io_err.to_string().contains("/nope/app.log"));
    }

    #[test]
    fn test_closed_maps_to_broken_pipe() {
        let io_err: io::Error = Error::Closed.into();
        assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);
    }
}
