//! Error types for sprof
//!
//! Every failure in this crate is local and non-fatal to the host program:
//! stats-read failures are logged and skipped, unbalanced sections become a
//! report flag, and sink failures skip that sink only.

use std::fmt;
use std::io;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the profiler.
#[derive(Debug)]
pub enum Error {
    /// An underlying I/O operation failed (socket, report file).
    Io(io::Error),
    /// A configuration value failed validation.
    InvalidConfiguration(String),
    /// The control channel could not be set up.
    ControlChannel(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::InvalidConfiguration(msg) => write!(f, "invalid configuration: {}", msg),
            Error::ControlChannel(msg) => write!(f, "control channel error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_variants() {
        let err = Error::InvalidConfiguration("sample interval cannot be zero".to_string());
        assert!(err.to_string().contains("invalid configuration"));

        let err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("gone"));
    }
}
