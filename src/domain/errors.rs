use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures that end a gurl run.
///
/// Every variant renders as a one-line diagnostic naming the input that
/// failed (argument token, file name or URL).
#[derive(Error, Debug)]
pub enum GurlError {
    /// Malformed user input: item syntax, JSON literals, durations,
    /// print options, header names, URLs, Content-Range values.
    #[error("{0}")]
    Parse(String),

    /// A file named on the command line could not be opened or read.
    #[error("read {}: {source}", .path.display())]
    Resource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Connection, send or receive failure for one request.
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// No source could supply a value for a template variable.
    #[error("no value for variable {0}")]
    VariableUnavailable(String),

    /// The user interrupted an interactive prompt.
    #[error("interrupted")]
    InteractiveAbort,
}

impl GurlError {
    pub fn parse(message: impl Into<String>) -> Self {
        GurlError::Parse(message.into())
    }

    pub fn resource(path: impl AsRef<Path>, source: io::Error) -> Self {
        GurlError::Resource {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn transport(url: impl Into<String>, message: impl ToString) -> Self {
        GurlError::Transport {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, GurlError::InteractiveAbort)
    }
}

pub type Result<T> = std::result::Result<T, GurlError>;
