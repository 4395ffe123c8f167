use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad registration or settings, raised before anything touches the wire.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A response line had an unexpected shape, or arrived when it should not.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("cannot decode literal at offset {offset}: {reason}")]
    Decode { offset: usize, reason: String },

    /// The remote interpreter raised an exception.
    #[error("remote {kind} in '{procedure}': {message}")]
    Remote {
        procedure: String,
        kind: String,
        message: String,
    },

    /// Passed through from the channel or the upload primitive.
    #[error("transport error while {context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("directory walk failed: {0}")]
    Walk(#[from] ignore::Error),

    #[error("{} teardown procedure(s) failed: {}", .0.len(), join_errors(.0))]
    TeardownFailed(Vec<Error>),
}

impl Error {
    pub(crate) fn transport(context: impl Into<String>, source: io::Error) -> Self {
        Error::Transport {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors that leave the connection unusable.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
