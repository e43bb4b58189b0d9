use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("Cannot decode {}: {reason}", .path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("Cannot reconcile {}x{} with {}x{}", .left.0, .left.1, .right.0, .right.1)]
    ShapeMismatch { left: (u32, u32), right: (u32, u32) },

    #[error("Filesystem error on {}: {source}", .path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl DedupError {
    pub fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn fs(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileSystem {
            path: path.into(),
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

pub type Result<T> = std::result::Result<T, DedupError>;
