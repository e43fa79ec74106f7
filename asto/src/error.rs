//! Error taxonomy shared by every storage component

use std::io;

use crate::key::Key;

/// Errors raised while building a storage from configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown storage backend '{0}'")]
    UnknownBackend(String),

    #[error("missing required configuration field '{0}'")]
    MissingField(String),

    #[error("configuration field '{field}' must be {expected}")]
    InvalidField {
        field: String,
        expected: &'static str,
    },

    #[error("unsupported credentials type '{0}'")]
    UnsupportedCredentials(String),

    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors raised while draining a [`Content`](crate::Content)
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    /// The producer failed to emit the next chunk
    #[error("content producer failed: {0}")]
    Io(#[from] io::Error),

    /// The drained bytes cannot be read as the requested type
    #[error("cannot decode content: {0}")]
    Decode(String),
}

/// Lock bookkeeping errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("lock on [{0}] released while not held")]
    NotHeld(String),
}

/// Errors returned by [`Storage`](crate::Storage) operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("key not found: '{0}'")]
    NotFound(Key),

    #[error("I/O error on '{key}': {source}")]
    Io {
        key: Key,
        #[source]
        source: io::Error,
    },

    /// Backend failure that is not an `io::Error` (e.g. a SQL error)
    #[error("backend error on '{key}': {reason}")]
    Backend { key: Key, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("key '{0}' is not part of the transaction")]
    OutsideTransaction(Key),
}

impl StorageError {
    /// Wrap an I/O error, mapping `NotFound` to [`StorageError::NotFound`]
    pub(crate) fn io(key: &Key, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(key.clone())
        } else {
            Self::Io {
                key: key.clone(),
                source,
            }
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
