//! Backend fixtures shared by the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use asto::{FileStorage, InMemoryStorage, LoggingStorage, Storage, SubStorage};
use tempfile::TempDir;

/// A storage plus whatever must outlive it
pub struct Fixture {
    pub storage: Arc<dyn Storage>,
    _dir: Option<TempDir>,
}

pub fn memory() -> Fixture {
    Fixture {
        storage: Arc::new(InMemoryStorage::new()),
        _dir: None,
    }
}

pub fn fs() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    Fixture {
        storage: Arc::new(FileStorage::new(dir.path().join("root"))),
        _dir: Some(dir),
    }
}

pub fn sub() -> Fixture {
    Fixture {
        storage: Arc::new(SubStorage::new(InMemoryStorage::new(), "nested/prefix")),
        _dir: None,
    }
}

pub fn logging() -> Fixture {
    Fixture {
        storage: Arc::new(LoggingStorage::new(InMemoryStorage::new())),
        _dir: None,
    }
}

#[cfg(feature = "sqlite")]
pub fn sqlite() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blobs.db");
    let storage = asto::SqliteStorage::open(path.to_str().unwrap()).unwrap();
    Fixture {
        storage: Arc::new(storage),
        _dir: Some(dir),
    }
}

/// Route `tracing` output to the test harness; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
