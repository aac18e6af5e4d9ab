//! Persistence shim: versioned JSON snapshots behind a string key-value store.
//!
//! Each persisted collection is written under its own key as
//! `{"version": <u32>, "state": {...}}`. Snapshots that are absent or cannot
//! be decoded fall back to the type's default, as do snapshots tagged with a
//! version other than [`SCHEMA_VERSION`]. A backend read error is reported as [`LoadOutcome::Unavailable`]
//! so callers can refuse to overwrite state they never saw.
//!
//! | Backend          | Location                              |
//! |------------------|---------------------------------------|
//! | `JsonFileBackend`| one `<key>.json` file per key         |
//! | `SqliteBackend`  | `kv` table in a SQLite database       |
//! | `MemoryBackend`  | shared in-process map (tests, demos)  |

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::StorageError;

pub mod json;
pub mod memory;
pub mod sqlite;

pub use json::JsonFileBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Version tag written with every snapshot.
pub const SCHEMA_VERSION: u32 = 1;

pub mod keys {
    pub const DEAL_STORE: &str = "deal-store";
    pub const AUDIT_STORE: &str = "audit-store";
    pub const ACTIVITY_STORE: &str = "activity-store";
}

/// Opaque durable get/set storage.
pub trait KvBackend: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
    /// Short label used in logs.
    fn name(&self) -> &'static str;
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    state: T,
}

/// How a load resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Restored,
    Missing,
    VersionMismatch { found: Option<u64> },
    Corrupt(String),
    Unavailable(String),
}

/// Read `key` and decode its state, falling back to `T::default()`.
pub fn load_versioned<T>(backend: &dyn KvBackend, key: &str) -> (T, LoadOutcome)
where
    T: DeserializeOwned + Default,
{
    let raw = match backend.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            debug!(key, backend = backend.name(), "no stored state, using defaults");
            return (T::default(), LoadOutcome::Missing);
        }
        Err(e) => {
            warn!(key, backend = backend.name(), error = %e, "storage read failed");
            return (T::default(), LoadOutcome::Unavailable(e.to_string()));
        }
    };

    let value: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(key, error = %e, "stored state is not JSON, resetting");
            return (T::default(), LoadOutcome::Corrupt(e.to_string()));
        }
    };

    let found = value.get("version").and_then(|v| v.as_u64());
    if found != Some(u64::from(SCHEMA_VERSION)) {
        warn!(key, ?found, expected = SCHEMA_VERSION, "schema version mismatch, resetting");
        return (T::default(), LoadOutcome::VersionMismatch { found });
    }

    match serde_json::from_value::<Envelope<T>>(value) {
        Ok(envelope) => (envelope.state, LoadOutcome::Restored),
        Err(e) => {
            warn!(key, error = %e, "stored state does not match schema, resetting");
            (T::default(), LoadOutcome::Corrupt(e.to_string()))
        }
    }
}

/// Write `state` under `key`, tagged with [`SCHEMA_VERSION`].
pub fn save_versioned<T: Serialize>(
    backend: &mut dyn KvBackend,
    key: &str,
    state: &T,
) -> Result<(), StorageError> {
    let envelope = Envelope {
        version: SCHEMA_VERSION,
        state,
    };
    let json = serde_json::to_string(&envelope).map_err(|source| StorageError::Serialize {
        key: key.to_string(),
        source,
    })?;
    backend.set(key, &json)
}
