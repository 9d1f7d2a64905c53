//! Key-path state store backed by a single JSON file.
//!
//! Keys are paths such as `["ARLO", "totalCameras"]` or `[device_id, "modelId"]`.
//! Writes only touch memory; `save()` flushes the whole map to disk. A `/` or `\`
//! inside a key part is escaped with `\` so distinct paths never share a key.

use log::debug;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

/// Namespace for account-wide values.
pub const ARLO_NAMESPACE: &str = "ARLO";
pub const TOTAL_CAMERAS_KEY: &str = "totalCameras";
pub const TOTAL_BELLS_KEY: &str = "totalDoorbells";

const KEY_SEPARATOR: char = '/';
const KEY_ESCAPE: char = '\\';

#[derive(Debug)]
pub enum StorageError {
    Io { path: PathBuf, source: std::io::Error },
    Json(serde_json::Error),
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StorageError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            StorageError::Json(e) => write!(f, "json error: {}", e),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io { source, .. } => Some(source),
            StorageError::Json(e) => Some(e),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        StorageError::Json(value)
    }
}

pub trait StateStore: Send + Sync {
    fn set(&self, key: &[&str], value: Value);
    fn get(&self, key: &[&str]) -> Option<Value>;
    /// Flush to durable storage.
    fn save(&self) -> Result<(), StorageError>;

    fn get_or(&self, key: &[&str], default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }
}

pub struct FileStore {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, Value>>,
}

impl FileStore {
    /// Open (or start) the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries: BTreeMap<String, Value> = match fs::read_to_string(&path) {
            Ok(s) if s.trim().is_empty() => BTreeMap::new(),
            Ok(s) => serde_json::from_str(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StorageError::Io { path, source }),
        };
        debug!("State store {} opened with {} key(s)", path.display(), entries.len());
        Ok(FileStore {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    /// Store that never touches disk; `save()` is a no-op.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        FileStore {
            path: None,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn join_key(key: &[&str]) -> String {
    let mut out = String::new();
    for (i, part) in key.iter().enumerate() {
        if i > 0 {
            out.push(KEY_SEPARATOR);
        }
        for c in part.chars() {
            if c == KEY_SEPARATOR || c == KEY_ESCAPE {
                out.push(KEY_ESCAPE);
            }
            out.push(c);
        }
    }
    out
}

impl StateStore for FileStore {
    fn set(&self, key: &[&str], value: Value) {
        self.lock().insert(join_key(key), value);
    }

    fn get(&self, key: &[&str]) -> Option<Value> {
        self.lock().get(&join_key(key)).cloned()
    }

    fn save(&self) -> Result<(), StorageError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(&*self.lock())?;

        // Write next to the target and rename so a crash never leaves a truncated file.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| StorageError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, path).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("State store saved to {}", path.display());
        Ok(())
    }
}
