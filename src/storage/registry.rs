//! Key Space Registry
//!
//! Explicit path → engine map. Engines are opened lazily on first
//! reference and live until the registry is closed.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::StoreOptions;
use crate::error::{Result, VaultError};

use super::keyspace::KeySpace;

/// Owns every open key space under one root directory
pub struct KeySpaceRegistry {
    root: PathBuf,
    options: StoreOptions,
    spaces: Mutex<HashMap<String, Arc<KeySpace>>>,
}

impl KeySpaceRegistry {
    pub fn new(root: impl Into<PathBuf>, options: StoreOptions) -> Self {
        Self {
            root: root.into(),
            options,
            spaces: Mutex::new(HashMap::new()),
        }
    }

    /// Get the key space for `path`, opening it on first use
    ///
    /// Construction happens under the registry lock, so two concurrent first
    /// references never open the same directory twice.
    pub fn get_or_open(&self, path: &str) -> Result<Arc<KeySpace>> {
        let name = normalize_path(path)?;

        let mut spaces = self.spaces.lock();
        if let Some(space) = spaces.get(&name) {
            return Ok(Arc::clone(space));
        }

        let space = Arc::new(KeySpace::open(self.root.join(&name), self.options)?);
        tracing::info!("Key space {:?} opened", name);
        spaces.insert(name, Arc::clone(&space));
        Ok(space)
    }

    /// Already-open key space for `path`, if any
    pub fn get(&self, path: &str) -> Option<Arc<KeySpace>> {
        let name = normalize_path(path).ok()?;
        self.spaces.lock().get(&name).cloned()
    }

    /// Names of all open key spaces, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.spaces.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.spaces.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Flush every open key space
    pub fn flush_all(&self) -> Result<()> {
        for space in self.snapshot() {
            space.flush()?;
        }
        Ok(())
    }

    /// Close every open key space, reporting the first failure
    pub fn close_all(&self) -> Result<()> {
        let mut first_error = None;
        for space in self.snapshot() {
            if let Err(e) = space.close() {
                tracing::error!("Failed to close key space {}: {}", space.dir().display(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn snapshot(&self) -> Vec<Arc<KeySpace>> {
        self.spaces.lock().values().cloned().collect()
    }
}

/// Turn a client-supplied path into a relative directory name
///
/// Rejects empty paths, absolute paths and `..` so a key space can never
/// escape the data directory. `a/./b` and `a/b` name the same key space.
pub fn normalize_path(path: &str) -> Result<String> {
    let mut parts = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return Err(VaultError::InvalidPath(path.to_string())),
        }
    }

    if parts.is_empty() {
        return Err(VaultError::InvalidPath(path.to_string()));
    }
    Ok(parts.join("/"))
}
