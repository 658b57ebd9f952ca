use crate::{AllowlistError, ToolInvocation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::warn;

/// One remembered "proceed always" decision.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub tool_name: String,
    pub signature: String,
}

impl AllowlistEntry {
    pub fn new(tool_name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            signature: signature.into(),
        }
    }

    pub fn for_invocation(invocation: &dyn ToolInvocation) -> Self {
        Self::new(invocation.tool_name(), invocation.signature())
    }
}

pub trait AllowlistStore: Send + Sync {
    fn load(&self) -> Result<Vec<AllowlistEntry>, AllowlistError>;
    fn save(&self, entries: &[AllowlistEntry]) -> Result<(), AllowlistError>;
}

#[derive(Debug, Default)]
pub struct MemoryAllowlistStore {
    entries: Mutex<Vec<AllowlistEntry>>,
}

impl MemoryAllowlistStore {
    pub fn saved(&self) -> Vec<AllowlistEntry> {
        self.entries
            .lock()
            .expect("memory allowlist store mutex poisoned")
            .clone()
    }
}

impl AllowlistStore for MemoryAllowlistStore {
    fn load(&self) -> Result<Vec<AllowlistEntry>, AllowlistError> {
        Ok(self.saved())
    }

    fn save(&self, entries: &[AllowlistEntry]) -> Result<(), AllowlistError> {
        *self
            .entries
            .lock()
            .expect("memory allowlist store mutex poisoned") = entries.to_vec();
        Ok(())
    }
}

/// Stores the allowlist as a pretty-printed JSON array.
#[derive(Clone, Debug)]
pub struct FsAllowlistStore {
    path: PathBuf,
}

impl FsAllowlistStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AllowlistStore for FsAllowlistStore {
    fn load(&self) -> Result<Vec<AllowlistEntry>, AllowlistError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read(&self.path)
            .map_err(|err| AllowlistError::Backend(format!("read allowlist failed: {err}")))?;
        serde_json::from_slice(&raw).map_err(|err| AllowlistError::Serialization(err.to_string()))
    }

    fn save(&self, entries: &[AllowlistEntry]) -> Result<(), AllowlistError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                AllowlistError::Backend(format!("create allowlist dir failed: {err}"))
            })?;
        }
        let raw = serde_json::to_vec_pretty(entries)
            .map_err(|err| AllowlistError::Serialization(err.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .map_err(|err| AllowlistError::Backend(format!("write allowlist failed: {err}")))?;
        fs::rename(&tmp, &self.path)
            .map_err(|err| AllowlistError::Backend(format!("rename allowlist failed: {err}")))?;
        Ok(())
    }
}

/// Session-scoped, append-only set of tool signatures that bypass
/// confirmation. The only state shared across calls of a batch.
#[derive(Default)]
pub struct Allowlist {
    entries: RwLock<BTreeSet<AllowlistEntry>>,
    store: Option<Arc<dyn AllowlistStore>>,
    saving: Mutex<()>,
}

impl Allowlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: Arc<dyn AllowlistStore>) -> Result<Self, AllowlistError> {
        let entries = store.load()?.into_iter().collect();
        Ok(Self {
            entries: RwLock::new(entries),
            store: Some(store),
            saving: Mutex::new(()),
        })
    }

    pub fn contains(&self, entry: &AllowlistEntry) -> bool {
        self.entries
            .read()
            .expect("allowlist lock poisoned")
            .contains(entry)
    }

    /// Adds an entry, returning `false` when it was already present.
    /// Persistence failures are logged; the in-memory entry is kept.
    ///
    /// With a store attached this blocks on the store's IO; async callers
    /// should go through `spawn_blocking`.
    pub fn insert(&self, entry: AllowlistEntry) -> bool {
        let Some(store) = &self.store else {
            return self
                .entries
                .write()
                .expect("allowlist lock poisoned")
                .insert(entry);
        };
        // Saves happen in insertion order, so the last save holds every entry.
        let _saving = self.saving.lock().expect("allowlist save lock poisoned");
        let snapshot = {
            let mut entries = self.entries.write().expect("allowlist lock poisoned");
            if !entries.insert(entry) {
                return false;
            }
            entries.iter().cloned().collect::<Vec<_>>()
        };
        if let Err(error) = store.save(&snapshot) {
            warn!(%error, "failed to persist allowlist");
        }
        true
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    pub fn entries(&self) -> Vec<AllowlistEntry> {
        self.entries
            .read()
            .expect("allowlist lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("allowlist lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
