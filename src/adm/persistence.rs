use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::adm::config::HistoryConfig;
use crate::adm::error::{AdmError, AdmResult};
use crate::adm::types::{
    DomPerformanceProfile, DomType, PersistedAdmState, DOM_PROFILE_CAPACITY,
    PERSISTED_STATE_VERSION,
};

/// Raw blob storage keyed by user id.
pub trait StateStore: Send + Sync {
    fn read(&self, key: &str) -> AdmResult<Option<String>>;
    fn write(&self, key: &str, blob: &str) -> AdmResult<()>;
    fn remove(&self, key: &str) -> AdmResult<()>;
}

/// One JSON file per user under `dir`.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl StateStore for FileStateStore {
    fn read(&self, key: &str) -> AdmResult<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(blob) => Ok(Some(blob)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, key: &str, blob: &str) -> AdmResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, blob)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> AdmResult<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Default, Clone)]
pub struct MemoryStateStore {
    blobs: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl StateStore for MemoryStateStore {
    fn read(&self, key: &str) -> AdmResult<Option<String>> {
        Ok(self.blobs.read().get(key).cloned())
    }

    fn write(&self, key: &str, blob: &str) -> AdmResult<()> {
        self.blobs.write().insert(key.to_string(), blob.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AdmResult<()> {
        self.blobs.write().remove(key);
        Ok(())
    }
}

/// Maps a user id onto a filesystem-safe key.
pub fn sanitize_user_id(user_id: &str) -> AdmResult<String> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(AdmError::InvalidUserId(user_id.to_string()));
    }
    Ok(trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect())
}

#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn StateStore>,
    history_window: usize,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn StateStore>, history: &HistoryConfig) -> Self {
        Self {
            store,
            history_window: history.performance_history_window_size.max(1),
        }
    }

    pub fn file(dir: impl Into<PathBuf>, history: &HistoryConfig) -> Self {
        Self::new(Arc::new(FileStateStore::new(dir)), history)
    }

    pub fn memory(history: &HistoryConfig) -> Self {
        Self::new(Arc::new(MemoryStateStore::new()), history)
    }

    pub fn save_state(&self, state: &PersistedAdmState, user_id: &str) -> AdmResult<()> {
        let key = sanitize_user_id(user_id)?;
        let mut state = state.clone();
        state.version = PERSISTED_STATE_VERSION;
        state.saved_at = chrono::Utc::now().timestamp_millis();
        let blob = serde_json::to_string(&state)?;
        self.store.write(&key, &blob)?;
        tracing::info!(
            user_id,
            history = state.performance_history.len(),
            "adaptive difficulty state saved"
        );
        Ok(())
    }

    /// Returns `Ok(None)` for a user with no stored state.
    pub fn load_state(&self, user_id: &str) -> AdmResult<Option<PersistedAdmState>> {
        let key = sanitize_user_id(user_id)?;
        let Some(blob) = self.store.read(&key)? else {
            return Ok(None);
        };
        let state: PersistedAdmState = serde_json::from_str(&blob)?;
        Ok(Some(self.migrate(state, user_id)))
    }

    pub fn clear_state(&self, user_id: &str) -> AdmResult<()> {
        let key = sanitize_user_id(user_id)?;
        self.store.remove(&key)?;
        tracing::info!(user_id, "adaptive difficulty state cleared");
        Ok(())
    }

    fn migrate(&self, mut state: PersistedAdmState, user_id: &str) -> PersistedAdmState {
        if state.version < PERSISTED_STATE_VERSION {
            tracing::warn!(
                user_id,
                from = state.version,
                to = PERSISTED_STATE_VERSION,
                "upgrading persisted state schema"
            );
        }

        let mut profiles = state.dom_performance_profiles.take().unwrap_or_default();
        for dom in DomType::ALL {
            if !profiles.iter().any(|p| p.dom_type == dom) {
                profiles.push(DomPerformanceProfile::new(dom));
            }
        }
        for profile in profiles.iter_mut() {
            while profile.samples.len() > DOM_PROFILE_CAPACITY {
                profile.samples.pop_front();
            }
        }
        profiles.sort_by_key(|p| p.dom_type);
        state.dom_performance_profiles = Some(profiles);

        let excess = state
            .performance_history
            .len()
            .saturating_sub(self.history_window);
        if excess > 0 {
            state.performance_history.drain(..excess);
        }

        state.normalized_positions = state.normalized_positions.normalized();
        state.version = PERSISTED_STATE_VERSION;
        state
    }
}
