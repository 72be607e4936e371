//! Persisted per-display state (§6): DSA multipliers and the
//! capabilities/EDID cache survive between invocations, keyed by
//! [`EdidId`] so the same physical monitor is recognized regardless of
//! which bus it is plugged into this time.

use std::collections::HashMap;
use std::path::PathBuf;

use log::warn;
use thiserror::Error;

use crate::registry::EdidId;

#[derive(Debug, Error)]
pub enum StateDirError {
    #[error("could not determine a state directory for this platform")]
    NoStateDir,
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[cfg(feature = "serde")]
    #[error("failed to (de)serialize state file {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Per-EDID persisted facts (§6): the last-known DSA multiplier plus a
/// cached capabilities string, so a subsequent run can skip a slow
/// capabilities read for a monitor already seen.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PersistedDisplayState {
    pub sleep_multiplier: f64,
    pub capabilities_cache: Option<String>,
}

/// The on-disk root of persisted state, rooted under the XDG state
/// directory (`~/.local/state/ddcutil-core` on Linux via the `dirs` crate).
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn discover() -> Result<Self, StateDirError> {
        let root = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .ok_or(StateDirError::NoStateDir)?
            .join("ddcutil-core");
        std::fs::create_dir_all(&root).map_err(|source| StateDirError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    fn file_for(&self, id: &EdidId) -> PathBuf {
        let key = format!(
            "{}{}{}-{:04x}-{:08x}",
            id.mfg_id[0], id.mfg_id[1], id.mfg_id[2], id.model, id.serial
        );
        self.root.join(format!("{key}.state.json"))
    }

    #[cfg(feature = "serde")]
    pub fn load(&self, id: &EdidId) -> Option<PersistedDisplayState> {
        let path = self.file_for(id);
        let contents = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(state) => Some(state),
            Err(err) => {
                warn!("state_dir: discarding unreadable state file {path:?}: {err}");
                None
            }
        }
    }

    #[cfg(feature = "serde")]
    pub fn store(&self, id: &EdidId, state: &PersistedDisplayState) -> Result<(), StateDirError> {
        let path = self.file_for(id);
        let text = serde_json::to_string_pretty(state).map_err(|source| StateDirError::Serde {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, text).map_err(|source| StateDirError::Io { path, source })
    }

    #[cfg(not(feature = "serde"))]
    pub fn load(&self, _id: &EdidId) -> Option<PersistedDisplayState> {
        None
    }

    #[cfg(not(feature = "serde"))]
    pub fn store(&self, _id: &EdidId, _state: &PersistedDisplayState) -> Result<(), StateDirError> {
        Ok(())
    }
}

/// In-memory cache layered in front of [`StateDir`] for the lifetime of
/// one process, avoiding a filesystem round-trip per VCP operation.
#[derive(Default)]
pub struct StateCache {
    entries: HashMap<EdidId, PersistedDisplayState>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(&mut self, dir: &StateDir, id: &EdidId) -> PersistedDisplayState {
        if let Some(state) = self.entries.get(id) {
            return state.clone();
        }
        let state = dir.load(id).unwrap_or(PersistedDisplayState {
            sleep_multiplier: 1.0,
            capabilities_cache: None,
        });
        self.entries.insert(id.clone(), state.clone());
        state
    }

    pub fn set(&mut self, id: EdidId, state: PersistedDisplayState) {
        self.entries.insert(id, state);
    }
}
