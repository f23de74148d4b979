use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::channel::{self, Channel};
use crate::error::{Error, Result};
use crate::history::{HistoryEntry, HistoryStore, Retention};
use crate::local_files::{self, FileSystem};
use crate::paths;

fn default_true() -> bool {
    true
}

fn default_cooldown() -> u64 {
    300
}

/// The persisted notification document: channel configuration plus recorded
/// event history, one file under the pipeline metadata directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct NotifyDoc {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum seconds between two notifications of the same kind for the
    /// same pipeline. Failures are exempt.
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub history: BTreeMap<String, Vec<HistoryEntry>>,
}

impl Default for NotifyDoc {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_seconds: default_cooldown(),
            channels: Vec::new(),
            history: BTreeMap::new(),
        }
    }
}

impl NotifyDoc {
    /// Rebuild the history store from the persisted map.
    pub fn history_store(&self) -> HistoryStore {
        HistoryStore::from_entries(&self.history, Retention::default())
    }

    /// Fold a history store back into the document for persistence.
    pub fn set_history(&mut self, store: &HistoryStore) {
        self.history = store.to_entries();
    }
}

/// Loads and persists the notification document. Immutable for the duration
/// of a command invocation: one load at start, one optional save at the end.
pub struct ConfigStore {
    root: PathBuf,
}

impl ConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at the project's `.pipeline/` directory.
    pub fn default_root() -> Result<Self> {
        Ok(Self::new(paths::pipeline_dir()?))
    }

    pub fn path(&self) -> PathBuf {
        paths::notifications_file(&self.root)
    }

    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    pub fn load(&self) -> Result<NotifyDoc> {
        let path = self.path();
        if !path.exists() {
            return Err(Error::config_not_found(path.display().to_string()));
        }

        let content = local_files::local().read(&path)?;
        let doc: NotifyDoc = serde_json::from_str(&content)
            .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))?;

        channel::validate_channels(&doc.channels)?;
        Ok(doc)
    }

    /// Validate and persist the document atomically. A document that fails
    /// validation is never written.
    pub fn save(&self, doc: &NotifyDoc) -> Result<()> {
        channel::validate_channels(&doc.channels)?;

        let fs = local_files::local();
        fs.ensure_dir(&self.root)?;

        let content = serde_json::to_string_pretty(doc).map_err(|e| {
            Error::internal_json(e.to_string(), Some("serialize notification doc".to_string()))
        })?;
        fs.write(&self.path(), &content)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
