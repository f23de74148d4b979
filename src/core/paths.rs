use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Pipeline metadata directory (`.pipeline/` under the current working directory).
pub fn pipeline_dir() -> Result<PathBuf> {
    let cwd = std::env::current_dir()
        .map_err(|e| Error::internal_io(e.to_string(), Some("resolve cwd".to_string())))?;
    Ok(cwd.join(".pipeline"))
}

/// Notification document path within a pipeline metadata directory.
pub fn notifications_file(root: &Path) -> PathBuf {
    root.join("notifications.json")
}
