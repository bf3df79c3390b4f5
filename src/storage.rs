//! Digest export.

use crate::model::RunSnapshot;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const DIGEST_FILE_NAME: &str = "daily_digest.md";

/// Default export location: the user's download directory, else the working directory.
pub fn default_digest_path() -> Result<PathBuf> {
    let dir = match dirs::download_dir() {
        Some(d) => d,
        None => std::env::current_dir().context("get current directory")?,
    };
    Ok(dir.join(DIGEST_FILE_NAME))
}

/// Write the digest markdown verbatim to `path`, creating parent directories.
pub fn export_digest(path: &Path, content: &str) -> Result<PathBuf> {
    if content.is_empty() {
        anyhow::bail!("no digest to save yet");
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("write {}", path.display()))?;
    Ok(path.to_path_buf())
}

/// Write the run snapshot as pretty JSON.
pub fn export_json(path: &Path, snapshot: &RunSnapshot) -> Result<()> {
    let data = serde_json::to_vec_pretty(snapshot).context("serialize run snapshot")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
