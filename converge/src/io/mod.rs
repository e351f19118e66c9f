//! Side-effecting helpers: configuration, generation backend, prompts, and
//! the on-disk workspace under `.converge/`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};

pub mod config;
pub mod generation;
pub mod init;
pub mod inputs;
pub mod iteration_log;
pub mod process;
pub mod prompt;
pub mod state_store;

/// Check that `value` is usable as a single directory name under `.converge/`.
pub(crate) fn check_path_segment(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(anyhow!("{kind} must not be empty"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(anyhow!(
            "{kind} '{value}' may only contain ASCII letters, digits, '-' and '_'"
        ));
    }
    Ok(())
}

/// Write `contents` to `path` via a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
