//! Cross-phase input documents from `.converge/inputs/`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

/// Load every `*.md` file in `dir`, keyed by file stem.
///
/// A missing directory yields no inputs. Other entries are ignored.
pub fn load_inputs(dir: &Path) -> Result<BTreeMap<String, String>> {
    let mut inputs = BTreeMap::new();
    if !dir.is_dir() {
        return Ok(inputs);
    }
    let entries = fs::read_dir(dir).with_context(|| format!("read inputs {}", dir.display()))?;
    for entry in entries {
        let path = entry
            .with_context(|| format!("read inputs {}", dir.display()))?
            .path();
        if !path.is_file() || path.extension().is_none_or(|ext| ext != "md") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read input {}", path.display()))?;
        inputs.insert(stem.to_string(), contents);
    }
    debug!(count = inputs.len(), dir = %dir.display(), "inputs loaded");
    Ok(inputs)
}
