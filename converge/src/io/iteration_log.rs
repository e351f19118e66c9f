//! Per-step worker records under `.converge/iterations/<run_id>/<phase>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cycle::WorkerRecord;

use super::init::WorkspacePaths;

#[derive(Debug, Serialize)]
struct RecordFile<'a> {
    run_id: &'a str,
    #[serde(flatten)]
    record: &'a WorkerRecord,
}

/// Path of one worker record.
///
/// Records for parallel candidates go under `candidate-<n>/`.
pub fn record_path(paths: &WorkspacePaths, run_id: &str, record: &WorkerRecord) -> PathBuf {
    let mut dir = paths.phase_log_dir(run_id, &record.phase);
    if let Some(candidate) = record.candidate {
        dir = dir.join(format!("candidate-{candidate}"));
    }
    dir.join(format!(
        "{:03}-{}.json",
        record.sequence,
        record.result.role.as_str()
    ))
}

/// Write one worker record as pretty JSON and return its path.
pub fn write_record(
    paths: &WorkspacePaths,
    run_id: &str,
    record: &WorkerRecord,
) -> Result<PathBuf> {
    let path = record_path(paths, run_id, record);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create iteration dir {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(&RecordFile { run_id, record })?;
    buf.push('\n');
    write_text(&path, &buf)?;
    Ok(path)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}
