//! Aggregated daemon status and its on-disk publication.

use std::fs::Permissions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs_err::os::unix::fs::OpenOptionsExt;
use serde::Serialize;

use crate::bridge::BridgeStatus;
use crate::hub::SessionsStatus;
use crate::monitor::{ConfigStatus, MemoryStatus};

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptStatus {
    pub enabled: bool,
    pub root: Option<PathBuf>,
    pub watching: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompanionStatus {
    pub generated_at: DateTime<Utc>,
    pub pid: u32,
    pub agent: String,
    pub memory: MemoryStatus,
    pub config: ConfigStatus,
    pub bridge: BridgeStatus,
    pub transcripts: TranscriptStatus,
    pub sessions: SessionsStatus,
}

const STATUS_FILE_MODE: u32 = 0o600;

/// Writes via a temp file and rename so readers never see a partial file.
/// The file is readable by the owner only.
pub fn write_status_file(path: &Path, status: &CompanionStatus) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent)
            .map_err(|err| format!("Failed to create status dir: {}", err))?;
    }

    let payload = serde_json::to_vec_pretty(status)
        .map_err(|err| format!("Failed to serialize status: {}", err))?;
    let tmp_path = path.with_extension("tmp");
    let mut file = fs_err::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(STATUS_FILE_MODE)
        .open(&tmp_path)
        .map_err(|err| format!("Failed to write status: {}", err))?;
    // A leftover temp file keeps its old mode; `mode` only applies on create.
    file.set_permissions(Permissions::from_mode(STATUS_FILE_MODE))
        .map_err(|err| format!("Failed to restrict status: {}", err))?;
    file.write_all(&payload)
        .map_err(|err| format!("Failed to write status: {}", err))?;
    drop(file);
    fs_err::rename(&tmp_path, path).map_err(|err| format!("Failed to commit status: {}", err))?;
    Ok(())
}
