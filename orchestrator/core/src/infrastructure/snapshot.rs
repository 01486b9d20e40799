// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Atomic JSON snapshots.
//!
//! Every durable document in the hive (task state, proposals, acceptance
//! thresholds) is written through this module: serialize to a sibling temp
//! file, fsync, then rename over the target. A [`SnapshotStore`] configured
//! with a backup directory additionally copies the current primary aside
//! before each overwrite and can restore from those copies on load.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SnapshotError + '_ {
    move |source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write `value` as pretty JSON to `path` via temp file, fsync and rename.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp_path).map_err(io_err(&tmp_path))?;
        file.write_all(&bytes).map_err(io_err(&tmp_path))?;
        file.sync_all().map_err(io_err(&tmp_path))?;
    }
    fs::rename(&tmp_path, path).map_err(io_err(path))?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, SnapshotError> {
    let bytes = fs::read(path).map_err(io_err(path))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// What [`SnapshotStore::load`] found on disk.
#[derive(Debug)]
pub enum Loaded<T> {
    /// No primary file; start empty.
    Fresh,
    Primary(T),
    /// The primary was unreadable; this backup was used instead.
    Restored { value: T, backup: PathBuf },
    /// Neither the primary nor any tried backup could be read.
    Lost,
}

impl<T> Loaded<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Loaded::Primary(value) | Loaded::Restored { value, .. } => Some(value),
            Loaded::Fresh | Loaded::Lost => None,
        }
    }
}

#[derive(Debug, Clone)]
struct BackupPolicy {
    dir: PathBuf,
    keep: usize,
    restore_attempts: usize,
}

/// One durable JSON document with optional rotating backups.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
    backups: Option<BackupPolicy>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backups: None,
        }
    }

    pub fn with_backups(
        path: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        keep: usize,
        restore_attempts: usize,
    ) -> Self {
        Self {
            path: path.into(),
            backups: Some(BackupPolicy {
                dir: backup_dir.into(),
                keep,
                restore_attempts,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stem(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("snapshot")
            .to_string()
    }

    pub fn save<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), SnapshotError> {
        if let Some(policy) = &self.backups {
            if self.path.exists() {
                self.backup_primary(policy)?;
            }
        }
        write_json_atomic(&self.path, value)
    }

    fn backup_primary(&self, policy: &BackupPolicy) -> Result<(), SnapshotError> {
        fs::create_dir_all(&policy.dir).map_err(io_err(&policy.dir))?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6f");
        let mut target = policy.dir.join(format!("{}_{}.json", self.stem(), stamp));
        let mut n = 1;
        while target.exists() {
            target = policy.dir.join(format!("{}_{}_{}.json", self.stem(), stamp, n));
            n += 1;
        }
        fs::copy(&self.path, &target).map_err(io_err(&target))?;

        let backups = self.list_backups()?;
        if backups.len() > policy.keep {
            let excess = backups.len() - policy.keep;
            // list is newest first
            for stale in backups.iter().rev().take(excess) {
                if let Err(e) = fs::remove_file(stale) {
                    warn!(path = %stale.display(), error = %e, "Failed to remove old backup");
                }
            }
        }
        Ok(())
    }

    /// Backups of this document, newest first.
    pub fn list_backups(&self) -> Result<Vec<PathBuf>, SnapshotError> {
        let Some(policy) = &self.backups else {
            return Ok(Vec::new());
        };
        if !policy.dir.exists() {
            return Ok(Vec::new());
        }
        let prefix = format!("{}_", self.stem());
        let mut found: Vec<PathBuf> = fs::read_dir(&policy.dir)
            .map_err(io_err(&policy.dir))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension().is_some_and(|ext| ext == "json")
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(&prefix))
            })
            .collect();
        found.sort();
        found.reverse();
        Ok(found)
    }

    /// Read the primary, falling back to the newest backups when it is corrupt.
    /// Never fails; data loss is reported through [`Loaded::Lost`] and logged.
    pub fn load<T: DeserializeOwned>(&self) -> Loaded<T> {
        if !self.path.exists() {
            return Loaded::Fresh;
        }
        let primary_error = match read_json(&self.path) {
            Ok(value) => return Loaded::Primary(value),
            Err(e) => e,
        };
        error!(path = %self.path.display(), error = %primary_error, "Snapshot is corrupt, trying backups");

        let Some(policy) = &self.backups else {
            error!(path = %self.path.display(), "No backups configured; starting empty, previous state is lost");
            return Loaded::Lost;
        };
        let backups = match self.list_backups() {
            Ok(backups) => backups,
            Err(e) => {
                error!(error = %e, "Failed to list backups");
                Vec::new()
            }
        };
        for backup in backups.into_iter().take(policy.restore_attempts) {
            match read_json(&backup) {
                Ok(value) => {
                    info!(backup = %backup.display(), "Restored snapshot from backup");
                    return Loaded::Restored { value, backup };
                }
                Err(e) => {
                    warn!(backup = %backup.display(), error = %e, "Backup unreadable");
                }
            }
        }
        error!(path = %self.path.display(), "All restore attempts failed; starting empty, previous state is lost");
        Loaded::Lost
    }
}
