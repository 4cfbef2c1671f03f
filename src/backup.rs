//! Copy-before-mutate backups
//!
//! Backups live in a hidden directory next to the target file and are named
//! `<stem>_<mtime>.py.backup`. Every call creates a new file: when two calls see the
//! same modification time, the later one gets a numeric suffix.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{RefactorError, Result};

const BACKUP_SUFFIX: &str = ".py.backup";

/// A live backup of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    pub original: PathBuf,
    pub backup: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    dir_name: String,
}

impl BackupManager {
    /// `dir_name` is the hidden directory created next to each target file
    pub fn new(dir_name: impl Into<String>) -> Self {
        Self {
            dir_name: dir_name.into(),
        }
    }

    pub fn backup_dir(&self, path: &Path) -> PathBuf {
        path.parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&self.dir_name)
    }

    /// Copy `path` into the backup directory
    pub fn create_backup(&self, path: &Path) -> Result<BackupRecord> {
        let dir = self.backup_dir(path);
        fs::create_dir_all(&dir).map_err(|e| RefactorError::io(&dir, e))?;

        let metadata = fs::metadata(path).map_err(|e| RefactorError::io(path, e))?;
        let modified = metadata.modified().map_err(|e| RefactorError::io(path, e))?;
        let stamp = DateTime::<Local>::from(modified).format("%Y%m%d%H%M%S%6f");
        let stem = file_stem(path);

        let mut backup = dir.join(format!("{stem}_{stamp}{BACKUP_SUFFIX}"));
        let mut counter = 1;
        while backup.exists() {
            backup = dir.join(format!("{stem}_{stamp}_{counter}{BACKUP_SUFFIX}"));
            counter += 1;
        }

        fs::copy(path, &backup).map_err(|e| RefactorError::io(&backup, e))?;
        info!("backed up {} to {}", path.display(), backup.display());
        Ok(BackupRecord {
            original: path.to_path_buf(),
            backup,
        })
    }

    /// Copy the backup back over the original
    ///
    /// Returns `false` without touching anything when the backup is gone.
    pub fn restore(&self, record: &BackupRecord) -> Result<bool> {
        if !record.backup.is_file() {
            debug!("backup {} missing, nothing restored", record.backup.display());
            return Ok(false);
        }
        fs::copy(&record.backup, &record.original)
            .map_err(|e| RefactorError::io(&record.original, e))?;
        info!("restored {} from backup", record.original.display());
        Ok(true)
    }

    /// Backups of `path`, newest first
    pub fn list_backups(&self, path: &Path) -> Vec<BackupRecord> {
        let dir = self.backup_dir(path);
        if !dir.is_dir() {
            return Vec::new();
        }
        let prefix = format!("{}_", file_stem(path));
        let mut found: Vec<(std::time::SystemTime, PathBuf)> = WalkDir::new(&dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                let name = e.file_name().to_string_lossy();
                name.starts_with(&prefix) && name.ends_with(BACKUP_SUFFIX)
            })
            .filter_map(|e| {
                let modified = e.metadata().ok()?.modified().ok()?;
                Some((modified, e.into_path()))
            })
            .collect();
        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        found
            .into_iter()
            .map(|(_, backup)| BackupRecord {
                original: path.to_path_buf(),
                backup,
            })
            .collect()
    }
}

impl Default for BackupManager {
    fn default() -> Self {
        Self::new(".classforge_backups")
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string())
}
