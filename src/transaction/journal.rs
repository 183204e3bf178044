// src/transaction/journal.rs

//! Filesystem journal for one transaction
//!
//! The executor records every mutation it makes: new files moved onto the
//! live root, and live files moved aside into the transaction backup area.
//! Rollback consumes the journal in reverse, deleting the new files and
//! moving every backup to its original location. Each rollback step is
//! best-effort; rollback never fails, and rolling back an already-unwound
//! journal is a no-op.

use std::fs;
use std::path::PathBuf;
use tracing::{debug, error};

/// In-memory record of filesystem changes made during one transaction
#[derive(Debug, Default)]
pub struct FsJournal {
    /// Absolute live paths of newly installed files, in commit order
    new_files_committed: Vec<PathBuf>,
    /// (original live path, backup path) pairs, in backup order
    old_files_backed_up: Vec<(PathBuf, PathBuf)>,
}

impl FsJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a file newly moved onto the live root
    pub fn record_new_file(&mut self, live_path: PathBuf) {
        self.new_files_committed.push(live_path);
    }

    /// Record a live file moved into the backup area
    pub fn record_backup(&mut self, original: PathBuf, backup: PathBuf) {
        self.old_files_backed_up.push((original, backup));
    }

    pub fn is_empty(&self) -> bool {
        self.new_files_committed.is_empty() && self.old_files_backed_up.is_empty()
    }

    /// Undo everything this journal recorded
    ///
    /// New files are deleted in reverse commit order, then backups are moved
    /// back into place (recreating parent directories as needed). The
    /// journal drains itself, so a second invocation does nothing.
    pub fn rollback(&mut self) {
        for path in self.new_files_committed.drain(..).rev() {
            match fs::remove_file(&path) {
                Ok(()) => debug!("rollback: removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => error!("rollback: failed to remove {}: {e}", path.display()),
            }
        }

        for (original, backup) in self.old_files_backed_up.drain(..) {
            if !backup.exists() && backup.symlink_metadata().is_err() {
                continue;
            }
            if let Some(parent) = original.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    error!(
                        "rollback: failed to recreate directory {}: {e}",
                        parent.display()
                    );
                    continue;
                }
            }
            match fs::rename(&backup, &original) {
                Ok(()) => debug!("rollback: restored {}", original.display()),
                Err(e) => error!(
                    "rollback: failed to restore {} from {}: {e}",
                    original.display(),
                    backup.display()
                ),
            }
        }
    }
}
