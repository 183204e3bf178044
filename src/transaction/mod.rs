// src/transaction/mod.rs

//! Transactional execution of package operations
//!
//! The executor drives a backup -> stage -> commit -> hook pipeline so that
//! any failure before the database commit leaves the target root bit-for-bit
//! identical to its pre-transaction state:
//!
//! 1. Every file owned by an outgoing package is MOVED (not copied) into the
//!    transaction's backup area and journaled.
//! 2. Pre-remove hooks run, resolved from the backup area (their files were
//!    just moved there).
//! 3. Each incoming archive is extracted to a private staging directory, its
//!    pre-install hook runs from staging, then each extracted file is moved
//!    into place and journaled.
//! 4. The database commits all removals and additions in one transaction.
//!    This is the point of no return.
//! 5. Post-install/post-remove hooks run; failures here are warnings only.
//! 6. The workspace is removed.
//!
//! Any error in steps 1-4 triggers a journal rollback: new files are deleted
//! in reverse order and every backup is moved home again.

mod journal;
mod planner;

pub use journal::FsJournal;
pub use planner::{PackageInstallation, Transaction, TransactionPlanner};

use crate::archive;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::metadata::InstalledPackage;
use crate::path::{safe_join, sanitize_path};
use crate::sandbox::HookSandbox;
use chrono::Utc;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Move a file, falling back to copy+fsync+delete across filesystems
///
/// Rename is atomic on the same filesystem; the EXDEV fallback keeps the
/// source until the destination is durable.
pub(crate) fn move_file_atomic(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            fs::copy(src, dst)?;
            let file = File::open(dst)?;
            file.sync_all()?;
            drop(file);
            fs::remove_file(src)?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Executes a planned transaction against a target root
pub struct TransactionExecutor<'a> {
    db: &'a mut Database,
    root: PathBuf,
    cache_path: PathBuf,
    sandbox: HookSandbox,
}

impl<'a> TransactionExecutor<'a> {
    pub fn new(db: &'a mut Database, root: impl Into<PathBuf>, cache_path: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let sandbox = HookSandbox::new(&root);
        Self {
            db,
            root,
            cache_path: cache_path.into(),
            sandbox,
        }
    }

    /// Execute the plan; on any failure before the database commit the
    /// filesystem is rolled back to its pre-transaction state
    pub fn execute(&mut self, plan: &Transaction) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }

        // Phase 0: workspace + journal
        let tx_id = Utc::now().timestamp_micros().to_string();
        let workspace = self.cache_path.join("tx").join(&tx_id);
        let backup_dir = workspace.join("backup");
        fs::create_dir_all(&backup_dir)?;
        let mut journal = FsJournal::new();

        info!("executing transaction {tx_id}");

        match self.run_phases(plan, &workspace, &backup_dir, &mut journal) {
            Ok(()) => {
                // Phase 5: cleanup
                if let Err(e) = fs::remove_dir_all(&workspace) {
                    warn!("failed to remove transaction workspace: {e}");
                }
                info!("transaction {tx_id} completed successfully");
                Ok(())
            }
            Err(e) => {
                error!("transaction failed: {e}; rolling back filesystem changes");
                journal.rollback();
                if let Err(cleanup_err) = fs::remove_dir_all(&workspace) {
                    warn!("failed to remove transaction workspace: {cleanup_err}");
                }
                info!("rollback complete, system restored to its original state");
                Err(e)
            }
        }
    }

    fn run_phases(
        &mut self,
        plan: &Transaction,
        workspace: &Path,
        backup_dir: &Path,
        journal: &mut FsJournal,
    ) -> Result<()> {
        self.backup_outgoing_files(plan, backup_dir, journal)?;
        self.run_pre_remove_hooks(plan, backup_dir)?;
        let completed = self.stage_and_install(plan, workspace, journal)?;
        self.commit_database(plan, &completed)?;
        self.run_post_hooks(plan, &completed, backup_dir);
        Ok(())
    }

    /// Phase 1: move every live file owned by an outgoing package into the
    /// backup area
    fn backup_outgoing_files(
        &self,
        plan: &Transaction,
        backup_dir: &Path,
        journal: &mut FsJournal,
    ) -> Result<()> {
        for pkg in &plan.to_remove {
            for file in &pkg.owned_files {
                let rel = sanitize_path(file)?;
                let live = self.root.join(&rel);

                if !live.exists() && live.symlink_metadata().is_err() {
                    // Externally deleted; nothing to back up
                    continue;
                }

                let backup = backup_dir.join(&rel);
                if let Some(parent) = backup.parent() {
                    fs::create_dir_all(parent)?;
                }
                move_file_atomic(&live, &backup).map_err(|e| {
                    Error::FileSystemError(format!(
                        "failed to back up {}: {e}",
                        live.display()
                    ))
                })?;
                journal.record_backup(live, backup);
            }
        }
        Ok(())
    }

    /// Phase 1b: pre-remove hooks
    ///
    /// The scripts are owned files, so phase 1 just moved them into the
    /// backup area; they are resolved there, never on the live root.
    fn run_pre_remove_hooks(&self, plan: &Transaction, backup_dir: &Path) -> Result<()> {
        for pkg in &plan.to_remove {
            if pkg.pkg.pre_remove.is_empty() {
                continue;
            }
            let script = backup_dir.join(sanitize_path(&pkg.pkg.pre_remove)?);
            if !script.exists() {
                continue;
            }
            self.sandbox.run_script_from_file(&script).map_err(|e| {
                Error::ScriptletFailed(format!(
                    "pre-remove script for '{}' failed: {e}",
                    pkg.pkg.name
                ))
            })?;
        }
        Ok(())
    }

    /// Phase 2: extract each incoming archive to staging, run its
    /// pre-install hook there, then move the files into place
    fn stage_and_install(
        &self,
        plan: &Transaction,
        workspace: &Path,
        journal: &mut FsJournal,
    ) -> Result<Vec<InstalledPackage>> {
        let mut completed = Vec::with_capacity(plan.to_install.len());

        for item in &plan.to_install {
            let pkg = &item.metadata;
            let staging = workspace.join("staging").join(&pkg.name);
            if staging.exists() {
                fs::remove_dir_all(&staging)?;
            }
            fs::create_dir_all(&staging)?;

            let extracted = archive::extract(&item.archive_path, &staging).map_err(|e| {
                Error::ExtractionFailed(format!("{}: {e}", pkg.name))
            })?;

            if !pkg.pre_install.is_empty() {
                let script = staging.join(sanitize_path(&pkg.pre_install)?);
                self.sandbox.run_script_from_file(&script).map_err(|e| {
                    Error::ScriptletFailed(format!(
                        "pre-install script for '{}' failed: {e}",
                        pkg.name
                    ))
                })?;
            }

            let mut owned_files = Vec::with_capacity(extracted.len());
            for rel in &extracted {
                // The embedded descriptor stays out of the live root; its
                // authoritative copy lands in the database.
                if rel == Path::new(".AURORA_META") {
                    continue;
                }

                let source = staging.join(rel);
                let dest = safe_join(&self.root, rel)?;

                if dest.exists() || dest.symlink_metadata().is_ok() {
                    return Err(Error::FileConflict(format!(
                        "file conflict during execution: {}",
                        dest.display()
                    )));
                }

                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                move_file_atomic(&source, &dest).map_err(|e| {
                    Error::FileSystemError(format!(
                        "failed to install {}: {e}",
                        dest.display()
                    ))
                })?;
                journal.record_new_file(dest);
                owned_files.push(rel.clone());
            }

            fs::remove_dir_all(&staging)?;

            completed.push(InstalledPackage {
                pkg: pkg.clone(),
                install_date: Utc::now().format("%Y-%m-%d").to_string(),
                owned_files,
            });
        }

        Ok(completed)
    }

    /// Phase 3: the single atomic database commit
    fn commit_database(&mut self, plan: &Transaction, completed: &[InstalledPackage]) -> Result<()> {
        let names_to_remove: Vec<String> = plan
            .to_remove
            .iter()
            .map(|p| p.pkg.name.clone())
            .collect();

        self.db
            .perform_transactional_update(completed, &names_to_remove)
            .map_err(|e| Error::FileSystemError(format!("database commit failed: {e}")))
    }

    /// Phase 4: post-transaction hooks
    ///
    /// The system state has committed; a hook failure here is logged and
    /// never rolls anything back.
    fn run_post_hooks(
        &self,
        plan: &Transaction,
        completed: &[InstalledPackage],
        backup_dir: &Path,
    ) {
        for ipkg in completed {
            if ipkg.pkg.post_install.is_empty() {
                continue;
            }
            match sanitize_path(&ipkg.pkg.post_install) {
                Ok(rel) => {
                    let script = self.root.join(rel);
                    if script.exists() {
                        if let Err(e) = self.sandbox.run_script_from_file(&script) {
                            warn!("post-install script for '{}' failed: {e}", ipkg.pkg.name);
                        }
                    }
                }
                Err(e) => warn!(
                    "ignoring invalid post-install script path for '{}': {e}",
                    ipkg.pkg.name
                ),
            }
        }

        for pkg in &plan.to_remove {
            if pkg.pkg.post_remove.is_empty() {
                continue;
            }
            match sanitize_path(&pkg.pkg.post_remove) {
                Ok(rel) => {
                    // The script is no longer on the live root; it sits in
                    // the backup area until cleanup.
                    let script = backup_dir.join(rel);
                    if script.exists() {
                        if let Err(e) = self.sandbox.run_script_from_file(&script) {
                            warn!("post-remove script for '{}' failed: {e}", pkg.pkg.name);
                        }
                    }
                }
                Err(e) => warn!(
                    "ignoring invalid post-remove script path for '{}': {e}",
                    pkg.pkg.name
                ),
            }
        }
    }
}
