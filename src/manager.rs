// src/manager.rs

//! High-level package manager facade
//!
//! `PackageManager` owns the on-disk layout under one target root, wires the
//! planner, downloader, verifier, and executor together, and serializes
//! transactions behind a system-wide pid-file lock. All paths are relative
//! to the target root, which makes chroot and bootstrap workflows a matter
//! of passing a different root.
//!
//! Layout under the target root:
//!
//! ```text
//! var/lib/aurora/aurora.db      package catalogs
//! var/lib/aurora/aurora.lock    transaction lock (pid file)
//! var/cache/aurora/pkg/         downloaded archives + tx workspaces
//! etc/aurora/repos.conf         repository configuration
//! etc/aurora/keys/              trusted public keys (read-only)
//! ```

use crate::crypto;
use crate::db::Database;
use crate::download::{DownloadJob, Downloader};
use crate::error::{Error, Result};
use crate::metadata;
use crate::repo::RepositoryManager;
use crate::transaction::{
    PackageInstallation, Transaction, TransactionExecutor, TransactionPlanner,
};
use fs2::FileExt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Lock acquisition retries (exponential backoff, 100ms * 2^attempt)
const LOCK_RETRIES: u32 = 5;

/// Exclusive system-wide transaction lock (pid file)
///
/// Held for the duration of one transaction; released on drop.
struct SystemLock {
    file: File,
}

impl SystemLock {
    fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(path)?;

        let mut last_error = None;
        for attempt in 0..LOCK_RETRIES {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < LOCK_RETRIES - 1 {
                        std::thread::sleep(Duration::from_millis(100 * (1 << attempt)));
                    }
                }
            }
        }

        if let Some(e) = last_error {
            return Err(Error::LockContention(format!(
                "another transaction may be in progress ({e})"
            )));
        }

        let _ = writeln!(file, "{}", std::process::id());
        Ok(Self { file })
    }
}

impl Drop for SystemLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// The package manager for one target root
pub struct PackageManager {
    root: PathBuf,
    cache_path: PathBuf,
    lock_path: PathBuf,
    skip_crypto: bool,
    db: Database,
    repos: RepositoryManager,
}

impl PackageManager {
    /// Open the manager for `root`, creating the state directories
    ///
    /// `skip_crypto` disables both checksum and signature verification; it
    /// exists for air-gapped bootstraps and must never be the default.
    pub fn new(root: &Path, skip_crypto: bool) -> Result<Self> {
        let db_path = root.join("var/lib/aurora/aurora.db");
        let cache_path = root.join("var/cache/aurora/pkg");
        let lock_path = root.join("var/lib/aurora/aurora.lock");
        let config_path = root.join("etc/aurora/repos.conf");
        let keyring_dir = root.join("etc/aurora/keys");

        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir_all(&cache_path)?;

        let db = Database::open(&db_path)?;
        let repos = RepositoryManager::new(config_path, keyring_dir);

        Ok(Self {
            root: root.to_path_buf(),
            cache_path,
            lock_path,
            skip_crypto,
            db,
            repos,
        })
    }

    /// Synchronize all configured repositories into the available catalog
    pub fn sync(&mut self) -> Result<()> {
        info!("syncing repositories to the local catalog");
        self.repos.sync_all(&mut self.db, self.skip_crypto)
    }

    // --- Planning ---

    pub fn plan_install(&self, names: &[String], force: bool) -> Result<Transaction> {
        TransactionPlanner::new(&self.db, &self.root, &self.cache_path).plan_install(names, force)
    }

    pub fn plan_remove(&self, names: &[String], force: bool) -> Result<Transaction> {
        TransactionPlanner::new(&self.db, &self.root, &self.cache_path).plan_remove(names, force)
    }

    /// Sync repositories, then plan a whole-system update
    pub fn plan_update(&mut self) -> Result<Transaction> {
        if let Err(e) = self.sync() {
            return Err(Error::ResolutionFailed(format!(
                "could not update repositories: {e}"
            )));
        }
        TransactionPlanner::new(&self.db, &self.root, &self.cache_path).plan_update()
    }

    // --- Preparation ---

    /// Verify there is room for the downloads and the installed payload
    pub fn check_disk_space(&self, plan: &Transaction) -> Result<()> {
        if plan.to_install.is_empty() {
            return Ok(());
        }

        let downloader = Downloader::new()?;
        let jobs = self.download_jobs(plan)?;
        let download_size = downloader.total_download_size(&jobs);

        if download_size > 0 {
            let available = fs2::available_space(&self.cache_path)?;
            if available < download_size as u64 {
                return Err(Error::NotEnoughSpace {
                    path: self.cache_path.clone(),
                    required: download_size as u64,
                    available,
                });
            }
        }

        // Installed-size delta; zero sizes mean "unknown" and count nothing
        let incoming: i64 = plan
            .to_install
            .iter()
            .map(|i| i.metadata.installed_size as i64)
            .sum();
        let outgoing: i64 = plan
            .to_remove
            .iter()
            .map(|p| p.pkg.installed_size as i64)
            .sum();
        let delta = incoming - outgoing;

        if delta > 0 {
            let available = fs2::available_space(&self.root)?;
            if available < delta as u64 {
                return Err(Error::NotEnoughSpace {
                    path: self.root.clone(),
                    required: delta as u64,
                    available,
                });
            }
        }

        Ok(())
    }

    fn download_jobs(&self, plan: &Transaction) -> Result<Vec<DownloadJob>> {
        let mut jobs = Vec::with_capacity(plan.to_install.len());
        for item in &plan.to_install {
            let pkg = &item.metadata;
            let mirrors = self.repos.get_repo_urls(&pkg.repo_name)?.ok_or_else(|| {
                Error::ResolutionFailed(format!(
                    "cannot find repository URL for repo '{}'",
                    pkg.repo_name
                ))
            })?;

            let urls = mirrors
                .iter()
                .map(|base| {
                    format!(
                        "{}/{}-{}.au",
                        base.trim_end_matches('/'),
                        pkg.name,
                        pkg.version
                    )
                })
                .collect();

            jobs.push(DownloadJob::new(
                urls,
                item.archive_path.clone(),
                format!("{}-{}", pkg.name, pkg.version),
            ));
        }
        Ok(jobs)
    }

    /// Download and verify every archive the plan needs
    ///
    /// A failed checksum deletes the offending file and aborts the
    /// transaction before anything touches the target root.
    pub fn prepare_transaction_assets(&self, plan: &Transaction) -> Result<()> {
        if plan.to_install.is_empty() {
            return Ok(());
        }

        info!("downloading transaction assets");
        let downloader = Downloader::new()?;
        let mut jobs = self.download_jobs(plan)?;

        if !downloader.download_all(&mut jobs) {
            let failed: Vec<String> = jobs
                .iter()
                .filter_map(|j| {
                    j.error_message
                        .as_ref()
                        .map(|e| format!("{}: {e}", j.display_name))
                })
                .collect();
            return Err(Error::DownloadFailed(failed.join("; ")));
        }

        if self.skip_crypto {
            warn!("skipping all package integrity checks as requested");
            return Ok(());
        }

        info!("verifying package integrity");
        for item in &plan.to_install {
            let pkg = &item.metadata;
            if !crypto::verify_file_checksum(&item.archive_path, &pkg.checksum)? {
                let _ = fs::remove_file(&item.archive_path);
                return Err(Error::ChecksumMismatch(pkg.name.clone()));
            }
        }

        Ok(())
    }

    // --- Execution ---

    /// Execute a planned transaction under the system lock
    pub fn execute_transaction(&mut self, plan: &Transaction) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }
        let _lock = SystemLock::acquire(&self.lock_path)?;
        TransactionExecutor::new(&mut self.db, &self.root, &self.cache_path).execute(plan)
    }

    /// Space-check, download, verify, and execute an install-shaped plan
    pub fn commit_install(&mut self, plan: &Transaction) -> Result<()> {
        if plan.is_empty() {
            info!("nothing to do, all packages are already installed");
            return Ok(());
        }
        self.check_disk_space(plan)?;
        self.prepare_transaction_assets(plan)?;
        self.execute_transaction(plan)
    }

    /// Plan + commit: install `names` and their dependencies
    pub fn install(&mut self, names: &[String], force: bool) -> Result<()> {
        let plan = self.plan_install(names, force)?;
        self.commit_install(&plan)
    }

    /// Plan + commit: remove `names`
    pub fn remove(&mut self, names: &[String], force: bool) -> Result<()> {
        let plan = self.plan_remove(names, force)?;
        if plan.is_empty() {
            info!("nothing to do");
            return Ok(());
        }
        self.execute_transaction(&plan)
    }

    /// Sync, plan, and apply a whole-system update
    pub fn update(&mut self) -> Result<()> {
        let plan = self.plan_update()?;
        if plan.is_empty() {
            info!("system is already up to date");
            return Ok(());
        }
        self.prepare_transaction_assets(&plan)?;
        self.execute_transaction(&plan)
    }

    /// Install a package from an already-present local archive
    ///
    /// Bypasses the resolver and downloader but still performs dependency,
    /// conflict, and integrity checks before the normal executor path.
    pub fn install_local(&mut self, package_path: &Path, force: bool) -> Result<()> {
        info!("installing local package {}", package_path.display());

        let meta_bytes = crate::archive::extract_single(package_path, Path::new(".AURORA_META"))
            .map_err(|e| Error::ExtractionFailed(e.to_string()))?;
        let meta_text = String::from_utf8(meta_bytes).map_err(|_| {
            Error::Parse(metadata::ParseError::InvalidFormat(
                "package metadata is not valid UTF-8".to_string(),
            ))
        })?;
        let pkg = metadata::parse_package_str(&meta_text)?;

        if self.skip_crypto {
            warn!("skipping local package integrity check as requested");
        } else if !crypto::verify_file_checksum(package_path, &pkg.checksum)? {
            return Err(Error::ChecksumMismatch(pkg.name.clone()));
        }

        if self.db.is_installed(&pkg.name)? {
            if !force {
                return Err(Error::PackageAlreadyInstalled(pkg.name.clone()));
            }
            warn!("reinstalling '{}' over an installed copy (forced)", pkg.name);
        }

        for dep in &pkg.deps {
            if !self.is_dependency_satisfied(dep)? {
                if !force {
                    return Err(Error::ResolutionFailed(format!(
                        "unsatisfied dependency for '{}': {dep}",
                        pkg.name
                    )));
                }
                warn!("installing '{}' with unsatisfied dependency '{dep}' (forced)", pkg.name);
            }
        }

        for conflict in &pkg.conflicts {
            if self.db.is_installed(conflict)? {
                if !force {
                    return Err(Error::ConflictDetected {
                        package: pkg.name.clone(),
                        conflicts_with: conflict.clone(),
                    });
                }
                warn!(
                    "installing '{}' despite conflict with '{}' (forced)",
                    pkg.name, conflict
                );
            }
        }

        let mut plan = Transaction::default();
        for replace_name in &pkg.replaces {
            if let Some(target) = self.db.get_installed(replace_name)? {
                info!(
                    "package '{}' replaces '{}', it will be removed",
                    pkg.name, replace_name
                );
                plan.to_remove.push(target);
            }
        }
        plan.to_install.push(PackageInstallation {
            metadata: pkg,
            archive_path: package_path.to_path_buf(),
        });

        self.execute_transaction(&plan)
    }

    /// A dependency is satisfied by an installed package's exact name or by
    /// one of its provisions
    fn is_dependency_satisfied(&self, dep_name: &str) -> Result<bool> {
        if self.db.is_installed(dep_name)? {
            return Ok(true);
        }
        for installed in self.db.list_installed()? {
            if installed.pkg.provides.iter().any(|p| p == dep_name) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Read access to the catalogs, for the CLI's plan summaries
    pub fn database(&self) -> &Database {
        &self.db
    }
}
