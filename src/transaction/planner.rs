// src/transaction/planner.rs

//! Transaction planning
//!
//! The planner turns resolver output (or removal requests, or an update
//! scan) into an executable [`Transaction`], refusing up front anything
//! that would corrupt the system: file conflicts against the installed
//! catalog or the live filesystem, package conflicts, and removals that
//! would break installed dependents. `force` downgrades these planning
//! refusals to warnings; it never weakens integrity checks.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::metadata::{InstalledPackage, Package};
use crate::path::sanitize_path;
use crate::resolver::{ResolveError, Resolver};
use crate::version;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One package to be installed, paired with its archive location
#[derive(Debug, Clone)]
pub struct PackageInstallation {
    pub metadata: Package,
    /// Local path of the downloaded archive (filled from the cache layout at
    /// plan time; the download step writes to the same path)
    pub archive_path: PathBuf,
}

/// The complete plan of action for one system change
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    pub to_install: Vec<PackageInstallation>,
    pub to_remove: Vec<InstalledPackage>,
}

impl Transaction {
    pub fn is_empty(&self) -> bool {
        self.to_install.is_empty() && self.to_remove.is_empty()
    }
}

/// Map a resolver failure into the surfaced error taxonomy
fn map_resolve_error(e: ResolveError) -> Error {
    match e {
        ResolveError::AmbiguousProvider { name, providers } => {
            Error::AmbiguousProvider { name, providers }
        }
        other => Error::ResolutionFailed(other.to_string()),
    }
}

/// Plans transactions against one database and target root
pub struct TransactionPlanner<'a> {
    db: &'a Database,
    root: PathBuf,
    cache_path: PathBuf,
}

impl<'a> TransactionPlanner<'a> {
    pub fn new(db: &'a Database, root: impl Into<PathBuf>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            root: root.into(),
            cache_path: cache_path.into(),
        }
    }

    fn cached_archive_path(&self, pkg: &Package) -> PathBuf {
        self.cache_path
            .join(format!("{}-{}.au", pkg.name, pkg.version))
    }

    /// Check one candidate file against the ownership map and the live root
    fn check_file_conflict(
        &self,
        pkg_name: &str,
        file: &Path,
        ownership: &HashMap<PathBuf, String>,
        excluded_paths: &HashSet<PathBuf>,
        force: bool,
    ) -> Result<()> {
        let rel = sanitize_path(file)?;
        if excluded_paths.contains(&rel) {
            return Ok(());
        }

        if let Some(owner) = ownership.get(&rel) {
            let message = format!(
                "package '{pkg_name}' wants to install '{}', which is already owned by '{owner}'",
                rel.display()
            );
            if !force {
                return Err(Error::FileConflict(message));
            }
            warn!("{message} (forced)");
            return Ok(());
        }

        let on_disk = self.root.join(&rel);
        if on_disk.exists() || on_disk.symlink_metadata().is_ok() {
            let message = format!(
                "package '{pkg_name}' wants to install '{}', which already exists on the filesystem and is not owned by any package",
                rel.display()
            );
            if !force {
                return Err(Error::FileConflict(message));
            }
            warn!("{message} (forced)");
        }

        Ok(())
    }

    /// Check package-level `conflicts` and fold `replaces` targets into the
    /// removal list
    fn apply_relations(
        &self,
        pkg: &Package,
        to_remove: &mut Vec<InstalledPackage>,
        force: bool,
    ) -> Result<()> {
        for conflict_name in &pkg.conflicts {
            if self.db.is_installed(conflict_name)? {
                if !force {
                    return Err(Error::ConflictDetected {
                        package: pkg.name.clone(),
                        conflicts_with: conflict_name.clone(),
                    });
                }
                warn!(
                    "package '{}' conflicts with installed '{}' (forced)",
                    pkg.name, conflict_name
                );
            }
        }

        for replace_name in &pkg.replaces {
            if let Some(target) = self.db.get_installed(replace_name)? {
                if !to_remove.iter().any(|p| p.pkg.name == *replace_name) {
                    info!(
                        "package '{}' replaces '{}', scheduling it for removal",
                        pkg.name, replace_name
                    );
                    to_remove.push(target);
                }
            }
        }

        Ok(())
    }

    /// Plan an installation of `names` plus transitive dependencies
    pub fn plan_install(&self, names: &[String], force: bool) -> Result<Transaction> {
        info!("planning installation transaction");

        let candidates = Resolver::new(self.db)
            .resolve(names)
            .map_err(map_resolve_error)?;

        if candidates.is_empty() {
            return Ok(Transaction::default());
        }

        let ownership = self.db.file_ownership()?;
        let no_exclusions = HashSet::new();
        for pkg in &candidates {
            for file in &pkg.files {
                self.check_file_conflict(&pkg.name, file, &ownership, &no_exclusions, force)?;
            }
        }

        let mut plan = Transaction::default();
        for pkg in &candidates {
            self.apply_relations(pkg, &mut plan.to_remove, force)?;
        }

        for pkg in candidates {
            let archive_path = self.cached_archive_path(&pkg);
            plan.to_install.push(PackageInstallation {
                metadata: pkg,
                archive_path,
            });
        }

        info!("transaction plan created");
        Ok(plan)
    }

    /// Plan a removal of `names`
    pub fn plan_remove(&self, names: &[String], force: bool) -> Result<Transaction> {
        info!("planning removal transaction");

        let all_installed = self.db.list_installed()?;
        let targets: HashSet<&str> = names.iter().map(String::as_str).collect();

        let mut plan = Transaction::default();
        for name in names {
            let Some(target) = all_installed.iter().find(|p| p.pkg.name == *name) else {
                return Err(Error::PackageNotInstalled(name.clone()));
            };
            plan.to_remove.push(target.clone());

            for other in &all_installed {
                if targets.contains(other.pkg.name.as_str()) {
                    continue;
                }
                if other.pkg.deps.iter().any(|dep| dep == name) {
                    if !force {
                        return Err(Error::DependencyViolation {
                            package: name.clone(),
                            required_by: other.pkg.name.clone(),
                        });
                    }
                    warn!(
                        "removing '{}' despite installed dependent '{}' (forced)",
                        name, other.pkg.name
                    );
                }
            }
        }

        info!("removal plan created");
        Ok(plan)
    }

    /// Plan a whole-system update from the (already synced) available catalog
    ///
    /// Schedules every installed package with a strictly newer available
    /// version as remove-old + install-new, resolves the new versions'
    /// dependencies, and re-runs the install-time file-conflict scan with
    /// the outgoing packages' paths excluded.
    pub fn plan_update(&self) -> Result<Transaction> {
        info!("planning system update");

        let installed = self.db.list_installed()?;

        let mut plan = Transaction::default();
        let mut targets: BTreeMap<String, Package> = BTreeMap::new();
        let mut new_dependencies: Vec<String> = Vec::new();

        for ipkg in &installed {
            let Some(candidate) = self.db.find_available(&ipkg.pkg.name)? else {
                continue;
            };
            if version::compare(&candidate.version, &ipkg.pkg.version)? == Ordering::Greater {
                info!(
                    "upgrade found for {}: {} -> {}",
                    ipkg.pkg.name, ipkg.pkg.version, candidate.version
                );
                plan.to_remove.push(ipkg.clone());
                new_dependencies.extend(candidate.deps.iter().cloned());
                targets.insert(candidate.name.clone(), candidate);
            }
        }

        if targets.is_empty() {
            info!("system is already up to date");
            return Ok(plan);
        }

        let resolved = Resolver::new(self.db)
            .resolve(&new_dependencies)
            .map_err(map_resolve_error)?;
        for pkg in resolved {
            targets.entry(pkg.name.clone()).or_insert(pkg);
        }

        // File-conflict scan, ignoring everything owned by outgoing packages
        let removing: HashSet<&str> = plan
            .to_remove
            .iter()
            .map(|p| p.pkg.name.as_str())
            .collect();
        let mut ownership = HashMap::new();
        let mut excluded_paths = HashSet::new();
        for ipkg in &installed {
            if removing.contains(ipkg.pkg.name.as_str()) {
                for file in &ipkg.owned_files {
                    excluded_paths.insert(sanitize_path(file)?);
                }
                continue;
            }
            for file in &ipkg.owned_files {
                ownership.insert(sanitize_path(file)?, ipkg.pkg.name.clone());
            }
        }

        for pkg in targets.values() {
            for file in &pkg.files {
                self.check_file_conflict(&pkg.name, file, &ownership, &excluded_paths, false)?;
            }
        }

        for pkg in targets.into_values() {
            let archive_path = self.cached_archive_path(&pkg);
            plan.to_install.push(PackageInstallation {
                metadata: pkg,
                archive_path,
            });
        }

        info!("system update plan created");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn pkg(name: &str, version: &str) -> Package {
        Package {
            name: name.to_string(),
            version: version.to_string(),
            arch: "x86_64".to_string(),
            checksum: "00".to_string(),
            ..Default::default()
        }
    }

    fn installed(name: &str, version: &str, files: &[&str]) -> InstalledPackage {
        InstalledPackage {
            pkg: pkg(name, version),
            install_date: "2025-06-01".to_string(),
            owned_files: files.iter().map(PathBuf::from).collect(),
        }
    }

    struct Fixture {
        _tmp: TempDir,
        root: PathBuf,
        cache: PathBuf,
        db: Database,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        let cache = root.join("var/cache/aurora/pkg");
        fs::create_dir_all(&cache).unwrap();
        let db = Database::open(&tmp.path().join("aurora.db")).unwrap();
        Fixture {
            _tmp: tmp,
            root,
            cache,
            db,
        }
    }

    #[test]
    fn test_plan_install_fills_archive_paths() {
        let mut fx = fixture();
        let mut target = pkg("hello", "1.2.0");
        target.files = vec![PathBuf::from("usr/bin/hello")];
        fx.db.sync_available(&[target]).unwrap();

        let planner = TransactionPlanner::new(&fx.db, &fx.root, &fx.cache);
        let plan = planner.plan_install(&["hello".to_string()], false).unwrap();

        assert_eq!(plan.to_install.len(), 1);
        assert!(plan.to_remove.is_empty());
        assert_eq!(
            plan.to_install[0].archive_path,
            fx.cache.join("hello-1.2.0.au")
        );
    }

    #[test]
    fn test_plan_install_owned_file_conflict() {
        let mut fx = fixture();
        fx.db
            .add_installed(&installed("owner", "1.0", &["usr/bin/tool"]))
            .unwrap();
        let mut intruder = pkg("intruder", "1.0");
        intruder.files = vec![PathBuf::from("usr/bin/tool")];
        fx.db.sync_available(&[intruder]).unwrap();

        let planner = TransactionPlanner::new(&fx.db, &fx.root, &fx.cache);
        let result = planner.plan_install(&["intruder".to_string()], false);
        assert!(matches!(result, Err(Error::FileConflict(_))));

        // force downgrades the refusal
        assert!(planner.plan_install(&["intruder".to_string()], true).is_ok());
    }

    #[test]
    fn test_plan_install_unowned_live_file_conflict() {
        let mut fx = fixture();
        let stray = fx.root.join("etc/stray.conf");
        fs::create_dir_all(stray.parent().unwrap()).unwrap();
        fs::write(&stray, b"not ours").unwrap();

        let mut candidate = pkg("claimer", "1.0");
        candidate.files = vec![PathBuf::from("etc/stray.conf")];
        fx.db.sync_available(&[candidate]).unwrap();

        let planner = TransactionPlanner::new(&fx.db, &fx.root, &fx.cache);
        let result = planner.plan_install(&["claimer".to_string()], false);
        assert!(matches!(result, Err(Error::FileConflict(_))));
    }

    #[test]
    fn test_plan_install_package_conflict() {
        let mut fx = fixture();
        fx.db
            .add_installed(&installed("other-editor", "1.0", &[]))
            .unwrap();
        let mut candidate = pkg("editor", "1.0");
        candidate.conflicts = vec!["other-editor".to_string()];
        fx.db.sync_available(&[candidate]).unwrap();

        let planner = TransactionPlanner::new(&fx.db, &fx.root, &fx.cache);
        let result = planner.plan_install(&["editor".to_string()], false);
        assert!(matches!(result, Err(Error::ConflictDetected { .. })));
    }

    #[test]
    fn test_plan_install_replaces_schedules_removal_once() {
        let mut fx = fixture();
        fx.db
            .add_installed(&installed("legacy", "1.0", &["etc/legacy.conf"]))
            .unwrap();
        let mut a = pkg("a", "1.0");
        a.replaces = vec!["legacy".to_string()];
        let mut b = pkg("b", "1.0");
        b.replaces = vec!["legacy".to_string()];
        b.deps = vec!["a".to_string()];
        fx.db.sync_available(&[a, b]).unwrap();

        let planner = TransactionPlanner::new(&fx.db, &fx.root, &fx.cache);
        let plan = planner.plan_install(&["b".to_string()], false).unwrap();

        // Deduplicated by name even though both candidates replace it
        assert_eq!(plan.to_remove.len(), 1);
        assert_eq!(plan.to_remove[0].pkg.name, "legacy");
        assert_eq!(plan.to_install.len(), 2);
    }

    #[test]
    fn test_plan_remove_not_installed() {
        let fx = fixture();
        let planner = TransactionPlanner::new(&fx.db, &fx.root, &fx.cache);
        let result = planner.plan_remove(&["ghost".to_string()], false);
        assert!(matches!(result, Err(Error::PackageNotInstalled(_))));
    }

    #[test]
    fn test_plan_remove_dependency_violation() {
        let mut fx = fixture();
        fx.db.add_installed(&installed("lib", "1.0", &[])).unwrap();
        let mut app = installed("app", "1.0", &[]);
        app.pkg.deps = vec!["lib".to_string()];
        fx.db.add_installed(&app).unwrap();

        let planner = TransactionPlanner::new(&fx.db, &fx.root, &fx.cache);
        let result = planner.plan_remove(&["lib".to_string()], false);
        assert!(matches!(result, Err(Error::DependencyViolation { .. })));

        // Removing both in one transaction is fine
        let plan = planner
            .plan_remove(&["lib".to_string(), "app".to_string()], false)
            .unwrap();
        assert_eq!(plan.to_remove.len(), 2);

        // And force downgrades the refusal
        assert!(planner.plan_remove(&["lib".to_string()], true).is_ok());
    }

    #[test]
    fn test_plan_update_schedules_newer_versions() {
        let mut fx = fixture();
        fx.db
            .add_installed(&installed("tool", "1.0", &["usr/bin/tool"]))
            .unwrap();
        fx.db
            .add_installed(&installed("steady", "2.0", &[]))
            .unwrap();

        let mut newer = pkg("tool", "1.1");
        newer.files = vec![PathBuf::from("usr/bin/tool")];
        fx.db
            .sync_available(&[newer, pkg("steady", "2.0")])
            .unwrap();

        let planner = TransactionPlanner::new(&fx.db, &fx.root, &fx.cache);
        let plan = planner.plan_update().unwrap();

        assert_eq!(plan.to_remove.len(), 1);
        assert_eq!(plan.to_remove[0].pkg.name, "tool");
        assert_eq!(plan.to_install.len(), 1);
        assert_eq!(plan.to_install[0].metadata.version, "1.1");
    }

    #[test]
    fn test_plan_update_up_to_date_is_empty() {
        let mut fx = fixture();
        fx.db.add_installed(&installed("tool", "1.0", &[])).unwrap();
        fx.db.sync_available(&[pkg("tool", "1.0")]).unwrap();

        let planner = TransactionPlanner::new(&fx.db, &fx.root, &fx.cache);
        assert!(planner.plan_update().unwrap().is_empty());
    }

    #[test]
    fn test_plan_update_pulls_new_dependencies() {
        let mut fx = fixture();
        fx.db.add_installed(&installed("app", "1.0", &[])).unwrap();

        let mut newer = pkg("app", "2.0");
        newer.deps = vec!["newlib".to_string()];
        fx.db
            .sync_available(&[newer, pkg("newlib", "1.0")])
            .unwrap();

        let planner = TransactionPlanner::new(&fx.db, &fx.root, &fx.cache);
        let plan = planner.plan_update().unwrap();

        let names: Vec<&str> = plan
            .to_install
            .iter()
            .map(|i| i.metadata.name.as_str())
            .collect();
        assert!(names.contains(&"app"));
        assert!(names.contains(&"newlib"));
    }

    #[test]
    fn test_plan_update_excludes_outgoing_paths_from_conflict_scan() {
        let mut fx = fixture();
        fx.db
            .add_installed(&installed("tool", "1.0", &["usr/bin/tool"]))
            .unwrap();
        // The old file is physically present on the root, as it would be
        let live = fx.root.join("usr/bin/tool");
        fs::create_dir_all(live.parent().unwrap()).unwrap();
        fs::write(&live, b"v1").unwrap();

        let mut newer = pkg("tool", "2.0");
        newer.files = vec![PathBuf::from("usr/bin/tool")];
        fx.db.sync_available(&[newer]).unwrap();

        let planner = TransactionPlanner::new(&fx.db, &fx.root, &fx.cache);
        // Must not flag the path: its owner is being removed in this plan
        assert!(planner.plan_update().is_ok());
    }

    #[test]
    fn test_plan_update_rejects_non_numeric_versions() {
        let mut fx = fixture();
        fx.db.add_installed(&installed("odd", "1.0", &[])).unwrap();
        fx.db.sync_available(&[pkg("odd", "1.0-rc1")]).unwrap();

        let planner = TransactionPlanner::new(&fx.db, &fx.root, &fx.cache);
        assert!(matches!(
            planner.plan_update(),
            Err(Error::InvalidVersion(_))
        ));
    }
}
