// src/db/mod.rs

//! Package catalogs
//!
//! All persistent state lives in a single SQLite database under the target
//! root: the installed catalog (with its relational file-ownership table)
//! and the available catalog synced from repositories. Every multi-row
//! mutation is wrapped in one SQLite transaction; the executor's commit step
//! goes exclusively through [`Database::perform_transactional_update`].

pub mod schema;

use crate::error::Result;
use crate::metadata::{InstalledPackage, Package};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

fn join_list(items: &[String]) -> String {
    items.join("\n")
}

fn split_list(s: &str) -> Vec<String> {
    s.lines()
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

fn split_paths(s: &str) -> Vec<PathBuf> {
    s.lines()
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect()
}

const PACKAGE_COLUMNS: &str = "name, version, arch, description, installed_size, \
     deps, makedepends, conflicts, replaces, provides, files, \
     pre_install, post_install, pre_remove, post_remove, repo_name, checksum";

fn package_from_row(row: &Row) -> rusqlite::Result<Package> {
    Ok(Package {
        name: row.get(0)?,
        version: row.get(1)?,
        arch: row.get(2)?,
        description: row.get(3)?,
        installed_size: row.get::<_, i64>(4)? as u64,
        deps: split_list(&row.get::<_, String>(5)?),
        makedepends: split_list(&row.get::<_, String>(6)?),
        conflicts: split_list(&row.get::<_, String>(7)?),
        replaces: split_list(&row.get::<_, String>(8)?),
        provides: split_list(&row.get::<_, String>(9)?),
        files: split_paths(&row.get::<_, String>(10)?),
        pre_install: row.get(11)?,
        post_install: row.get(12)?,
        pre_remove: row.get(13)?,
        post_remove: row.get(14)?,
        repo_name: row.get(15)?,
        checksum: row.get(16)?,
    })
}

fn insert_installed(conn: &Connection, pkg: &InstalledPackage) -> Result<()> {
    let p = &pkg.pkg;
    conn.execute(
        "INSERT OR REPLACE INTO installed_packages (
            name, version, arch, description, installed_size,
            deps, makedepends, conflicts, replaces, provides, files,
            pre_install, post_install, pre_remove, post_remove,
            repo_name, checksum, install_date
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            p.name,
            p.version,
            p.arch,
            p.description,
            p.installed_size as i64,
            join_list(&p.deps),
            join_list(&p.makedepends),
            join_list(&p.conflicts),
            join_list(&p.replaces),
            join_list(&p.provides),
            join_paths(&p.files),
            p.pre_install,
            p.post_install,
            p.pre_remove,
            p.post_remove,
            p.repo_name,
            p.checksum,
            pkg.install_date,
        ],
    )?;

    conn.execute(
        "DELETE FROM installed_files WHERE pkg_name = ?1",
        [&p.name],
    )?;
    let mut stmt =
        conn.prepare("INSERT INTO installed_files (pkg_name, path) VALUES (?1, ?2)")?;
    for path in &pkg.owned_files {
        stmt.execute(params![p.name, path.to_string_lossy().into_owned()])?;
    }

    Ok(())
}

fn insert_available(conn: &Connection, p: &Package) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO available_packages (
            name, version, arch, description, installed_size,
            deps, makedepends, conflicts, replaces, provides, files,
            pre_install, post_install, pre_remove, post_remove,
            repo_name, checksum
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            p.name,
            p.version,
            p.arch,
            p.description,
            p.installed_size as i64,
            join_list(&p.deps),
            join_list(&p.makedepends),
            join_list(&p.conflicts),
            join_list(&p.replaces),
            join_list(&p.provides),
            join_paths(&p.files),
            p.pre_install,
            p.post_install,
            p.pre_remove,
            p.post_remove,
            p.repo_name,
            p.checksum,
        ],
    )?;
    Ok(())
}

fn owned_files_of(conn: &Connection, name: &str) -> Result<Vec<PathBuf>> {
    let mut stmt = conn
        .prepare("SELECT path FROM installed_files WHERE pkg_name = ?1 ORDER BY rowid")?;
    let paths = stmt
        .query_map([name], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(paths.into_iter().map(PathBuf::from).collect())
}

/// The package catalog database
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at `path` and migrate the schema
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    // --- Installed catalog ---

    pub fn add_installed(&mut self, pkg: &InstalledPackage) -> Result<()> {
        let tx = self.conn.transaction()?;
        insert_installed(&tx, pkg)?;
        tx.commit()?;
        Ok(())
    }

    pub fn remove_installed(&mut self, name: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM installed_packages WHERE name = ?1", [name])?;
        Ok(())
    }

    pub fn get_installed(&self, name: &str) -> Result<Option<InstalledPackage>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {PACKAGE_COLUMNS}, install_date FROM installed_packages WHERE name = ?1"
                ),
                [name],
                |row| {
                    let pkg = package_from_row(row)?;
                    let install_date: String = row.get(17)?;
                    Ok((pkg, install_date))
                },
            )
            .optional()?;

        match row {
            Some((pkg, install_date)) => {
                let owned_files = owned_files_of(&self.conn, name)?;
                Ok(Some(InstalledPackage {
                    pkg,
                    install_date,
                    owned_files,
                }))
            }
            None => Ok(None),
        }
    }

    pub fn is_installed(&self, name: &str) -> Result<bool> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM installed_packages WHERE name = ?1",
                [name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    pub fn list_installed(&self) -> Result<Vec<InstalledPackage>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PACKAGE_COLUMNS}, install_date FROM installed_packages ORDER BY name"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                let pkg = package_from_row(row)?;
                let install_date: String = row.get(17)?;
                Ok((pkg, install_date))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut result = Vec::with_capacity(rows.len());
        for (pkg, install_date) in rows {
            let owned_files = owned_files_of(&self.conn, &pkg.name)?;
            result.push(InstalledPackage {
                pkg,
                install_date,
                owned_files,
            });
        }
        Ok(result)
    }

    /// The full file-ownership map: owned path -> owning package name
    pub fn file_ownership(&self) -> Result<HashMap<PathBuf, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, pkg_name FROM installed_files")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .map(|(path, pkg)| (PathBuf::from(path), pkg))
            .collect())
    }

    // --- Available catalog ---

    /// Atomically replace the available catalog with `packages`
    ///
    /// Delete-all plus insert-all in one transaction; on any error the prior
    /// contents remain.
    pub fn sync_available(&mut self, packages: &[Package]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM available_packages", [])?;
        for pkg in packages {
            insert_available(&tx, pkg)?;
        }
        tx.commit()?;
        info!("synced {} packages into the available catalog", packages.len());
        Ok(())
    }

    pub fn find_available(&self, name: &str) -> Result<Option<Package>> {
        let pkg = self
            .conn
            .query_row(
                &format!("SELECT {PACKAGE_COLUMNS} FROM available_packages WHERE name = ?1"),
                [name],
                package_from_row,
            )
            .optional()?;
        Ok(pkg)
    }

    pub fn list_available(&self) -> Result<Vec<Package>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PACKAGE_COLUMNS} FROM available_packages ORDER BY name"
        ))?;
        let packages = stmt
            .query_map([], package_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(packages)
    }

    // --- Executor commit ---

    /// Apply all removals and all additions in one database transaction
    ///
    /// This is the only mutation the executor's commit step uses: either
    /// every change lands or none does.
    pub fn perform_transactional_update(
        &mut self,
        adds: &[InstalledPackage],
        removes: &[String],
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        for name in removes {
            tx.execute("DELETE FROM installed_packages WHERE name = ?1", [name])?;
        }
        for pkg in adds {
            insert_installed(&tx, pkg)?;
        }
        tx.commit()?;
        Ok(())
    }
}
