// src/db/schema.rs

//! SQLite schema and migrations
//!
//! Two catalogs keyed by package name: `installed_packages` (plus the
//! relational `installed_files` ownership table) and `available_packages`.
//! File ownership is one row per `(pkg_name, path)` with a unique index on
//! `path`, so the invariant that no two installed packages claim the same
//! file is enforced by the schema itself.

use crate::error::Result;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version >= SCHEMA_VERSION {
        debug!("schema is up to date (version {current_version})");
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("applying schema migration to version {version}");
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => unreachable!("unknown migration version: {version}"),
    }
}

/// Initial schema - Version 1
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("creating schema version 1");

    conn.execute_batch(
        "
        -- Installed catalog, keyed by package name
        CREATE TABLE installed_packages (
            name TEXT PRIMARY KEY,
            version TEXT NOT NULL,
            arch TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            installed_size INTEGER NOT NULL DEFAULT 0,
            deps TEXT NOT NULL DEFAULT '',
            makedepends TEXT NOT NULL DEFAULT '',
            conflicts TEXT NOT NULL DEFAULT '',
            replaces TEXT NOT NULL DEFAULT '',
            provides TEXT NOT NULL DEFAULT '',
            files TEXT NOT NULL DEFAULT '',
            pre_install TEXT NOT NULL DEFAULT '',
            post_install TEXT NOT NULL DEFAULT '',
            pre_remove TEXT NOT NULL DEFAULT '',
            post_remove TEXT NOT NULL DEFAULT '',
            repo_name TEXT NOT NULL DEFAULT '',
            checksum TEXT NOT NULL DEFAULT '',
            install_date TEXT NOT NULL
        );

        -- File ownership, one row per owned path
        CREATE TABLE installed_files (
            pkg_name TEXT NOT NULL REFERENCES installed_packages(name) ON DELETE CASCADE,
            path TEXT NOT NULL,
            PRIMARY KEY (pkg_name, path)
        );

        CREATE UNIQUE INDEX idx_installed_files_path ON installed_files(path);
        CREATE INDEX idx_installed_files_pkg ON installed_files(pkg_name);

        -- Available catalog: the union of all synced repository indexes
        CREATE TABLE available_packages (
            name TEXT PRIMARY KEY,
            version TEXT NOT NULL,
            arch TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            installed_size INTEGER NOT NULL DEFAULT 0,
            deps TEXT NOT NULL DEFAULT '',
            makedepends TEXT NOT NULL DEFAULT '',
            conflicts TEXT NOT NULL DEFAULT '',
            replaces TEXT NOT NULL DEFAULT '',
            provides TEXT NOT NULL DEFAULT '',
            files TEXT NOT NULL DEFAULT '',
            pre_install TEXT NOT NULL DEFAULT '',
            post_install TEXT NOT NULL DEFAULT '',
            pre_remove TEXT NOT NULL DEFAULT '',
            post_remove TEXT NOT NULL DEFAULT '',
            repo_name TEXT NOT NULL DEFAULT '',
            checksum TEXT NOT NULL DEFAULT ''
        );
        ",
    )?;

    Ok(())
}
