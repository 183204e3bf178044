// tests/lifecycle.rs

//! End-to-end transaction scenarios against a temporary target root.
//!
//! These tests build real package archives in-process, install them through
//! the full manager/executor path, and assert on the resulting filesystem
//! and catalog state, including rollback after an induced failure.

use aurora::{Error, PackageManager};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Build a gzip-compressed package archive with the given entries.
///
/// `.AURORA_META` is included automatically from `meta`.
fn build_archive(dir: &Path, file_name: &str, meta: &str, entries: &[(&str, &str)]) -> PathBuf {
    let archive_path = dir.join(file_name);
    let file = File::create(&archive_path).unwrap();
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut append = |path: &str, content: &str| {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .unwrap();
    };

    append(".AURORA_META", meta);
    for (path, content) in entries {
        append(path, content);
    }

    builder.into_inner().unwrap().finish().unwrap();
    archive_path
}

struct Fixture {
    tmp: TempDir,
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        Fixture { tmp, root }
    }

    /// Crypto checks are disabled: these archives are built locally and the
    /// descriptor checksum covers the published repository form.
    fn manager(&self) -> PackageManager {
        PackageManager::new(&self.root, true).unwrap()
    }

    fn archive_dir(&self) -> &Path {
        self.tmp.path()
    }

    fn workspace_is_clean(&self) -> bool {
        let tx_dir = self.root.join("var/cache/aurora/pkg/tx");
        match tx_dir.read_dir() {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }
}

#[test]
fn install_then_remove_roundtrip() {
    let fx = Fixture::new();
    let mut manager = fx.manager();

    let archive = build_archive(
        fx.archive_dir(),
        "hello-1.0.au",
        "name: hello\nversion: '1.0'\narch: x86_64\nchecksum: unused\nfiles:\n  - usr/bin/hello\n",
        &[("usr/bin/hello", "#!/bin/sh\necho hello\n")],
    );

    manager.install_local(&archive, false).unwrap();

    let installed_file = fx.root.join("usr/bin/hello");
    assert!(installed_file.exists());
    let db = manager.database();
    assert!(db.is_installed("hello").unwrap());
    let record = db.get_installed("hello").unwrap().unwrap();
    assert_eq!(record.owned_files, vec![PathBuf::from("usr/bin/hello")]);
    // The embedded descriptor never lands on the live root
    assert!(!fx.root.join(".AURORA_META").exists());

    manager.remove(&["hello".to_string()], false).unwrap();
    assert!(!installed_file.exists());
    assert!(!manager.database().is_installed("hello").unwrap());
    assert!(fx.workspace_is_clean());
}

#[test]
fn install_replaces_old_package() {
    let fx = Fixture::new();
    let mut manager = fx.manager();

    let old = build_archive(
        fx.archive_dir(),
        "old-1.0.au",
        "name: old\nversion: '1.0'\narch: x86_64\nchecksum: unused\nfiles:\n  - etc/c.v1\n",
        &[("etc/c.v1", "old config\n")],
    );
    manager.install_local(&old, false).unwrap();
    assert!(fx.root.join("etc/c.v1").exists());

    let new = build_archive(
        fx.archive_dir(),
        "new-1.0.au",
        "name: new\nversion: '1.0'\narch: x86_64\nchecksum: unused\nreplaces: [old]\nfiles:\n  - etc/c.v2\n",
        &[("etc/c.v2", "new config\n")],
    );
    manager.install_local(&new, false).unwrap();

    // The replaced package is gone, files and record both
    assert!(!fx.root.join("etc/c.v1").exists());
    assert!(fx.root.join("etc/c.v2").exists());
    let db = manager.database();
    assert!(!db.is_installed("old").unwrap());
    assert!(db.is_installed("new").unwrap());
    assert!(fx.workspace_is_clean());
}

#[test]
fn failing_pre_install_rolls_back_everything() {
    let fx = Fixture::new();
    let mut manager = fx.manager();

    // A bystander package that must come through untouched
    let bystander = build_archive(
        fx.archive_dir(),
        "bystander-1.0.au",
        "name: bystander\nversion: '1.0'\narch: x86_64\nchecksum: unused\nfiles:\n  - etc/bystander.conf\n",
        &[("etc/bystander.conf", "keep me\n")],
    );
    manager.install_local(&bystander, false).unwrap();

    let broken = build_archive(
        fx.archive_dir(),
        "broken-1.0.au",
        "name: broken\nversion: '1.0'\narch: x86_64\nchecksum: unused\npre_install: scripts/broken-pre.hook\nfiles:\n  - usr/bin/broken\n",
        &[
            ("usr/bin/broken", "binary\n"),
            ("scripts/broken-pre.hook", "info preparing ${root}\nfail unsupported layout\n"),
        ],
    );

    let result = manager.install_local(&broken, false);
    assert!(matches!(result, Err(Error::ScriptletFailed(_))));

    // None of the broken package's files exist, the bystander is intact,
    // the catalog is unchanged, and the workspace is gone.
    assert!(!fx.root.join("usr/bin/broken").exists());
    assert!(!fx.root.join("scripts/broken-pre.hook").exists());
    assert_eq!(
        fs::read(fx.root.join("etc/bystander.conf")).unwrap(),
        b"keep me\n"
    );
    let db = manager.database();
    assert!(!db.is_installed("broken").unwrap());
    assert!(db.is_installed("bystander").unwrap());
    assert!(fx.workspace_is_clean());
}

#[test]
fn replace_failure_restores_replaced_package() {
    let fx = Fixture::new();
    let mut manager = fx.manager();

    let old = build_archive(
        fx.archive_dir(),
        "old-1.0.au",
        "name: old\nversion: '1.0'\narch: x86_64\nchecksum: unused\nfiles:\n  - etc/service.conf\n",
        &[("etc/service.conf", "v1 settings\n")],
    );
    manager.install_local(&old, false).unwrap();

    // Replaces 'old' but its pre-install hook fails after 'old' was backed up
    let usurper = build_archive(
        fx.archive_dir(),
        "usurper-2.0.au",
        "name: usurper\nversion: '2.0'\narch: x86_64\nchecksum: unused\nreplaces: [old]\npre_install: scripts/usurper-pre.hook\nfiles:\n  - etc/service.conf\n",
        &[
            ("etc/service.conf", "v2 settings\n"),
            ("scripts/usurper-pre.hook", "fail not today\n"),
        ],
    );

    assert!(manager.install_local(&usurper, false).is_err());

    // The backed-up file moved home again, bit for bit
    assert_eq!(
        fs::read(fx.root.join("etc/service.conf")).unwrap(),
        b"v1 settings\n"
    );
    let db = manager.database();
    assert!(db.is_installed("old").unwrap());
    assert!(!db.is_installed("usurper").unwrap());
    assert!(fx.workspace_is_clean());
}

#[test]
fn pre_remove_hook_runs_from_backup() {
    let fx = Fixture::new();
    let mut manager = fx.manager();

    // The hook script is itself an owned file; by the time it runs it has
    // been moved into the transaction backup area.
    let archive = build_archive(
        fx.archive_dir(),
        "hooked-1.0.au",
        "name: hooked\nversion: '1.0'\narch: x86_64\nchecksum: unused\npre_remove: scripts/hooked-prerm.hook\nfiles:\n  - usr/bin/hooked\n  - scripts/hooked-prerm.hook\n",
        &[
            ("usr/bin/hooked", "binary\n"),
            ("scripts/hooked-prerm.hook", "info removing from ${root}\n"),
        ],
    );
    manager.install_local(&archive, false).unwrap();

    manager.remove(&["hooked".to_string()], false).unwrap();
    assert!(!fx.root.join("usr/bin/hooked").exists());
    assert!(!fx.root.join("scripts/hooked-prerm.hook").exists());
    assert!(!manager.database().is_installed("hooked").unwrap());
}

#[test]
fn failing_pre_remove_hook_aborts_removal() {
    let fx = Fixture::new();
    let mut manager = fx.manager();

    let archive = build_archive(
        fx.archive_dir(),
        "clingy-1.0.au",
        "name: clingy\nversion: '1.0'\narch: x86_64\nchecksum: unused\npre_remove: scripts/clingy-prerm.hook\nfiles:\n  - usr/bin/clingy\n  - scripts/clingy-prerm.hook\n",
        &[
            ("usr/bin/clingy", "binary\n"),
            ("scripts/clingy-prerm.hook", "fail still in use\n"),
        ],
    );
    manager.install_local(&archive, false).unwrap();

    let result = manager.remove(&["clingy".to_string()], false);
    assert!(matches!(result, Err(Error::ScriptletFailed(_))));

    // Rollback put every owned file back on the live root
    assert!(fx.root.join("usr/bin/clingy").exists());
    assert!(fx.root.join("scripts/clingy-prerm.hook").exists());
    assert!(manager.database().is_installed("clingy").unwrap());
}

#[test]
fn failing_post_install_hook_is_advisory() {
    let fx = Fixture::new();
    let mut manager = fx.manager();

    let archive = build_archive(
        fx.archive_dir(),
        "loud-1.0.au",
        "name: loud\nversion: '1.0'\narch: x86_64\nchecksum: unused\npost_install: scripts/loud-post.hook\nfiles:\n  - usr/bin/loud\n  - scripts/loud-post.hook\n",
        &[
            ("usr/bin/loud", "binary\n"),
            ("scripts/loud-post.hook", "fail cosmetic problem\n"),
        ],
    );

    // Post-hook failure after the database commit must not fail the install
    manager.install_local(&archive, false).unwrap();
    assert!(manager.database().is_installed("loud").unwrap());
    assert!(fx.root.join("usr/bin/loud").exists());
}

#[test]
fn already_installed_local_package_refused() {
    let fx = Fixture::new();
    let mut manager = fx.manager();

    let archive = build_archive(
        fx.archive_dir(),
        "once-1.0.au",
        "name: once\nversion: '1.0'\narch: x86_64\nchecksum: unused\nfiles:\n  - usr/bin/once\n",
        &[("usr/bin/once", "binary\n")],
    );

    manager.install_local(&archive, false).unwrap();
    let result = manager.install_local(&archive, false);
    assert!(matches!(result, Err(Error::PackageAlreadyInstalled(_))));
}

#[test]
fn local_package_with_missing_dependency_refused() {
    let fx = Fixture::new();
    let mut manager = fx.manager();

    let archive = build_archive(
        fx.archive_dir(),
        "needy-1.0.au",
        "name: needy\nversion: '1.0'\narch: x86_64\nchecksum: unused\ndeps: [nonexistent]\nfiles:\n  - usr/bin/needy\n",
        &[("usr/bin/needy", "binary\n")],
    );

    let result = manager.install_local(&archive, false);
    assert!(matches!(result, Err(Error::ResolutionFailed(_))));

    // --force downgrades the refusal
    manager.install_local(&archive, true).unwrap();
    assert!(manager.database().is_installed("needy").unwrap());
}
