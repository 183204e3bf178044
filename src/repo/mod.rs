// src/repo/mod.rs

//! Repository configuration and synchronization
//!
//! Repositories are declared in an INI-shaped config file, one section per
//! repo with one or more mirror `url =` lines:
//!
//! ```text
//! [core]
//! url = https://pkgs.example.org/core
//! url = https://mirror.example.net/core
//!
//! # comments and blank lines are ignored
//! [extra]
//! url = https://pkgs.example.org/extra
//! ```
//!
//! Sync downloads each repo's signed index (`repo.yaml` + `repo.yaml.sig`)
//! with mirror fallback, verifies the signature against the trusted keyring,
//! parses the index, and tags every entry with the repo name. The available
//! catalog is replaced only when every attempted repo succeeded and at least
//! one package was obtained; a single failed repo leaves the catalog
//! untouched and fails the sync.

use crate::crypto::SignatureVerifier;
use crate::db::Database;
use crate::download::{DownloadJob, Downloader};
use crate::error::{Error, Result};
use crate::metadata::{self, Package};
use std::fs;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// One configured repository: a name plus its mirror list in declared order
#[derive(Debug, Clone, PartialEq)]
pub struct RepoEntry {
    pub name: String,
    pub urls: Vec<String>,
}

/// Parse the repository configuration from a string
fn parse_config(content: &str) -> Vec<RepoEntry> {
    let mut repos: Vec<RepoEntry> = Vec::new();

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].to_string();
            if !repos.iter().any(|r| r.name == name) {
                repos.push(RepoEntry {
                    name,
                    urls: Vec::new(),
                });
            }
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "url" {
                if let Some(current) = repos.last_mut() {
                    current.urls.push(value.trim().to_string());
                } else {
                    warn!("ignoring url line before any repository section");
                }
            }
        }
    }

    repos
}

/// Manages repository configuration and index synchronization
pub struct RepositoryManager {
    config_path: PathBuf,
    keyring_dir: PathBuf,
}

impl RepositoryManager {
    pub fn new(config_path: impl Into<PathBuf>, keyring_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            keyring_dir: keyring_dir.into(),
        }
    }

    /// Read the configuration file, in declared order
    ///
    /// A missing config file is an empty repository list, not an error.
    pub fn load_config(&self) -> Result<Vec<RepoEntry>> {
        match fs::read_to_string(&self.config_path) {
            Ok(content) => Ok(parse_config(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "repository config {} not found; no repositories configured",
                    self.config_path.display()
                );
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The mirror list of a named repository, in declared order
    pub fn get_repo_urls(&self, repo_name: &str) -> Result<Option<Vec<String>>> {
        let repos = self.load_config()?;
        Ok(repos
            .into_iter()
            .find(|r| r.name == repo_name && !r.urls.is_empty())
            .map(|r| r.urls))
    }

    /// Synchronize every configured repository into the available catalog
    ///
    /// Commits the union of all indexes only when every attempted repo
    /// succeeded and at least one package was obtained.
    pub fn sync_all(&self, db: &mut Database, skip_signature_check: bool) -> Result<()> {
        let repos = self.load_config()?;
        let downloader = Downloader::new()?;
        let verifier = SignatureVerifier::new(&self.keyring_dir);
        let scratch = tempfile::tempdir()?;

        let mut all_packages: Vec<Package> = Vec::new();
        let mut all_succeeded = true;

        for repo in &repos {
            info!("updating repository '{}'", repo.name);

            if repo.urls.is_empty() {
                warn!("repository '{}' has no mirrors defined, skipping", repo.name);
                continue;
            }

            let index_urls: Vec<String> = repo
                .urls
                .iter()
                .map(|base| format!("{}/repo.yaml", base.trim_end_matches('/')))
                .collect();
            let sig_urls: Vec<String> = repo
                .urls
                .iter()
                .map(|base| format!("{}/repo.yaml.sig", base.trim_end_matches('/')))
                .collect();

            let index_path = scratch.path().join(format!("{}.yaml", repo.name));
            let sig_path = scratch.path().join(format!("{}.yaml.sig", repo.name));

            let mut jobs = vec![DownloadJob::new(
                index_urls,
                index_path.clone(),
                format!("index: {}", repo.name),
            )];
            if !skip_signature_check {
                jobs.push(DownloadJob::new(
                    sig_urls,
                    sig_path.clone(),
                    format!("sig: {}", repo.name),
                ));
            }

            if !downloader.download_all(&mut jobs) {
                error!(
                    "failed to download index/signature for repository '{}'",
                    repo.name
                );
                all_succeeded = false;
                let _ = fs::remove_file(&index_path);
                let _ = fs::remove_file(&sig_path);
                continue;
            }

            if skip_signature_check {
                warn!(
                    "skipping authenticity check for repository '{}' as requested",
                    repo.name
                );
            } else {
                match verifier.verify_detached(&index_path, &sig_path) {
                    Ok(true) => info!("repository '{}' authenticity verified", repo.name),
                    _ => {
                        error!(
                            "repository '{}' failed the authenticity check, skipping",
                            repo.name
                        );
                        all_succeeded = false;
                        let _ = fs::remove_file(&index_path);
                        let _ = fs::remove_file(&sig_path);
                        continue;
                    }
                }
            }

            match metadata::parse_repository_index(&index_path) {
                Ok(mut packages) => {
                    for pkg in &mut packages {
                        pkg.repo_name = repo.name.clone();
                    }
                    all_packages.extend(packages);
                }
                Err(e) => {
                    error!("failed to parse index for repository '{}': {e}", repo.name);
                    all_succeeded = false;
                    continue;
                }
            }

            let _ = fs::remove_file(&index_path);
            let _ = fs::remove_file(&sig_path);
        }

        if all_succeeded && !all_packages.is_empty() {
            db.sync_available(&all_packages)?;
        } else if all_succeeded {
            info!("no packages found in any repository; catalog not updated");
        }

        if all_succeeded {
            Ok(())
        } else {
            Err(Error::DownloadFailed(
                "one or more repositories failed to sync".to_string(),
            ))
        }
    }
}
