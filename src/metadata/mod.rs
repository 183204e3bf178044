// src/metadata/mod.rs

//! Package descriptors and the YAML metadata codec
//!
//! A package descriptor is a YAML document with required identity fields
//! (`name`, `version`, `arch`, `checksum`) and optional relations, file
//! manifest, and hook script paths. A repository index is a YAML sequence of
//! descriptors; malformed entries in an index are skipped with a warning so
//! one bad record cannot fail a whole repository sync.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Metadata parsing errors
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("invalid package metadata: {0}")]
    InvalidFormat(String),

    #[error("missing required field: '{0}'")]
    MissingRequiredField(&'static str),
}

/// Static metadata for a buildable package artifact
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub arch: String,
    pub description: String,
    pub installed_size: u64,

    pub deps: Vec<String>,
    pub makedepends: Vec<String>,
    pub conflicts: Vec<String>,
    pub replaces: Vec<String>,
    pub provides: Vec<String>,

    /// Relative paths owned by the package
    pub files: Vec<PathBuf>,

    /// Optional hook script paths inside the package (empty = none)
    pub pre_install: String,
    pub post_install: String,
    pub pre_remove: String,
    pub post_remove: String,

    pub repo_name: String,
    /// Hex-encoded SHA-256 digest of the package archive
    pub checksum: String,
}

/// A package recorded in the installed catalog
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstalledPackage {
    pub pkg: Package,
    pub install_date: String,
    /// Files actually extracted onto the live root; may differ from
    /// `pkg.files` if the archive carried additions.
    pub owned_files: Vec<PathBuf>,
}

/// Wire form of a descriptor, before required-field validation
#[derive(Debug, Deserialize)]
struct RawPackage {
    name: Option<String>,
    version: Option<String>,
    arch: Option<String>,
    checksum: Option<String>,

    #[serde(default)]
    description: String,
    #[serde(default)]
    installed_size: u64,

    #[serde(default)]
    deps: Vec<String>,
    #[serde(default)]
    makedepends: Vec<String>,
    #[serde(default)]
    conflicts: Vec<String>,
    #[serde(default)]
    replaces: Vec<String>,
    #[serde(default)]
    provides: Vec<String>,
    #[serde(default)]
    files: Vec<String>,

    #[serde(default)]
    pre_install: String,
    #[serde(default)]
    post_install: String,
    #[serde(default)]
    pre_remove: String,
    #[serde(default)]
    post_remove: String,
}

impl RawPackage {
    fn validate(self) -> Result<Package, ParseError> {
        Ok(Package {
            name: self.name.ok_or(ParseError::MissingRequiredField("name"))?,
            version: self
                .version
                .ok_or(ParseError::MissingRequiredField("version"))?,
            arch: self.arch.ok_or(ParseError::MissingRequiredField("arch"))?,
            checksum: self
                .checksum
                .ok_or(ParseError::MissingRequiredField("checksum"))?,
            description: self.description,
            installed_size: self.installed_size,
            deps: self.deps,
            makedepends: self.makedepends,
            conflicts: self.conflicts,
            replaces: self.replaces,
            provides: self.provides,
            files: self.files.into_iter().map(PathBuf::from).collect(),
            pre_install: self.pre_install,
            post_install: self.post_install,
            pre_remove: self.pre_remove,
            post_remove: self.post_remove,
            repo_name: String::new(),
        })
    }
}

/// Parse a single package descriptor from a string
pub fn parse_package_str(content: &str) -> Result<Package, ParseError> {
    let raw: RawPackage = serde_yaml::from_str(content)
        .map_err(|e| ParseError::InvalidFormat(e.to_string()))?;
    raw.validate()
}

/// Parse a single package descriptor file
pub fn parse_package(path: &Path) -> Result<Package, ParseError> {
    if !path.exists() {
        return Err(ParseError::FileNotFound(path.to_path_buf()));
    }
    let content =
        fs::read_to_string(path).map_err(|e| ParseError::InvalidFormat(e.to_string()))?;
    parse_package_str(&content)
}

/// Parse a repository index: a YAML sequence of package descriptors
///
/// Malformed entries are skipped with a warning; the sync of a whole repo
/// must not fail because of one bad record.
pub fn parse_repository_index(path: &Path) -> Result<Vec<Package>, ParseError> {
    if !path.exists() {
        return Err(ParseError::FileNotFound(path.to_path_buf()));
    }
    let content =
        fs::read_to_string(path).map_err(|e| ParseError::InvalidFormat(e.to_string()))?;

    let root: serde_yaml::Value = serde_yaml::from_str(&content)
        .map_err(|e| ParseError::InvalidFormat(e.to_string()))?;

    let serde_yaml::Value::Sequence(nodes) = root else {
        return Err(ParseError::InvalidFormat(
            "repository index is not a YAML sequence".to_string(),
        ));
    };

    let mut packages = Vec::with_capacity(nodes.len());
    for node in nodes {
        let parsed = serde_yaml::from_value::<RawPackage>(node)
            .map_err(|e| ParseError::InvalidFormat(e.to_string()))
            .and_then(RawPackage::validate);
        match parsed {
            Ok(pkg) => packages.push(pkg),
            Err(e) => warn!("skipping invalid package entry in repository index: {e}"),
        }
    }
    Ok(packages)
}
