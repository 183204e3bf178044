// src/resolver/mod.rs

//! Dependency resolution
//!
//! Given a set of requested package names, produce the topologically sorted
//! list of available packages that must be installed, dependency-first. The
//! sort is a depth-first post-order with tri-colored marks (unseen,
//! on-stack, done); cycles and ambiguous virtual providers are hard errors.
//!
//! Provider selection per dependency:
//! 1. Satisfied by an installed package (exact name or `provides`): nothing
//!    to do.
//! 2. Satisfied by a package already in the partial result: nothing to do.
//! 3. Otherwise the available catalog is consulted through a prebuilt index:
//!    an exact-name match wins; failing that, exactly one virtual provider
//!    is required.

use crate::db::Database;
use crate::metadata::Package;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Resolution failures
#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("package not found: '{0}'")]
    PackageNotFound(String),

    #[error("could not satisfy dependency '{0}': no package found")]
    DependencyNotFound(String),

    #[error("circular dependency detected involving package '{0}'")]
    CircularDependency(String),

    #[error("package conflict involving '{0}'")]
    ConflictDetected(String),

    #[error("dependency '{name}' is provided by multiple packages: {}", .providers.join(", "))]
    AmbiguousProvider {
        name: String,
        providers: Vec<String>,
    },

    #[error("database error during resolution: {0}")]
    Database(String),
}

/// Index over the available catalog: exact names and virtual provisions
struct ProviderIndex {
    packages: Vec<Package>,
    by_name: HashMap<String, usize>,
    by_provides: HashMap<String, Vec<usize>>,
}

impl ProviderIndex {
    fn build(packages: Vec<Package>) -> Self {
        let mut by_name = HashMap::with_capacity(packages.len());
        let mut by_provides: HashMap<String, Vec<usize>> = HashMap::new();

        for (idx, pkg) in packages.iter().enumerate() {
            by_name.insert(pkg.name.clone(), idx);
            for provision in &pkg.provides {
                by_provides.entry(provision.clone()).or_default().push(idx);
            }
        }

        Self {
            packages,
            by_name,
            by_provides,
        }
    }
}

/// DFS coloring state plus the growing result list
struct Dfs<'i> {
    index: &'i ProviderIndex,
    installed_satisfied: HashSet<String>,
    result_satisfied: HashSet<String>,
    visiting: HashSet<String>,
    visited: HashSet<String>,
    sorted: Vec<Package>,
}

impl Dfs<'_> {
    fn visit(&mut self, dep_name: &str, is_requested: bool) -> Result<(), ResolveError> {
        // Already satisfied: by the partial result or by an installed package
        if self.result_satisfied.contains(dep_name)
            || self.installed_satisfied.contains(dep_name)
        {
            return Ok(());
        }

        // Pick a provider: exact name beats virtual provisions
        let provider_idx = match self.index.by_name.get(dep_name) {
            Some(&idx) => idx,
            None => {
                let candidates = self
                    .index
                    .by_provides
                    .get(dep_name)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                match candidates {
                    [single] => *single,
                    [] => {
                        return Err(if is_requested {
                            ResolveError::PackageNotFound(dep_name.to_string())
                        } else {
                            ResolveError::DependencyNotFound(dep_name.to_string())
                        });
                    }
                    many => {
                        return Err(ResolveError::AmbiguousProvider {
                            name: dep_name.to_string(),
                            providers: many
                                .iter()
                                .map(|&i| self.index.packages[i].name.clone())
                                .collect(),
                        });
                    }
                }
            }
        };

        let provider_name = self.index.packages[provider_idx].name.clone();

        if self.visited.contains(&provider_name) {
            return Ok(());
        }
        if self.visiting.contains(&provider_name) {
            return Err(ResolveError::CircularDependency(provider_name));
        }

        self.visiting.insert(provider_name.clone());
        let deps = self.index.packages[provider_idx].deps.clone();
        for dep in &deps {
            self.visit(dep, false)?;
        }
        self.visiting.remove(&provider_name);
        self.visited.insert(provider_name.clone());

        let provider = self.index.packages[provider_idx].clone();
        self.result_satisfied.insert(provider.name.clone());
        for provision in &provider.provides {
            self.result_satisfied.insert(provision.clone());
        }
        self.sorted.push(provider);

        Ok(())
    }
}

/// Resolves requested names against the installed and available catalogs
pub struct Resolver<'a> {
    db: &'a Database,
}

impl<'a> Resolver<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Resolve `names` into a dependency-first install list
    ///
    /// Inputs are visited in the given order; a package's dependencies are
    /// visited in declaration order, so ties at the same depth resolve
    /// deterministically.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Package>, ResolveError> {
        let available = self
            .db
            .list_available()
            .map_err(|e| ResolveError::Database(e.to_string()))?;
        let index = ProviderIndex::build(available);

        let mut installed_satisfied = HashSet::new();
        let installed = self
            .db
            .list_installed()
            .map_err(|e| ResolveError::Database(e.to_string()))?;
        for ipkg in &installed {
            installed_satisfied.insert(ipkg.pkg.name.clone());
            for provision in &ipkg.pkg.provides {
                installed_satisfied.insert(provision.clone());
            }
        }

        let mut dfs = Dfs {
            index: &index,
            installed_satisfied,
            result_satisfied: HashSet::new(),
            visiting: HashSet::new(),
            visited: HashSet::new(),
            sorted: Vec::new(),
        };

        for name in names {
            dfs.visit(name, true)?;
        }

        Ok(dfs.sorted)
    }
}
