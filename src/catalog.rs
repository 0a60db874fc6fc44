use crate::version::Version;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;

/// Per-platform download location and content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Links {
    pub windows: Link,
    pub mac: Link,
    pub linux: Link,
}

impl Links {
    /// The link for the platform this binary was built for.
    pub fn current(&self) -> &Link {
        #[cfg(target_os = "windows")]
        {
            &self.windows
        }
        #[cfg(target_os = "macos")]
        {
            &self.mac
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            &self.linux
        }
    }
}

/// One mod as described by the manifest. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModDescriptor {
    pub name: String,
    pub version: Version,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub links: Links,
}

/// The modding API: a host assembly patch shipped outside the mod list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiManifest {
    pub version: u64,
    #[serde(default)]
    pub files: Vec<String>,
    pub links: Links,
}

/// Manifest document as served: the API manifest plus the mod list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestDoc {
    pub api: ApiManifest,
    pub mods: Vec<ModDescriptor>,
}

impl ManifestDoc {
    /// Fetches the manifest, trying the fallback URL when the primary is
    /// unreachable.
    pub fn fetch(primary: &str, fallback: &str) -> Result<Self> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(3))
            .timeout_read(Duration::from_secs(10))
            .timeout_write(Duration::from_secs(10))
            .build();

        let response = match agent.get(primary).set("User-Agent", "hollowsmith").call() {
            Ok(response) => response,
            Err(_) => agent
                .get(fallback)
                .set("User-Agent", "hollowsmith")
                .call()
                .context("fetch manifest")?,
        };

        let doc: ManifestDoc = response.into_json().context("decode manifest")?;
        Ok(doc)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("duplicate mod name in manifest: {0}")]
    DuplicateName(String),

    #[error("{name} depends on {dependency}, which is not in the manifest")]
    UnresolvedDependency { name: String, dependency: String },

    #[error("dependency cycle involving {0}")]
    DependencyCycle(String),
}

/// Validated, name-sorted snapshot of the manifest's mod list. Guarantees
/// unique names, resolvable dependencies and an acyclic dependency graph.
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<ModDescriptor>,
}

impl Catalog {
    pub fn new(mut entries: Vec<ModDescriptor>) -> Result<Self, CatalogError> {
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut names = HashSet::new();
        for entry in &entries {
            if !names.insert(entry.name.as_str()) {
                return Err(CatalogError::DuplicateName(entry.name.clone()));
            }
        }

        let by_name: HashMap<&str, &ModDescriptor> = entries
            .iter()
            .map(|entry| (entry.name.as_str(), entry))
            .collect();

        for entry in &entries {
            for dependency in &entry.dependencies {
                if !by_name.contains_key(dependency.as_str()) {
                    return Err(CatalogError::UnresolvedDependency {
                        name: entry.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        // Depth-first walk with an explicit in-progress set so a cycle is a
        // load-time error instead of unbounded recursion later on.
        let mut done: HashSet<&str> = HashSet::new();
        for entry in &entries {
            let mut in_progress = HashSet::new();
            check_acyclic(&by_name, entry, &mut in_progress, &mut done)?;
        }

        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&ModDescriptor> {
        self.entries
            .binary_search_by(|entry| entry.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModDescriptor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn check_acyclic<'a>(
    by_name: &HashMap<&'a str, &'a ModDescriptor>,
    entry: &'a ModDescriptor,
    in_progress: &mut HashSet<&'a str>,
    done: &mut HashSet<&'a str>,
) -> Result<(), CatalogError> {
    if done.contains(entry.name.as_str()) {
        return Ok(());
    }
    if !in_progress.insert(entry.name.as_str()) {
        return Err(CatalogError::DependencyCycle(entry.name.clone()));
    }

    for dependency in &entry.dependencies {
        // Resolution was validated above.
        let dep = by_name[dependency.as_str()];
        check_acyclic(by_name, dep, in_progress, done)?;
    }

    in_progress.remove(entry.name.as_str());
    done.insert(entry.name.as_str());
    Ok(())
}
