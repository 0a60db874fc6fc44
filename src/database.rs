use crate::catalog::{ApiManifest, Catalog, Link, ModDescriptor};
use crate::state::ModState;
use crate::store::InstalledMods;
use crate::version::Version;
use std::collections::BTreeMap;

/// A manifest entry joined with its derived install state. Owned by the
/// database for the session; only the installer mutates `state` after
/// construction.
#[derive(Debug, Clone)]
pub struct ModItem {
    pub name: String,
    pub version: Version,
    pub description: String,
    pub repository: String,
    pub dependencies: Vec<String>,
    pub tags: Vec<String>,
    pub link: Link,
    pub state: ModState,
}

impl ModItem {
    pub fn new(descriptor: &ModDescriptor, state: ModState) -> Self {
        Self {
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            description: descriptor.description.clone(),
            repository: descriptor.repository.clone(),
            dependencies: descriptor.dependencies.clone(),
            tags: descriptor.tags.clone(),
            link: descriptor.links.current().clone(),
            state,
        }
    }

    pub fn installed(&self) -> bool {
        self.state.is_installed()
    }

    pub fn enabled(&self) -> bool {
        self.state.is_enabled()
    }

    pub fn update_available(&self) -> bool {
        match self.state.as_installed() {
            Some(installed) => installed.version < self.version,
            None => false,
        }
    }
}

impl PartialEq for ModItem {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state
            && self.version == other.version
            && self.dependencies == other.dependencies
            && self.link == other.link
            && self.name == other.name
            && self.description == other.description
    }
}

impl Eq for ModItem {}

/// In-memory session snapshot: every catalog entry with state attached, plus
/// the API manifest. Iteration order is name-sorted.
#[derive(Debug, Clone)]
pub struct ModDatabase {
    items: BTreeMap<String, ModItem>,
    api: ApiManifest,
}

impl ModDatabase {
    pub fn new(catalog: &Catalog, api: ApiManifest, store: &InstalledMods) -> Self {
        let items = catalog
            .iter()
            .map(|descriptor| {
                let state = store.from_manifest(descriptor);
                (descriptor.name.clone(), ModItem::new(descriptor, state))
            })
            .collect();

        Self { items, api }
    }

    pub fn api(&self) -> &ApiManifest {
        &self.api
    }

    pub fn get(&self, name: &str) -> Option<&ModItem> {
        self.items.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ModItem> {
        self.items.get_mut(name)
    }

    pub fn items(&self) -> impl Iterator<Item = &ModItem> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
