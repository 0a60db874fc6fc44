use crate::catalog::{Catalog, ModDescriptor};
use crate::database::ModItem;
use crate::error::Error;
use crate::installer::{CURRENT_ASSEMBLY, MODDED_ASSEMBLY};
use crate::settings::Settings;
use crate::state::{InstalledState, ModState};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, io, path::PathBuf};
use tracing::warn;

/// Persisted record of which mods (and whether the modding API) are
/// installed. The single source of truth for user-approved install state,
/// reconciled against the catalog and the actual mod folders at load time.
///
/// This type is the only writer of its backing file. Persistence is a
/// whole-file overwrite; an interrupted write corrupts the file, which is why
/// `load` falls back to a recovery scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstalledMods {
    #[serde(default)]
    mods: BTreeMap<String, InstalledState>,
    #[serde(default)]
    api_state: Option<InstalledState>,
    #[serde(skip)]
    path: PathBuf,
}

impl InstalledMods {
    pub fn new(path: PathBuf) -> Self {
        Self {
            mods: BTreeMap::new(),
            api_state: None,
            path,
        }
    }

    /// Loads the persisted record and repairs it against on-disk truth:
    /// records whose directory vanished are pruned, records whose enabled
    /// flag contradicts the directory's location are fixed, and a persisted
    /// API install is reset when the host assembly is gone. On a malformed or
    /// missing file, every catalog name is checked against the mod folders
    /// and found directories are recorded with a placeholder version.
    ///
    /// Every repair is logged; this is the only place inconsistent data is
    /// silently corrected.
    pub fn load(path: PathBuf, settings: &Settings, catalog: &Catalog) -> Self {
        let mut changed = false;

        let mut db = match Self::read(&path) {
            Ok(db) => db,
            Err(err) => {
                if path.exists() {
                    warn!("installed-mods record unreadable, rescanning disk: {err}");
                }
                changed = true;
                Self::recover(settings, catalog)
            }
        };
        db.path = path;

        let names: Vec<String> = db.mods.keys().cloned().collect();
        for name in names {
            match mod_on_disk(settings, &name) {
                Some(enabled) => {
                    let record = db.mods.get_mut(&name).unwrap();
                    if record.enabled != enabled {
                        warn!("fixing incorrect enabled state of {name}, changing to {enabled}");
                        record.enabled = enabled;
                        changed = true;
                    }
                }
                None => {
                    warn!("removing missing mod {name}");
                    db.mods.remove(&name);
                    changed = true;
                }
            }
        }

        // The user deleted (or restored) the assembly by hand; believe the disk.
        if db.api_state.is_some()
            && !settings.managed_folder.join(MODDED_ASSEMBLY).exists()
            && !settings.managed_folder.join(CURRENT_ASSEMBLY).exists()
        {
            warn!("host assembly missing, marking API as not installed");
            db.api_state = None;
            changed = true;
        }

        if changed {
            if let Err(err) = db.save() {
                warn!("could not write repaired installed-mods record: {err}");
            }
        }

        db
    }

    fn read(path: &PathBuf) -> Result<Self, Error> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn recover(settings: &Settings, catalog: &Catalog) -> Self {
        let mut db = Self::default();
        for descriptor in catalog.iter() {
            if let Some(enabled) = mod_on_disk(settings, &descriptor.name) {
                // The version is unknown, so pretend it's out of date and let
                // the user reinstall to be sure.
                db.mods.insert(
                    descriptor.name.clone(),
                    InstalledState {
                        enabled,
                        version: Version::zero(),
                        updated: false,
                    },
                );
            }
        }
        db
    }

    /// Derives a mod's state from its persisted record, recomputing the
    /// `updated` flag against the manifest version.
    pub fn from_manifest(&self, descriptor: &ModDescriptor) -> ModState {
        match self.mods.get(&descriptor.name) {
            Some(record) => ModState::Installed(InstalledState {
                enabled: record.enabled,
                version: record.version.clone(),
                updated: record.version >= descriptor.version,
            }),
            None => ModState::not_installed(),
        }
    }

    pub fn api_install(&self) -> ModState {
        match &self.api_state {
            Some(state) => ModState::Installed(state.clone()),
            None => ModState::not_installed(),
        }
    }

    pub fn record_installed_state(&mut self, item: &ModItem) -> Result<(), Error> {
        let state = item
            .state
            .as_installed()
            .ok_or_else(|| Error::NotInstalled(item.name.clone()))?;

        self.mods.insert(item.name.clone(), state.clone());
        self.save()
    }

    pub fn record_uninstall(&mut self, item: &ModItem) -> Result<(), Error> {
        if item.state.is_installed() {
            return Err(Error::StillInstalled(item.name.clone()));
        }

        self.mods.remove(&item.name);
        self.save()
    }

    pub fn record_api_state(&mut self, state: ModState) -> Result<(), Error> {
        self.api_state = state.as_installed().cloned();
        self.save()
    }

    /// Wipes all records and deletes the backing file, so the next load
    /// falls back to the recovery scan. Last-resort "forget everything and
    /// rescan" action.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.mods.clear();
        self.api_state = None;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.mods.contains_key(name)
    }

    fn save(&self) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}

/// Whether a mod's directory is present, and if so whether it sits in the
/// enabled folder (`Some(true)`) or the disabled folder (`Some(false)`).
fn mod_on_disk(settings: &Settings, name: &str) -> Option<bool> {
    if settings.mods_folder().join(name).is_dir() {
        return Some(true);
    }
    if settings.disabled_folder().join(name).is_dir() {
        return Some(false);
    }
    None
}
