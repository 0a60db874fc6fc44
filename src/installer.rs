use crate::database::{ModDatabase, ModItem};
use crate::download::{filename_from_url, CancelToken, DownloadProgress, Fetch, FetchError, ModProgress};
use crate::error::Error;
use crate::settings::Settings;
use crate::state::{InstalledState, ModState};
use crate::store::InstalledMods;
use crate::version::Version;
use sha2::{Digest, Sha256};
use std::{
    fs,
    io::{self, Cursor},
    path::Path,
    sync::{Mutex, MutexGuard},
};
use tracing::{debug, info};

/// The game assembly the modding API patches, plus the file names used to
/// park the modded and vanilla copies while the other is active.
pub const CURRENT_ASSEMBLY: &str = "Assembly-CSharp.dll";
pub const MODDED_ASSEMBLY: &str = "Assembly-CSharp.dll.m";
pub const VANILLA_ASSEMBLY: &str = "Assembly-CSharp.dll.v";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReinstallPolicy {
    SkipUpToDate,
    ForceReinstall,
}

/// Whether re-enabling an outdated API should pull the newer build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApiUpdate {
    ForceUpdate,
    LeaveUnchanged,
}

struct EngineState {
    db: ModDatabase,
    store: InstalledMods,
}

/// The only component allowed to touch the physical mod folders and drive
/// `ModState` transitions.
///
/// All public operations run under one lock, so installs, uninstalls and
/// toggles across all mods are strictly serialized: two operations never
/// interleave their filesystem mutations, and the store has at most one
/// writer. The recursive dependency workers are private and run inside the
/// already-held critical section, so nested calls never re-acquire the lock.
pub struct Installer {
    settings: Settings,
    fetcher: Box<dyn Fetch>,
    state: Mutex<EngineState>,
}

impl Installer {
    pub fn new(
        settings: Settings,
        db: ModDatabase,
        store: InstalledMods,
        fetcher: Box<dyn Fetch>,
    ) -> Self {
        Self {
            settings,
            fetcher,
            state: Mutex::new(EngineState { db, store }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Snapshot of every mod with its current state, name-sorted.
    pub fn mods(&self) -> Vec<ModItem> {
        self.lock().db.items().cloned().collect()
    }

    pub fn mod_state(&self, name: &str) -> Option<ModState> {
        self.lock().db.get(name).map(|item| item.state.clone())
    }

    pub fn api_state(&self) -> ModState {
        self.lock().store.api_install()
    }

    /// Cloned view of the whole database, for reverse-dependency queries and
    /// other read-only presentation work.
    pub fn database_snapshot(&self) -> ModDatabase {
        self.lock().db.clone()
    }

    /// Installs (or updates) a mod and everything it depends on, the API
    /// included. Progress events carry per-chunk download numbers while the
    /// archive is in flight and a final completion marker afterwards.
    ///
    /// On any failure the mod's in-memory state is restored to its value at
    /// entry, so callers always see true on-disk status.
    pub fn install(
        &self,
        name: &str,
        on_progress: &mut dyn FnMut(ModProgress),
        enable: bool,
        cancel: &CancelToken,
    ) -> Result<(), Error> {
        let mut state = self.lock();
        let state = &mut *state;

        let original = match state.db.get_mut(name) {
            Some(item) => {
                let original = item.state.clone();
                if !item.state.is_installed() {
                    item.state = ModState::NotInstalled { installing: true };
                }
                original
            }
            None => return Err(Error::UnknownMod(name.to_string())),
        };

        let result = (|| {
            self.install_api_worker(state, ReinstallPolicy::SkipUpToDate, cancel)?;

            self.create_needed_directories()?;

            on_progress(ModProgress::default());

            self.install_worker(
                state,
                name,
                &mut |download| {
                    on_progress(ModProgress {
                        download: Some(download),
                        completed: false,
                    })
                },
                enable,
                cancel,
            )?;

            on_progress(ModProgress::completed());
            Ok(())
        })();

        if result.is_err() {
            if let Some(item) = state.db.get_mut(name) {
                item.state = original;
            }
        }

        result
    }

    /// Re-downloads an outdated mod, keeping its enabled flag.
    pub fn update(
        &self,
        name: &str,
        on_progress: &mut dyn FnMut(ModProgress),
        cancel: &CancelToken,
    ) -> Result<(), Error> {
        let enabled = match self.mod_state(name) {
            Some(ModState::Installed(InstalledState { updated: false, enabled, .. })) => enabled,
            Some(_) => return Err(Error::UpToDate(name.to_string())),
            None => return Err(Error::UnknownMod(name.to_string())),
        };

        self.install(name, on_progress, enabled, cancel)
    }

    /// Removes a mod's directory and record. When the auto-remove policy is
    /// on, dependencies left without any installed dependent are removed too.
    pub fn uninstall(&self, name: &str) -> Result<(), Error> {
        let mut state = self.lock();
        let state = &mut *state;

        let original = match state.db.get(name) {
            Some(item) => item.state.clone(),
            None => return Err(Error::UnknownMod(name.to_string())),
        };

        // Shouldn't ever be missing, but rather safe than sorry.
        self.create_needed_directories()?;

        let result = self.uninstall_worker(state, name);

        if result.is_err() {
            if let Some(item) = state.db.get_mut(name) {
                item.state = original;
            }
        }

        result
    }

    /// Moves a mod between the enabled and disabled folders and flips its
    /// recorded flag. Enabling a mod first enables any installed-but-disabled
    /// dependencies.
    pub fn toggle(&self, name: &str) -> Result<(), Error> {
        let mut state = self.lock();
        self.toggle_worker(&mut state, name)
    }

    pub fn install_api(&self, policy: ReinstallPolicy, cancel: &CancelToken) -> Result<(), Error> {
        let mut state = self.lock();
        let state = &mut *state;

        if let ModState::Installed(InstalledState { enabled: false, .. }) = state.store.api_install()
        {
            // Re-enable by hand rather than through the toggle, as the
            // toggle's own update path would recurse back into the install.
            self.toggle_api_worker(state, ApiUpdate::LeaveUnchanged, cancel)?;
        }

        self.install_api_worker(state, policy, cancel)
    }

    /// Swaps the modded and vanilla assemblies to flip the API on or off.
    pub fn toggle_api(&self, cancel: &CancelToken) -> Result<(), Error> {
        let mut state = self.lock();
        self.toggle_api_worker(&mut state, ApiUpdate::ForceUpdate, cancel)
    }

    /// Clears every record. The next load falls back to the recovery scan,
    /// re-deriving state from whatever is on disk.
    pub fn reset_records(&self) -> Result<(), Error> {
        let mut state = self.lock();
        state.store.reset()
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        // A poisoned lock means a previous operation panicked mid-flight;
        // state was rolled back before any unwinding error path, so continue.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn create_needed_directories(&self) -> Result<(), Error> {
        // Both no-op when the directory already exists.
        fs::create_dir_all(self.settings.mods_folder())?;
        fs::create_dir_all(self.settings.disabled_folder())?;
        Ok(())
    }

    fn toggle_worker(&self, state: &mut EngineState, name: &str) -> Result<(), Error> {
        let item = state
            .db
            .get(name)
            .ok_or_else(|| Error::UnknownMod(name.to_string()))?;
        let Some(installed) = item.state.as_installed() else {
            return Err(Error::NotInstalled(name.to_string()));
        };
        let was_enabled = installed.enabled;
        let dependencies = item.dependencies.clone();

        if !was_enabled {
            for dependency in dependencies {
                let Some(dep) = state.db.get(&dependency) else {
                    continue;
                };
                if dep.enabled() || !dep.installed() {
                    continue;
                }
                self.toggle_worker(state, &dependency)?;
            }
        }

        self.create_needed_directories()?;

        let (prev, after) = if was_enabled {
            (self.settings.mods_folder(), self.settings.disabled_folder())
        } else {
            (self.settings.disabled_folder(), self.settings.mods_folder())
        };
        let (prev, after) = (prev.join(name), after.join(name));

        // If it's already on the other side due to user tampering or an
        // earlier error, let it fix itself.
        if prev.is_dir() && !after.is_dir() {
            fs::rename(&prev, &after)?;
        }

        let item = state.db.get_mut(name).unwrap();
        if let ModState::Installed(installed) = &mut item.state {
            installed.enabled = !was_enabled;
        }
        info!(
            "{} {name}",
            if was_enabled { "disabled" } else { "enabled" }
        );

        let item = state.db.get(name).unwrap().clone();
        state.store.record_installed_state(&item)
    }

    fn install_worker(
        &self,
        state: &mut EngineState,
        name: &str,
        on_progress: &mut dyn FnMut(DownloadProgress),
        enable: bool,
        cancel: &CancelToken,
    ) -> Result<(), Error> {
        let item = state
            .db
            .get(name)
            .ok_or_else(|| Error::UnknownMod(name.to_string()))?;
        let dependencies = item.dependencies.clone();
        let link = item.link.clone();
        let version = item.version.clone();

        for dependency in dependencies {
            let dep = state
                .db
                .get(&dependency)
                .ok_or_else(|| Error::UnknownMod(dependency.clone()))?;

            if dep.state.is_updated() {
                // Up to date already; a disabled dependency still can't
                // satisfy anything, so switch it on.
                if !dep.enabled() {
                    self.toggle_worker(state, &dependency)?;
                }
                continue;
            }

            // Dependencies being pulled in fresh always end up enabled;
            // progress reporting is suppressed for them.
            let dep_enable = enable || !dep.installed();
            self.install_worker(state, &dependency, &mut |_| {}, dep_enable, cancel)?;
        }

        info!("downloading {name} from {}", link.url);
        let download = self
            .fetcher
            .fetch(&link.url, on_progress, cancel)
            .map_err(|err| match err {
                FetchError::Cancelled => Error::Cancelled,
                other => Error::Download {
                    name: name.to_string(),
                    source: other,
                },
            })?;

        verify_sha256(name, &download.bytes, &link.sha256)?;

        // Sometimes the suggested filename is quoted; strip that.
        let filename = download
            .filename
            .unwrap_or_else(|| filename_from_url(&link.url))
            .trim_matches('"')
            .to_string();

        let (base_folder, other_folder) = if enable {
            (self.settings.mods_folder(), self.settings.disabled_folder())
        } else {
            (self.settings.disabled_folder(), self.settings.mods_folder())
        };
        let mod_folder = base_folder.join(name);

        // A re-install may flip the enabled flag; the superseded copy in the
        // other folder has to go, or the mod would occupy both.
        match fs::remove_dir_all(other_folder.join(name)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        match extension(&filename).as_deref() {
            Some("zip") => extract_zip(&download.bytes, &mod_folder)?,
            Some("dll") => {
                fs::create_dir_all(&mod_folder)?;
                fs::write(mod_folder.join(&filename), &download.bytes)?;
            }
            _ => return Err(Error::UnsupportedFormat { filename }),
        }

        let item = state.db.get_mut(name).unwrap();
        item.state = ModState::installed(enable, version, true);
        info!("installed {name}");

        let item = item.clone();
        state.store.record_installed_state(&item)
    }

    fn uninstall_worker(&self, state: &mut EngineState, name: &str) -> Result<(), Error> {
        let item = state
            .db
            .get(name)
            .ok_or_else(|| Error::UnknownMod(name.to_string()))?;
        if !item.installed() {
            return Err(Error::NotInstalled(name.to_string()));
        }
        let dependencies = item.dependencies.clone();

        let base_folder = if item.enabled() {
            self.settings.mods_folder()
        } else {
            self.settings.disabled_folder()
        };
        let dir = base_folder.join(name);

        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            // Already gone; it's uninstalled either way.
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let item = state.db.get_mut(name).unwrap();
        item.state = ModState::not_installed();
        info!("uninstalled {name}");

        let item = item.clone();
        state.store.record_uninstall(&item)?;

        if !self.settings.auto_remove_deps {
            return Ok(());
        }

        for dependency in dependencies {
            let still_needed = state.db.items().any(|other| {
                other.installed()
                    && other.name != name
                    && other.dependencies.iter().any(|dep| *dep == dependency)
            });
            if still_needed {
                continue;
            }

            let installed = state
                .db
                .get(&dependency)
                .map(|dep| dep.installed())
                .unwrap_or(false);
            if installed {
                debug!("removing orphaned dependency {dependency}");
                self.uninstall_worker(state, &dependency)?;
            }
        }

        Ok(())
    }

    fn install_api_worker(
        &self,
        state: &mut EngineState,
        policy: ReinstallPolicy,
        cancel: &CancelToken,
    ) -> Result<(), Error> {
        let api = state.db.api().clone();

        let mut was_vanilla = true;
        if let ModState::Installed(installed) = state.store.api_install() {
            if policy != ReinstallPolicy::ForceReinstall {
                if installed.version.major() >= api.version {
                    return Ok(());
                }
                was_vanilla = false;
            }
        }

        let managed = &self.settings.managed_folder;
        let link = api.links.current();

        info!("installing modding API {}", api.version);
        let download = self
            .fetcher
            .fetch(&link.url, &mut |_| {}, cancel)
            .map_err(|err| match err {
                FetchError::Cancelled => Error::Cancelled,
                other => Error::Download {
                    name: "the modding API".to_string(),
                    source: other,
                },
            })?;

        verify_sha256("the modding API", &download.bytes, &link.sha256)?;

        // First modded install; keep a vanilla copy to swap back to.
        if was_vanilla {
            fs::copy(
                managed.join(CURRENT_ASSEMBLY),
                managed.join(VANILLA_ASSEMBLY),
            )?;
        }

        extract_zip(&download.bytes, managed)?;

        state.store.record_api_state(ModState::installed(
            true,
            Version::new(&[api.version, 0, 0]),
            true,
        ))
    }

    fn toggle_api_worker(
        &self,
        state: &mut EngineState,
        update: ApiUpdate,
        cancel: &CancelToken,
    ) -> Result<(), Error> {
        let ModState::Installed(installed) = state.store.api_install() else {
            return Err(Error::ApiNotInstalled);
        };

        let managed = &self.settings.managed_folder;
        let (move_to, move_from) = if installed.enabled {
            // Park the modded assembly and restore the vanilla one.
            (MODDED_ASSEMBLY, VANILLA_ASSEMBLY)
        } else {
            (VANILLA_ASSEMBLY, MODDED_ASSEMBLY)
        };

        replace_file(&managed.join(CURRENT_ASSEMBLY), &managed.join(move_to))?;
        replace_file(&managed.join(move_from), &managed.join(CURRENT_ASSEMBLY))?;

        state.store.record_api_state(ModState::Installed(InstalledState {
            enabled: !installed.enabled,
            ..installed.clone()
        }))?;

        // Re-enabling an outdated API pulls the newer build, after the
        // assembly is back in place.
        if update == ApiUpdate::ForceUpdate
            && !installed.enabled
            && installed.version.major() < state.db.api().version
        {
            self.install_api_worker(state, ReinstallPolicy::SkipUpToDate, cancel)?;
        }

        Ok(())
    }
}

fn extension(filename: &str) -> Option<String> {
    Path::new(&filename.to_ascii_lowercase())
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
}

fn verify_sha256(name: &str, bytes: &[u8], expected: &str) -> Result<(), Error> {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let actual = format!("{:x}", hasher.finalize());

    if !actual.eq_ignore_ascii_case(expected) {
        return Err(Error::HashMismatch {
            name: name.to_string(),
            expected: expected.to_lowercase(),
            actual,
        });
    }

    Ok(())
}

/// Extracts a zip payload into `root`, refusing any entry whose resolved
/// path would land outside it. Partial extraction on error is accepted; the
/// caller treats the install as failed and the directory gets overwritten on
/// retry.
fn extract_zip(bytes: &[u8], root: &Path) -> Result<(), Error> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    fs::create_dir_all(root)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;

        // Path traversal ("../evil") must never escape the mod directory.
        let Some(relative) = entry.enclosed_name() else {
            return Err(Error::PathTraversal {
                entry: entry.name().to_string(),
            });
        };
        let dest = root.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&dest)?;
            continue;
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&dest)?;
        io::copy(&mut entry, &mut out)?;

        // Mods occasionally ship executables; keep their mode bits.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = fs::set_permissions(&dest, fs::Permissions::from_mode(mode));
            }
        }
    }

    Ok(())
}

fn replace_file(from: &Path, to: &Path) -> Result<(), Error> {
    if to.exists() {
        fs::remove_file(to)?;
    }
    fs::rename(from, to)?;
    Ok(())
}
