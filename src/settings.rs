use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

/// Paths and policy the engine needs. Constructed explicitly and passed in,
/// never read from ambient global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// The game's `Managed` directory, holding `Assembly-CSharp.dll`.
    pub managed_folder: PathBuf,
    /// Whether uninstalling a mod also removes dependencies nothing else uses.
    #[serde(default = "default_true")]
    pub auto_remove_deps: bool,
}

impl Settings {
    pub fn new(managed_folder: PathBuf) -> Self {
        Self {
            managed_folder,
            auto_remove_deps: true,
        }
    }

    pub fn mods_folder(&self) -> PathBuf {
        self.managed_folder.join("Mods")
    }

    pub fn disabled_folder(&self) -> PathBuf {
        self.mods_folder().join("Disabled")
    }

    pub fn load_or_create() -> Result<Self> {
        let base_dir = base_data_dir()?;
        fs::create_dir_all(&base_dir).context("create app data dir")?;
        let path = base_dir.join("settings.json");
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read settings")?;
            let settings: Settings = serde_json::from_str(&raw).context("parse settings")?;
            return Ok(settings);
        }

        let settings = Settings {
            managed_folder: PathBuf::new(),
            auto_remove_deps: true,
        };
        settings.save()?;
        Ok(settings)
    }

    pub fn save(&self) -> Result<()> {
        let base_dir = base_data_dir()?;
        fs::create_dir_all(&base_dir).context("create app data dir")?;
        let path = base_dir.join("settings.json");
        let raw = serde_json::to_string_pretty(self).context("serialize settings")?;
        fs::write(path, raw).context("write settings")?;
        Ok(())
    }
}

/// Where the installed-mods record lives.
pub fn store_path() -> Result<PathBuf> {
    Ok(base_data_dir()?.join("installed_mods.json"))
}

fn default_true() -> bool {
    true
}

fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("hollowsmith"))
}
