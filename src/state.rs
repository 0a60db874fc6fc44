use crate::version::Version;
use serde::{Deserialize, Serialize};

/// Persisted half of an installed mod's state. The `updated` flag is always
/// recomputed against the manifest, so it never hits disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledState {
    pub enabled: bool,
    pub version: Version,
    #[serde(skip)]
    pub updated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModState {
    NotInstalled { installing: bool },
    Installed(InstalledState),
}

impl ModState {
    pub fn not_installed() -> Self {
        ModState::NotInstalled { installing: false }
    }

    pub fn installed(enabled: bool, version: Version, updated: bool) -> Self {
        ModState::Installed(InstalledState {
            enabled,
            version,
            updated,
        })
    }

    pub fn is_installed(&self) -> bool {
        matches!(self, ModState::Installed(_))
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, ModState::Installed(InstalledState { enabled: true, .. }))
    }

    pub fn is_updated(&self) -> bool {
        matches!(self, ModState::Installed(InstalledState { updated: true, .. }))
    }

    pub fn as_installed(&self) -> Option<&InstalledState> {
        match self {
            ModState::Installed(state) => Some(state),
            ModState::NotInstalled { .. } => None,
        }
    }
}

impl Default for ModState {
    fn default() -> Self {
        ModState::not_installed()
    }
}
