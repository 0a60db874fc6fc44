mod common;

use common::zip_mod;
use hollowsmith::catalog::Catalog;
use hollowsmith::database::ModItem;
use hollowsmith::error::Error;
use hollowsmith::installer::CURRENT_ASSEMBLY;
use hollowsmith::settings::Settings;
use hollowsmith::state::ModState;
use hollowsmith::store::InstalledMods;
use hollowsmith::version::Version;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn store_env(mods: &[(&str, &str, &[&str])]) -> (TempDir, Settings, Catalog, PathBuf) {
    let tmp = tempfile::tempdir().unwrap();
    let managed = tmp.path().join("Managed");
    fs::create_dir_all(&managed).unwrap();
    let settings = Settings::new(managed);

    let descriptors = mods
        .iter()
        .map(|&(name, version, deps)| zip_mod(name, version, deps).0)
        .collect();
    let catalog = Catalog::new(descriptors).unwrap();

    let path = tmp.path().join("installed_mods.json");
    (tmp, settings, catalog, path)
}

#[test]
fn fresh_store_reports_nothing_installed() {
    let (_tmp, _settings, catalog, path) = store_env(&[("Alpha", "1.0", &[])]);
    let store = InstalledMods::new(path);

    let descriptor = catalog.get("Alpha").unwrap();
    assert_eq!(store.from_manifest(descriptor), ModState::not_installed());
    assert_eq!(store.api_install(), ModState::not_installed());
    assert!(!store.contains("Alpha"));
}

#[test]
fn recorded_state_survives_a_reload() {
    let (_tmp, settings, catalog, path) = store_env(&[("Alpha", "1.0", &[])]);
    let descriptor = catalog.get("Alpha").unwrap();

    let mut store = InstalledMods::new(path.clone());
    let item = ModItem::new(
        descriptor,
        ModState::installed(true, "1.0".parse().unwrap(), true),
    );
    store.record_installed_state(&item).unwrap();

    fs::create_dir_all(settings.mods_folder().join("Alpha")).unwrap();
    let reloaded = InstalledMods::load(path, &settings, &catalog);
    assert_eq!(
        reloaded.from_manifest(descriptor),
        ModState::installed(true, "1.0".parse().unwrap(), true)
    );
}

#[test]
fn updated_flag_is_recomputed_against_the_manifest() {
    let (_tmp, _settings, catalog, path) = store_env(&[("Alpha", "2.0", &[])]);
    let descriptor = catalog.get("Alpha").unwrap();

    let mut store = InstalledMods::new(path);
    let item = ModItem::new(
        descriptor,
        ModState::installed(true, "1.0".parse().unwrap(), true),
    );
    store.record_installed_state(&item).unwrap();

    // Recorded 1.0 against manifest 2.0: out of date, whatever was recorded.
    assert_eq!(
        store.from_manifest(descriptor),
        ModState::installed(true, "1.0".parse().unwrap(), false)
    );
}

#[test]
fn recording_rejects_mismatched_states() {
    let (_tmp, _settings, catalog, path) = store_env(&[("Alpha", "1.0", &[])]);
    let descriptor = catalog.get("Alpha").unwrap();
    let mut store = InstalledMods::new(path);

    let not_installed = ModItem::new(descriptor, ModState::not_installed());
    let err = store.record_installed_state(&not_installed).unwrap_err();
    assert!(matches!(err, Error::NotInstalled(name) if name == "Alpha"));

    let installed = ModItem::new(
        descriptor,
        ModState::installed(true, "1.0".parse().unwrap(), true),
    );
    let err = store.record_uninstall(&installed).unwrap_err();
    assert!(matches!(err, Error::StillInstalled(name) if name == "Alpha"));
}

#[test]
fn record_uninstall_drops_the_entry() {
    let (_tmp, _settings, catalog, path) = store_env(&[("Alpha", "1.0", &[])]);
    let descriptor = catalog.get("Alpha").unwrap();
    let mut store = InstalledMods::new(path);

    let item = ModItem::new(
        descriptor,
        ModState::installed(true, "1.0".parse().unwrap(), true),
    );
    store.record_installed_state(&item).unwrap();
    assert!(store.contains("Alpha"));

    let item = ModItem::new(descriptor, ModState::not_installed());
    store.record_uninstall(&item).unwrap();
    assert!(!store.contains("Alpha"));
    assert_eq!(store.from_manifest(descriptor), ModState::not_installed());
}

#[test]
fn corrupt_file_triggers_a_disk_rescan() {
    let (_tmp, settings, catalog, path) =
        store_env(&[("Alpha", "1.0", &[]), ("Beta", "1.0", &[])]);

    fs::write(&path, "{ this is not json").unwrap();
    fs::create_dir_all(settings.mods_folder().join("Alpha")).unwrap();
    fs::create_dir_all(settings.disabled_folder().join("Beta")).unwrap();

    let store = InstalledMods::load(path, &settings, &catalog);

    // Found on disk, version unknown: placeholder 0.0, never "updated".
    assert_eq!(
        store.from_manifest(catalog.get("Alpha").unwrap()),
        ModState::installed(true, Version::zero(), false)
    );
    assert_eq!(
        store.from_manifest(catalog.get("Beta").unwrap()),
        ModState::installed(false, Version::zero(), false)
    );
}

#[test]
fn load_prunes_records_whose_directory_is_gone() {
    let (_tmp, settings, catalog, path) = store_env(&[("Alpha", "1.0", &[])]);
    let descriptor = catalog.get("Alpha").unwrap();

    let mut store = InstalledMods::new(path.clone());
    let item = ModItem::new(
        descriptor,
        ModState::installed(true, "1.0".parse().unwrap(), true),
    );
    store.record_installed_state(&item).unwrap();

    let reloaded = InstalledMods::load(path, &settings, &catalog);
    assert!(!reloaded.contains("Alpha"));
    assert_eq!(reloaded.from_manifest(descriptor), ModState::not_installed());
}

#[test]
fn load_fixes_an_enabled_flag_that_contradicts_the_disk() {
    let (_tmp, settings, catalog, path) = store_env(&[("Alpha", "1.0", &[])]);
    let descriptor = catalog.get("Alpha").unwrap();

    let mut store = InstalledMods::new(path.clone());
    let item = ModItem::new(
        descriptor,
        ModState::installed(true, "1.0".parse().unwrap(), true),
    );
    store.record_installed_state(&item).unwrap();

    // The user moved the folder by hand; the disk wins.
    fs::create_dir_all(settings.disabled_folder().join("Alpha")).unwrap();

    let reloaded = InstalledMods::load(path, &settings, &catalog);
    assert_eq!(
        reloaded.from_manifest(descriptor),
        ModState::installed(false, "1.0".parse().unwrap(), true)
    );
}

#[test]
fn load_resets_api_record_when_the_assembly_is_gone() {
    let (_tmp, settings, catalog, path) = store_env(&[("Alpha", "1.0", &[])]);

    let mut store = InstalledMods::new(path.clone());
    store
        .record_api_state(ModState::installed(true, Version::new(&[1, 0, 0]), true))
        .unwrap();

    let reloaded = InstalledMods::load(path.clone(), &settings, &catalog);
    assert_eq!(reloaded.api_install(), ModState::not_installed());

    // With the assembly present the record is kept.
    let mut store = InstalledMods::new(path.clone());
    store
        .record_api_state(ModState::installed(true, Version::new(&[1, 0, 0]), true))
        .unwrap();
    fs::write(settings.managed_folder.join(CURRENT_ASSEMBLY), "modded").unwrap();

    let reloaded = InstalledMods::load(path, &settings, &catalog);
    assert!(reloaded.api_install().is_installed());
}

#[test]
fn reset_deletes_the_backing_file() {
    let (_tmp, _settings, catalog, path) = store_env(&[("Alpha", "1.0", &[])]);
    let descriptor = catalog.get("Alpha").unwrap();

    let mut store = InstalledMods::new(path.clone());
    let item = ModItem::new(
        descriptor,
        ModState::installed(true, "1.0".parse().unwrap(), true),
    );
    store.record_installed_state(&item).unwrap();

    store.reset().unwrap();
    assert!(!store.contains("Alpha"));
    assert!(!path.exists());

    // Resetting twice is fine.
    store.reset().unwrap();
}
