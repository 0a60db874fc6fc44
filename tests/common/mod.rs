#![allow(dead_code)]

use hollowsmith::catalog::{ApiManifest, Catalog, Link, Links, ModDescriptor};
use hollowsmith::database::ModDatabase;
use hollowsmith::download::{CancelToken, Download, DownloadProgress, Fetch, FetchError};
use hollowsmith::installer::{Installer, CURRENT_ASSEMBLY};
use hollowsmith::settings::Settings;
use hollowsmith::store::InstalledMods;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const API_URL: &str = "http://mods.test/api.zip";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn zip_payload(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn links_for(url: &str, payload: &[u8]) -> Links {
    let link = Link {
        url: url.to_string(),
        sha256: sha256_hex(payload),
    };
    Links {
        windows: link.clone(),
        mac: link.clone(),
        linux: link,
    }
}

/// Descriptor plus the archive its links point at: a zip holding one dll.
pub fn zip_mod(name: &str, version: &str, deps: &[&str]) -> (ModDescriptor, Vec<u8>) {
    let payload = zip_payload(&[(&format!("{name}.dll"), name)]);
    let descriptor = descriptor_for(
        name,
        version,
        deps,
        &format!("http://mods.test/{name}.zip"),
        &payload,
    );
    (descriptor, payload)
}

pub fn descriptor_for(
    name: &str,
    version: &str,
    deps: &[&str],
    url: &str,
    payload: &[u8],
) -> ModDescriptor {
    ModDescriptor {
        name: name.to_string(),
        version: version.parse().unwrap(),
        description: format!("{name} test mod"),
        repository: String::new(),
        dependencies: deps.iter().map(|dep| dep.to_string()).collect(),
        tags: Vec::new(),
        links: links_for(url, payload),
    }
}

#[derive(Debug, Clone)]
pub struct FetchCall {
    pub url: String,
    pub started: Instant,
    pub finished: Instant,
}

/// In-memory stand-in for the network. Optionally sleeps per request so
/// tests can observe whether two operations overlapped.
pub struct FakeFetcher {
    responses: HashMap<String, Download>,
    delay: Duration,
    pub calls: Arc<Mutex<Vec<FetchCall>>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn insert(&mut self, url: &str, bytes: Vec<u8>, filename: Option<&str>) {
        self.responses.insert(
            url.to_string(),
            Download {
                bytes,
                filename: filename.map(|name| name.to_string()),
            },
        );
    }
}

impl Fetch for FakeFetcher {
    fn fetch(
        &self,
        url: &str,
        on_progress: &mut dyn FnMut(DownloadProgress),
        cancel: &CancelToken,
    ) -> Result<Download, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let download = self.responses.get(url).cloned().ok_or_else(|| {
            FetchError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no response for {url}"),
            ))
        })?;

        let started = Instant::now();
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let total = download.bytes.len() as u64;
        on_progress(DownloadProgress {
            bytes_read: total,
            total_bytes: Some(total),
            completed: false,
        });
        on_progress(DownloadProgress {
            bytes_read: total,
            total_bytes: Some(total),
            completed: true,
        });

        self.calls.lock().unwrap().push(FetchCall {
            url: url.to_string(),
            started,
            finished: Instant::now(),
        });

        Ok(download)
    }
}

pub struct TestEnv {
    pub _tmp: TempDir,
    pub settings: Settings,
    pub store_path: PathBuf,
    pub catalog: Catalog,
    pub calls: Arc<Mutex<Vec<FetchCall>>>,
    pub installer: Installer,
}

pub fn setup(mods: Vec<(ModDescriptor, Vec<u8>)>) -> TestEnv {
    setup_full(mods, Duration::ZERO, true, |_| {})
}

/// Builds a sandboxed managed folder, a fake network serving the given mods
/// plus the API archive, and an installer over a fresh (or seeded) store.
pub fn setup_full(
    mods: Vec<(ModDescriptor, Vec<u8>)>,
    delay: Duration,
    auto_remove_deps: bool,
    seed: impl FnOnce(&mut InstalledMods),
) -> TestEnv {
    let tmp = tempfile::tempdir().unwrap();
    let managed = tmp.path().join("Managed");
    std::fs::create_dir_all(&managed).unwrap();
    std::fs::write(managed.join(CURRENT_ASSEMBLY), "vanilla").unwrap();

    let mut settings = Settings::new(managed);
    settings.auto_remove_deps = auto_remove_deps;

    let api_payload = zip_payload(&[(CURRENT_ASSEMBLY, "modded")]);
    let api = ApiManifest {
        version: 1,
        files: vec![CURRENT_ASSEMBLY.to_string()],
        links: links_for(API_URL, &api_payload),
    };

    let mut fetcher = FakeFetcher::new().with_delay(delay);
    fetcher.insert(API_URL, api_payload, None);
    for (descriptor, payload) in &mods {
        fetcher.insert(&descriptor.links.linux.url, payload.clone(), None);
    }
    let calls = fetcher.calls.clone();

    let catalog = Catalog::new(mods.into_iter().map(|(descriptor, _)| descriptor).collect())
        .expect("test catalog must be valid");

    let store_path = tmp.path().join("installed_mods.json");
    let mut store = InstalledMods::new(store_path.clone());
    seed(&mut store);

    let db = ModDatabase::new(&catalog, api, &store);
    let installer = Installer::new(settings.clone(), db, store, Box::new(fetcher));

    TestEnv {
        _tmp: tmp,
        settings,
        store_path,
        catalog,
        calls,
        installer,
    }
}
