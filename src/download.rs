use std::{
    io::Read,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use thiserror::Error;

const USER_AGENT: &str = "hollowsmith";
const CHUNK_SIZE: usize = 8192;
// Content-Length is server-supplied; preallocation never trusts it beyond
// this, the buffer grows as the body actually arrives.
const MAX_PREALLOC: u64 = 8 * 1024 * 1024;

/// Progress of a single download. `total_bytes` is absent when the server
/// sends no Content-Length, in which case `percent` is indeterminate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    pub bytes_read: u64,
    pub total_bytes: Option<u64>,
    pub completed: bool,
}

impl DownloadProgress {
    pub fn percent(&self) -> Option<f32> {
        self.total_bytes
            .filter(|total| *total > 0)
            .map(|total| (self.bytes_read as f32 / total as f32) * 100.0)
    }
}

/// Whole-operation progress reported by the installer: per-chunk download
/// events while the archive is in flight, then a final completion event.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModProgress {
    pub download: Option<DownloadProgress>,
    pub completed: bool,
}

impl ModProgress {
    pub fn completed() -> Self {
        ModProgress {
            download: None,
            completed: true,
        }
    }
}

/// Shared cancellation flag, checked between download chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Http(#[from] Box<ureq::Error>),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("download cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Download {
    pub bytes: Vec<u8>,
    /// Filename suggested by Content-Disposition, when the server sent one.
    pub filename: Option<String>,
}

/// Seam between the installer and the network, so tests can substitute an
/// in-memory fetcher.
pub trait Fetch: Send + Sync {
    fn fetch(
        &self,
        url: &str,
        on_progress: &mut dyn FnMut(DownloadProgress),
        cancel: &CancelToken,
    ) -> Result<Download, FetchError>;
}

pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(60))
            .timeout_write(Duration::from_secs(60))
            .build();
        Self { agent }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetch for HttpFetcher {
    fn fetch(
        &self,
        url: &str,
        on_progress: &mut dyn FnMut(DownloadProgress),
        cancel: &CancelToken,
    ) -> Result<Download, FetchError> {
        let response = self
            .agent
            .get(url)
            .set("User-Agent", USER_AGENT)
            .call()
            .map_err(Box::new)?;

        let total_bytes: Option<u64> = response
            .header("Content-Length")
            .and_then(|value| value.parse().ok());
        let filename = response
            .header("Content-Disposition")
            .and_then(disposition_filename);

        let mut reader = response.into_reader();
        let mut bytes = Vec::with_capacity(initial_capacity(total_bytes));
        let mut buffer = [0u8; CHUNK_SIZE];

        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            bytes.extend_from_slice(&buffer[..read]);

            on_progress(DownloadProgress {
                bytes_read: bytes.len() as u64,
                total_bytes,
                completed: false,
            });
        }

        on_progress(DownloadProgress {
            bytes_read: bytes.len() as u64,
            total_bytes,
            completed: true,
        });

        Ok(Download { bytes, filename })
    }
}

fn initial_capacity(total_bytes: Option<u64>) -> usize {
    total_bytes.unwrap_or(0).min(MAX_PREALLOC) as usize
}

/// Last path segment of a URL, used when the server suggests no filename.
pub fn filename_from_url(url: &str) -> String {
    let trimmed = url.split(['?', '#']).next().unwrap_or(url);
    trimmed
        .rsplit('/')
        .next()
        .unwrap_or(trimmed)
        .to_string()
}

fn disposition_filename(header: &str) -> Option<String> {
    let lower = header.to_ascii_lowercase();
    let idx = lower.find("filename=")?;
    let rest = &header[idx + "filename=".len()..];
    let name = rest.split(';').next()?.trim().trim_matches('"').trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
