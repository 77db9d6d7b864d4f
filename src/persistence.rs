//! Durable storage for the expectation set, and the initialization file.
//!
//! Two independent paths are in play and must not be confused: the
//! persistence file is the engine-managed durable copy of the current set,
//! while the initialization file is an operator-provided seed that may be
//! watched for edits. The watcher concerns only the latter.
//!
//! Saves are crash-safe: write to a temp file under an exclusive advisory
//! lock, fsync, then rename over the target. Loads take a shared advisory
//! lock so external readers and writers of the same file coordinate with
//! us.

use crate::expectation::Expectation;
use crate::store::ExpectationStore;
use anyhow::Context;
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Poll interval for the initialization-file watcher.
const WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Atomic, advisory-locked persistence of the expectation set to one file.
pub struct FilePersistence {
    path: PathBuf,
    /// Serialises saves; snapshots queue behind each other, never interleave.
    save_mutex: tokio::sync::Mutex<()>,
    is_saving: AtomicBool,
}

impl FilePersistence {
    /// Prepare persistence at `path`, creating the parent directory.
    /// An un-creatable directory is a startup failure.
    pub fn new(path: PathBuf) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create persistence directory {}", parent.display())
                })?;
            }
        }
        Ok(FilePersistence {
            path,
            save_mutex: tokio::sync::Mutex::new(()),
            is_saving: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True while one of our own saves is in flight; the initialization
    /// watcher gates on this.
    pub fn is_saving(&self) -> bool {
        self.is_saving.load(Ordering::SeqCst)
    }

    /// Load the persisted set. An absent file is an empty set.
    pub async fn load(&self) -> anyhow::Result<Vec<Expectation>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || load_blocking(&path))
            .await
            .context("persistence load task failed")?
    }

    /// Save a snapshot. Idempotent; safe against concurrent readers via
    /// the advisory lock and the atomic rename.
    pub async fn save(&self, snapshot: Vec<Expectation>) -> anyhow::Result<()> {
        let _serialised = self.save_mutex.lock().await;
        self.is_saving.store(true, Ordering::SeqCst);
        let path = self.path.clone();
        let result = tokio::task::spawn_blocking(move || save_blocking(&path, &snapshot))
            .await
            .context("persistence save task failed");
        self.is_saving.store(false, Ordering::SeqCst);
        result?
    }
}

fn load_blocking(path: &Path) -> anyhow::Result<Vec<Expectation>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to open {}", path.display()));
        }
    };

    // Explicit fs2 call; std gained identically-named lock methods.
    FileExt::lock_shared(&file)
        .with_context(|| format!("failed to lock {} for reading", path.display()))?;

    let mut json = String::new();
    let read = file
        .read_to_string(&mut json)
        .with_context(|| format!("failed to read {}", path.display()));
    let _ = FileExt::unlock(&file);
    read?;

    if json.trim().is_empty() {
        return Ok(Vec::new());
    }

    serde_json::from_str(&json)
        .with_context(|| format!("failed to parse {}", path.display()))
}

fn save_blocking(path: &Path, snapshot: &[Expectation]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(snapshot).context("failed to serialise expectations")?;

    let temp_path = temp_path_for(path);
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&temp_path)
        .with_context(|| format!("failed to create {}", temp_path.display()))?;

    FileExt::lock_exclusive(&file)
        .with_context(|| format!("failed to lock {} for writing", temp_path.display()))?;

    let outcome = file
        .write_all(json.as_bytes())
        .and_then(|_| file.sync_all())
        .with_context(|| format!("failed to write {}", temp_path.display()));
    let _ = FileExt::unlock(&file);
    outcome?;
    drop(file);

    // Rename is atomic on the same filesystem; readers see old or new,
    // never a torn file.
    std::fs::rename(&temp_path, path)
        .with_context(|| format!("failed to move {} into place", temp_path.display()))?;

    debug!("persisted {} expectations to {}", snapshot.len(), path.display());
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

// ============================================================================
// Initialization file
// ============================================================================

/// Seed the store from an operator-provided initialization file.
///
/// Each document is validated independently; invalid ones are logged and
/// skipped. Returns the file's content hash so the watcher can tell later
/// edits apart from what it already applied.
pub async fn load_initialization_file(
    store: &ExpectationStore,
    path: &Path,
) -> Option<[u8; 32]> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(
                "failed to read initialization file {}: {e}",
                path.display()
            );
            return None;
        }
    };
    let hash = content_hash(&bytes);

    let documents: Vec<serde_json::Value> = match serde_json::from_slice(&bytes) {
        Ok(docs) => docs,
        Err(e) => {
            warn!(
                "failed to parse initialization file {}: {e}",
                path.display()
            );
            return Some(hash);
        }
    };

    let mut inserted = 0usize;
    for document in documents {
        let expectation: Expectation = match serde_json::from_value(document) {
            Ok(expectation) => expectation,
            Err(e) => {
                warn!("skipping malformed initialization expectation: {e}");
                continue;
            }
        };
        match store.upsert(expectation).await {
            Ok(_) => inserted += 1,
            Err(e) => warn!("skipping invalid initialization expectation: {e}"),
        }
    }
    info!(
        "loaded {inserted} expectations from initialization file {}",
        path.display()
    );
    Some(hash)
}

/// Watch the initialization file for edits by polling its content hash.
///
/// On a change the whole expectation set is reloaded atomically; every
/// document must validate or nothing is applied and the last-known-good
/// set stays in force. Change events caused by our own persistence saves
/// are suppressed via the `is_saving` gate and the hash comparison.
pub fn spawn_initialization_watcher(
    store: Arc<ExpectationStore>,
    path: PathBuf,
    initial_hash: Option<[u8; 32]>,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_seen = initial_hash;
        let mut interval = tokio::time::interval(WATCH_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.recv() => {
                    debug!("initialization watcher stopping");
                    return;
                }
            }

            if store.persistence().is_some_and(|p| p.is_saving()) {
                continue;
            }

            let Ok(bytes) = tokio::fs::read(&path).await else {
                continue;
            };
            let hash = content_hash(&bytes);
            if last_seen == Some(hash) {
                continue;
            }
            last_seen = Some(hash);

            match serde_json::from_slice::<Vec<Expectation>>(&bytes) {
                Ok(expectations) => {
                    let count = expectations.len();
                    match store.replace_all(expectations).await {
                        Ok(()) => {
                            info!(
                                "reloaded {count} expectations from {}",
                                path.display()
                            );
                        }
                        Err(e) => {
                            // replace_all validates before touching the
                            // store, so the previous set is still in force.
                            warn!(
                                "initialization reload rejected, keeping previous set: {e}"
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "initialization file {} unparseable, keeping previous set: {e}",
                        path.display()
                    );
                }
            }
        }
    })
}

pub fn content_hash(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_expectations() -> Vec<Expectation> {
        vec![
            serde_json::from_value(json!({
                "id": "a",
                "httpRequest": {"method": "GET", "path": "/x"},
                "httpResponse": {"statusCode": 200}
            }))
            .unwrap(),
            serde_json::from_value(json!({
                "id": "b",
                "priority": 7,
                "httpRequest": {"path": "/proxy/*"},
                "httpForward": {"host": "example.com", "port": 443, "scheme": "HTTPS"}
            }))
            .unwrap(),
        ]
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FilePersistence::new(dir.path().join("expectations.json")).unwrap();

        let snapshot = sample_expectations();
        persistence.save(snapshot.clone()).await.unwrap();
        let loaded = persistence.load().await.unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn load_absent_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FilePersistence::new(dir.path().join("missing.json")).unwrap();
        assert!(persistence.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_garbage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("expectations.json");
        std::fs::write(&path, "not json").unwrap();
        let persistence = FilePersistence::new(path).unwrap();
        assert!(persistence.load().await.is_err());
    }

    #[tokio::test]
    async fn save_is_pretty_printed_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("expectations.json");
        let persistence = FilePersistence::new(path.clone()).unwrap();
        persistence.save(sample_expectations()).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("[\n"));
        assert!(text.contains("  {\n"));
        // No temp file left behind.
        assert!(!temp_path_for(&path).exists());
    }

    #[tokio::test]
    async fn new_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("data").join("deep").join("exp.json");
        let persistence = FilePersistence::new(nested.clone()).unwrap();
        persistence.save(Vec::new()).await.unwrap();
        assert!(nested.exists());
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
    }

    #[tokio::test]
    async fn initialization_loader_skips_invalid_documents() {
        let dir = tempfile::tempdir().unwrap();
        let init_path = dir.path().join("init.json");
        std::fs::write(
            &init_path,
            serde_json::to_string_pretty(&json!([
                {
                    "id": "good",
                    "httpRequest": {"path": "/x"},
                    "httpResponse": {}
                },
                {
                    "id": "bad-no-action",
                    "httpRequest": {"path": "/y"}
                }
            ]))
            .unwrap(),
        )
        .unwrap();

        let store = ExpectationStore::new(None);
        let hash = load_initialization_file(&store, &init_path).await;
        assert!(hash.is_some());
        assert_eq!(store.len(), 1);
        assert!(store.get("good").is_some());
    }
}
