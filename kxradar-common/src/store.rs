//! Persistence collaborators
//!
//! The settings layer only needs a key-value text blob store with change
//! notifications. [`BlobStore`] is that seam; [`MemoryStore`] backs tests and
//! embedders, [`DirStore`] keeps one file per key with atomic replacement.
//!
//! Notifications follow the platform store semantics the settings stream was
//! designed against: every write (to any key) wakes every watcher, and each
//! watcher re-reads its own key. Watchers therefore see spurious repeats and
//! must deduplicate downstream.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use futures::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;

/// Notification buffer; watchers that fall behind simply re-read
const NOTIFY_CAPACITY: usize = 64;

/// Key-value text blob store keyed by versioned key names
pub trait BlobStore: Send + Sync {
    /// Current value under `key`, `None` if never written
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replace the value under `key`; readers never observe a partial value
    fn write(&self, key: &str, text: &str) -> Result<(), StoreError>;

    /// Current value of `key`, then its value after every store notification
    ///
    /// Infinite; ends only when dropped.
    fn changes(&self, key: &str) -> BoxStream<'static, Option<String>>;
}

impl<S: BlobStore + ?Sized> BlobStore for Arc<S> {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).read(key)
    }

    fn write(&self, key: &str, text: &str) -> Result<(), StoreError> {
        (**self).write(key, text)
    }

    fn changes(&self, key: &str) -> BoxStream<'static, Option<String>> {
        (**self).changes(key)
    }
}

/// Build a `changes` stream from a notification channel and a key reader
///
/// The receiver is subscribed before the initial read so no write between the
/// two can be missed. Read failures are logged and skipped rather than
/// reported as an absent value.
fn watch_key<F>(
    notify: &broadcast::Sender<String>,
    key: &str,
    read: F,
) -> BoxStream<'static, Option<String>>
where
    F: Fn() -> Result<Option<String>, StoreError> + Send + 'static,
{
    let mut notifications = BroadcastStream::new(notify.subscribe());
    let key = key.to_string();

    async_stream::stream! {
        match read() {
            Ok(value) => yield value,
            Err(e) => warn!("Store read for '{}' failed: {}", key, e),
        }

        while let Some(notification) = notifications.next().await {
            match notification {
                Ok(changed) => debug!("Store change on '{}' (watching '{}')", changed, key),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    debug!("Watcher for '{}' skipped {} notifications", key, skipped)
                }
            }
            match read() {
                Ok(value) => yield value,
                Err(e) => warn!("Store read for '{}' failed: {}", key, e),
            }
        }
    }
    .boxed()
}

struct MemoryInner {
    values: RwLock<HashMap<String, String>>,
    notify: broadcast::Sender<String>,
    fail_writes: AtomicBool,
    writes: AtomicU64,
}

impl MemoryInner {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }
}

/// In-process store
///
/// Cloning yields another handle to the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                values: RwLock::new(HashMap::new()),
                notify,
                fail_writes: AtomicBool::new(false),
                writes: AtomicU64::new(0),
            }),
        }
    }

    /// Make every subsequent write fail with [`StoreError::Unavailable`]
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes since creation
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.get(key))
    }

    fn write(&self, key: &str, text: &str) -> Result<(), StoreError> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "writes to '{}' are disabled",
                key
            )));
        }
        self.inner
            .values
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), text.to_string());
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        // No watchers is fine
        let _ = self.inner.notify.send(key.to_string());
        Ok(())
    }

    fn changes(&self, key: &str) -> BoxStream<'static, Option<String>> {
        let inner = Arc::clone(&self.inner);
        let watched = key.to_string();
        watch_key(&self.inner.notify, key, move || Ok(inner.get(&watched)))
    }
}

/// Directory-backed store: `<dir>/<key>.json`, replaced via temp file + rename
#[derive(Clone)]
pub struct DirStore {
    dir: Arc<PathBuf>,
    notify: broadcast::Sender<String>,
}

impl DirStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        debug!("Opened settings store at {}", dir.display());
        Ok(Self {
            dir: Arc::new(dir),
            notify,
        })
    }

    /// Root directory of this store
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(dir: &Path, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::Unavailable(format!("invalid key '{}'", key)));
        }
        Ok(dir.join(format!("{}.json", key)))
    }

    fn read_at(dir: &Path, key: &str) -> Result<Option<String>, StoreError> {
        let path = Self::path_for(dir, key)?;
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl BlobStore for DirStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Self::read_at(&self.dir, key)
    }

    fn write(&self, key: &str, text: &str) -> Result<(), StoreError> {
        let target = Self::path_for(&self.dir, key)?;
        // Unique per write so concurrent writers never share a temp file
        let temp = self
            .dir
            .join(format!("{}.json.{}.tmp", key, Uuid::new_v4().simple()));

        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&temp, &target) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        let _ = self.notify.send(key.to_string());
        Ok(())
    }

    fn changes(&self, key: &str) -> BoxStream<'static, Option<String>> {
        let dir = Arc::clone(&self.dir);
        let watched = key.to_string();
        watch_key(&self.notify, key, move || Self::read_at(&dir, &watched))
    }
}
