use super::StateStore;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use fs2::FileExt;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{broadcast, mpsc, RwLock};

const CHANGE_FEED_CAPACITY: usize = 32;

/// Key-value state kept as one JSON object on disk.
///
/// A write merges only its own key into the current file contents, under
/// an advisory lock shared with other processes, and lands via rename.
/// Changed keys are announced on a broadcast feed, including changes made
/// by other processes once [`FileStateStore::watch`] is running.
pub struct FileStateStore {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
    changes: broadcast::Sender<String>,
}

impl FileStateStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            parse_object(&content)
                .map_err(|e| anyhow!("Failed to parse state file {}: {}", path.display(), e))?
        } else {
            Map::new()
        };
        log::debug!("Opened state store {:?} with {} keys", path, values.len());

        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            path,
            values: RwLock::new(values),
            changes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of keys whose value changed
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }

    /// Re-read the file and announce keys another writer changed.
    ///
    /// A file that is empty or does not parse is treated as a write in
    /// progress and leaves the current values alone.
    pub async fn reload(&self) -> Result<Vec<String>> {
        let mut values = self.values.write().await;

        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            log::debug!("State file {:?} is empty, keeping current values", self.path);
            return Ok(Vec::new());
        }
        let fresh = match parse_object(&content) {
            Ok(fresh) => fresh,
            Err(e) => {
                log::debug!("State file {:?} unreadable, keeping current values: {}", self.path, e);
                return Ok(Vec::new());
            }
        };

        let changed = changed_keys(&values, &fresh);
        *values = fresh;
        drop(values);

        self.announce(&changed);
        Ok(changed)
    }

    /// Watch the state file for writes from other processes.
    ///
    /// Events are handled until the returned watcher is dropped.
    pub fn watch(self: &Arc<Self>) -> Result<RecommendedWatcher> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let file_name = self.path.file_name().map(|name| name.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let touches_state = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == file_name.as_deref());
                    if touches_state && (event.kind.is_modify() || event.kind.is_create()) {
                        let _ = tx.send(());
                    }
                }
                Err(e) => log::warn!("State file watch error: {}", e),
            },
            Config::default(),
        )?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        log::info!("Watching {:?} for external changes", self.path);

        let store = Arc::clone(self);
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // A half-written file fails to parse; the next event retries
                if let Err(e) = store.reload().await {
                    log::debug!("Skipping state reload: {}", e);
                }
            }
        });

        Ok(watcher)
    }

    fn announce(&self, keys: &[String]) {
        for key in keys {
            log::debug!("State key {} changed", key);
            let _ = self.changes.send(key.clone());
        }
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    /// Merge one key into the file under an exclusive lock, so keys written
    /// by other processes survive.
    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.write().await;

        let path = self.path.clone();
        let key_owned = key.to_string();
        let merged = tokio::task::spawn_blocking(move || merge_into_file(&path, &key_owned, value))
            .await??;

        // Memory only moves once the file holds the new value
        let changed = changed_keys(&values, &merged);
        *values = merged;
        drop(values);

        self.announce(&changed);
        Ok(())
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

fn merge_into_file(path: &Path, key: &str, value: Value) -> Result<Map<String, Value>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path(path))?;
    lock.lock_exclusive()?;

    let mut values = match std::fs::read_to_string(path) {
        Ok(content) => parse_object(&content).map_err(|e| {
            anyhow!("Refusing to overwrite unreadable state file {}: {}", path.display(), e)
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
        Err(e) => return Err(e.into()),
    };
    values.insert(key.to_string(), value);

    // Write to temp file, then rename so readers never see a torn file
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, serde_json::to_string_pretty(&values)?)?;
    std::fs::rename(&tmp_path, path)?;

    // Released when `lock` is closed
    drop(lock);
    Ok(values)
}

fn changed_keys(old: &Map<String, Value>, new: &Map<String, Value>) -> Vec<String> {
    old.keys()
        .chain(new.keys())
        .filter(|key| old.get(*key) != new.get(*key))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn parse_object(content: &str) -> Result<Map<String, Value>> {
    if content.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(content)? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("expected a JSON object, found {}", type_name(&other))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
