/**
 * Resource Store
 *
 * Current state of one resource type plus its label occurrence index.
 * Every mutation triggers a debounced full dump of the snapshot to
 * `<cache_dir>/<cluster>/<resource>_resource`; a periodic task writes the
 * label file and catches up on dumps the debounce window suppressed.
 */
use super::atomic_file::write_atomic;
use super::clock::Clock;
use super::config::{LABEL_DUMP_INTERVAL_SECS, StoreConfig};
use super::errors::cache_dir_error;
use super::labels::LabelIndex;
use super::object::StoreEntry;
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::serde_json;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// `has_changed(new, old)`: whether `new` must replace the stored `old`
pub type ChangeComparator<R> = fn(&R, &R) -> bool;

/// Records a store can hold
pub trait Record: Clone + Serialize + Send + Sync + 'static {}

impl<T: Clone + Serialize + Send + Sync + 'static> Record for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug)]
struct StoredRecord<R> {
    namespace: String,
    labels: BTreeMap<String, String>,
    record: R,
}

#[derive(Debug, Default)]
struct LabelState {
    index: LabelIndex,
    dump_needed: bool,
}

#[derive(Debug, Default)]
struct DumpState {
    last_full_dump: Option<chrono::DateTime<chrono::Utc>>,
    pending: bool,
    full_dumps: u64,
}

pub struct ResourceStore<R> {
    resource_name: String,
    cluster: String,
    dest_dir: PathBuf,
    time_between_full_dump: chrono::Duration,
    has_changed: ChangeComparator<R>,
    clock: Arc<dyn Clock>,
    data: RwLock<HashMap<String, StoredRecord<R>>>,
    labels: Mutex<LabelState>,
    dump: Mutex<DumpState>,
    // serialize writes of each file so an older render never lands after a newer one
    file: Mutex<()>,
    label_file: Mutex<()>,
}

impl<R: Record> ResourceStore<R> {
    /// Create the store and its cluster directory, and write the header file
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster directory cannot be created or the header cannot be written
    pub fn new(
        config: &StoreConfig,
        resource_name: &str,
        header: &str,
        has_changed: ChangeComparator<R>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let dest_dir = config.cluster_dir();
        std::fs::create_dir_all(&dest_dir).map_err(|e| cache_dir_error(&dest_dir, &e))?;
        write_atomic(&dest_dir, &format!("{resource_name}_header"), header.as_bytes())?;

        Ok(Self {
            resource_name: resource_name.to_string(),
            cluster: config.cluster.clone(),
            dest_dir,
            time_between_full_dump: chrono::Duration::from_std(config.time_between_full_dump)
                .unwrap_or(chrono::Duration::MAX),
            has_changed,
            clock,
            data: RwLock::new(HashMap::new()),
            labels: Mutex::new(LabelState::default()),
            dump: Mutex::new(DumpState::default()),
            file: Mutex::new(()),
            label_file: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    #[must_use]
    pub fn resource_path(&self) -> PathBuf {
        self.dest_dir.join(format!("{}_resource", self.resource_name))
    }

    #[must_use]
    pub fn label_path(&self) -> PathBuf {
        self.dest_dir.join(format!("{}_label", self.resource_name))
    }

    /// Swap the whole content for `entries` and rebuild the label index from scratch
    pub async fn replace_all(&self, entries: Vec<StoreEntry<R>>) {
        self.replace_scope(None, entries).await;
    }

    /// Like [`Self::replace_all`] but only for records of `namespace`; other namespaces are kept
    pub async fn replace_namespace(&self, namespace: &str, entries: Vec<StoreEntry<R>>) {
        self.replace_scope(Some(namespace), entries).await;
    }

    async fn replace_scope(&self, namespace: Option<&str>, entries: Vec<StoreEntry<R>>) {
        let count = entries.len();
        {
            let mut data = self.data.write().await;
            match namespace {
                None => data.clear(),
                Some(ns) => data.retain(|_, stored| stored.namespace != ns),
            }
            for entry in entries {
                data.insert(
                    entry.key,
                    StoredRecord {
                        namespace: entry.namespace,
                        labels: entry.labels,
                        record: entry.record,
                    },
                );
            }

            let mut index = LabelIndex::new();
            for stored in data.values() {
                index.add(&stored.namespace, &stored.labels);
            }
            let mut labels = self.labels.lock().await;
            labels.index = index;
            labels.dump_needed = true;
        }
        debug!(
            "🔄 {} replaced {} records (scope: {})",
            self.resource_name,
            count,
            namespace.unwrap_or("all")
        );
        self.dump_logged().await;
    }

    /// Insert a new record or replace an existing one when the comparator says it changed
    pub async fn upsert(&self, entry: StoreEntry<R>) -> UpsertOutcome {
        let outcome = {
            let mut data = self.data.write().await;
            match data.entry(entry.key) {
                Entry::Vacant(vacant) => {
                    let mut labels = self.labels.lock().await;
                    labels.index.add(&entry.namespace, &entry.labels);
                    labels.dump_needed = true;
                    drop(labels);
                    vacant.insert(StoredRecord {
                        namespace: entry.namespace,
                        labels: entry.labels,
                        record: entry.record,
                    });
                    UpsertOutcome::Inserted
                }
                Entry::Occupied(mut occupied) => {
                    if (self.has_changed)(&entry.record, &occupied.get().record) {
                        let old = occupied.insert(StoredRecord {
                            namespace: entry.namespace,
                            labels: entry.labels,
                            record: entry.record,
                        });
                        let new = occupied.get();
                        let mut labels = self.labels.lock().await;
                        labels
                            .index
                            .replace(&old.namespace, &old.labels, &new.namespace, &new.labels);
                        labels.dump_needed = true;
                        UpsertOutcome::Updated
                    } else {
                        UpsertOutcome::Unchanged
                    }
                }
            }
        };

        if outcome != UpsertOutcome::Unchanged {
            self.dump_logged().await;
        }
        outcome
    }

    /// Remove a record; returns whether it was present
    pub async fn remove(&self, key: &str) -> bool {
        let removed = {
            let mut data = self.data.write().await;
            match data.remove(key) {
                Some(old) => {
                    let mut labels = self.labels.lock().await;
                    labels.index.remove(&old.namespace, &old.labels);
                    labels.dump_needed = true;
                    true
                }
                None => false,
            }
        };

        if removed {
            self.dump_logged().await;
        }
        removed
    }

    /// Debounced full dump; returns whether the snapshot file was written
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the atomic write fails
    pub async fn dump_full_state(&self, force: bool) -> Result<bool> {
        let now = self.clock.now();
        {
            let mut dump = self.dump.lock().await;
            if let Some(last) = dump.last_full_dump {
                let delta = now - last;
                if !force && delta < self.time_between_full_dump {
                    debug!(
                        "⏳ Last full dump of {} happened {}ms ago, skipping",
                        self.resource_name,
                        delta.num_milliseconds()
                    );
                    dump.pending = true;
                    return Ok(false);
                }
            }
            dump.last_full_dump = Some(now);
            dump.pending = false;
            dump.full_dumps += 1;
        }

        // snapshot taken after the file lock, so writes land in snapshot order
        let _file = self.file.lock().await;
        let (count, bytes) = {
            let data = self.data.read().await;
            let snapshot: BTreeMap<&String, &R> =
                data.iter().map(|(key, stored)| (key, &stored.record)).collect();
            (snapshot.len(), serde_json::to_vec(&snapshot))
        };
        let bytes = match bytes {
            Ok(bytes) => bytes,
            Err(e) => {
                self.dump.lock().await.pending = true;
                return Err(e.into());
            }
        };

        debug!("💾 Full dump of {} ({} records)", self.resource_name, count);
        let dest_dir = self.dest_dir.clone();
        let file_name = format!("{}_resource", self.resource_name);
        let written =
            tokio::task::spawn_blocking(move || write_atomic(&dest_dir, &file_name, &bytes)).await;
        match written {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => {
                self.dump.lock().await.pending = true;
                Err(e)
            }
            Err(e) => {
                self.dump.lock().await.pending = true;
                Err(e.into())
            }
        }
    }

    /// Write the label file if any label changed since the last write
    ///
    /// # Errors
    ///
    /// Returns an error if the atomic write fails; the label file stays marked as dirty
    pub async fn dump_labels_if_needed(&self) -> Result<bool> {
        let _file = self.label_file.lock().await;
        let rendered = {
            let mut labels = self.labels.lock().await;
            if !labels.dump_needed {
                return Ok(false);
            }
            labels.dump_needed = false;
            labels.index.render(&self.cluster)
        };

        debug!("🏷️ Dump of label file {}", self.resource_name);
        let dest_dir = self.dest_dir.clone();
        let file_name = format!("{}_label", self.resource_name);
        let written =
            tokio::task::spawn_blocking(move || write_atomic(&dest_dir, &file_name, rendered.as_bytes()))
                .await;
        match written {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => {
                self.labels.lock().await.dump_needed = true;
                Err(e)
            }
            Err(e) => {
                self.labels.lock().await.dump_needed = true;
                Err(e.into())
            }
        }
    }

    /// Force both the snapshot and the label file to disk
    ///
    /// # Errors
    ///
    /// Returns the first write error
    pub async fn flush(&self) -> Result<()> {
        self.dump_full_state(true).await?;
        self.labels.lock().await.dump_needed = true;
        self.dump_labels_if_needed().await?;
        Ok(())
    }

    /// One tick of the periodic task: label file, then any suppressed full dump
    pub async fn periodic_dump(&self) {
        if let Err(e) = self.dump_labels_if_needed().await {
            warn!("Error when dumping labels of {}: {}", self.resource_name, e);
        }
        let pending = self.dump.lock().await.pending;
        if pending {
            self.dump_logged().await;
        }
    }

    /// Spawn the background task that calls [`Self::periodic_dump`] every few seconds
    pub fn spawn_periodic_dump(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        self.spawn_periodic_dump_every(Duration::from_secs(LABEL_DUMP_INTERVAL_SECS), cancel)
    }

    pub(crate) fn spawn_periodic_dump_every(
        self: Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("🏷️ Periodic dump of {} stopping", self.resource_name);
                        break;
                    }
                    _ = ticker.tick() => {
                        self.periodic_dump().await;
                    }
                }
            }
        })
    }

    async fn dump_logged(&self) {
        if let Err(e) = self.dump_full_state(false).await {
            warn!("Error when dumping state of {}: {}", self.resource_name, e);
        }
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    pub async fn get(&self, key: &str) -> Option<R> {
        self.data.read().await.get(key).map(|stored| stored.record.clone())
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn label_count(&self, namespace: &str, label: &str) -> usize {
        self.labels.lock().await.index.count(namespace, label)
    }

    /// Copy of the current label index
    pub async fn label_index(&self) -> LabelIndex {
        self.labels.lock().await.index.clone()
    }

    pub async fn snapshot(&self) -> BTreeMap<String, R> {
        self.data
            .read()
            .await
            .iter()
            .map(|(key, stored)| (key.clone(), stored.record.clone()))
            .collect()
    }

    /// Number of full dumps that went past the debounce check
    pub async fn full_dump_count(&self) -> u64 {
        self.dump.lock().await.full_dumps
    }
}

/// Read a snapshot file written by a store
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed
pub fn load_snapshot<R: DeserializeOwned>(path: &Path) -> Result<BTreeMap<String, R>> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Store operations the coordinator needs without knowing the record type
#[async_trait]
pub trait Flushable: Send + Sync {
    fn name(&self) -> &str;

    async fn flush_to_disk(&self) -> Result<()>;
}

#[async_trait]
impl<R: Record> Flushable for ResourceStore<R> {
    fn name(&self) -> &str {
        &self.resource_name
    }

    async fn flush_to_disk(&self) -> Result<()> {
        self.flush().await
    }
}
