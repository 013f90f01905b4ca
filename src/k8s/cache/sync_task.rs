/**
 * Sync task descriptors
 *
 * A `SyncTask` tells the coordinator how one resource type is kept fresh:
 * how to convert its objects, how to compare records, and whether to watch
 * (optionally one watch per namespace) or poll on a fixed period.
 */
use super::clock::Clock;
use super::config::StoreConfig;
use super::object::StoreEntry;
use super::resource_store::{ChangeComparator, Flushable, Record, ResourceStore};
use crate::error::Result;
use futures::{Stream, StreamExt, pin_mut};
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{Api, ListParams};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Push-based: list then subscribe; one subscription per namespace when split
    Watch { split_by_namespace: bool },
    /// Pull-based: full list every `period`
    Poll { period: Duration },
}

/// Values handed to every converter
#[derive(Debug, Clone, Default)]
pub struct ConvertContext {
    pub cluster: String,
}

/// `(object, context) -> record`
pub type Converter<K, R> = fn(&K, &ConvertContext) -> R;

type ApiFactory<K> = fn(Client, Option<&str>) -> Api<K>;

/// Everything a running sync needs from its coordinator
#[derive(Clone)]
pub struct SyncContext {
    pub client: Client,
    pub store: StoreConfig,
    pub convert: Arc<ConvertContext>,
    pub clock: Arc<dyn Clock>,
}

/// Tasks and store of one started resource type
pub struct StartedSync {
    pub name: String,
    pub handles: Vec<JoinHandle<()>>,
    pub store: Arc<dyn Flushable>,
}

/// A resource type the coordinator can keep in sync, independent of its object type
pub trait ResourceSync: Send + Sync {
    fn name(&self) -> &str;

    fn header(&self) -> &str;

    fn strategy(&self) -> SyncStrategy;

    fn is_namespaced(&self) -> bool;

    /// Scopes a task runs against: each namespace for split watches, all namespaces otherwise
    fn scopes(&self, namespaces: &[String]) -> Vec<Option<String>> {
        match self.strategy() {
            SyncStrategy::Watch {
                split_by_namespace: true,
            } if self.is_namespaced() => namespaces.iter().cloned().map(Some).collect(),
            _ => vec![None],
        }
    }

    /// Create the store and spawn the watch or poll tasks feeding it
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be created
    fn start(
        &self,
        ctx: &SyncContext,
        namespaces: &[String],
        cancel: CancellationToken,
    ) -> Result<StartedSync>;
}

pub struct SyncTask<K, R> {
    name: String,
    header: String,
    namespaced: bool,
    strategy: SyncStrategy,
    convert: Converter<K, R>,
    has_changed: ChangeComparator<R>,
    api: ApiFactory<K>,
}

fn namespaced_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

fn cluster_api<K>(client: Client, _namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = ClusterResourceScope, DynamicType = ()>,
{
    Api::all(client)
}

impl<K, R> SyncTask<K, R>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    R: Record,
{
    #[must_use]
    pub fn namespaced(
        name: &str,
        header: &str,
        strategy: SyncStrategy,
        convert: Converter<K, R>,
        has_changed: ChangeComparator<R>,
    ) -> Self
    where
        K: Resource<Scope = NamespaceResourceScope>,
    {
        Self {
            name: name.to_string(),
            header: header.to_string(),
            namespaced: true,
            strategy,
            convert,
            has_changed,
            api: namespaced_api::<K>,
        }
    }

    #[must_use]
    pub fn cluster(
        name: &str,
        header: &str,
        strategy: SyncStrategy,
        convert: Converter<K, R>,
        has_changed: ChangeComparator<R>,
    ) -> Self
    where
        K: Resource<Scope = ClusterResourceScope>,
    {
        Self {
            name: name.to_string(),
            header: header.to_string(),
            namespaced: false,
            strategy,
            convert,
            has_changed,
            api: cluster_api::<K>,
        }
    }
}

impl<K, R> ResourceSync for SyncTask<K, R>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    R: Record,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn header(&self) -> &str {
        &self.header
    }

    fn strategy(&self) -> SyncStrategy {
        self.strategy
    }

    fn is_namespaced(&self) -> bool {
        self.namespaced
    }

    fn start(
        &self,
        ctx: &SyncContext,
        namespaces: &[String],
        cancel: CancellationToken,
    ) -> Result<StartedSync> {
        let store = Arc::new(ResourceStore::new(
            &ctx.store,
            &self.name,
            &self.header,
            self.has_changed,
            ctx.clock.clone(),
        )?);
        let mut handles = vec![store.clone().spawn_periodic_dump(cancel.clone())];

        match self.strategy {
            SyncStrategy::Poll { period } => {
                let api = (self.api)(ctx.client.clone(), None);
                let convert = self.convert;
                let convert_ctx = ctx.convert.clone();
                let lister = move || {
                    let api = api.clone();
                    let convert_ctx = convert_ctx.clone();
                    async move { list_entries(&api, convert, &convert_ctx).await }
                };
                handles.push(tokio::spawn(run_poll(store.clone(), period, cancel, lister)));
            }
            SyncStrategy::Watch { .. } => {
                for scope in self.scopes(namespaces) {
                    let api = (self.api)(ctx.client.clone(), scope.as_deref());
                    let stream = watcher(api, watcher::Config::default().any_semantic())
                        .default_backoff();
                    handles.push(tokio::spawn(run_watch(
                        store.clone(),
                        stream,
                        self.convert,
                        ctx.convert.clone(),
                        scope,
                        cancel.clone(),
                    )));
                }
            }
        }

        info!(
            "🔍 Started {} ({:?}, {} tasks)",
            self.name,
            self.strategy,
            handles.len() - 1
        );
        Ok(StartedSync {
            name: self.name.clone(),
            handles,
            store,
        })
    }
}

/// List every object once and convert it
///
/// # Errors
///
/// Returns an error if the list call fails
pub async fn list_entries<K, R>(
    api: &Api<K>,
    convert: Converter<K, R>,
    ctx: &ConvertContext,
) -> Result<Vec<StoreEntry<R>>>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let list = api.list(&ListParams::default().match_any()).await?;
    Ok(list
        .items
        .iter()
        .map(|object| StoreEntry::from_object(object, convert(object, ctx)))
        .collect())
}

/// Poll loop: list immediately, then every `period`, replacing the whole store each time
pub async fn run_poll<R, F, Fut>(
    store: Arc<ResourceStore<R>>,
    period: Duration,
    cancel: CancellationToken,
    mut list: F,
) where
    R: Record,
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Vec<StoreEntry<R>>>> + Send,
{
    info!("⏱️ Start poller for {} every {:?}", store.resource_name(), period);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("⏱️ Exiting poll of {}", store.resource_name());
                break;
            }
            _ = ticker.tick() => {
                match list().await {
                    Ok(entries) => store.replace_all(entries).await,
                    Err(e) => warn!("Error on listing {}: {}", store.resource_name(), e),
                }
            }
        }
    }
}

/// Watch loop: applies one event stream to the store until cancelled or the stream ends
///
/// Objects of an initial (re)list are buffered and applied in one go once the
/// list is complete, so keys that disappeared while disconnected are dropped.
pub async fn run_watch<K, R, S>(
    store: Arc<ResourceStore<R>>,
    stream: S,
    convert: Converter<K, R>,
    ctx: Arc<ConvertContext>,
    namespace: Option<String>,
    cancel: CancellationToken,
) where
    K: Resource,
    R: Record,
    S: Stream<Item = std::result::Result<watcher::Event<K>, watcher::Error>> + Send,
{
    let scope = namespace.as_deref().unwrap_or("all");
    info!("🔍 Start watch for {} on namespace {}", store.resource_name(), scope);
    pin_mut!(stream);
    let mut initial: Option<BTreeMap<String, StoreEntry<R>>> = None;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("🔍 Exiting watch of {} namespace {}", store.resource_name(), scope);
                break;
            }
            next = stream.next() => match next {
                Some(Ok(event)) => {
                    apply_event(&store, event, convert, &ctx, namespace.as_deref(), &mut initial).await;
                }
                Some(Err(e)) => {
                    warn!("Watch error on {} namespace {}: {}", store.resource_name(), scope, e);
                }
                None => {
                    info!("🔍 Watch stream of {} namespace {} ended", store.resource_name(), scope);
                    break;
                }
            }
        }
    }
}

async fn apply_event<K, R>(
    store: &ResourceStore<R>,
    event: watcher::Event<K>,
    convert: Converter<K, R>,
    ctx: &ConvertContext,
    namespace: Option<&str>,
    initial: &mut Option<BTreeMap<String, StoreEntry<R>>>,
) where
    K: Resource,
    R: Record,
{
    match event {
        watcher::Event::Init => {
            debug!("📋 Initial list of {} started", store.resource_name());
            *initial = Some(BTreeMap::new());
        }
        watcher::Event::InitApply(object) => {
            let entry = StoreEntry::from_object(&object, convert(&object, ctx));
            match initial {
                Some(buffer) => {
                    buffer.insert(entry.key.clone(), entry);
                }
                None => {
                    store.upsert(entry).await;
                }
            }
        }
        watcher::Event::InitDone => {
            let entries: Vec<StoreEntry<R>> =
                initial.take().unwrap_or_default().into_values().collect();
            debug!(
                "📋 Initial list of {} done ({} objects)",
                store.resource_name(),
                entries.len()
            );
            match namespace {
                Some(ns) => store.replace_namespace(ns, entries).await,
                None => store.replace_all(entries).await,
            }
        }
        watcher::Event::Apply(object) => {
            let entry = StoreEntry::from_object(&object, convert(&object, ctx));
            debug!("📝 {} applied: {}", store.resource_name(), entry.key);
            store.upsert(entry).await;
        }
        watcher::Event::Delete(object) => {
            let entry = StoreEntry::from_object(&object, convert(&object, ctx));
            debug!("🗑️ {} deleted: {}", store.resource_name(), entry.key);
            store.remove(&entry.key).await;
        }
    }
}

/// Resource types by name, built once at startup
#[derive(Default)]
pub struct SyncRegistry {
    tasks: BTreeMap<String, Box<dyn ResourceSync>>,
}

impl SyncRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task: impl ResourceSync + 'static) {
        self.tasks.insert(task.name().to_string(), Box::new(task));
    }

    /// Drop the named resource types
    #[must_use]
    pub fn without(mut self, excluded: &[String]) -> Self {
        for name in excluded {
            if self.tasks.remove(name).is_some() {
                debug!("🚫 Resource {} excluded", name);
            }
        }
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn ResourceSync> {
        self.tasks.get(name).map(|task| &**task)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn ResourceSync> {
        self.tasks.values().map(|task| &**task)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
