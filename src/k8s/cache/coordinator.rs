/**
 * Resource Coordinator
 *
 * Starts one sync per configured resource type (watch, optionally split per
 * namespace, or poll) and stops them all on request. Each type gets its own
 * cancellation token and its own store.
 */
use super::atomic_file::write_atomic;
use super::clock::{Clock, SystemClock};
use super::config::CoordinatorConfig;
use super::resource_store::Flushable;
use super::sync_task::{ConvertContext, StartedSync, SyncContext, SyncRegistry, SyncStrategy};
use crate::error::Result;
use crate::k8s::namespaces::{NamespaceFilter, list_namespace_names};
use itertools::Itertools;
use kube::Client;
use kube::discovery::{Discovery, Scope};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const API_RESOURCE_HEADER: &str = "Name ApiVersion Namespaced Kind\n";

/// One task the coordinator would run: a resource type against one scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPlan {
    pub resource: String,
    /// `None` means all namespaces (or a cluster-scoped type)
    pub namespace: Option<String>,
    pub strategy: SyncStrategy,
}

/// Per-(resource, namespace) task list for `registry` minus `excluded_resources`
#[must_use]
pub fn plan_tasks(
    registry: &SyncRegistry,
    namespaces: &[String],
    excluded_resources: &[String],
) -> Vec<TaskPlan> {
    registry
        .iter()
        .filter(|task| !excluded_resources.iter().any(|r| r == task.name()))
        .flat_map(|task| {
            task.scopes(namespaces)
                .into_iter()
                .map(|namespace| TaskPlan {
                    resource: task.name().to_string(),
                    namespace,
                    strategy: task.strategy(),
                })
                .collect_vec()
        })
        .collect()
}

pub struct ResourceCoordinator {
    client: Client,
    config: CoordinatorConfig,
    namespace_filter: NamespaceFilter,
    namespaces: Vec<String>,
    clock: Arc<dyn Clock>,
    root: CancellationToken,
    running: Vec<(CancellationToken, StartedSync)>,
}

impl ResourceCoordinator {
    /// # Errors
    ///
    /// Returns an error if a namespace exclusion expression is invalid
    pub fn new(client: Client, config: CoordinatorConfig) -> Result<Self> {
        Self::with_clock(client, config, Arc::new(SystemClock))
    }

    /// # Errors
    ///
    /// Returns an error if a namespace exclusion expression is invalid
    pub fn with_clock(client: Client, config: CoordinatorConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let namespace_filter = NamespaceFilter::new(&config.excluded_namespaces)?;
        info!(
            "{} Namespaces will be excluded: {:?}",
            namespace_filter.len(),
            config.excluded_namespaces
        );
        info!(
            "{} Resources will be excluded: {:?}",
            config.excluded_resources.len(),
            config.excluded_resources
        );
        Ok(Self {
            client,
            config,
            namespace_filter,
            namespaces: Vec::new(),
            clock,
            root: CancellationToken::new(),
            running: Vec::new(),
        })
    }

    /// Namespaces that split watches run against, after exclusion
    #[must_use]
    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    pub fn set_namespaces(&mut self, namespaces: Vec<String>) {
        self.namespaces = self.namespace_filter.filter(namespaces);
    }

    /// List the cluster's namespaces once and keep those not excluded
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace list cannot be fetched
    pub async fn fetch_namespaces(&mut self) -> Result<()> {
        let all = list_namespace_names(self.client.clone()).await?;
        self.set_namespaces(all);
        info!("Watching {} namespaces after exclusion", self.namespaces.len());
        Ok(())
    }

    /// The tasks [`Self::start`] would create for `registry`
    #[must_use]
    pub fn plan(&self, registry: &SyncRegistry) -> Vec<TaskPlan> {
        plan_tasks(registry, &self.namespaces, &self.config.excluded_resources)
    }

    /// Start every resource type of `registry` that is not excluded
    ///
    /// A type that fails to start is logged and skipped. Returns the number of started types.
    pub fn start(&mut self, registry: SyncRegistry) -> usize {
        let registry = registry.without(&self.config.excluded_resources);
        let ctx = SyncContext {
            client: self.client.clone(),
            store: self.config.store.clone(),
            convert: Arc::new(ConvertContext {
                cluster: self.config.store.cluster.clone(),
            }),
            clock: self.clock.clone(),
        };

        let mut started = 0;
        for task in registry.iter() {
            let token = self.root.child_token();
            match task.start(&ctx, &self.namespaces, token.clone()) {
                Ok(sync) => {
                    self.running.push((token, sync));
                    started += 1;
                }
                Err(e) => {
                    error!("❌ Could not start {}: {}", task.name(), e);
                }
            }
        }
        info!("🚀 Started {} of {} resource types", started, registry.len());
        started
    }

    /// Cancel every running task; in-flight writes are not waited for
    pub fn stop(&self) {
        info!("🛑 Stopping {} resource watchers", self.running.len());
        for (token, _) in &self.running {
            token.cancel();
        }
        self.root.cancel();
    }

    /// Stop, wait for every task to exit and, when `drain` is set, flush every store to disk
    pub async fn shutdown(self, drain: bool) {
        self.stop();
        let mut stores: Vec<Arc<dyn Flushable>> = Vec::new();
        for (_, sync) in self.running {
            for handle in sync.handles {
                if let Err(e) = handle.await {
                    warn!("Task of {} did not exit cleanly: {}", sync.name, e);
                }
            }
            stores.push(sync.store);
        }

        if drain {
            for store in stores {
                if let Err(e) = store.flush_to_disk().await {
                    warn!("Error when flushing {}: {}", store.name(), e);
                }
            }
            info!("💾 All stores flushed");
        }
    }

    /// Names of the resource types currently running
    #[must_use]
    pub fn running(&self) -> Vec<&str> {
        self.running.iter().map(|(_, sync)| sync.name.as_str()).collect()
    }

    /// Write the server's preferred API resources to `apiresources_resource`
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails or the files cannot be written
    pub async fn dump_api_resources(&self) -> Result<()> {
        let discovery = Discovery::new(self.client.clone()).run().await?;
        let mut lines = Vec::new();
        for group in discovery.groups() {
            for (resource, capabilities) in group.recommended_resources() {
                lines.push(format!(
                    "{} {} {} {}\n",
                    resource.plural,
                    resource.api_version,
                    matches!(capabilities.scope, Scope::Namespaced),
                    resource.kind
                ));
            }
        }
        lines.sort();

        let dest_dir = self.config.store.cluster_dir();
        std::fs::create_dir_all(&dest_dir)?;
        write_atomic(&dest_dir, "apiresources_header", API_RESOURCE_HEADER.as_bytes())?;
        write_atomic(&dest_dir, "apiresources_resource", lines.concat().as_bytes())?;
        info!("📚 Dumped {} api resources", lines.len());
        Ok(())
    }
}
