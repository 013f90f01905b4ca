/**
 * Configuration constants and settings for the resource mirror
 */
use std::path::PathBuf;
use std::time::Duration;

/// Interval of the per-store background task that writes the label file
/// and any full dump suppressed by the debounce window
pub const LABEL_DUMP_INTERVAL_SECS: u64 = 5;

/// Default minimum time between two full dumps of a resource snapshot
pub const DEFAULT_TIME_BETWEEN_FULL_DUMP_SECS: u64 = 60;

/// Default polling period for nodes (in seconds)
pub const DEFAULT_NODE_POLLING_PERIOD_SECS: u64 = 300; // 5 minutes

/// Default polling period for namespaces (in seconds)
pub const DEFAULT_NAMESPACE_POLLING_PERIOD_SECS: u64 = 600; // 10 minutes

/// Default age under which the offline fetcher trusts its cache file without asking the server
pub const DEFAULT_MINIMUM_CACHE_SECS: u64 = 60;

/// Default root of the mirror when no `--cache-dir` is given
pub const DEFAULT_CACHE_DIR: &str = ".cache/kubemirror";

/// Default root of the offline fetcher cache
pub const DEFAULT_FETCHER_CACHE_DIR: &str = ".cache/kubemirror/fetcher";

/// Cluster directory name used when no kube context name is available
pub const DEFAULT_CLUSTER_NAME: &str = "incluster";

/// Where a store writes its files: `<cache_dir>/<cluster>/<resource>_{resource,label,header}`
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub cache_dir: PathBuf,
    pub cluster: String,
    pub time_between_full_dump: Duration,
}

impl StoreConfig {
    #[must_use]
    pub fn cluster_dir(&self) -> PathBuf {
        self.cache_dir.join(&self.cluster)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            cluster: DEFAULT_CLUSTER_NAME.to_string(),
            time_between_full_dump: Duration::from_secs(DEFAULT_TIME_BETWEEN_FULL_DUMP_SECS),
        }
    }
}

/// Configuration of the watch/poll coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub store: StoreConfig,
    /// Regular expressions; a namespace matching any of them gets no per-namespace task
    pub excluded_namespaces: Vec<String>,
    /// Resource type names (e.g. `secrets`) that get no task at all
    pub excluded_resources: Vec<String>,
    pub node_polling_period: Duration,
    pub namespace_polling_period: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            excluded_namespaces: Vec::new(),
            excluded_resources: Vec::new(),
            node_polling_period: Duration::from_secs(DEFAULT_NODE_POLLING_PERIOD_SECS),
            namespace_polling_period: Duration::from_secs(DEFAULT_NAMESPACE_POLLING_PERIOD_SECS),
        }
    }
}

/// Configuration of the offline fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub cache_path: PathBuf,
    pub context: String,
    pub endpoint: String,
    pub minimum_cache: Duration,
}

impl FetcherConfig {
    #[must_use]
    pub fn context_dir(&self) -> PathBuf {
        self.cache_path.join(&self.context)
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from(DEFAULT_FETCHER_CACHE_DIR),
            context: DEFAULT_CLUSTER_NAME.to_string(),
            endpoint: "http://localhost:8080".to_string(),
            minimum_cache: Duration::from_secs(DEFAULT_MINIMUM_CACHE_SECS),
        }
    }
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(LABEL_DUMP_INTERVAL_SECS > 0, "LABEL_DUMP_INTERVAL_SECS must be greater than 0");
    assert!(DEFAULT_NODE_POLLING_PERIOD_SECS > 0, "DEFAULT_NODE_POLLING_PERIOD_SECS must be greater than 0");
    assert!(
        DEFAULT_NAMESPACE_POLLING_PERIOD_SECS > 0,
        "DEFAULT_NAMESPACE_POLLING_PERIOD_SECS must be greater than 0"
    );
};
