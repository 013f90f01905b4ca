pub mod atomic_file;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod labels;
pub mod object;
pub mod remote_fetcher;
pub mod resource_store;
pub mod sync_task;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CoordinatorConfig, FetcherConfig, StoreConfig};
pub use coordinator::{ResourceCoordinator, TaskPlan, plan_tasks};
pub use labels::{LabelIndex, LabelKey};
pub use object::{ObjectIdentity, StoreEntry, resource_key};
pub use remote_fetcher::{CacheOrigin, Fetched, HttpSource, RemoteCacheFetcher, RemoteSource};
pub use resource_store::{Flushable, ResourceStore, UpsertOutcome, load_snapshot};
pub use sync_task::{ConvertContext, ResourceSync, SyncRegistry, SyncStrategy, SyncTask};
