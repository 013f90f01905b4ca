use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use kubemirror::k8s::cache::config::{
    DEFAULT_CACHE_DIR, DEFAULT_FETCHER_CACHE_DIR, DEFAULT_MINIMUM_CACHE_SECS,
    DEFAULT_NAMESPACE_POLLING_PERIOD_SECS, DEFAULT_NODE_POLLING_PERIOD_SECS,
    DEFAULT_TIME_BETWEEN_FULL_DUMP_SECS,
};
use kubemirror::k8s::cache::{
    CoordinatorConfig, FetcherConfig, RemoteCacheFetcher, ResourceCoordinator, StoreConfig,
};
use kubemirror::k8s::resources::{ResourceRecord, default_registry};
use kubemirror::k8s::{USER_AGENT, client};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Kube context to use instead of the current one
    #[arg(long, global = true)]
    context: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the cluster and keep the local mirror up to date until interrupted
    Build {
        /// Root of the mirror
        #[arg(long, default_value = DEFAULT_CACHE_DIR)]
        cache_dir: PathBuf,

        /// Name of the cluster directory; defaults to the kube context name
        #[arg(long)]
        cluster: Option<String>,

        /// Regular expression of namespaces to leave out (repeatable)
        #[arg(long = "exclude-namespace")]
        excluded_namespaces: Vec<String>,

        /// Resource type to leave out, e.g. `secrets` (repeatable)
        #[arg(long = "exclude-resource")]
        excluded_resources: Vec<String>,

        /// Minimum seconds between two full dumps of a resource type
        #[arg(long, default_value_t = DEFAULT_TIME_BETWEEN_FULL_DUMP_SECS)]
        time_between_full_dump: u64,

        /// Seconds between two node lists
        #[arg(long, default_value_t = DEFAULT_NODE_POLLING_PERIOD_SECS)]
        node_polling_period: u64,

        /// Seconds between two namespace lists
        #[arg(long, default_value_t = DEFAULT_NAMESPACE_POLLING_PERIOD_SECS)]
        namespace_polling_period: u64,
    },
    /// Print resources served by a remote mirror, using the local fetcher cache when possible
    Fetch {
        /// Base URL of the remote mirror
        #[arg(long)]
        endpoint: String,

        #[arg(long, default_value = DEFAULT_FETCHER_CACHE_DIR)]
        cache_path: PathBuf,

        /// Seconds during which a cached file is used without asking the server
        #[arg(long, default_value_t = DEFAULT_MINIMUM_CACHE_SECS)]
        minimum_cache: u64,

        /// Resource types to print, e.g. `pods`
        #[arg(required = true)]
        resources: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Build {
            cache_dir,
            cluster,
            excluded_namespaces,
            excluded_resources,
            time_between_full_dump,
            node_polling_period,
            namespace_polling_period,
        } => {
            let config = CoordinatorConfig {
                store: StoreConfig {
                    cache_dir,
                    cluster: client::cluster_name(cluster.as_deref(), args.context.as_deref()),
                    time_between_full_dump: Duration::from_secs(time_between_full_dump),
                },
                excluded_namespaces,
                excluded_resources,
                node_polling_period: Duration::from_secs(node_polling_period),
                namespace_polling_period: Duration::from_secs(namespace_polling_period),
            };
            build(config, args.context.as_deref()).await
        }
        Command::Fetch {
            endpoint,
            cache_path,
            minimum_cache,
            resources,
        } => {
            let config = FetcherConfig {
                cache_path,
                context: client::cluster_name(None, args.context.as_deref()),
                endpoint,
                minimum_cache: Duration::from_secs(minimum_cache),
            };
            fetch(config, &resources).await
        }
    }
}

async fn build(config: CoordinatorConfig, context: Option<&str>) -> anyhow::Result<()> {
    client::install_crypto_provider();

    let client = client::new(Some(USER_AGENT), context)
        .await
        .context("cannot create kubernetes client")?;
    info!(
        "📂 Mirroring cluster {} into {}",
        config.store.cluster,
        config.store.cluster_dir().display()
    );

    let registry = default_registry(&config);
    let mut coordinator = ResourceCoordinator::new(client, config)?;
    coordinator
        .fetch_namespaces()
        .await
        .context("cannot list namespaces")?;
    if let Err(e) = coordinator.dump_api_resources().await {
        warn!("Error when dumping api resources: {}", e);
    }
    coordinator.start(registry);

    tokio::signal::ctrl_c().await?;
    info!("🛑 Interrupted, flushing stores");
    coordinator.shutdown(true).await;
    Ok(())
}

async fn fetch(config: FetcherConfig, resources: &[String]) -> anyhow::Result<()> {
    let fetcher = RemoteCacheFetcher::http(config);
    let now = Utc::now();
    for resource in resources {
        let records = fetcher
            .fetch_records::<ResourceRecord>(resource)
            .await
            .with_context(|| format!("cannot fetch {resource}"))?;
        for record in records.values() {
            println!("{}", record.to_line(now));
        }
    }
    Ok(())
}
