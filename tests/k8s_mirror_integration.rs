/// Integration test that mirrors a real K8s cluster into a temporary directory
///
/// Run with: cargo test --test `k8s_mirror_integration` -- --nocapture
///
/// This test will:
/// 1. Skip if no K8s cluster is available
/// 2. Mirror namespaces and pods for a few seconds
/// 3. Verify the snapshot, label and header files are consistent with the cluster
use kubemirror::k8s::USER_AGENT;
use kubemirror::k8s::cache::{CoordinatorConfig, ResourceCoordinator, StoreConfig, load_snapshot};
use kubemirror::k8s::client::{install_crypto_provider, new as create_client};
use kubemirror::k8s::namespaces::list_namespace_names;
use kubemirror::k8s::resources::{ResourceRecord, default_registry};
use std::collections::BTreeMap;
use std::sync::Once;
use std::time::Duration;

static INIT: Once = Once::new();

fn init_rustls() {
    INIT.call_once(|| {
        install_crypto_provider();
    });
}

async fn k8s_client() -> Option<kube::Client> {
    init_rustls();
    let client = create_client(Some(USER_AGENT), None).await.ok()?;
    list_namespace_names(client.clone()).await.ok()?;
    Some(client)
}

#[tokio::test]
async fn test_mirror_real_cluster() -> anyhow::Result<()> {
    let Some(client) = k8s_client().await else {
        eprintln!("Skipping K8s mirror test - no cluster available");
        return Ok(());
    };

    let dir = tempfile::tempdir()?;
    let config = CoordinatorConfig {
        store: StoreConfig {
            cache_dir: dir.path().to_path_buf(),
            cluster: "it".to_string(),
            time_between_full_dump: Duration::from_secs(1),
        },
        excluded_resources: vec!["secrets".to_string()],
        ..CoordinatorConfig::default()
    };
    let registry = default_registry(&config);
    let mut coordinator = ResourceCoordinator::new(client.clone(), config)?;
    coordinator.fetch_namespaces().await?;
    coordinator.dump_api_resources().await?;
    assert!(coordinator.start(registry) > 0);

    tokio::time::sleep(Duration::from_secs(5)).await;
    coordinator.shutdown(true).await;

    let cluster_dir = dir.path().join("it");
    let namespaces: BTreeMap<String, ResourceRecord> =
        load_snapshot(&cluster_dir.join("namespaces_resource"))?;
    let live = list_namespace_names(client).await?;
    for name in &live {
        assert!(namespaces.contains_key(&format!("_{name}")), "namespace {name} not mirrored");
    }

    let pods: BTreeMap<String, ResourceRecord> = load_snapshot(&cluster_dir.join("pods_resource"))?;
    for (key, pod) in &pods {
        assert_eq!(key, &format!("{}_{}", pod.namespace, pod.name));
    }

    assert!(cluster_dir.join("pods_header").exists());
    assert!(cluster_dir.join("pods_label").exists());
    assert!(cluster_dir.join("apiresources_resource").exists());
    assert!(!cluster_dir.join("secrets_header").exists());
    Ok(())
}
