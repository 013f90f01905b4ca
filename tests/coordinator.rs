use hyper::http::{Request, Response, StatusCode};
use k8s_openapi::api::core::v1::Namespace;
use kube::Client;
use kube::client::Body;
use kubemirror::k8s::cache::{
    CoordinatorConfig, ResourceCoordinator, StoreConfig, SyncRegistry, SyncStrategy, SyncTask,
    TaskPlan, plan_tasks,
};
use kubemirror::k8s::resources::{NAMESPACE_HEADER, default_registry, fields_changed, namespace_record};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

const NAMESPACE_LIST: &str = r#"{
  "apiVersion": "v1",
  "kind": "NamespaceList",
  "metadata": {"resourceVersion": "1"},
  "items": [
    {"metadata": {"name": "default", "labels": {"team": "core"}}},
    {"metadata": {"name": "kube-system"}},
    {"metadata": {"name": "shop", "labels": {"team": "sales"}}}
  ]
}"#;

const API_VERSIONS: &str = r#"{"kind": "APIVersions", "versions": ["v1"], "serverAddressByClientCIDRs": []}"#;

const API_GROUPS: &str = r#"{"kind": "APIGroupList", "apiVersion": "v1", "groups": []}"#;

const CORE_RESOURCES: &str = r#"{
  "kind": "APIResourceList",
  "groupVersion": "v1",
  "resources": [
    {"name": "pods", "singularName": "pod", "namespaced": true, "kind": "Pod", "verbs": ["get", "list", "watch"]},
    {"name": "namespaces", "singularName": "namespace", "namespaced": false, "kind": "Namespace", "verbs": ["get", "list", "watch"]}
  ]
}"#;

/// Client answering a fixed set of read-only paths
fn mock_client() -> (Client, JoinHandle<()>) {
    let (service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
    let server = tokio::spawn(async move {
        while let Some((request, send)) = handle.next_request().await {
            let body = match request.uri().path() {
                "/api/v1/namespaces" => Some(NAMESPACE_LIST),
                "/api" => Some(API_VERSIONS),
                "/apis" => Some(API_GROUPS),
                "/api/v1" => Some(CORE_RESOURCES),
                _ => None,
            };
            let response = match body {
                Some(body) => Response::builder().body(Body::from(body.as_bytes().to_vec())),
                None => Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Body::from(Vec::new())),
            };
            send.send_response(response.unwrap());
        }
    });
    (Client::new(service, "default"), server)
}

fn config(dir: &TempDir) -> CoordinatorConfig {
    CoordinatorConfig {
        store: StoreConfig {
            cache_dir: dir.path().to_path_buf(),
            cluster: "prod".to_string(),
            time_between_full_dump: Duration::from_secs(60),
        },
        excluded_namespaces: vec!["^kube-".to_string()],
        excluded_resources: vec!["secrets".to_string()],
        ..CoordinatorConfig::default()
    }
}

async fn wait_for_content(path: &Path, needle: &str) -> String {
    for _ in 0..100 {
        if let Ok(content) = std::fs::read_to_string(path) {
            if content.contains(needle) {
                return content;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{} never contained {needle}", path.display());
}

#[test]
fn test_plan_splits_per_namespace_and_skips_excluded_types() {
    let config = CoordinatorConfig::default();
    let registry = default_registry(&config);
    let namespaces = vec!["default".to_string(), "shop".to_string()];

    let plan = plan_tasks(&registry, &namespaces, &["secrets".to_string()]);

    let pods: Vec<&TaskPlan> = plan.iter().filter(|t| t.resource == "pods").collect();
    assert_eq!(pods.len(), 2);
    assert_eq!(pods[0].namespace.as_deref(), Some("default"));
    assert_eq!(pods[1].namespace.as_deref(), Some("shop"));

    let services: Vec<&TaskPlan> = plan.iter().filter(|t| t.resource == "services").collect();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].namespace, None);

    let nodes: Vec<&TaskPlan> = plan.iter().filter(|t| t.resource == "nodes").collect();
    assert_eq!(
        nodes[0].strategy,
        SyncStrategy::Poll {
            period: config.node_polling_period
        }
    );

    assert!(plan.iter().all(|t| t.resource != "secrets"));
}

#[tokio::test]
async fn test_fetch_namespaces_applies_exclusions() {
    let dir = tempfile::tempdir().unwrap();
    let (client, server) = mock_client();
    let mut coordinator = ResourceCoordinator::new(client, config(&dir)).unwrap();

    coordinator.fetch_namespaces().await.unwrap();
    assert_eq!(
        coordinator.namespaces(),
        &["default".to_string(), "shop".to_string()]
    );

    let plan = coordinator.plan(&default_registry(&config(&dir)));
    assert_eq!(plan.iter().filter(|t| t.resource == "configmaps").count(), 2);

    drop(coordinator);
    server.abort();
}

#[tokio::test]
async fn test_invalid_namespace_exclusion_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (client, server) = mock_client();
    let config = CoordinatorConfig {
        excluded_namespaces: vec!["(".to_string()],
        ..config(&dir)
    };

    assert!(ResourceCoordinator::new(client, config).is_err());
    server.abort();
}

#[tokio::test]
async fn test_polled_type_is_mirrored_and_drained_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let (client, server) = mock_client();
    let mut coordinator = ResourceCoordinator::new(client, config(&dir)).unwrap();

    let mut registry = SyncRegistry::new();
    registry.register(SyncTask::<Namespace, _>::cluster(
        "namespaces",
        NAMESPACE_HEADER,
        SyncStrategy::Poll {
            period: Duration::from_secs(3600),
        },
        namespace_record,
        fields_changed,
    ));
    assert_eq!(coordinator.start(registry), 1);
    assert_eq!(coordinator.running(), vec!["namespaces"]);

    let cluster_dir = dir.path().join("prod");
    let snapshot = wait_for_content(&cluster_dir.join("namespaces_resource"), "kube-system").await;
    // cluster-scoped keys have an empty namespace part
    assert!(snapshot.contains("\"_shop\""));

    coordinator.shutdown(true).await;

    let header = std::fs::read_to_string(cluster_dir.join("namespaces_header")).unwrap();
    assert_eq!(header, NAMESPACE_HEADER);
    let label_file = std::fs::read_to_string(cluster_dir.join("namespaces_label")).unwrap();
    assert_eq!(label_file, "prod team=core 1\nprod team=sales 1");
    server.abort();
}

#[tokio::test]
async fn test_excluded_type_is_not_started() {
    let dir = tempfile::tempdir().unwrap();
    let (client, server) = mock_client();
    let config = CoordinatorConfig {
        excluded_resources: vec!["namespaces".to_string()],
        ..config(&dir)
    };
    let mut coordinator = ResourceCoordinator::new(client, config).unwrap();

    let mut registry = SyncRegistry::new();
    registry.register(SyncTask::<Namespace, _>::cluster(
        "namespaces",
        NAMESPACE_HEADER,
        SyncStrategy::Poll {
            period: Duration::from_secs(3600),
        },
        namespace_record,
        fields_changed,
    ));
    assert_eq!(coordinator.start(registry), 0);
    assert!(coordinator.running().is_empty());
    assert!(!dir.path().join("prod/namespaces_header").exists());

    coordinator.shutdown(false).await;
    server.abort();
}

#[tokio::test]
async fn test_api_resources_are_dumped() {
    let dir = tempfile::tempdir().unwrap();
    let (client, server) = mock_client();
    let coordinator = ResourceCoordinator::new(client, config(&dir)).unwrap();

    coordinator.dump_api_resources().await.unwrap();

    let cluster_dir = dir.path().join("prod");
    let header = std::fs::read_to_string(cluster_dir.join("apiresources_header")).unwrap();
    assert_eq!(header, "Name ApiVersion Namespaced Kind\n");
    let resources = std::fs::read_to_string(cluster_dir.join("apiresources_resource")).unwrap();
    assert_eq!(resources, "namespaces v1 false Namespace\npods v1 true Pod\n");
    server.abort();
}
