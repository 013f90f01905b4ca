use futures::{StreamExt, stream};
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use kube::api::ObjectMeta;
use kube::runtime::watcher::{self, Event};
use kubemirror::error::Error;
use kubemirror::k8s::cache::sync_task::{run_poll, run_watch};
use kubemirror::k8s::cache::{ConvertContext, ManualClock, ResourceStore, StoreConfig, StoreEntry};
use kubemirror::k8s::resources::{ResourceRecord, fields_changed, pod_record};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn pod(namespace: &str, name: &str, app: &str, phase: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([("app".to_string(), app.to_string())])),
            ..ObjectMeta::default()
        },
        spec: None,
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..PodStatus::default()
        }),
    }
}

fn store(dir: &TempDir) -> Arc<ResourceStore<ResourceRecord>> {
    let config = StoreConfig {
        cache_dir: dir.path().to_path_buf(),
        cluster: "prod".to_string(),
        time_between_full_dump: Duration::from_secs(60),
    };
    Arc::new(
        ResourceStore::new(
            &config,
            "pods",
            "",
            fields_changed,
            Arc::new(ManualClock::default()),
        )
        .unwrap(),
    )
}

fn ctx() -> Arc<ConvertContext> {
    Arc::new(ConvertContext {
        cluster: "prod".to_string(),
    })
}

#[tokio::test]
async fn test_watch_events_are_applied_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);

    let events: Vec<Result<Event<Pod>, watcher::Error>> = vec![
        Ok(Event::Init),
        Ok(Event::InitApply(pod("shop", "a", "web", "Pending"))),
        Ok(Event::InitApply(pod("shop", "b", "db", "Running"))),
        Ok(Event::InitDone),
        Ok(Event::Apply(pod("shop", "a", "web", "Running"))),
        Ok(Event::Delete(pod("shop", "b", "db", "Running"))),
    ];
    run_watch(
        store.clone(),
        stream::iter(events),
        pod_record,
        ctx(),
        None,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(store.keys().await, vec!["shop_a".to_string()]);
    let a = store.get("shop_a").await.unwrap();
    assert_eq!(a.fields[0], "Running");
    assert_eq!(store.label_count("shop", "app=web").await, 1);
    assert_eq!(store.label_count("shop", "app=db").await, 0);
}

#[tokio::test]
async fn test_relist_of_one_namespace_keeps_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let convert = ConvertContext {
        cluster: "prod".to_string(),
    };
    for p in [pod("shop", "gone", "web", "Running"), pod("other", "x", "web", "Running")] {
        store
            .upsert(StoreEntry::from_object(&p, pod_record(&p, &convert)))
            .await;
    }

    let events: Vec<Result<Event<Pod>, watcher::Error>> = vec![
        Ok(Event::Init),
        Ok(Event::InitApply(pod("shop", "a", "web", "Running"))),
        Ok(Event::InitDone),
    ];
    run_watch(
        store.clone(),
        stream::iter(events),
        pod_record,
        ctx(),
        Some("shop".to_string()),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(
        store.keys().await,
        vec!["other_x".to_string(), "shop_a".to_string()]
    );
    assert_eq!(store.label_count("shop", "app=web").await, 1);
    assert_eq!(store.label_count("other", "app=web").await, 1);
}

#[tokio::test]
async fn test_cancelled_watch_stops_applying() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let events: Vec<Result<Event<Pod>, watcher::Error>> =
        vec![Ok(Event::Apply(pod("shop", "a", "web", "Running")))];
    let events = stream::iter(events).chain(stream::pending());
    run_watch(store.clone(), events, pod_record, ctx(), None, cancel).await;
    // either the event won the race or not, but the call returned
    assert!(store.len().await <= 1);
}

#[tokio::test]
async fn test_poll_replaces_content_and_survives_errors() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let cancel = CancellationToken::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let lister = {
        let calls = calls.clone();
        move || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    let p = pod("shop", "a", "web", "Running");
                    let convert = ConvertContext {
                        cluster: "prod".to_string(),
                    };
                    Ok(vec![StoreEntry::from_object(&p, pod_record(&p, &convert))])
                } else {
                    Err(Error::Custom("api unavailable".to_string()))
                }
            }
        }
    };
    let handle = tokio::spawn(run_poll(
        store.clone(),
        Duration::from_millis(10),
        cancel.clone(),
        lister,
    ));

    for _ in 0..100 {
        if calls.load(Ordering::SeqCst) >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel.cancel();
    handle.await.unwrap();

    assert!(calls.load(Ordering::SeqCst) >= 3);
    // failed polls leave the last good content in place
    assert_eq!(store.keys().await, vec!["shop_a".to_string()]);
}
