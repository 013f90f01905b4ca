/**
 * Display records for the resource types mirrored by default
 *
 * Every type is summarized into the same `ResourceRecord` shape: identity,
 * labels, creation time and a few type-specific columns. Each type has a
 * converter and a header; `default_registry` wires them to a sync strategy.
 */
use crate::k8s::cache::config::CoordinatorConfig;
use crate::k8s::cache::sync_task::{ConvertContext, SyncRegistry, SyncStrategy, SyncTask};
use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::autoscaling::v1::HorizontalPodAutoscaler;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ConfigMap, Endpoints, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod, Secret, Service,
    ServiceAccount,
};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Summary of one cluster object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub cluster: String,
    /// Empty for cluster-scoped objects
    pub namespace: String,
    pub name: String,
    pub created: Option<DateTime<Utc>>,
    pub labels: BTreeMap<String, String>,
    /// Type-specific columns, in header order
    pub fields: Vec<String>,
}

impl ResourceRecord {
    fn from_object<K: Resource>(object: &K, ctx: &ConvertContext, fields: Vec<String>) -> Self {
        Self {
            cluster: ctx.cluster.clone(),
            namespace: object.namespace().unwrap_or_default(),
            name: object.name_any(),
            created: created_at(object),
            labels: object.labels().clone(),
            fields,
        }
    }

    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> String {
        self.created
            .map_or_else(|| "None".to_string(), |created| format_age(now - created))
    }

    /// One display line: cluster, namespace (if any), name, columns, age, labels
    #[must_use]
    pub fn to_line(&self, now: DateTime<Utc>) -> String {
        let mut columns = vec![self.cluster.clone()];
        if !self.namespace.is_empty() {
            columns.push(self.namespace.clone());
        }
        columns.push(self.name.clone());
        columns.extend(self.fields.iter().cloned());
        columns.push(self.age(now));
        columns.push(join_or_none(
            self.labels.iter().map(|(k, v)| format!("{k}={v}")),
        ));
        columns
            .into_iter()
            .map(|c| if c.is_empty() { "None".to_string() } else { c })
            .join(" ")
    }
}

/// Replace when any displayed column or label differs
#[must_use]
pub fn fields_changed(new: &ResourceRecord, old: &ResourceRecord) -> bool {
    new.fields != old.fields || new.labels != old.labels || new.created != old.created
}

fn created_at<K: Resource>(object: &K) -> Option<DateTime<Utc>> {
    object.meta().creation_timestamp.as_ref().map(|t| t.0)
}

#[must_use]
pub fn format_age(duration: Duration) -> String {
    if duration.num_days() > 0 {
        format!("{}d", duration.num_days())
    } else if duration.num_hours() > 0 {
        format!("{}h", duration.num_hours())
    } else if duration.num_minutes() > 0 {
        format!("{}m", duration.num_minutes())
    } else {
        format!("{}s", duration.num_seconds().max(0))
    }
}

fn or_none(value: Option<&String>) -> String {
    value
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| "None".to_string())
}

fn join_or_none<I: IntoIterator<Item = String>>(items: I) -> String {
    let joined = items.into_iter().join(",");
    if joined.is_empty() {
        "None".to_string()
    } else {
        joined
    }
}

fn ratio(current: Option<i32>, desired: Option<i32>) -> String {
    format!("{}/{}", current.unwrap_or(0), desired.unwrap_or(0))
}

pub const POD_HEADER: &str = "Cluster Namespace Name Phase PodIp Node Age Labels\n";
pub const CONFIGMAP_HEADER: &str = "Cluster Namespace Name Keys Age Labels\n";
pub const SERVICE_HEADER: &str = "Cluster Namespace Name Type ClusterIp Ports Selector Age Labels\n";
pub const SERVICE_ACCOUNT_HEADER: &str = "Cluster Namespace Name Secrets Age Labels\n";
pub const SECRET_HEADER: &str = "Cluster Namespace Name Type Data Age Labels\n";
pub const REPLICASET_HEADER: &str = "Cluster Namespace Name Replicas Owner Age Labels\n";
pub const DAEMONSET_HEADER: &str = "Cluster Namespace Name Desired Current Ready Age Labels\n";
pub const STATEFULSET_HEADER: &str = "Cluster Namespace Name Replicas Age Labels\n";
pub const DEPLOYMENT_HEADER: &str = "Cluster Namespace Name Ready UpToDate Available Age Labels\n";
pub const INGRESS_HEADER: &str = "Cluster Namespace Name Class Hosts Age Labels\n";
pub const CRONJOB_HEADER: &str = "Cluster Namespace Name Schedule Suspend Age Labels\n";
pub const JOB_HEADER: &str = "Cluster Namespace Name Completions Active Failed Age Labels\n";
pub const PERSISTENT_VOLUME_HEADER: &str = "Cluster Name Capacity StorageClass Status Claim Age Labels\n";
pub const PERSISTENT_VOLUME_CLAIM_HEADER: &str =
    "Cluster Namespace Name Status Volume StorageClass Age Labels\n";
pub const NODE_HEADER: &str = "Cluster Name Roles Version InternalIp Unschedulable Age Labels\n";
pub const NAMESPACE_HEADER: &str = "Cluster Name Status Age Labels\n";
pub const ENDPOINTS_HEADER: &str = "Cluster Namespace Name Ready NotReady Age Labels\n";
pub const HPA_HEADER: &str =
    "Cluster Namespace Name Reference Targets MinPods MaxPods Replicas Age Labels\n";

#[must_use]
pub fn pod_record(pod: &Pod, ctx: &ConvertContext) -> ResourceRecord {
    let status = pod.status.as_ref();
    let fields = vec![
        or_none(status.and_then(|s| s.phase.as_ref())),
        or_none(status.and_then(|s| s.pod_ip.as_ref())),
        or_none(pod.spec.as_ref().and_then(|s| s.node_name.as_ref())),
    ];
    ResourceRecord::from_object(pod, ctx, fields)
}

#[must_use]
pub fn configmap_record(cm: &ConfigMap, ctx: &ConvertContext) -> ResourceRecord {
    let keys = join_or_none(cm.data.iter().flat_map(|data| data.keys().cloned()));
    ResourceRecord::from_object(cm, ctx, vec![keys])
}

#[must_use]
pub fn service_record(svc: &Service, ctx: &ConvertContext) -> ResourceRecord {
    let spec = svc.spec.as_ref();
    let ports = join_or_none(spec.iter().flat_map(|s| s.ports.iter().flatten()).map(|p| {
        let name = p.name.clone().unwrap_or_default();
        match p.node_port {
            Some(node_port) if node_port > 0 => format!("{name}:{}/{node_port}", p.port),
            _ => format!("{name}:{}", p.port),
        }
    }));
    let selector = join_or_none(
        spec.iter()
            .flat_map(|s| s.selector.iter().flatten())
            .map(|(k, v)| format!("{k}={v}")),
    );
    let fields = vec![
        or_none(spec.and_then(|s| s.type_.as_ref())),
        or_none(spec.and_then(|s| s.cluster_ip.as_ref())),
        ports,
        selector,
    ];
    ResourceRecord::from_object(svc, ctx, fields)
}

#[must_use]
pub fn service_account_record(sa: &ServiceAccount, ctx: &ConvertContext) -> ResourceRecord {
    let secrets = sa.secrets.as_ref().map_or(0, Vec::len);
    ResourceRecord::from_object(sa, ctx, vec![secrets.to_string()])
}

#[must_use]
pub fn secret_record(secret: &Secret, ctx: &ConvertContext) -> ResourceRecord {
    let data = secret.data.as_ref().map_or(0, BTreeMap::len);
    let fields = vec![or_none(secret.type_.as_ref()), data.to_string()];
    ResourceRecord::from_object(secret, ctx, fields)
}

#[must_use]
pub fn replicaset_record(rs: &ReplicaSet, ctx: &ConvertContext) -> ResourceRecord {
    let desired = rs.spec.as_ref().and_then(|s| s.replicas);
    let current = rs.status.as_ref().map(|s| s.replicas);
    let owner = join_or_none(
        rs.owner_references()
            .iter()
            .map(|o| format!("{}/{}", o.kind, o.name)),
    );
    ResourceRecord::from_object(rs, ctx, vec![ratio(current, desired), owner])
}

#[must_use]
pub fn daemonset_record(ds: &DaemonSet, ctx: &ConvertContext) -> ResourceRecord {
    let status = ds.status.as_ref();
    let fields = vec![
        status.map_or(0, |s| s.desired_number_scheduled).to_string(),
        status.map_or(0, |s| s.current_number_scheduled).to_string(),
        status.map_or(0, |s| s.number_ready).to_string(),
    ];
    ResourceRecord::from_object(ds, ctx, fields)
}

#[must_use]
pub fn statefulset_record(sts: &StatefulSet, ctx: &ConvertContext) -> ResourceRecord {
    let desired = sts.spec.as_ref().and_then(|s| s.replicas);
    let ready = sts.status.as_ref().and_then(|s| s.ready_replicas);
    ResourceRecord::from_object(sts, ctx, vec![ratio(ready, desired)])
}

#[must_use]
pub fn deployment_record(deploy: &Deployment, ctx: &ConvertContext) -> ResourceRecord {
    let desired = deploy.spec.as_ref().and_then(|s| s.replicas);
    let status = deploy.status.as_ref();
    let fields = vec![
        ratio(status.and_then(|s| s.ready_replicas), desired),
        status.and_then(|s| s.updated_replicas).unwrap_or(0).to_string(),
        status.and_then(|s| s.available_replicas).unwrap_or(0).to_string(),
    ];
    ResourceRecord::from_object(deploy, ctx, fields)
}

#[must_use]
pub fn ingress_record(ingress: &Ingress, ctx: &ConvertContext) -> ResourceRecord {
    let spec = ingress.spec.as_ref();
    let hosts = join_or_none(
        spec.iter()
            .flat_map(|s| s.rules.iter().flatten())
            .filter_map(|rule| rule.host.clone()),
    );
    let fields = vec![or_none(spec.and_then(|s| s.ingress_class_name.as_ref())), hosts];
    ResourceRecord::from_object(ingress, ctx, fields)
}

#[must_use]
pub fn cronjob_record(cj: &CronJob, ctx: &ConvertContext) -> ResourceRecord {
    let spec = cj.spec.as_ref();
    let fields = vec![
        or_none(spec.map(|s| &s.schedule)),
        spec.and_then(|s| s.suspend).unwrap_or(false).to_string(),
    ];
    ResourceRecord::from_object(cj, ctx, fields)
}

#[must_use]
pub fn job_record(job: &Job, ctx: &ConvertContext) -> ResourceRecord {
    let status = job.status.as_ref();
    let completions = job.spec.as_ref().and_then(|s| s.completions);
    let fields = vec![
        ratio(status.and_then(|s| s.succeeded), completions),
        status.and_then(|s| s.active).unwrap_or(0).to_string(),
        status.and_then(|s| s.failed).unwrap_or(0).to_string(),
    ];
    ResourceRecord::from_object(job, ctx, fields)
}

#[must_use]
pub fn persistent_volume_record(pv: &PersistentVolume, ctx: &ConvertContext) -> ResourceRecord {
    let spec = pv.spec.as_ref();
    let capacity = join_or_none(
        spec.iter()
            .flat_map(|s| s.capacity.iter().flatten())
            .map(|(k, v)| format!("{k}={}", v.0)),
    );
    let claim = spec
        .and_then(|s| s.claim_ref.as_ref())
        .map(|c| {
            format!(
                "{}/{}",
                c.namespace.clone().unwrap_or_default(),
                c.name.clone().unwrap_or_default()
            )
        });
    let fields = vec![
        capacity,
        or_none(spec.and_then(|s| s.storage_class_name.as_ref())),
        or_none(pv.status.as_ref().and_then(|s| s.phase.as_ref())),
        or_none(claim.as_ref()),
    ];
    ResourceRecord::from_object(pv, ctx, fields)
}

#[must_use]
pub fn persistent_volume_claim_record(
    pvc: &PersistentVolumeClaim,
    ctx: &ConvertContext,
) -> ResourceRecord {
    let spec = pvc.spec.as_ref();
    let fields = vec![
        or_none(pvc.status.as_ref().and_then(|s| s.phase.as_ref())),
        or_none(spec.and_then(|s| s.volume_name.as_ref())),
        or_none(spec.and_then(|s| s.storage_class_name.as_ref())),
    ];
    ResourceRecord::from_object(pvc, ctx, fields)
}

#[must_use]
pub fn node_record(node: &Node, ctx: &ConvertContext) -> ResourceRecord {
    let roles = join_or_none(
        node.labels()
            .keys()
            .filter_map(|k| k.strip_prefix("node-role.kubernetes.io/"))
            .map(str::to_string),
    );
    let status = node.status.as_ref();
    let version = status
        .and_then(|s| s.node_info.as_ref())
        .map(|info| info.kubelet_version.clone());
    let internal_ip = status
        .iter()
        .flat_map(|s| s.addresses.iter().flatten())
        .find(|a| a.type_ == "InternalIP")
        .map(|a| a.address.clone());
    let unschedulable = node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false);
    let fields = vec![
        roles,
        or_none(version.as_ref()),
        or_none(internal_ip.as_ref()),
        unschedulable.to_string(),
    ];
    ResourceRecord::from_object(node, ctx, fields)
}

#[must_use]
pub fn namespace_record(ns: &Namespace, ctx: &ConvertContext) -> ResourceRecord {
    let phase = ns.status.as_ref().and_then(|s| s.phase.as_ref());
    ResourceRecord::from_object(ns, ctx, vec![or_none(phase)])
}

#[must_use]
pub fn endpoints_record(ep: &Endpoints, ctx: &ConvertContext) -> ResourceRecord {
    let mut ready = Vec::new();
    let mut not_ready = Vec::new();
    for subset in ep.subsets.iter().flatten() {
        let ports = subset.ports.iter().flatten().map(|p| p.port).collect_vec();
        for address in subset.addresses.iter().flatten() {
            if ports.is_empty() {
                ready.push(address.ip.clone());
            } else {
                ready.extend(ports.iter().map(|port| format!("{}:{port}", address.ip)));
            }
        }
        not_ready.extend(
            subset
                .not_ready_addresses
                .iter()
                .flatten()
                .map(|a| a.ip.clone()),
        );
    }
    ResourceRecord::from_object(ep, ctx, vec![join_or_none(ready), join_or_none(not_ready)])
}

#[must_use]
pub fn hpa_record(hpa: &HorizontalPodAutoscaler, ctx: &ConvertContext) -> ResourceRecord {
    let spec = hpa.spec.as_ref();
    let status = hpa.status.as_ref();
    let reference = spec.map(|s| format!("{}/{}", s.scale_target_ref.kind, s.scale_target_ref.name));
    let current = status
        .and_then(|s| s.current_cpu_utilization_percentage)
        .map_or_else(|| "<unknown>".to_string(), |c| format!("{c}%"));
    let target = spec
        .and_then(|s| s.target_cpu_utilization_percentage)
        .map_or_else(|| "<unknown>".to_string(), |t| format!("{t}%"));
    let fields = vec![
        or_none(reference.as_ref()),
        format!("{current}/{target}"),
        spec.and_then(|s| s.min_replicas).unwrap_or(1).to_string(),
        spec.map_or(0, |s| s.max_replicas).to_string(),
        status.map_or(0, |s| s.current_replicas).to_string(),
    ];
    ResourceRecord::from_object(hpa, ctx, fields)
}

/// The resource types mirrored by default and how each is kept fresh
#[must_use]
pub fn default_registry(config: &CoordinatorConfig) -> SyncRegistry {
    let split = SyncStrategy::Watch {
        split_by_namespace: true,
    };
    let watch = SyncStrategy::Watch {
        split_by_namespace: false,
    };
    let mut registry = SyncRegistry::new();

    registry.register(SyncTask::<Pod, _>::namespaced("pods", POD_HEADER, split, pod_record, fields_changed));
    registry.register(SyncTask::<ConfigMap, _>::namespaced(
        "configmaps",
        CONFIGMAP_HEADER,
        split,
        configmap_record,
        fields_changed,
    ));
    registry.register(SyncTask::<Service, _>::namespaced(
        "services",
        SERVICE_HEADER,
        watch,
        service_record,
        fields_changed,
    ));
    registry.register(SyncTask::<ServiceAccount, _>::namespaced(
        "serviceaccounts",
        SERVICE_ACCOUNT_HEADER,
        watch,
        service_account_record,
        fields_changed,
    ));
    registry.register(SyncTask::<Secret, _>::namespaced(
        "secrets",
        SECRET_HEADER,
        watch,
        secret_record,
        fields_changed,
    ));
    registry.register(SyncTask::<ReplicaSet, _>::namespaced(
        "replicasets",
        REPLICASET_HEADER,
        watch,
        replicaset_record,
        fields_changed,
    ));
    registry.register(SyncTask::<DaemonSet, _>::namespaced(
        "daemonsets",
        DAEMONSET_HEADER,
        watch,
        daemonset_record,
        fields_changed,
    ));
    registry.register(SyncTask::<StatefulSet, _>::namespaced(
        "statefulsets",
        STATEFULSET_HEADER,
        watch,
        statefulset_record,
        fields_changed,
    ));
    registry.register(SyncTask::<Deployment, _>::namespaced(
        "deployments",
        DEPLOYMENT_HEADER,
        watch,
        deployment_record,
        fields_changed,
    ));
    registry.register(SyncTask::<Ingress, _>::namespaced(
        "ingresses",
        INGRESS_HEADER,
        watch,
        ingress_record,
        fields_changed,
    ));
    registry.register(SyncTask::<CronJob, _>::namespaced(
        "cronjobs",
        CRONJOB_HEADER,
        watch,
        cronjob_record,
        fields_changed,
    ));
    registry.register(SyncTask::<Job, _>::namespaced("jobs", JOB_HEADER, watch, job_record, fields_changed));
    registry.register(SyncTask::<Endpoints, _>::namespaced(
        "endpoints",
        ENDPOINTS_HEADER,
        watch,
        endpoints_record,
        fields_changed,
    ));
    registry.register(SyncTask::<HorizontalPodAutoscaler, _>::namespaced(
        "horizontalpodautoscalers",
        HPA_HEADER,
        watch,
        hpa_record,
        fields_changed,
    ));
    registry.register(SyncTask::<PersistentVolumeClaim, _>::namespaced(
        "persistentvolumeclaims",
        PERSISTENT_VOLUME_CLAIM_HEADER,
        watch,
        persistent_volume_claim_record,
        fields_changed,
    ));
    registry.register(SyncTask::<PersistentVolume, _>::cluster(
        "persistentvolumes",
        PERSISTENT_VOLUME_HEADER,
        watch,
        persistent_volume_record,
        fields_changed,
    ));
    registry.register(SyncTask::<Node, _>::cluster(
        "nodes",
        NODE_HEADER,
        SyncStrategy::Poll {
            period: config.node_polling_period,
        },
        node_record,
        fields_changed,
    ));
    registry.register(SyncTask::<Namespace, _>::cluster(
        "namespaces",
        NAMESPACE_HEADER,
        SyncStrategy::Poll {
            period: config.namespace_polling_period,
        },
        namespace_record,
        fields_changed,
    ));

    registry
}
