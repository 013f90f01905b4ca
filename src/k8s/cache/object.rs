use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// Key of a record in a store: `<namespace>_<name>`
#[must_use]
pub fn resource_key(namespace: &str, name: &str) -> String {
    format!("{namespace}_{name}")
}

/// What a store needs to know about an object besides its converted record
pub trait ObjectIdentity {
    /// Namespace, empty for cluster-scoped objects
    fn object_namespace(&self) -> String;
    fn object_name(&self) -> String;
    fn object_labels(&self) -> BTreeMap<String, String>;

    fn resource_key(&self) -> String {
        resource_key(&self.object_namespace(), &self.object_name())
    }
}

impl<K: Resource> ObjectIdentity for K {
    fn object_namespace(&self) -> String {
        self.namespace().unwrap_or_default()
    }

    fn object_name(&self) -> String {
        self.name_any()
    }

    fn object_labels(&self) -> BTreeMap<String, String> {
        self.labels().clone()
    }
}

/// A converted record together with the identity it is stored and indexed under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry<R> {
    pub key: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub record: R,
}

impl<R> StoreEntry<R> {
    #[must_use]
    pub fn new(namespace: &str, name: &str, labels: BTreeMap<String, String>, record: R) -> Self {
        Self {
            key: resource_key(namespace, name),
            namespace: namespace.to_string(),
            labels,
            record,
        }
    }

    /// Resolve identity once at the subscription boundary and attach the converted record
    pub fn from_object<O: ObjectIdentity>(object: &O, record: R) -> Self {
        let namespace = object.object_namespace();
        Self {
            key: resource_key(&namespace, &object.object_name()),
            namespace,
            labels: object.object_labels(),
            record,
        }
    }
}
