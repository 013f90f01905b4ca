use crate::error::Result;
use k8s_openapi::api::core::v1::Namespace as K8sNamespace;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use regex::Regex;
use tracing::{debug, info};

/// Namespaces matching any of these expressions are left out of per-namespace tasks
#[derive(Debug, Clone, Default)]
pub struct NamespaceFilter {
    excluded: Vec<Regex>,
}

impl NamespaceFilter {
    /// Compile the exclusion expressions
    ///
    /// # Errors
    ///
    /// Returns an error if any expression is not a valid regular expression
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let excluded = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { excluded })
    }

    #[must_use]
    pub fn is_excluded(&self, namespace: &str) -> bool {
        self.excluded.iter().any(|re| re.is_match(namespace))
    }

    #[must_use]
    pub fn filter(&self, namespaces: Vec<String>) -> Vec<String> {
        namespaces
            .into_iter()
            .filter(|ns| {
                let excluded = self.is_excluded(ns);
                if excluded {
                    debug!("🚫 Namespace {} excluded", ns);
                }
                !excluded
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.excluded.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }
}

/// List the names of all namespaces in the cluster
///
/// # Errors
///
/// Will return `Err` if data cannot be retrieved from k8s cluster API
pub async fn list_namespace_names(client: Client) -> Result<Vec<String>> {
    // Namespaces are cluster-scoped, so we use Api::all
    let api: Api<K8sNamespace> = Api::all(client);
    let ns_list = api.list(&ListParams::default()).await?;

    let mut names: Vec<String> = ns_list.items.iter().map(ResourceExt::name_any).collect();
    names.sort();
    info!("Fetched {} namespaces", names.len());
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_drops_matching_namespaces() {
        let filter = NamespaceFilter::new(&["^kube-", "sandbox$"]).unwrap();
        let kept = filter.filter(vec![
            "default".to_string(),
            "kube-system".to_string(),
            "kube-public".to_string(),
            "team-sandbox".to_string(),
            "shop".to_string(),
        ]);
        assert_eq!(kept, vec!["default".to_string(), "shop".to_string()]);
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        assert!(NamespaceFilter::new(&["("]).is_err());
    }

    #[test]
    fn test_empty_filter_keeps_everything() {
        let filter = NamespaceFilter::new::<&str>(&[]).unwrap();
        assert!(filter.is_empty());
        assert!(!filter.is_excluded("kube-system"));
    }
}
