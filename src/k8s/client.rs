// Client creation with custom user-agent and kube context selection
use crate::error::Result;
use crate::k8s::cache::config::DEFAULT_CLUSTER_NAME;
use hyper::http::{HeaderName, HeaderValue};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, warn};

/// Create a new k8s client, from the given kube context or the inferred configuration
///
/// # Errors
///
/// Will return `Err` if no usable configuration is found or the client cannot be built
pub async fn new(custom_user_agent: Option<&str>, context: Option<&str>) -> Result<Client> {
    let mut config = match context {
        Some(context) => {
            let options = KubeConfigOptions {
                context: Some(context.to_string()),
                ..KubeConfigOptions::default()
            };
            Config::from_kubeconfig(&options).await?
        }
        None => Config::infer().await?,
    };

    if let Some(user_agent) = custom_user_agent {
        match HeaderValue::from_str(user_agent) {
            Ok(header_value) => {
                config
                    .headers
                    .push((HeaderName::from_static("user-agent"), header_value));
            }
            Err(e) => warn!("Ignoring invalid user agent {:?}: {}", user_agent, e),
        }
    }

    Ok(Client::try_from(config)?)
}

/// Name of the cluster directory: the explicit name, else the kube context in use,
/// else the in-cluster default
#[must_use]
pub fn cluster_name(explicit: Option<&str>, context: Option<&str>) -> String {
    if let Some(name) = explicit.or(context) {
        return name.to_string();
    }
    Kubeconfig::read()
        .ok()
        .and_then(|kubeconfig| kubeconfig.current_context)
        .unwrap_or_else(|| DEFAULT_CLUSTER_NAME.to_string())
}

/// Install the `aws_lc_rs` rustls crypto provider for the process
///
/// Returns false when a provider was already installed, which is left in place.
pub fn install_crypto_provider() -> bool {
    let installed = rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_ok();
    if !installed {
        debug!("🔐 rustls crypto provider already installed, keeping it");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_provider_install_keeps_the_first() {
        install_crypto_provider();
        assert!(!install_crypto_provider());
        assert!(rustls::crypto::CryptoProvider::get_default().is_some());
    }

    #[test]
    fn test_explicit_cluster_name_wins() {
        assert_eq!(cluster_name(Some("prod"), Some("ctx")), "prod");
        assert_eq!(cluster_name(None, Some("ctx")), "ctx");
    }
}
