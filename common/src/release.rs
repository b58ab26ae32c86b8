use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

pub const MANAGED_LABEL: &str = "com.infratographer.lb-operator/managed";
pub const LB_ID_LABEL: &str = "com.infratographer.lb-operator/lb-id";

#[must_use]
pub fn namespace_labels(encoded_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_LABEL.to_string(), "true".to_string()),
        (LB_ID_LABEL.to_string(), encoded_id.to_string()),
    ])
}

/// Cluster side of a deployment: one namespace and one chart release per load balancer.
///
/// Callers rely on two errors being distinguishable:
/// [`crate::Error::ReleaseExists`] from `install_release` and
/// [`crate::Error::ReleaseNotFound`] from `uninstall_release`.
#[async_trait]
pub trait ReleaseManager: Send + Sync {
    /// Create or update the namespace. Idempotent.
    async fn ensure_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()>;
    /// Remove the namespace; absent namespaces are not an error.
    async fn delete_namespace(&self, name: &str) -> Result<()>;
    async fn install_release(&self, release: &str, namespace: &str, values: &Value) -> Result<()>;
    async fn upgrade_release(&self, release: &str, namespace: &str, values: &Value) -> Result<()>;
    async fn uninstall_release(&self, release: &str, namespace: &str) -> Result<()>;
    /// Whether the release has any history in the namespace.
    async fn release_exists(&self, release: &str, namespace: &str) -> Result<bool>;
}
