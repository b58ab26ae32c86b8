use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YamlError: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("K8s error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("Stdio error {0}")]
    Stdio(#[from] std::io::Error),

    #[error("UTF8 error {0}")]
    UTF8(#[from] std::string::FromUtf8Error),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid object name: {0}")]
    InvalidName(String),

    #[error("Invalid chart values: {0}")]
    InvalidValues(String),

    #[error("Load balancer {0} not found")]
    LoadBalancerNotFound(String),

    #[error("Metadata query failed: {0}")]
    MetadataQuery(String),

    #[error("Release {0} already exists")]
    ReleaseExists(String),

    #[error("Release {0} not found")]
    ReleaseNotFound(String),

    #[error("helm {0} failed, rc={1}: {2}")]
    HelmFailed(String, i32, String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Error: {0}")]
    Other(String),
}
impl Error {
    pub fn metric_label(&self) -> String {
        let label = format!("{self:?}");
        label
            .split(['(', ' ', '{'])
            .next()
            .unwrap_or_default()
            .to_lowercase()
    }

    /// Errors that will fail the same way on every attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::InvalidIdentifier(_)
                | Error::InvalidName(_)
                | Error::LoadBalancerNotFound(_)
                | Error::InvalidValues(_)
                | Error::Config(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod backoff;
pub mod cluster;
pub mod context;
pub mod identifier;
pub mod loadbalancer;
pub mod location;
pub mod metadata;
pub mod mock;
pub mod names;
pub mod notification;
pub mod reconciler;
pub mod registry;
pub mod release;
pub mod resolver;
pub mod router;
pub mod runner;
pub mod task;
pub mod values;

pub use context::get_client_name;
pub use identifier::PrefixedId;
pub use loadbalancer::{Classification, LoadBalancer, LoadBalancerDetail};
pub use notification::{EventKind, Message, Notification};
