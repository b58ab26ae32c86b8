use crate::{
    Classification, Error, EventKind, LoadBalancer, PrefixedId, Result, metadata::MetadataClient,
};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_PREFIX: &str = "loadbal";

/// Finds which load balancer, if any, a notification is about.
#[derive(Clone)]
pub struct Resolver {
    metadata: Arc<dyn MetadataClient>,
    prefix: String,
}

impl Resolver {
    #[must_use]
    pub fn new(metadata: Arc<dyn MetadataClient>, prefix: &str) -> Self {
        Self {
            metadata,
            prefix: prefix.to_string(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Pure classification: the subject wins, then the first related id
    /// carrying the tracked prefix.
    #[must_use]
    pub fn classify(&self, subject: &PrefixedId, related: &[PrefixedId]) -> (Classification, PrefixedId) {
        if subject.has_prefix(&self.prefix) {
            return (Classification::Primary, subject.clone());
        }
        match related.iter().find(|id| id.has_prefix(&self.prefix)) {
            Some(id) => (Classification::Associated, id.clone()),
            None => (Classification::NotTracked, subject.clone()),
        }
    }

    /// Build the load balancer a notification targets.
    ///
    /// Returns `Ok(None)` when the load balancer no longer exists upstream:
    /// the notification is acknowledged and dropped.
    pub async fn resolve(
        &self,
        subject: &PrefixedId,
        related: &[PrefixedId],
        kind: &EventKind,
    ) -> Result<Option<LoadBalancer>> {
        let (classification, id) = self.classify(subject, related);
        let lb = LoadBalancer::new(id, classification);
        if !lb.is_tracked() || kind.is_delete() {
            return Ok(Some(lb));
        }
        match self.metadata.get_load_balancer(lb.id.as_str()).await {
            Ok(detail) => Ok(Some(lb.with_detail(detail))),
            Err(Error::LoadBalancerNotFound(_)) => {
                debug!(lb = %lb.id, "load balancer not found, dropping");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
