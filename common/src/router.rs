//! Entry point for inbound notifications.
//!
//! Routing never fails the delivery: whatever happens here the notification
//! is acknowledged, the outcome is only reported for logs and metrics.

use crate::{
    Message, Notification, location::in_scope, registry::Registry, resolver::Resolver, task::Task,
};
use tracing::{Instrument, Span, debug, error, info_span};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Disposition {
    /// Handed to a runner
    Routed,
    /// None of the related objects is in one of our locations
    OutOfScope,
    /// Not about a load balancer
    NotTracked,
    /// The load balancer no longer exists upstream
    Gone,
    /// The registry is shutting down
    Closed,
    /// Resolution failed
    Failed(String),
}

impl Disposition {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routed => "routed",
            Self::OutOfScope => "out_of_scope",
            Self::NotTracked => "not_tracked",
            Self::Gone => "gone",
            Self::Closed => "closed",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Clone)]
pub struct Router {
    resolver: Resolver,
    locations: Vec<String>,
    registry: Registry,
}

impl Router {
    #[must_use]
    pub fn new(resolver: Resolver, locations: Vec<String>, registry: Registry) -> Self {
        Self {
            resolver,
            locations,
            registry,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn process(&self, notification: &Notification) -> Disposition {
        let span = info_span!(
            "notification",
            family = notification.family(),
            subject = %notification.subject_id(),
            event = notification.event_type(),
            traceparent = notification.trace_context().get("traceparent").map(String::as_str),
        );
        let disposition = self.dispatch(notification, span.clone()).instrument(span.clone()).await;
        span.in_scope(|| match &disposition {
            Disposition::Failed(e) => error!(error = %e, "notification dropped"),
            Disposition::Routed => debug!("notification routed"),
            other => debug!(disposition = other.as_str(), "notification ignored"),
        });
        disposition
    }

    async fn dispatch(&self, notification: &Notification, span: Span) -> Disposition {
        let related = notification.additional_subject_ids();
        if !in_scope(related, &self.locations) {
            return Disposition::OutOfScope;
        }
        let kind = notification.event_kind();
        let lb = match self
            .resolver
            .resolve(notification.subject_id(), related, &kind)
            .await
        {
            Ok(Some(lb)) => lb,
            Ok(None) => return Disposition::Gone,
            Err(e) => return Disposition::Failed(e.to_string()),
        };
        if !lb.is_tracked() {
            return Disposition::NotTracked;
        }
        if self.registry.route(Task::new(lb, kind, span)) {
            Disposition::Routed
        } else {
            Disposition::Closed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        PrefixedId,
        backoff::BackoffPolicy,
        mock::{MetadataMock, ReleaseMock},
        names::{NameLimits, derive_names},
        notification::{ChangeMessage, EventMessage},
        reconciler::Reconciler,
        values::ValuesConfig,
    };
    use proptest::prelude::*;
    use std::{sync::Arc, time::Duration};

    fn change(subject: &str, related: &[&str], event_type: &str) -> Notification {
        Notification::Change(ChangeMessage {
            subject_id: PrefixedId::parse(subject).unwrap(),
            additional_subject_ids: related.iter().map(|r| PrefixedId::parse(r).unwrap()).collect(),
            event_type: event_type.to_string(),
            trace_context: Default::default(),
            actor_id: None,
            timestamp: None,
        })
    }

    fn setup(prefix: &str, locations: &[&str]) -> (Router, Arc<ReleaseMock>, Arc<MetadataMock>) {
        let manager = Arc::new(ReleaseMock::new());
        let metadata = Arc::new(MetadataMock::new());
        let values = std::env::temp_dir().join(format!("router-{}-{}.yaml", std::process::id(), rand::random::<u64>()));
        std::fs::write(&values, "replicas: 2\n").unwrap();
        let reconciler = Reconciler::new(
            manager.clone(),
            metadata.clone(),
            ValuesConfig {
                base_values_path: values,
                container_port_key: "containerPorts".to_string(),
                service_port_key: "service.ports".to_string(),
                metrics_port: Some(29782),
                static_overrides: vec![("resources.limits.cpu".to_string(), "500m".to_string())],
            },
            BackoffPolicy {
                min_interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(5),
                jitter: 0.2,
                max_retries: 3,
            },
            NameLimits::default(),
        );
        let registry = Registry::new(Arc::new(reconciler));
        let router = Router::new(
            Resolver::new(metadata.clone(), prefix),
            locations.iter().map(|l| l.to_string()).collect(),
            registry,
        );
        (router, manager, metadata)
    }

    async fn eventually<F: Fn() -> bool>(check: F) {
        for _ in 0..400 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_create_then_delete_end_to_end() {
        let (router, manager, metadata) = setup("lb", &[]);
        metadata.insert("lb-123", &[80], &["192.0.2.7"]);
        let names = derive_names(&PrefixedId::parse("lb-123").unwrap(), NameLimits::default()).unwrap();

        assert_eq!(router.process(&change("lb-123", &[], "create")).await, Disposition::Routed);
        eventually(|| manager.count("upgrade") == 1).await;
        assert!(manager.has_namespace(&names.namespace));
        assert!(manager.has_release(&names.release, &names.namespace));
        assert_eq!(manager.verbs(), vec!["ensure_namespace", "exists", "install", "upgrade"]);
        assert!(router.registry().contains("lb-123"));

        assert_eq!(router.process(&change("lb-123", &[], "delete")).await, Disposition::Routed);
        eventually(|| !router.registry().contains("lb-123")).await;
        assert!(!manager.has_namespace(&names.namespace));
        assert!(!manager.has_release(&names.release, &names.namespace));
        assert_eq!(
            manager.verbs()[4..],
            ["uninstall", "delete_namespace"]
        );
        router.registry().shutdown().await;
    }

    #[tokio::test]
    async fn test_associated_change_redeploys_load_balancer() {
        let (router, manager, metadata) = setup("loadbal", &[]);
        metadata.insert("loadbal-a", &[80, 443], &[]);
        let d = router
            .process(&change("loadprt-x", &["loadbal-a", "lctnloc-dc1"], "update"))
            .await;
        assert_eq!(d, Disposition::Routed);
        eventually(|| manager.count("upgrade") == 1).await;
        assert!(router.registry().contains("loadbal-a"));
        router.registry().shutdown().await;
    }

    #[tokio::test]
    async fn test_ignored_notifications() {
        let (router, manager, metadata) = setup("loadbal", &["lctnloc-dc1"]);
        metadata.insert("loadbal-a", &[80], &[]);

        let out = router.process(&change("loadbal-a", &["lctnloc-dc9"], "create")).await;
        assert_eq!(out, Disposition::OutOfScope);

        let out = router.process(&change("loadprt-x", &["lctnloc-dc1"], "create")).await;
        assert_eq!(out, Disposition::NotTracked);

        let out = router.process(&change("loadbal-gone", &["lctnloc-dc1"], "create")).await;
        assert_eq!(out, Disposition::Gone);

        metadata.fail_next(1);
        let out = router.process(&change("loadbal-a", &["lctnloc-dc1"], "create")).await;
        assert!(matches!(out, Disposition::Failed(_)));

        assert!(router.registry().is_empty());
        assert!(manager.calls().is_empty());
    }

    #[tokio::test]
    async fn test_events_share_the_runner() {
        let (router, manager, metadata) = setup("loadbal", &[]);
        metadata.insert("loadbal-a", &[80], &["192.0.2.1"]);
        let event = Notification::Event(EventMessage {
            subject_id: PrefixedId::parse("ipamipa-1").unwrap(),
            additional_subject_ids: vec![PrefixedId::parse("loadbal-a").unwrap()],
            event_type: "ip-address.assigned".to_string(),
            trace_context: Default::default(),
            timestamp: None,
            data: None,
        });
        assert_eq!(router.process(&change("loadbal-a", &[], "create")).await, Disposition::Routed);
        assert_eq!(router.process(&event).await, Disposition::Routed);
        eventually(|| manager.count("upgrade") == 2).await;
        assert_eq!(router.registry().len(), 1);
        router.registry().shutdown().await;
    }

    #[tokio::test]
    async fn test_closed_registry() {
        let (router, _manager, metadata) = setup("loadbal", &[]);
        metadata.insert("loadbal-a", &[80], &[]);
        router.registry().shutdown().await;
        assert_eq!(router.process(&change("loadbal-a", &[], "update")).await, Disposition::Closed);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]
        #[test]
        fn test_routing_is_deterministic(
            subject in "(loadbal|loadprt|lctnloc)-[a-z0-9]{1,8}",
            related in proptest::collection::vec("(loadbal|loadprt|lctnloc)-[a-z0-9]{1,8}", 0..5),
        ) {
            let subject = PrefixedId::parse(&subject).unwrap();
            let related: Vec<PrefixedId> = related.iter().map(|r| PrefixedId::parse(r).unwrap()).collect();
            let resolver = Resolver::new(Arc::new(MetadataMock::new()), "loadbal");
            let first = resolver.classify(&subject, &related);
            let second = resolver.classify(&subject, &related);
            prop_assert_eq!(&first, &second);
            if subject.has_prefix("loadbal") {
                prop_assert_eq!(&first.1, &subject);
            } else if let Some(lb) = related.iter().find(|r| r.has_prefix("loadbal")) {
                prop_assert_eq!(&first.1, lb);
            } else {
                prop_assert_eq!(first.0, crate::Classification::NotTracked);
            }
        }
    }
}
