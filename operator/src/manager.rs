use crate::{Metrics, config::Parameters, handler::ReconcileHandler};
use chrono::{DateTime, Utc};
use common::{
    Error, Message, Notification, Result,
    cluster::{ClusterManager, get_client},
    metadata::{LbApiClient, MetadataClient},
    reconciler::Reconciler,
    registry::Registry,
    release::ReleaseManager,
    resolver::Resolver,
    router::{Disposition, Router},
};
use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::RwLock;
use tracing::info;

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    pub last_subject: Option<String>,
    pub notifications: u64,
    pub runners: usize,
    pub reporter: String,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            last_subject: None,
            notifications: 0,
            runners: 0,
            reporter: common::context::get_short_name(),
        }
    }
}

/// State shared between the web server and the runners
#[derive(Clone)]
pub struct Manager {
    router: Router,
    metrics: Metrics,
    diagnostics: Arc<RwLock<Diagnostics>>,
    accepting: Arc<AtomicBool>,
}

impl Manager {
    /// Wire the cluster and the load balancer API from the parameters.
    pub async fn new(params: &Parameters) -> Result<Self> {
        let client = get_client(params.kube_config_path.as_ref()).await?;
        let release = Arc::new(ClusterManager::new(client, params.helm(), params.role_binding()));
        let metadata = Arc::new(LbApiClient::new(
            &params.api_endpoint,
            params.api_token.clone(),
            params.api_timeout(),
        )?);
        Self::with_backends(params, release, metadata)
    }

    pub fn with_backends(
        params: &Parameters,
        release: Arc<dyn ReleaseManager>,
        metadata: Arc<dyn MetadataClient>,
    ) -> Result<Self> {
        let metrics = Metrics::new().map_err(|e| Error::Other(format!("metrics setup: {e}")))?;
        let reconciler = Reconciler::new(
            release,
            metadata.clone(),
            params.values_config()?,
            params.backoff(),
            params.name_limits(),
        );
        let registry = Registry::new(Arc::new(ReconcileHandler::new(reconciler, metrics.clone())));
        let router = Router::new(
            Resolver::new(metadata, &params.prefix),
            params.locations.clone(),
            registry,
        );
        info!(
            prefix = %params.prefix,
            locations = ?params.locations,
            chart = %params.chart_path,
            "manager ready"
        );
        Ok(Self {
            router,
            metrics,
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            accepting: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Route one notification. Returns `Closed` once shutdown has started.
    pub async fn ingest(&self, notification: Notification) -> Disposition {
        if !self.is_ready() {
            self.metrics.notification(notification.family(), &Disposition::Closed);
            return Disposition::Closed;
        }
        let disposition = self.router.process(&notification).await;
        self.metrics.notification(notification.family(), &disposition);
        let runners = self.router.registry().len();
        self.metrics.runners.set(i64::try_from(runners).unwrap_or(i64::MAX));
        let mut diag = self.diagnostics.write().await;
        diag.last_event = Utc::now();
        diag.last_subject = Some(notification.subject_id().to_string());
        diag.notifications += 1;
        diag.runners = runners;
        disposition
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Stop accepting notifications, then let runners finish their current task.
    pub async fn shutdown(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!("shutting down, draining runners");
            self.router.registry().shutdown().await;
            self.metrics.runners.set(0);
            info!("runners drained");
        }
    }

    /// Metrics getter
    #[must_use]
    pub fn metrics(&self) -> String {
        self.metrics.render()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        let mut diag = self.diagnostics.read().await.clone();
        diag.runners = self.router.registry().len();
        diag
    }
}
