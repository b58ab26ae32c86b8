//! Drives a namespace and a chart release towards the state of a load balancer.

use crate::{
    Classification, Error, EventKind, LoadBalancer, Result,
    backoff::{BackoffPolicy, retry},
    metadata::MetadataClient,
    names::{NameLimits, ReleaseNames, derive_names},
    release::{ReleaseManager, namespace_labels},
    task::{Task, TaskHandler},
    values::{ValuesConfig, build_values},
};
use async_trait::async_trait;
use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, Ordering},
};
use tracing::{debug, info, instrument, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Namespace ensured and release upgraded
    Deployed,
    /// Release and namespace removed
    Removed,
    /// The load balancer vanished upstream while deploying
    Gone,
    /// Nothing to do for this kind of notification
    Skipped,
}

impl Outcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployed => "deployed",
            Self::Removed => "removed",
            Self::Gone => "gone",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Action {
    Deploy,
    Remove,
    Ignore,
}

fn action_for(kind: &EventKind, classification: Classification) -> Action {
    match (kind, classification) {
        (_, Classification::NotTracked) => Action::Ignore,
        (EventKind::Create | EventKind::Update | EventKind::IpAddressAssigned, _) => Action::Deploy,
        (EventKind::Delete, Classification::Primary) => Action::Remove,
        // a related object went away, the load balancer itself must be reconverged
        (EventKind::Delete, Classification::Associated) => Action::Deploy,
        (EventKind::IpAddressUnassigned | EventKind::Other(_), _) => Action::Ignore,
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Reconciler {
    manager: Arc<dyn ReleaseManager>,
    metadata: Arc<dyn MetadataClient>,
    values: ValuesConfig,
    backoff: BackoffPolicy,
    limits: NameLimits,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        manager: Arc<dyn ReleaseManager>,
        metadata: Arc<dyn MetadataClient>,
        values: ValuesConfig,
        backoff: BackoffPolicy,
        limits: NameLimits,
    ) -> Self {
        Self {
            manager,
            metadata,
            values,
            backoff,
            limits,
        }
    }

    pub async fn converge(&self, lb: &LoadBalancer, kind: &EventKind) -> Result<Outcome> {
        match action_for(kind, lb.classification) {
            Action::Deploy => self.deploy(lb).await,
            Action::Remove => self.remove(lb).await,
            Action::Ignore => {
                info!(lb = %lb.id, %kind, classification = ?lb.classification, "no action for notification");
                Ok(Outcome::Skipped)
            }
        }
    }

    /// Latest known state of the load balancer. A transient metadata failure
    /// keeps the detail already known, if any.
    async fn refresh(&self, lb: &LoadBalancer, force: bool) -> Result<LoadBalancer> {
        if !force && lb.detail.is_some() {
            return Ok(lb.clone());
        }
        match self.metadata.get_load_balancer(lb.id.as_str()).await {
            Ok(detail) => Ok(lb.clone().with_detail(detail)),
            Err(e @ Error::LoadBalancerNotFound(_)) => Err(e),
            Err(e) if lb.detail.is_some() => {
                warn!(lb = %lb.id, error = %e, "metadata unavailable, keeping previous detail");
                Ok(lb.clone())
            }
            Err(e) => Err(e),
        }
    }

    async fn install_if_missing(&self, names: &ReleaseNames, lb: &LoadBalancer) -> Result<()> {
        match self.manager.release_exists(&names.release, &names.namespace).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => warn!(release = %names.release, error = %e, "cannot read release history, trying install"),
        }
        let values = build_values(lb, &self.values)?;
        match self
            .manager
            .install_release(&names.release, &names.namespace, &values)
            .await
        {
            Ok(()) => info!(release = %names.release, namespace = %names.namespace, "release installed"),
            Err(Error::ReleaseExists(_)) => debug!(release = %names.release, "release already installed"),
            Err(e) => warn!(release = %names.release, error = %e, "install failed, relying on upgrade"),
        }
        Ok(())
    }

    #[instrument(skip(self, lb), fields(lb = %lb.id))]
    async fn deploy(&self, lb: &LoadBalancer) -> Result<Outcome> {
        let names = derive_names(&lb.id, self.limits)?;
        let known = match self.refresh(lb, false).await {
            Ok(fresh) => fresh,
            Err(Error::LoadBalancerNotFound(_)) => {
                info!("load balancer not found, nothing to deploy");
                return Ok(Outcome::Gone);
            }
            Err(e) => {
                warn!(error = %e, "metadata unavailable, install deferred to the upgrade loop");
                lb.clone()
            }
        };
        self.manager
            .ensure_namespace(&names.namespace, &namespace_labels(&names.encoded_id))
            .await?;

        // install runs once, on the first attempt that has a detail to render
        let installed = AtomicBool::new(false);
        let latest = Mutex::new(known);
        let names = &names;
        let latest = &latest;
        let installed = &installed;
        let upgraded = retry(&self.backoff, "upgrade", |attempt| async move {
            let known = lock(latest).clone();
            let fresh = self.refresh(&known, attempt > 1).await?;
            *lock(latest) = fresh.clone();
            if !installed.load(Ordering::SeqCst) {
                self.install_if_missing(names, &fresh).await?;
                installed.store(true, Ordering::SeqCst);
            }
            let values = build_values(&fresh, &self.values)?;
            self.manager
                .upgrade_release(&names.release, &names.namespace, &values)
                .await
        })
        .await;
        match upgraded {
            Ok(()) => {
                info!(release = %names.release, namespace = %names.namespace, "release upgraded");
                Ok(Outcome::Deployed)
            }
            Err(Error::LoadBalancerNotFound(_)) => {
                info!("load balancer vanished while deploying");
                Ok(Outcome::Gone)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, lb), fields(lb = %lb.id))]
    async fn remove(&self, lb: &LoadBalancer) -> Result<Outcome> {
        let names = derive_names(&lb.id, self.limits)?;
        match self
            .manager
            .uninstall_release(&names.release, &names.namespace)
            .await
        {
            Ok(()) => info!(release = %names.release, "release uninstalled"),
            Err(Error::ReleaseNotFound(_)) => debug!(release = %names.release, "release already gone"),
            Err(e) => return Err(e),
        }
        self.manager.delete_namespace(&names.namespace).await?;
        info!(namespace = %names.namespace, "namespace removed");
        Ok(Outcome::Removed)
    }
}

#[async_trait]
impl TaskHandler for Reconciler {
    async fn handle(&self, task: &Task) -> Result<()> {
        self.converge(&task.lb, &task.kind).await.map(|_| ())
    }
}
