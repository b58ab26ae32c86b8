//! In-memory backends recording every call, used by the test suites.

use crate::{
    Error, LoadBalancerDetail, Result,
    loadbalancer::{IpAddress, Port},
    metadata::MetadataClient,
    release::ReleaseManager,
};
use async_trait::async_trait;
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReleaseCall {
    EnsureNamespace(String, BTreeMap<String, String>),
    DeleteNamespace(String),
    Install(String, String, Value),
    Upgrade(String, String, Value),
    Uninstall(String, String),
    Exists(String, String),
}

impl ReleaseCall {
    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            Self::EnsureNamespace(..) => "ensure_namespace",
            Self::DeleteNamespace(..) => "delete_namespace",
            Self::Install(..) => "install",
            Self::Upgrade(..) => "upgrade",
            Self::Uninstall(..) => "uninstall",
            Self::Exists(..) => "exists",
        }
    }
}

#[derive(Default)]
struct ReleaseState {
    calls: Vec<ReleaseCall>,
    namespaces: HashSet<String>,
    releases: HashSet<(String, String)>,
    upgrade_failures: u32,
    hide_history: bool,
}

/// Fake cluster keeping namespaces and releases in memory.
#[derive(Default)]
pub struct ReleaseMock {
    state: Mutex<ReleaseState>,
}

impl ReleaseMock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` upgrades fail (`u32::MAX` for all of them).
    pub fn fail_upgrades(&self, n: u32) {
        lock(&self.state).upgrade_failures = n;
    }

    /// Report no history even when a release is installed, so that install
    /// hits an existing release.
    pub fn hide_history(&self) {
        lock(&self.state).hide_history = true;
    }

    pub fn add_release(&self, release: &str, namespace: &str) {
        lock(&self.state)
            .releases
            .insert((release.to_string(), namespace.to_string()));
    }

    #[must_use]
    pub fn calls(&self) -> Vec<ReleaseCall> {
        lock(&self.state).calls.clone()
    }

    #[must_use]
    pub fn verbs(&self) -> Vec<&'static str> {
        lock(&self.state).calls.iter().map(ReleaseCall::verb).collect()
    }

    #[must_use]
    pub fn count(&self, verb: &str) -> usize {
        lock(&self.state).calls.iter().filter(|c| c.verb() == verb).count()
    }

    #[must_use]
    pub fn has_namespace(&self, name: &str) -> bool {
        lock(&self.state).namespaces.contains(name)
    }

    #[must_use]
    pub fn has_release(&self, release: &str, namespace: &str) -> bool {
        lock(&self.state)
            .releases
            .contains(&(release.to_string(), namespace.to_string()))
    }
}

#[async_trait]
impl ReleaseManager for ReleaseMock {
    async fn ensure_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let mut state = lock(&self.state);
        state
            .calls
            .push(ReleaseCall::EnsureNamespace(name.to_string(), labels.clone()));
        state.namespaces.insert(name.to_string());
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(ReleaseCall::DeleteNamespace(name.to_string()));
        state.namespaces.remove(name);
        Ok(())
    }

    async fn install_release(&self, release: &str, namespace: &str, values: &Value) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(ReleaseCall::Install(
            release.to_string(),
            namespace.to_string(),
            values.clone(),
        ));
        if !state
            .releases
            .insert((release.to_string(), namespace.to_string()))
        {
            return Err(Error::ReleaseExists(release.to_string()));
        }
        Ok(())
    }

    async fn upgrade_release(&self, release: &str, namespace: &str, values: &Value) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(ReleaseCall::Upgrade(
            release.to_string(),
            namespace.to_string(),
            values.clone(),
        ));
        if state.upgrade_failures > 0 {
            if state.upgrade_failures != u32::MAX {
                state.upgrade_failures -= 1;
            }
            let attempt = state.calls.iter().filter(|c| c.verb() == "upgrade").count();
            return Err(Error::HelmFailed(
                "upgrade".to_string(),
                1,
                format!("upgrade attempt {attempt} failed"),
            ));
        }
        if !state
            .releases
            .contains(&(release.to_string(), namespace.to_string()))
        {
            return Err(Error::HelmFailed(
                "upgrade".to_string(),
                1,
                format!("{release} has no deployed releases"),
            ));
        }
        Ok(())
    }

    async fn uninstall_release(&self, release: &str, namespace: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state
            .calls
            .push(ReleaseCall::Uninstall(release.to_string(), namespace.to_string()));
        if !state
            .releases
            .remove(&(release.to_string(), namespace.to_string()))
        {
            return Err(Error::ReleaseNotFound(release.to_string()));
        }
        Ok(())
    }

    async fn release_exists(&self, release: &str, namespace: &str) -> Result<bool> {
        let mut state = lock(&self.state);
        state
            .calls
            .push(ReleaseCall::Exists(release.to_string(), namespace.to_string()));
        Ok(!state.hide_history
            && state
                .releases
                .contains(&(release.to_string(), namespace.to_string())))
    }
}

#[derive(Default)]
struct MetadataState {
    details: HashMap<String, LoadBalancerDetail>,
    failures: u32,
    calls: usize,
}

/// Fake metadata API serving registered details; unknown ids are not found.
#[derive(Default)]
pub struct MetadataMock {
    state: Mutex<MetadataState>,
}

impl MetadataMock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a load balancer with the given ports and addresses.
    pub fn insert(&self, id: &str, ports: &[u16], ips: &[&str]) {
        let detail = LoadBalancerDetail {
            id: id.to_string(),
            name: format!("{id}-name"),
            location: None,
            ports: ports
                .iter()
                .map(|n| Port {
                    id: format!("loadprt-{n}"),
                    name: format!("port-{n}"),
                    number: *n,
                })
                .collect(),
            ip_addresses: ips
                .iter()
                .enumerate()
                .map(|(i, ip)| IpAddress {
                    id: format!("ipamipa-{i}"),
                    ip: ip.to_string(),
                })
                .collect(),
        };
        lock(&self.state).details.insert(id.to_string(), detail);
    }

    pub fn remove(&self, id: &str) {
        lock(&self.state).details.remove(id);
    }

    /// Make the next `n` lookups fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        lock(&self.state).failures = n;
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        lock(&self.state).calls
    }
}

#[async_trait]
impl MetadataClient for MetadataMock {
    async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancerDetail> {
        let mut state = lock(&self.state);
        state.calls += 1;
        if state.failures > 0 {
            state.failures -= 1;
            return Err(Error::MetadataQuery("service unavailable".to_string()));
        }
        state
            .details
            .get(id)
            .cloned()
            .ok_or_else(|| Error::LoadBalancerNotFound(id.to_string()))
    }
}
