//! [`ReleaseManager`] backed by a real cluster.
//!
//! Namespaces and role bindings are server-side applied through the kube
//! client; releases are driven through the `helm` binary.

use crate::{Error, Result, get_client_name, release::ReleaseManager};
use async_trait::async_trait;
use k8s_openapi::api::{core::v1::Namespace, rbac::v1::RoleBinding};
use kube::{
    Client, Config,
    api::{Api, DeleteParams, Patch, PatchParams},
    config::{KubeConfigOptions, Kubeconfig},
};
use serde_json::{Value, json};
use std::{collections::BTreeMap, path::PathBuf, process::Stdio};
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, instrument};

pub const ROLE_BINDING_NAME: &str = "load-balancer-operator-admin";

/// Grant a service account a cluster role inside every managed namespace.
#[derive(Clone, Debug)]
pub struct RoleBindingConfig {
    pub service_account: String,
    pub service_account_namespace: String,
    pub cluster_role: String,
}

#[derive(Clone, Debug)]
pub struct HelmConfig {
    pub binary: String,
    pub chart: String,
    pub kubeconfig: Option<PathBuf>,
}

#[derive(Clone)]
pub struct ClusterManager {
    client: Client,
    helm: HelmConfig,
    role_binding: Option<RoleBindingConfig>,
}

pub async fn get_client(kubeconfig: Option<&PathBuf>) -> Result<Client> {
    match kubeconfig {
        Some(path) => {
            let kc = Kubeconfig::read_from(path)
                .map_err(|e| Error::Config(format!("cannot read kubeconfig {}: {e}", path.display())))?;
            let config = Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::Config(format!("invalid kubeconfig {}: {e}", path.display())))?;
            Ok(Client::try_from(config)?)
        }
        None => Ok(Client::try_default().await?),
    }
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 404)
}

impl ClusterManager {
    #[must_use]
    pub fn new(client: Client, helm: HelmConfig, role_binding: Option<RoleBindingConfig>) -> Self {
        Self {
            client,
            helm,
            role_binding,
        }
    }

    fn helm_command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.helm.binary);
        cmd.args(args);
        if let Some(kc) = &self.helm.kubeconfig {
            cmd.arg("--kubeconfig").arg(kc);
        }
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }

    /// Run helm, optionally feeding `stdin`, and return stdout.
    async fn run_helm(&self, action: &str, args: &[&str], stdin: Option<String>) -> Result<String> {
        let mut cmd = self.helm_command(args);
        if stdin.is_some() {
            cmd.stdin(Stdio::piped());
        }
        debug!(action, ?args, "running helm");
        let mut child = cmd.spawn()?;
        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes()).await?;
                pipe.shutdown().await?;
            }
        }
        let out = child.wait_with_output().await?;
        if out.status.success() {
            Ok(String::from_utf8(out.stdout)?)
        } else {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            Err(Error::HelmFailed(
                action.to_string(),
                out.status.code().unwrap_or(-1),
                stderr,
            ))
        }
    }

    async fn ensure_role_binding(&self, namespace: &str, rb: &RoleBindingConfig) -> Result<()> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        let doc = json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "RoleBinding",
            "metadata": {"name": ROLE_BINDING_NAME, "namespace": namespace},
            "roleRef": {
                "apiGroup": "rbac.authorization.k8s.io",
                "kind": "ClusterRole",
                "name": rb.cluster_role,
            },
            "subjects": [{
                "kind": "ServiceAccount",
                "name": rb.service_account,
                "namespace": rb.service_account_namespace,
            }],
        });
        let ps = PatchParams::apply(&get_client_name()).force();
        api.patch(ROLE_BINDING_NAME, &ps, &Patch::Apply(doc)).await?;
        Ok(())
    }
}

fn values_yaml(values: &Value) -> Result<String> {
    Ok(serde_yaml::to_string(values)?)
}

fn is_exists_message(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("cannot re-use a name that is still in use") || lower.contains("already exists")
}

fn is_not_found_message(stderr: &str) -> bool {
    stderr.to_lowercase().contains("not found")
}

#[async_trait]
impl ReleaseManager for ClusterManager {
    #[instrument(skip(self, labels))]
    async fn ensure_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let doc = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": name, "labels": labels},
        });
        let ps = PatchParams::apply(&get_client_name()).force();
        api.patch(name, &ps, &Patch::Apply(doc)).await?;
        if let Some(rb) = &self.role_binding {
            self.ensure_role_binding(name, rb).await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!("namespace already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, values))]
    async fn install_release(&self, release: &str, namespace: &str, values: &Value) -> Result<()> {
        let args = ["install", release, self.helm.chart.as_str(), "--namespace", namespace, "-f", "-"];
        match self.run_helm("install", &args, Some(values_yaml(values)?)).await {
            Err(Error::HelmFailed(_, _, stderr)) if is_exists_message(&stderr) => {
                Err(Error::ReleaseExists(release.to_string()))
            }
            other => other.map(|_| ()),
        }
    }

    #[instrument(skip(self, values))]
    async fn upgrade_release(&self, release: &str, namespace: &str, values: &Value) -> Result<()> {
        let args = ["upgrade", release, self.helm.chart.as_str(), "--namespace", namespace, "-f", "-"];
        self.run_helm("upgrade", &args, Some(values_yaml(values)?))
            .await
            .map(|_| ())
    }

    #[instrument(skip(self))]
    async fn uninstall_release(&self, release: &str, namespace: &str) -> Result<()> {
        let args = ["uninstall", release, "--namespace", namespace];
        match self.run_helm("uninstall", &args, None).await {
            Err(Error::HelmFailed(_, _, stderr)) if is_not_found_message(&stderr) => {
                Err(Error::ReleaseNotFound(release.to_string()))
            }
            other => other.map(|_| ()),
        }
    }

    #[instrument(skip(self))]
    async fn release_exists(&self, release: &str, namespace: &str) -> Result<bool> {
        let args = ["history", release, "--namespace", namespace, "--max", "1", "-o", "json"];
        match self.run_helm("history", &args, None).await {
            Ok(out) => has_revisions(&out),
            Err(Error::HelmFailed(_, _, stderr)) if is_not_found_message(&stderr) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Whether `helm history -o json` output lists at least one revision.
fn has_revisions(out: &str) -> Result<bool> {
    let out = out.trim();
    if out.is_empty() {
        return Ok(false);
    }
    let history: Value = serde_json::from_str(out)?;
    Ok(history.as_array().is_some_and(|h| !h.is_empty()))
}
