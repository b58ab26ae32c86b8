use clap::Parser;
use common::{
    Error, Result,
    backoff::BackoffPolicy,
    cluster::{HelmConfig, RoleBindingConfig},
    names::NameLimits,
    resolver::DEFAULT_PREFIX,
    values::{ValuesConfig, parse_override},
};
use std::{path::PathBuf, time::Duration};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Deploys a chart release for every load balancer", long_about = None)]
pub struct Parameters {
    /// Address the HTTP server listens on
    #[arg(long, env = "LISTEN_ADDRESS", value_name = "ADDR", default_value = "0.0.0.0:9000")]
    pub listen: String,
    /// Chart deployed for each load balancer
    #[arg(long, env = "CHART_PATH", value_name = "PATH", default_value = "")]
    pub chart_path: String,
    /// Base values file for the chart
    #[arg(long, env = "CHART_VALUES_PATH", value_name = "PATH", default_value = "")]
    pub chart_values_path: PathBuf,
    /// GraphQL endpoint of the load balancer API
    #[arg(long, env = "API_ENDPOINT", value_name = "URL", default_value = "")]
    pub api_endpoint: String,
    /// Bearer token for the load balancer API
    #[arg(long, env = "API_TOKEN", value_name = "TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,
    /// Timeout of a single API request, in seconds
    #[arg(long, env = "API_TIMEOUT", value_name = "SECONDS", default_value_t = 10)]
    pub api_timeout: u64,
    /// Prefix of the identifiers of load balancers
    #[arg(long, env = "LOADBALANCER_PREFIX", value_name = "PREFIX", default_value = DEFAULT_PREFIX)]
    pub prefix: String,
    /// Locations handled by this instance (all when empty)
    #[arg(long = "location", env = "LOCATIONS", value_name = "LOCATION", value_delimiter = ',')]
    pub locations: Vec<String>,
    /// Values key receiving the container ports
    #[arg(long, env = "CONTAINER_PORT_KEY", value_name = "KEY", default_value = "containerPorts")]
    pub container_port_key: String,
    /// Values key receiving the service ports
    #[arg(long, env = "SERVICE_PORT_KEY", value_name = "KEY", default_value = "service.ports")]
    pub service_port_key: String,
    /// Metrics port exposed by the deployed load balancer
    #[arg(long, env = "METRICS_PORT", value_name = "PORT")]
    pub metrics_port: Option<u16>,
    /// CPU limit override, as key.path=value
    #[arg(long, env = "HELM_CPU_FLAG", value_name = "KEY=VALUE", value_delimiter = ',')]
    pub helm_cpu_flag: Vec<String>,
    /// Memory limit override, as key.path=value
    #[arg(long, env = "HELM_MEMORY_FLAG", value_name = "KEY=VALUE", value_delimiter = ',')]
    pub helm_memory_flag: Vec<String>,
    /// Extra values override, as key.path=value
    #[arg(long = "set", env = "HELM_SET", value_name = "KEY=VALUE", value_delimiter = ',')]
    pub set: Vec<String>,
    /// First retry delay, in milliseconds
    #[arg(long, env = "BACKOFF_MIN_INTERVAL", value_name = "MS", default_value_t = 1000)]
    pub backoff_min_interval: u64,
    /// Retry delay ceiling, in milliseconds
    #[arg(long, env = "BACKOFF_MAX_INTERVAL", value_name = "MS", default_value_t = 60000)]
    pub backoff_max_interval: u64,
    /// Randomization factor of retry delays
    #[arg(long, env = "BACKOFF_JITTER", value_name = "FACTOR", default_value_t = 0.5)]
    pub backoff_jitter: f64,
    /// Upgrade attempts before giving up
    #[arg(long, env = "BACKOFF_MAX_RETRIES", value_name = "COUNT", default_value_t = 10)]
    pub backoff_max_retries: u32,
    #[arg(long, env = "NAMESPACE_NAME_MAX", value_name = "LEN", default_value_t = 63)]
    pub namespace_name_max: usize,
    #[arg(long, env = "RELEASE_NAME_MAX", value_name = "LEN", default_value_t = 53)]
    pub release_name_max: usize,
    /// Kubeconfig to use instead of the in-cluster configuration
    #[arg(long, env = "KUBE_CONFIG_PATH", value_name = "PATH")]
    pub kube_config_path: Option<PathBuf>,
    #[arg(long, env = "HELM_BINARY", value_name = "PATH", default_value = "helm")]
    pub helm_binary: String,
    /// Service account granted a role in every managed namespace
    #[arg(long, env = "NAMESPACE_SERVICE_ACCOUNT", value_name = "NAME")]
    pub namespace_service_account: Option<String>,
    #[arg(long, env = "NAMESPACE_SERVICE_ACCOUNT_NAMESPACE", value_name = "NAMESPACE", default_value = "default")]
    pub namespace_service_account_namespace: String,
    #[arg(long, env = "NAMESPACE_CLUSTER_ROLE", value_name = "ROLE", default_value = "cluster-admin")]
    pub namespace_cluster_role: String,
    /// Log as json lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

impl Parameters {
    pub fn validate(&self) -> Result<()> {
        let mut errs = Vec::new();
        if self.chart_path.is_empty() {
            errs.push("chart path is required".to_string());
        }
        if self.chart_values_path.as_os_str().is_empty() {
            errs.push("chart values path is required".to_string());
        }
        if self.api_endpoint.is_empty() {
            errs.push("api endpoint is required".to_string());
        }
        if self.prefix.is_empty() {
            errs.push("load balancer prefix is required".to_string());
        }
        if let Err(e) = self.backoff().validate() {
            errs.push(e.to_string());
        }
        if let Err(e) = self.static_overrides() {
            errs.push(e.to_string());
        }
        if errs.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(errs.join(", ")))
        }
    }

    #[must_use]
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            min_interval: Duration::from_millis(self.backoff_min_interval),
            max_interval: Duration::from_millis(self.backoff_max_interval),
            jitter: self.backoff_jitter,
            max_retries: self.backoff_max_retries,
        }
    }

    #[must_use]
    pub fn name_limits(&self) -> NameLimits {
        NameLimits {
            namespace: self.namespace_name_max,
            release: self.release_name_max,
        }
    }

    /// cpu, then memory, then the generic overrides
    pub fn static_overrides(&self) -> Result<Vec<(String, String)>> {
        self.helm_cpu_flag
            .iter()
            .chain(&self.helm_memory_flag)
            .chain(&self.set)
            .map(|raw| parse_override(raw))
            .collect()
    }

    pub fn values_config(&self) -> Result<ValuesConfig> {
        Ok(ValuesConfig {
            base_values_path: self.chart_values_path.clone(),
            container_port_key: self.container_port_key.clone(),
            service_port_key: self.service_port_key.clone(),
            metrics_port: self.metrics_port,
            static_overrides: self.static_overrides()?,
        })
    }

    #[must_use]
    pub fn helm(&self) -> HelmConfig {
        HelmConfig {
            binary: self.helm_binary.clone(),
            chart: self.chart_path.clone(),
            kubeconfig: self.kube_config_path.clone(),
        }
    }

    #[must_use]
    pub fn role_binding(&self) -> Option<RoleBindingConfig> {
        self.namespace_service_account
            .as_ref()
            .filter(|sa| !sa.is_empty())
            .map(|sa| RoleBindingConfig {
                service_account: sa.clone(),
                service_account_namespace: self.namespace_service_account_namespace.clone(),
                cluster_role: self.namespace_cluster_role.clone(),
            })
    }

    #[must_use]
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout)
    }
}
