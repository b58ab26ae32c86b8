use crate::{
    Error, LoadBalancerDetail, Result, get_client_name,
    loadbalancer::{IpAddress, Port},
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{instrument, warn};

/// Source of truth for load balancer details.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Fails with [`Error::LoadBalancerNotFound`] when the load balancer is unknown.
    async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancerDetail>;
}

const LOAD_BALANCER_QUERY: &str = r#"query GetLoadBalancer($id: ID!) {
  loadBalancer(id: $id) {
    id
    name
    location { id }
    ports { edges { node { id name number } } }
    IPAddresses { id ip }
  }
}"#;

#[derive(Deserialize, Debug)]
struct GraphResponse {
    data: Option<GraphData>,
    #[serde(default)]
    errors: Vec<GraphError>,
}

#[derive(Deserialize, Debug)]
struct GraphError {
    message: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GraphData {
    load_balancer: Option<GraphLoadBalancer>,
}

#[derive(Deserialize, Debug)]
struct GraphLoadBalancer {
    id: String,
    #[serde(default)]
    name: String,
    location: Option<GraphLocation>,
    ports: Option<GraphPorts>,
    #[serde(rename = "IPAddresses", default)]
    ip_addresses: Vec<GraphIp>,
}

#[derive(Deserialize, Debug)]
struct GraphLocation {
    id: String,
}

#[derive(Deserialize, Debug)]
struct GraphPorts {
    #[serde(default)]
    edges: Vec<GraphPortEdge>,
}

#[derive(Deserialize, Debug)]
struct GraphPortEdge {
    node: GraphPort,
}

#[derive(Deserialize, Debug)]
struct GraphPort {
    id: String,
    #[serde(default)]
    name: String,
    number: u16,
}

#[derive(Deserialize, Debug)]
struct GraphIp {
    id: String,
    ip: String,
}

impl From<GraphLoadBalancer> for LoadBalancerDetail {
    fn from(lb: GraphLoadBalancer) -> Self {
        Self {
            id: lb.id,
            name: lb.name,
            location: lb.location.map(|l| l.id),
            ports: lb
                .ports
                .map(|p| p.edges)
                .unwrap_or_default()
                .into_iter()
                .map(|e| Port {
                    id: e.node.id,
                    name: e.node.name,
                    number: e.node.number,
                })
                .collect(),
            ip_addresses: lb
                .ip_addresses
                .into_iter()
                .map(|a| IpAddress { id: a.id, ip: a.ip })
                .collect(),
        }
    }
}

fn decode_response(id: &str, body: &str) -> Result<LoadBalancerDetail> {
    let resp: GraphResponse = serde_json::from_str(body)?;
    if let Some(err) = resp.errors.first() {
        if err.message.to_lowercase().contains("not found") {
            return Err(Error::LoadBalancerNotFound(id.to_string()));
        }
        return Err(Error::MetadataQuery(
            resp.errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        ));
    }
    resp.data
        .and_then(|d| d.load_balancer)
        .map(LoadBalancerDetail::from)
        .ok_or_else(|| Error::LoadBalancerNotFound(id.to_string()))
}

/// GraphQL client for the load balancer API
#[derive(Clone, Debug)]
pub struct LbApiClient {
    endpoint: String,
    token: Option<String>,
    client: Client,
}

impl LbApiClient {
    pub fn new(endpoint: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(get_client_name())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            token,
            client,
        })
    }
}

#[async_trait]
impl MetadataClient for LbApiClient {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancerDetail> {
        let body = json!({
            "operationName": "GetLoadBalancer",
            "query": LOAD_BALANCER_QUERY,
            "variables": {"id": id},
        });
        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::LoadBalancerNotFound(id.to_string()));
        }
        let text = resp.text().await?;
        if !status.is_success() {
            warn!(%status, "load balancer api answered with an error");
            return Err(Error::MetadataQuery(format!("{status}: {text}")));
        }
        decode_response(id, &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_response() {
        let detail = decode_response(
            "loadbal-abc",
            r#"{"data": {"loadBalancer": {
                "id": "loadbal-abc",
                "name": "web",
                "location": {"id": "lctnloc-dc1"},
                "ports": {"edges": [{"node": {"id": "loadprt-1", "name": "http", "number": 80}}]},
                "IPAddresses": [{"id": "ipamipa-1", "ip": "192.0.2.10"}]
            }}}"#,
        )
        .unwrap();
        assert_eq!(detail.name, "web");
        assert_eq!(detail.location.as_deref(), Some("lctnloc-dc1"));
        assert_eq!(detail.ports[0].number, 80);
        assert_eq!(detail.first_ip(), Some("192.0.2.10"));
    }

    #[test]
    fn test_decode_not_found() {
        let err = decode_response(
            "loadbal-abc",
            r#"{"data": null, "errors": [{"message": "load_balancer not found"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::LoadBalancerNotFound(_)));

        let err = decode_response("loadbal-abc", r#"{"data": {"loadBalancer": null}}"#).unwrap_err();
        assert!(matches!(err, Error::LoadBalancerNotFound(_)));
    }

    #[test]
    fn test_decode_other_errors() {
        let err = decode_response(
            "loadbal-abc",
            r#"{"errors": [{"message": "unauthorized"}, {"message": "try again"}]}"#,
        )
        .unwrap_err();
        match err {
            Error::MetadataQuery(msg) => assert_eq!(msg, "unauthorized; try again"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
