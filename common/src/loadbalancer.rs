use crate::PrefixedId;
use serde::{Deserialize, Serialize};

/// How a notification relates to a tracked load balancer
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Copy, Debug)]
#[serde(rename_all = "camelCase")]
pub enum Classification {
    /// The notification's subject is the load balancer
    Primary,
    /// The load balancer is only listed among the additional subjects
    Associated,
    /// Nothing in the notification refers to a load balancer
    NotTracked,
}

/// A port exposed by a load balancer
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub number: u16,
}

/// An address assigned to a load balancer
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct IpAddress {
    pub id: String,
    pub ip: String,
}

/// Load balancer details as known by the metadata API
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerDetail {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub ip_addresses: Vec<IpAddress>,
}

impl LoadBalancerDetail {
    /// Only one address is supported for now.
    #[must_use]
    pub fn first_ip(&self) -> Option<&str> {
        self.ip_addresses.first().map(|a| a.ip.as_str())
    }
}

/// The load balancer a notification is about. Built fresh for each notification.
#[derive(Clone, Debug)]
pub struct LoadBalancer {
    pub id: PrefixedId,
    pub classification: Classification,
    pub detail: Option<LoadBalancerDetail>,
}

impl LoadBalancer {
    #[must_use]
    pub fn new(id: PrefixedId, classification: Classification) -> Self {
        Self {
            id,
            classification,
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: LoadBalancerDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    #[must_use]
    pub fn is_tracked(&self) -> bool {
        self.classification != Classification::NotTracked
    }

    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.classification == Classification::Primary
    }
}
