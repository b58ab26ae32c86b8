//! Chart values composition.
//!
//! Three layers are merged, later layers winning: the base values file, the
//! static overrides from the command line and the values derived from the
//! load balancer itself.

use crate::{Error, LoadBalancer, Result, names::encode_id};
use serde_json::{Map, Value, json};
use std::path::PathBuf;

pub const MANAGED_KEY_PREFIX: &str = "operator.managed";
pub const METRICS_PORT_NAME: &str = "infra9-metrics";

#[derive(Clone, Debug, Default)]
pub struct ValuesConfig {
    pub base_values_path: PathBuf,
    pub container_port_key: String,
    pub service_port_key: String,
    pub metrics_port: Option<u16>,
    /// `(key.path, value)` pairs, applied in order
    pub static_overrides: Vec<(String, String)>,
}

/// Split a `key.path=value` override.
pub fn parse_override(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(Error::InvalidValues(format!("override {raw:?} is not of the form key=value"))),
    }
}

/// Set `value` at the dotted `path`, creating intermediate maps and replacing
/// anything in the way that is not a map.
pub fn set_path(doc: &mut Value, path: &str, value: Value) -> Result<()> {
    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(Error::InvalidValues(format!("invalid key path {path:?}")));
    }
    let mut current = doc;
    for part in &parts[..parts.len() - 1] {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = current
            .as_object_mut()
            .map(|m| m.entry(part.to_string()).or_insert_with(|| Value::Object(Map::new())))
            .ok_or_else(|| Error::InvalidValues(format!("cannot descend into {part} of {path}")))?;
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Some(map) = current.as_object_mut() {
        map.insert(parts[parts.len() - 1].to_string(), value);
    }
    Ok(())
}

pub fn load_base(path: &PathBuf) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidValues(format!("cannot read {}: {e}", path.display())))?;
    if content.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    let doc: Value = serde_yaml::from_str(&content)
        .map_err(|e| Error::InvalidValues(format!("cannot parse {}: {e}", path.display())))?;
    match doc {
        Value::Object(_) => Ok(doc),
        Value::Null => Ok(Value::Object(Map::new())),
        _ => Err(Error::InvalidValues(format!(
            "{} does not hold a mapping",
            path.display()
        ))),
    }
}

fn port_lists(lb: &LoadBalancer, metrics_port: Option<u16>) -> (Vec<Value>, Vec<Value>) {
    let mut container = Vec::new();
    let mut service = Vec::new();
    if let Some(detail) = &lb.detail {
        for port in &detail.ports {
            let name = format!("p{}", port.number);
            container.push(json!({"name": name, "containerPort": port.number}));
            service.push(json!({"name": name, "port": port.number}));
        }
    }
    if let Some(port) = metrics_port {
        container.push(json!({"name": METRICS_PORT_NAME, "containerPort": port}));
        service.push(json!({"name": METRICS_PORT_NAME, "port": port}));
    }
    (container, service)
}

/// Render the complete values document for a load balancer.
pub fn build_values(lb: &LoadBalancer, cfg: &ValuesConfig) -> Result<Value> {
    let mut values = load_base(&cfg.base_values_path)?;
    for (key, value) in &cfg.static_overrides {
        set_path(&mut values, key, Value::String(value.clone()))?;
    }

    set_path(
        &mut values,
        &format!("{MANAGED_KEY_PREFIX}.lbID"),
        Value::String(lb.id.to_string()),
    )?;
    set_path(
        &mut values,
        &format!("{MANAGED_KEY_PREFIX}.lbIDEnc"),
        Value::String(encode_id(&lb.id)),
    )?;
    if let Some(ip) = lb.detail.as_ref().and_then(|d| d.first_ip()) {
        set_path(
            &mut values,
            &format!("{MANAGED_KEY_PREFIX}.lbIP"),
            Value::String(ip.to_string()),
        )?;
    }
    let (container, service) = port_lists(lb, cfg.metrics_port);
    if !cfg.container_port_key.is_empty() {
        set_path(&mut values, &cfg.container_port_key, Value::Array(container))?;
    }
    if !cfg.service_port_key.is_empty() {
        set_path(&mut values, &cfg.service_port_key, Value::Array(service))?;
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Classification, LoadBalancerDetail, PrefixedId,
        loadbalancer::{IpAddress, Port},
    };
    use std::io::Write;

    fn base_file(content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "values-{}-{}.yaml",
            std::process::id(),
            rand::random::<u64>()
        ));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    fn lb_with_ports(ports: &[u16], ips: &[&str]) -> LoadBalancer {
        LoadBalancer::new(PrefixedId::parse("lb-123").unwrap(), Classification::Primary).with_detail(
            LoadBalancerDetail {
                id: "lb-123".to_string(),
                name: "test".to_string(),
                location: None,
                ports: ports
                    .iter()
                    .map(|n| Port {
                        id: format!("loadprt-{n}"),
                        name: String::new(),
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
            },
        )
    }

    #[test]
    fn test_parse_override() {
        assert_eq!(
            parse_override("resources.limits.cpu=500m").unwrap(),
            ("resources.limits.cpu".to_string(), "500m".to_string())
        );
        assert_eq!(parse_override("a=b=c").unwrap().1, "b=c");
        assert!(parse_override("novalue").is_err());
        assert!(parse_override("=x").is_err());
    }

    #[test]
    fn test_set_path_replaces_scalars() {
        let mut doc = json!({"a": "scalar"});
        set_path(&mut doc, "a.b.c", json!(1)).unwrap();
        assert_eq!(doc, json!({"a": {"b": {"c": 1}}}));
        assert!(set_path(&mut doc, "a..c", json!(1)).is_err());
    }

    #[test]
    fn test_precedence_entity_over_static_over_base() {
        let path = base_file(
            "operator:\n  managed:\n    lbID: base\nresources:\n  limits:\n    cpu: 100m\n    memory: 1Gi\nimage: haproxy\n",
        );
        let cfg = ValuesConfig {
            base_values_path: path.clone(),
            container_port_key: "containerPorts".to_string(),
            service_port_key: "service.ports".to_string(),
            metrics_port: None,
            static_overrides: vec![
                ("resources.limits.cpu".to_string(), "500m".to_string()),
                ("operator.managed.lbID".to_string(), "static".to_string()),
            ],
        };
        let values = build_values(&lb_with_ports(&[80], &[]), &cfg).unwrap();
        assert_eq!(values["operator"]["managed"]["lbID"], "lb-123");
        assert_eq!(values["resources"]["limits"]["cpu"], "500m");
        assert_eq!(values["resources"]["limits"]["memory"], "1Gi");
        assert_eq!(values["image"], "haproxy");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_ports_and_addresses() {
        let path = base_file("{}\n");
        let cfg = ValuesConfig {
            base_values_path: path.clone(),
            container_port_key: "containerPorts".to_string(),
            service_port_key: "service.ports".to_string(),
            metrics_port: Some(29782),
            static_overrides: vec![],
        };
        let values = build_values(&lb_with_ports(&[80, 443], &["192.0.2.1", "192.0.2.2"]), &cfg).unwrap();
        assert_eq!(values["operator"]["managed"]["lbIP"], "192.0.2.1");
        assert_eq!(values["operator"]["managed"]["lbIDEnc"], "bGItMTIz");
        assert_eq!(
            values["containerPorts"],
            json!([
                {"name": "p80", "containerPort": 80},
                {"name": "p443", "containerPort": 443},
                {"name": "infra9-metrics", "containerPort": 29782},
            ])
        );
        assert_eq!(values["service"]["ports"][1], json!({"name": "p443", "port": 443}));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_no_address_omits_ip() {
        let path = base_file("");
        let cfg = ValuesConfig {
            base_values_path: path.clone(),
            ..Default::default()
        };
        let values = build_values(&lb_with_ports(&[], &[]), &cfg).unwrap();
        assert!(values["operator"]["managed"].get("lbIP").is_none());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_bad_base_is_fatal() {
        let missing = ValuesConfig {
            base_values_path: PathBuf::from("/nonexistent/values.yaml"),
            ..Default::default()
        };
        let err = build_values(&lb_with_ports(&[], &[]), &missing).unwrap_err();
        assert!(matches!(err, Error::InvalidValues(_)));
        assert!(!err.is_retryable());

        let path = base_file("- not\n- a map\n");
        let list = ValuesConfig {
            base_values_path: path.clone(),
            ..Default::default()
        };
        assert!(matches!(
            build_values(&lb_with_ports(&[], &[]), &list),
            Err(Error::InvalidValues(_))
        ));
        std::fs::remove_file(path).ok();
    }
}
