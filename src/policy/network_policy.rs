//! Kubernetes NetworkPolicy translation
//!
//! Every ingress/egress rule of a [`TrafficPolicyKubeOvn`] becomes one
//! NetworkPolicy rule whose peers are IP blocks. Only the directions that
//! have rules are listed in `policyTypes`, so an egress-only policy leaves
//! ingress unrestricted and vice versa.

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::NetworkPolicy;
use serde_json::{json, Value};

use crate::model::{Entity, IpBlock, KubeOvnPort, TrafficPolicyKubeOvn};
use crate::{Error, Result};

/// NetworkPolicy `name` in `namespace` applying `policy` to pods matching
/// `pod_labels`
pub fn to_network_policy(
    policy: &TrafficPolicyKubeOvn,
    name: &str,
    namespace: &str,
    pod_labels: &BTreeMap<String, String>,
) -> Result<NetworkPolicy> {
    policy.validate()?;

    let mut policy_types = Vec::new();
    let mut spec = serde_json::Map::new();
    spec.insert("podSelector".to_string(), json!({ "matchLabels": pod_labels }));

    if !policy.egress.is_empty() {
        policy_types.push("Egress");
        let rules = policy
            .egress
            .iter()
            .map(|rule| rule_json("to", &rule.to, &rule.ports))
            .collect::<Result<Vec<_>>>()?;
        spec.insert("egress".to_string(), Value::Array(rules));
    }
    if !policy.ingress.is_empty() {
        policy_types.push("Ingress");
        let rules = policy
            .ingress
            .iter()
            .map(|rule| rule_json("from", &rule.from, &rule.ports))
            .collect::<Result<Vec<_>>>()?;
        spec.insert("ingress".to_string(), Value::Array(rules));
    }
    spec.insert("policyTypes".to_string(), json!(policy_types));

    let object = json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "NetworkPolicy",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": pod_labels,
        },
        "spec": spec,
    });

    serde_json::from_value(object)
        .map_err(|e| Error::serialization(format!("failed to build NetworkPolicy {name}: {e}")))
}

fn rule_json(peer_field: &str, peers: &[IpBlock], ports: &[KubeOvnPort]) -> Result<Value> {
    let peers: Vec<Value> = peers
        .iter()
        .map(|block| {
            let mut ip_block = json!({ "cidr": block.cidr });
            if !block.except.is_empty() {
                ip_block["except"] = json!(block.except);
            }
            json!({ "ipBlock": ip_block })
        })
        .collect();

    let ports = ports
        .iter()
        .map(|p| {
            Ok(json!({
                "port": p.port,
                "protocol": p.kube_protocol()?,
            }))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut rule = serde_json::Map::new();
    if !peers.is_empty() {
        rule.insert(peer_field.to_string(), Value::Array(peers));
    }
    if !ports.is_empty() {
        rule.insert("ports".to_string(), Value::Array(ports));
    }
    Ok(Value::Object(rule))
}
