//! Traffic policy translation
//!
//! Two targets:
//!
//! - **Node policy surface**: the native [`TrafficPolicy`] is converted to the
//!   ELA wire message and pushed whole. Deletion pushes a policy with no
//!   rules; there is no separate delete call on the wire.
//! - **Kubernetes NetworkPolicy**: the [`TrafficPolicyKubeOvn`] model is
//!   converted by [`network_policy`].
//!
//! [`TrafficPolicyKubeOvn`]: crate::model::TrafficPolicyKubeOvn

pub mod network_policy;

pub use network_policy::to_network_policy;

use crate::model::{
    Entity, GtpFilter, IpFilter, MacFilter, TrafficAction, TrafficPolicy, TrafficRule,
    TrafficSelector, TrafficTarget,
};
use crate::proto::ela;
use crate::Result;

// =============================================================================
// Native wire translation
// =============================================================================

/// Wire policy for `target_id` (an application or interface ID).
///
/// `None` produces the empty policy, which clears whatever the target had.
/// The policy is validated first, so an unknown action is a validation
/// error rather than a bad message on the wire.
pub fn to_wire_policy(
    target_id: &str,
    policy: Option<&TrafficPolicy>,
) -> Result<ela::TrafficPolicy> {
    let Some(policy) = policy else {
        return Ok(ela::TrafficPolicy {
            id: target_id.to_string(),
            traffic_rules: Vec::new(),
        });
    };

    policy.validate()?;
    let traffic_rules = policy
        .traffic_rules
        .iter()
        .map(rule_to_wire)
        .collect::<Result<Vec<_>>>()?;

    Ok(ela::TrafficPolicy {
        id: target_id.to_string(),
        traffic_rules,
    })
}

fn rule_to_wire(rule: &TrafficRule) -> Result<ela::TrafficRule> {
    Ok(ela::TrafficRule {
        description: rule.description.clone(),
        priority: rule.priority,
        source: rule.source.as_ref().map(selector_to_wire),
        destination: rule.destination.as_ref().map(selector_to_wire),
        target: rule.target.as_ref().map(target_to_wire).transpose()?,
    })
}

fn selector_to_wire(selector: &TrafficSelector) -> ela::TrafficSelector {
    ela::TrafficSelector {
        description: selector.description.clone(),
        macs: selector.macs.as_ref().map(|MacFilter { mac_addresses }| {
            ela::MacAddresses {
                mac_addresses: mac_addresses.clone(),
            }
        }),
        ip: selector.ip.as_ref().map(ip_filter_to_wire),
        gtp: selector.gtp.as_ref().map(gtp_filter_to_wire),
    }
}

fn ip_filter_to_wire(ip: &IpFilter) -> ela::IpFilter {
    ela::IpFilter {
        address: ip.address.clone(),
        mask: ip.mask,
        begin_port: ip.begin_port,
        end_port: ip.end_port,
        protocol: ip.protocol.clone(),
    }
}

fn gtp_filter_to_wire(gtp: &GtpFilter) -> ela::GtpFilter {
    ela::GtpFilter {
        address: gtp.address.clone(),
        mask: gtp.mask,
        imsis: gtp.imsis.clone(),
    }
}

fn target_to_wire(target: &TrafficTarget) -> Result<ela::TrafficTarget> {
    Ok(ela::TrafficTarget {
        description: target.description.clone(),
        action: wire_action(target.action()?) as i32,
        mac: target.mac.as_ref().map(|m| ela::MacModifier {
            mac_address: m.mac_address.clone(),
        }),
        ip: target.ip.as_ref().map(|ip| ela::IpModifier {
            address: ip.address.clone(),
            port: ip.port,
        }),
    })
}

fn wire_action(action: TrafficAction) -> ela::traffic_target::TargetAction {
    use ela::traffic_target::TargetAction;
    match action {
        TrafficAction::Accept => TargetAction::Accept,
        TrafficAction::Reject => TargetAction::Reject,
        TrafficAction::Drop => TargetAction::Drop,
    }
}
