//! Integration tests for native orchestration against an in-process node
//!
//! The controller talks real gRPC to a mock node agent serving both
//! surfaces on localhost, the same way it talks to a node in the field.

mod support;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use edgectl::broker::{DirectDialer, NodeConnectionBroker};
use edgectl::config::ControllerConfig;
use edgectl::lifecycle::LifecycleStatus;
use edgectl::model::{
    IpFilter, MacModifier, TrafficPolicy, TrafficRule, TrafficSelector, TrafficTarget, Unit,
    UnitRef,
};
use edgectl::mtls::{ClientMtlsConfig, ServerMtlsConfig};
use edgectl::orchestrator::{Orchestrator, PolicyPayload, RequestContext};
use edgectl::pki::CertificateAuthority;
use edgectl::Error;

use support::{MockNode, APP_ID, NODE_ID, VNF_ID};

fn native(broker: Arc<NodeConnectionBroker>) -> Orchestrator {
    Orchestrator::new(&ControllerConfig::default(), broker, None).unwrap()
}

fn ctx() -> RequestContext {
    RequestContext::with_timeout(Duration::from_secs(5))
}

fn http_policy() -> TrafficPolicy {
    let clients = TrafficSelector {
        description: "clients".to_string(),
        ip: Some(IpFilter {
            address: "10.16.0.0".to_string(),
            mask: 16,
            begin_port: 80,
            end_port: 80,
            protocol: "tcp".to_string(),
        }),
        ..Default::default()
    };
    TrafficPolicy {
        id: "1f2e3d4c-5b6a-4978-8695-a4b3c2d1e0f9".to_string(),
        traffic_rules: vec![TrafficRule {
            description: "allow http".to_string(),
            priority: 1,
            source: Some(clients.clone()),
            destination: Some(TrafficSelector {
                description: "frontend".to_string(),
                ..clients
            }),
            target: Some(TrafficTarget {
                description: "accept".to_string(),
                action: "accept".to_string(),
                mac: Some(MacModifier {
                    mac_address: "aa:bb:cc:dd:ee:ff".to_string(),
                }),
                ip: None,
            }),
        }],
    }
}

// =============================================================================
// Unit Lifecycle
// =============================================================================

/// Story: an application goes through its whole life on a node
#[tokio::test]
async fn story_application_lifecycle_end_to_end() {
    let node = MockNode::start(None).await;
    let orchestrator = native(support::broker(&node));
    let ctx = ctx();
    let app = Unit::App(support::app());
    let unit = UnitRef::app(APP_ID);

    assert_eq!(
        orchestrator.deploy(&ctx, NODE_ID, &app).await.unwrap(),
        LifecycleStatus::Deployed
    );
    // The node reports READY, which is Deployed to the controller
    assert_eq!(
        orchestrator.status(&ctx, NODE_ID, unit).await.unwrap(),
        LifecycleStatus::Deployed
    );

    assert_eq!(
        orchestrator.start(&ctx, NODE_ID, unit).await.unwrap(),
        LifecycleStatus::Running
    );
    assert_eq!(
        orchestrator.restart(&ctx, NODE_ID, unit).await.unwrap(),
        LifecycleStatus::Running
    );
    assert_eq!(
        orchestrator.stop(&ctx, NODE_ID, unit).await.unwrap(),
        LifecycleStatus::Stopped
    );
    assert_eq!(
        orchestrator.status(&ctx, NODE_ID, unit).await.unwrap(),
        LifecycleStatus::Stopped
    );

    orchestrator.undeploy(&ctx, NODE_ID, unit).await.unwrap();
    let err = orchestrator.status(&ctx, NODE_ID, unit).await.unwrap_err();
    assert!(err.is_not_found(), "expected NotFound, got {err}");

    assert_eq!(
        node.calls(),
        vec![
            "app.deploy_container",
            "app.get_status",
            "app.start",
            "app.restart",
            "app.stop",
            "app.get_status",
            "app.undeploy",
            "app.get_status",
        ]
    );
}

/// Story: commands the node refuses in the current state come back as
/// precondition failures and leave the unit untouched
#[tokio::test]
async fn story_wrong_state_commands_fail_precondition() {
    let node = MockNode::start(None).await;
    let orchestrator = native(support::broker(&node));
    let ctx = ctx();
    let unit = UnitRef::app(APP_ID);

    orchestrator
        .deploy(&ctx, NODE_ID, &Unit::App(support::app()))
        .await
        .unwrap();

    let err = orchestrator.stop(&ctx, NODE_ID, unit).await.unwrap_err();
    assert!(err.is_failed_precondition(), "got {err}");
    let err = orchestrator.restart(&ctx, NODE_ID, unit).await.unwrap_err();
    assert!(err.is_failed_precondition(), "got {err}");

    orchestrator.start(&ctx, NODE_ID, unit).await.unwrap();
    let err = orchestrator.start(&ctx, NODE_ID, unit).await.unwrap_err();
    assert!(err.is_failed_precondition(), "got {err}");

    assert_eq!(
        orchestrator.status(&ctx, NODE_ID, unit).await.unwrap(),
        LifecycleStatus::Running
    );
}

#[tokio::test]
async fn vm_vnf_goes_through_the_vnf_services() {
    let node = MockNode::start(None).await;
    let orchestrator = native(support::broker(&node));
    let ctx = ctx();
    let unit = UnitRef::vnf(VNF_ID);

    orchestrator
        .deploy(&ctx, NODE_ID, &Unit::Vnf(support::vnf()))
        .await
        .unwrap();
    orchestrator.start(&ctx, NODE_ID, unit).await.unwrap();
    orchestrator.undeploy(&ctx, NODE_ID, unit).await.unwrap();

    assert_eq!(
        node.calls(),
        vec!["vnf.deploy_vm", "vnf.start", "vnf.undeploy"]
    );
}

/// Story: a unit the node has never seen cannot be driven or queried; every
/// operation reports NotFound and the node's state stays empty
#[tokio::test]
async fn story_never_deployed_unit_is_not_found() {
    let node = MockNode::start(None).await;
    let orchestrator = native(support::broker(&node));
    let ctx = ctx();

    for unit in [UnitRef::app(APP_ID), UnitRef::vnf(VNF_ID)] {
        let err = orchestrator.start(&ctx, NODE_ID, unit).await.unwrap_err();
        assert!(err.is_not_found(), "start {unit}: got {err}");
        let err = orchestrator.stop(&ctx, NODE_ID, unit).await.unwrap_err();
        assert!(err.is_not_found(), "stop {unit}: got {err}");
        let err = orchestrator.restart(&ctx, NODE_ID, unit).await.unwrap_err();
        assert!(err.is_not_found(), "restart {unit}: got {err}");
        let err = orchestrator.status(&ctx, NODE_ID, unit).await.unwrap_err();
        assert!(err.is_not_found(), "status {unit}: got {err}");
        let err = orchestrator.undeploy(&ctx, NODE_ID, unit).await.unwrap_err();
        assert!(err.is_not_found(), "undeploy {unit}: got {err}");
    }

    assert!(node.state.lock().unwrap().units.is_empty());
    assert_eq!(node.calls().len(), 10);
}

#[tokio::test]
async fn redeploy_replaces_the_definition() {
    let node = MockNode::start(None).await;
    let orchestrator = native(support::broker(&node));
    let ctx = ctx();

    let err = orchestrator
        .redeploy(&ctx, NODE_ID, &Unit::App(support::app()))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    orchestrator
        .deploy(&ctx, NODE_ID, &Unit::App(support::app()))
        .await
        .unwrap();
    let mut renamed = support::app();
    renamed.name = "nginx-tuned".to_string();
    orchestrator
        .redeploy(&ctx, NODE_ID, &Unit::App(renamed))
        .await
        .unwrap();

    assert_eq!(node.state.lock().unwrap().names[APP_ID], "nginx-tuned");
}

#[tokio::test]
async fn unknown_node_is_not_found() {
    let node = MockNode::start(None).await;
    let orchestrator = native(support::broker(&node));

    let err = orchestrator
        .status(&ctx(), "5e4d3c2b-1a09-4f8e-9d7c-6b5a49382716", UnitRef::app(APP_ID))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(node.calls().is_empty());
}

/// Story: a node that accepts connections but never answers costs the
/// caller no more than the request deadline
#[tokio::test]
async fn story_unresponsive_node_hits_the_deadline() {
    let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = silent.local_addr().unwrap().port();
    let broker = Arc::new(NodeConnectionBroker::new(
        Arc::new(support::inventory()),
        Arc::new(DirectDialer),
        None,
        edgectl::broker::BrokerConfig {
            ela_port: port,
            eva_port: port,
            dial_timeout: Duration::from_secs(30),
        },
    ));
    let orchestrator = native(broker);
    let ctx = RequestContext::with_timeout(Duration::from_millis(300));

    let err = orchestrator
        .status(&ctx, NODE_ID, UnitRef::app(APP_ID))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded(_)), "got {err}");
    drop(silent);
}

// =============================================================================
// Traffic Policy
// =============================================================================

/// Story: an application's policy is pushed, replaced and cleared
#[tokio::test]
async fn story_application_policy_round_trip() {
    let node = MockNode::start(None).await;
    let orchestrator = native(support::broker(&node));
    let ctx = ctx();
    let unit = UnitRef::app(APP_ID);

    orchestrator
        .set_policy(&ctx, NODE_ID, unit, &PolicyPayload::Native(http_policy()))
        .await
        .unwrap();
    {
        let state = node.state.lock().unwrap();
        let stored = &state.app_policies[APP_ID];
        assert_eq!(stored.traffic_rules.len(), 1);
        let ip = stored.traffic_rules[0]
            .source
            .as_ref()
            .and_then(|s| s.ip.as_ref())
            .unwrap();
        assert_eq!((ip.address.as_str(), ip.mask), ("10.16.0.0", 16));
    }

    orchestrator.delete_policy(&ctx, NODE_ID, unit).await.unwrap();
    assert!(node.state.lock().unwrap().app_policies.is_empty());
}

#[tokio::test]
async fn invalid_policy_never_reaches_the_node() {
    let node = MockNode::start(None).await;
    let orchestrator = native(support::broker(&node));
    let mut policy = http_policy();
    policy.traffic_rules[0].target.as_mut().unwrap().action = "forward".to_string();

    let err = orchestrator
        .set_policy(&ctx(), NODE_ID, UnitRef::app(APP_ID), &PolicyPayload::Native(policy))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(node.calls().is_empty());
}

#[tokio::test]
async fn interface_policy_and_interfaces() {
    let node = MockNode::start(None).await;
    let orchestrator = native(support::broker(&node));
    let ctx = ctx();

    let interfaces = orchestrator.interfaces(&ctx, NODE_ID).await.unwrap();
    assert_eq!(interfaces.len(), 1);
    let mut uplink = orchestrator
        .interface(&ctx, NODE_ID, "0000:00:1f.6")
        .await
        .unwrap();
    assert_eq!(uplink.mac_address, "8c:16:45:5f:11:2a");

    uplink.vlan = 200;
    orchestrator
        .update_interface(&ctx, NODE_ID, uplink)
        .await
        .unwrap();
    assert_eq!(node.state.lock().unwrap().interfaces[0].vlan, 200);

    orchestrator
        .set_interface_policy(&ctx, NODE_ID, "0000:00:1f.6", &http_policy())
        .await
        .unwrap();
    assert!(node
        .state
        .lock()
        .unwrap()
        .interface_policies
        .contains_key("0000:00:1f.6"));
    orchestrator
        .delete_interface_policy(&ctx, NODE_ID, "0000:00:1f.6")
        .await
        .unwrap();
    assert!(node.state.lock().unwrap().interface_policies.is_empty());

    let err = orchestrator
        .interface(&ctx, NODE_ID, "0000:00:00.0")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

// =============================================================================
// DNS
// =============================================================================

#[tokio::test]
async fn dns_config_is_applied_and_removed() {
    let node = MockNode::start(None).await;
    let orchestrator = native(support::broker(&node));
    let ctx = ctx();
    let config = support::dns_config();

    orchestrator
        .apply_dns_config(&ctx, NODE_ID, &config, &[])
        .await
        .unwrap();
    {
        let state = node.state.lock().unwrap();
        assert_eq!(state.dns_records["video.edge"], vec!["10.16.0.10"]);
        assert_eq!(state.dns_records["cache.edge"].len(), 2);
        assert_eq!(state.forwarders, vec!["8.8.8.8"]);
    }

    orchestrator
        .remove_dns_config(&ctx, NODE_ID, &config, &[])
        .await
        .unwrap();
    let state = node.state.lock().unwrap();
    assert!(state.dns_records.is_empty());
    assert!(state.forwarders.is_empty());
}

/// Story: an application published under the configuration is pushed as
/// a record named after the app, ahead of the configuration's own records,
/// and removed with it
#[tokio::test]
async fn story_app_alias_is_published_with_the_config() {
    let node = MockNode::start(None).await;
    let orchestrator = native(support::broker(&node));
    let ctx = ctx();
    let config = support::dns_config();
    let aliases = [support::dns_alias()];

    orchestrator
        .apply_dns_config(&ctx, NODE_ID, &config, &aliases)
        .await
        .unwrap();
    {
        let state = node.state.lock().unwrap();
        assert_eq!(state.dns_records[APP_ID], vec![APP_ID]);
        assert_eq!(state.dns_records.len(), 3);
        assert_eq!(
            state.calls,
            vec!["dns.set_a", "dns.set_a", "dns.set_a", "dns.set_forwarders"]
        );
    }

    orchestrator
        .remove_dns_config(&ctx, NODE_ID, &config, &aliases)
        .await
        .unwrap();
    assert!(node.state.lock().unwrap().dns_records.is_empty());
}

/// Story: a failing alias record stops the push before any of the
/// configuration's own records go out
#[tokio::test]
async fn story_failing_alias_stops_the_push() {
    let node = MockNode::start(None).await;
    node.state.lock().unwrap().failing_record = Some(APP_ID.to_string());
    let orchestrator = native(support::broker(&node));

    let err = orchestrator
        .apply_dns_config(
            &ctx(),
            NODE_ID,
            &support::dns_config(),
            &[support::dns_alias()],
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains(APP_ID), "got {err}");

    let state = node.state.lock().unwrap();
    assert!(state.dns_records.is_empty());
    assert_eq!(state.calls, vec!["dns.set_a"]);
}

/// Story: the first rejected record stops the push; forwarders are never
/// touched and the records before it stay in place
#[tokio::test]
async fn story_dns_push_stops_at_first_failure() {
    let node = MockNode::start(None).await;
    node.state.lock().unwrap().failing_record = Some("cache.edge".to_string());
    let orchestrator = native(support::broker(&node));

    let err = orchestrator
        .apply_dns_config(&ctx(), NODE_ID, &support::dns_config(), &[])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cache.edge"), "got {err}");

    let state = node.state.lock().unwrap();
    assert!(state.dns_records.contains_key("video.edge"));
    assert!(!state.dns_records.contains_key("cache.edge"));
    assert!(state.forwarders.is_empty());
    assert!(!state.calls.iter().any(|c| c == "dns.set_forwarders"));
}

// =============================================================================
// mTLS
// =============================================================================

/// Story: with TLS on, the controller only talks to the node holding a
/// certificate for its own node ID
#[tokio::test]
async fn story_mtls_connection_pinned_to_node_id() {
    support::install_crypto_provider();
    let dir = TempDir::new().unwrap();
    let ca = CertificateAuthority::init(dir.path()).unwrap();
    let client_tls = ClientMtlsConfig::issue(&ca).unwrap().to_tonic_config();

    let server = ServerMtlsConfig::issue_for_node(&ca, NODE_ID).unwrap();
    let node = MockNode::start(Some(server.to_tonic_config())).await;
    let broker = Arc::new(NodeConnectionBroker::new(
        Arc::new(support::inventory()),
        Arc::new(DirectDialer),
        Some(client_tls.clone()),
        node.broker_config(),
    ));
    let orchestrator = native(broker);
    let ctx = ctx();

    orchestrator
        .deploy(&ctx, NODE_ID, &Unit::App(support::app()))
        .await
        .unwrap();
    assert_eq!(
        orchestrator
            .status(&ctx, NODE_ID, UnitRef::app(APP_ID))
            .await
            .unwrap(),
        LifecycleStatus::Deployed
    );

    // Same CA, but the certificate names a different node
    let imposter = ServerMtlsConfig::issue_for_node(&ca, "d4c3b2a1-0f9e-4d8c-8b7a-695847362514")
        .unwrap();
    let imposter_node = MockNode::start(Some(imposter.to_tonic_config())).await;
    let broker = Arc::new(NodeConnectionBroker::new(
        Arc::new(support::inventory()),
        Arc::new(DirectDialer),
        Some(client_tls),
        imposter_node.broker_config(),
    ));
    let err = native(broker)
        .status(&ctx, NODE_ID, UnitRef::app(APP_ID))
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::Connection { .. } | Error::Rpc { .. }),
        "got {err}"
    );
    assert!(imposter_node.calls().is_empty());
}
