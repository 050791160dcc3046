//! Node-side configuration through the ELA surface
//!
//! DNS, network interfaces and interface traffic policies always go to the
//! node itself, whatever the orchestration mode.

use tracing::{info, instrument};

use super::{Orchestrator, RequestContext};
use crate::config::OrchestrationMode;
use crate::model::{DnsARecord, DnsAppAlias, DnsConfig, Entity, TrafficPolicy};
use crate::policy::to_wire_policy;
use crate::proto::ela;
use crate::{Error, Result};

impl Orchestrator {
    /// Replace the traffic policy of a node interface
    #[instrument(skip(self, ctx, policy))]
    pub async fn set_interface_policy(
        &self,
        ctx: &RequestContext,
        node_id: &str,
        interface_id: &str,
        policy: &TrafficPolicy,
    ) -> Result<()> {
        self.require_interface_policies()?;
        let wire = to_wire_policy(interface_id, Some(policy))?;
        ctx.run("set interface policy", self.push_interface_policy(node_id, wire))
            .await?;
        info!("Interface policy applied");
        Ok(())
    }

    /// Clear the traffic policy of a node interface
    #[instrument(skip(self, ctx))]
    pub async fn delete_interface_policy(
        &self,
        ctx: &RequestContext,
        node_id: &str,
        interface_id: &str,
    ) -> Result<()> {
        self.require_interface_policies()?;
        let wire = to_wire_policy(interface_id, None)?;
        ctx.run("delete interface policy", self.push_interface_policy(node_id, wire))
            .await?;
        info!("Interface policy removed");
        Ok(())
    }

    fn require_interface_policies(&self) -> Result<()> {
        if self.mode == OrchestrationMode::KubernetesOvn {
            return Err(Error::failed_precondition(
                "interface policies are not supported in kubernetes-ovn mode",
            ));
        }
        Ok(())
    }

    async fn push_interface_policy(&self, node_id: &str, wire: ela::TrafficPolicy) -> Result<()> {
        let id = wire.id.clone();
        let mut clients = self.broker.connect_ela(node_id).await?;
        clients.interface_policy.set(wire).await.map_err(|s| {
            Error::from_status(format!("set policy of interface {id} on node {node_id}"), s)
        })?;
        Ok(())
    }

    /// Push a DNS configuration: alias records, every A record, then the
    /// forwarders.
    ///
    /// Stops at the first failure. Records pushed before it stay applied;
    /// pushing the same configuration again is safe.
    #[instrument(skip(self, ctx, config, aliases), fields(dns_config = %config.name))]
    pub async fn apply_dns_config(
        &self,
        ctx: &RequestContext,
        node_id: &str,
        config: &DnsConfig,
        aliases: &[DnsAppAlias],
    ) -> Result<()> {
        config.validate()?;
        let records = pushed_records(config, aliases)?;
        ctx.run("apply dns config", async {
            let mut clients = self.broker.connect_ela(node_id).await?;
            for record in &records {
                clients
                    .dns
                    .set_a(record_set(record))
                    .await
                    .map_err(|s| {
                        Error::from_status(
                            format!("set DNS A record {} on node {node_id}", record.name),
                            s,
                        )
                    })?;
            }
            if !config.forwarders.is_empty() {
                clients
                    .dns
                    .set_forwarders(ela::DnsForwarders {
                        ip_addresses: config.forwarder_ips(),
                    })
                    .await
                    .map_err(|s| {
                        Error::from_status(format!("set DNS forwarders on node {node_id}"), s)
                    })?;
            }
            Ok(())
        })
        .await?;
        info!(
            aliases = aliases.len(),
            records = config.records.len(),
            forwarders = config.forwarders.len(),
            "DNS configuration applied"
        );
        Ok(())
    }

    /// Remove a DNS configuration: alias records, every A record, then the
    /// forwarders.
    ///
    /// Stops at the first failure, like [`Orchestrator::apply_dns_config`].
    #[instrument(skip(self, ctx, config, aliases), fields(dns_config = %config.name))]
    pub async fn remove_dns_config(
        &self,
        ctx: &RequestContext,
        node_id: &str,
        config: &DnsConfig,
        aliases: &[DnsAppAlias],
    ) -> Result<()> {
        let records = pushed_records(config, aliases)?;
        ctx.run("remove dns config", async {
            let mut clients = self.broker.connect_ela(node_id).await?;
            for record in &records {
                clients
                    .dns
                    .delete_a(record_set(record))
                    .await
                    .map_err(|s| {
                        Error::from_status(
                            format!("delete DNS A record {} on node {node_id}", record.name),
                            s,
                        )
                    })?;
            }
            if !config.forwarders.is_empty() {
                clients
                    .dns
                    .delete_forwarders(ela::DnsForwarders {
                        ip_addresses: config.forwarder_ips(),
                    })
                    .await
                    .map_err(|s| {
                        Error::from_status(format!("delete DNS forwarders on node {node_id}"), s)
                    })?;
            }
            Ok(())
        })
        .await?;
        info!("DNS configuration removed");
        Ok(())
    }

    /// Every network interface of a node
    pub async fn interfaces(
        &self,
        ctx: &RequestContext,
        node_id: &str,
    ) -> Result<Vec<ela::NetworkInterface>> {
        ctx.run("get interfaces", async {
            let mut clients = self.broker.connect_ela(node_id).await?;
            let response = clients
                .interfaces
                .get_all(ela::Empty {})
                .await
                .map_err(|s| Error::from_status(format!("get interfaces of node {node_id}"), s))?;
            Ok(response.into_inner().network_interfaces)
        })
        .await
    }

    /// One network interface of a node
    pub async fn interface(
        &self,
        ctx: &RequestContext,
        node_id: &str,
        interface_id: &str,
    ) -> Result<ela::NetworkInterface> {
        ctx.run("get interface", async {
            let mut clients = self.broker.connect_ela(node_id).await?;
            let response = clients
                .interfaces
                .get(ela::InterfaceId {
                    id: interface_id.to_string(),
                })
                .await
                .map_err(|s| {
                    Error::from_status(
                        format!("get interface {interface_id} of node {node_id}"),
                        s,
                    )
                })?;
            Ok(response.into_inner())
        })
        .await
    }

    /// Update one network interface
    #[instrument(skip(self, ctx, interface), fields(interface_id = %interface.id))]
    pub async fn update_interface(
        &self,
        ctx: &RequestContext,
        node_id: &str,
        interface: ela::NetworkInterface,
    ) -> Result<()> {
        ctx.run("update interface", async {
            let id = interface.id.clone();
            let mut clients = self.broker.connect_ela(node_id).await?;
            clients.interfaces.update(interface).await.map_err(|s| {
                Error::from_status(format!("update interface {id} of node {node_id}"), s)
            })?;
            Ok(())
        })
        .await
    }

    /// Update several network interfaces in one call
    #[instrument(skip(self, ctx, interfaces), fields(count = interfaces.len()))]
    pub async fn bulk_update_interfaces(
        &self,
        ctx: &RequestContext,
        node_id: &str,
        interfaces: Vec<ela::NetworkInterface>,
    ) -> Result<()> {
        ctx.run("bulk update interfaces", async {
            let mut clients = self.broker.connect_ela(node_id).await?;
            clients
                .interfaces
                .bulk_update(ela::NetworkInterfaces {
                    network_interfaces: interfaces,
                })
                .await
                .map_err(|s| {
                    Error::from_status(format!("bulk update interfaces of node {node_id}"), s)
                })?;
            Ok(())
        })
        .await
    }
}

/// Alias records first, then the configuration's own records
fn pushed_records(config: &DnsConfig, aliases: &[DnsAppAlias]) -> Result<Vec<DnsARecord>> {
    let mut records = Vec::with_capacity(aliases.len() + config.records.len());
    for alias in aliases {
        alias.validate()?;
        if alias.dns_config_id != config.id {
            return Err(Error::validation(format!(
                "dns alias {} belongs to dns config {}, not {}",
                alias.id, alias.dns_config_id, config.id
            )));
        }
        records.push(alias.a_record());
    }
    records.extend(config.records.iter().cloned());
    Ok(records)
}

fn record_set(record: &DnsARecord) -> ela::DnsRecordSet {
    ela::DnsRecordSet {
        name: record.name.clone(),
        values: record.ips.clone(),
    }
}
