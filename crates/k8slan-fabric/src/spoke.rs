//! Per-spoke endpoints hanging off the LAN bridge.
//!
//! A spoke's host-facing end carries the spoke name and lives in the host
//! namespace. With the veth topology its bridge-side peer is named
//! `<spoke>p` and stays in the LAN namespace; with the VLAN topology the
//! host-facing end is a VLAN sub-interface of the bridge.

use crate::error::{FabricError, FabricResult};
use crate::kernel::{Kernel, LinkKind, LinkOps, NetNs, NewLink};
use crate::overlay::BRIDGE_PORT_GROUP_FWD_MASK;
use crate::settle::{wait_until_absent, SettlePolicy};
use k8slan_types::{IfName, Topology};
use tracing::{info, instrument, warn};

/// Suffix of the bridge-side end of a spoke veth pair.
pub const PEER_SUFFIX: &str = "p";

/// 802.1Q tag size taken off the fabric MTU for VLAN spokes.
const VLAN_OVERHEAD: u32 = 4;

/// Highest usable VLAN id; 4095 is reserved.
const MAX_VLAN_ID: u16 = 4094;

/// Bridge-side peer name for a spoke.
pub fn peer_name(spoke: &IfName) -> FabricResult<String> {
    spoke
        .with_suffix(PEER_SUFFIX)
        .map(String::from)
        .map_err(|e| FabricError::from(k8slan_types::ValidationError::from_parse("spokes", e)))
}

/// Desired endpoint for one spoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpokePlan {
    pub spoke: IfName,
    /// Position of the spoke in the LAN's spoke list.
    pub ordinal: usize,
    pub bridge: u32,
    /// Fabric MTU of the bridge.
    pub mtu: u32,
    pub topology: Topology,
    pub force: bool,
}

/// The kernel objects one topology builds for a spoke.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Endpoint {
    Veth { peer: String },
    Vlan { vlan_id: u16 },
}

impl Endpoint {
    fn for_plan(plan: &SpokePlan) -> FabricResult<Self> {
        match plan.topology {
            Topology::Veth => Ok(Endpoint::Veth {
                peer: peer_name(&plan.spoke)?,
            }),
            Topology::Vlan => {
                let vlan_id = u16::try_from(plan.ordinal + 1)
                    .ok()
                    .filter(|id| *id <= MAX_VLAN_ID)
                    .ok_or_else(|| FabricError::InvalidTopology {
                        topology: plan.topology.to_string(),
                        message: format!(
                            "spoke {} at position {} needs a vlan id above {MAX_VLAN_ID}",
                            plan.spoke, plan.ordinal
                        ),
                    })?;
                Ok(Endpoint::Vlan { vlan_id })
            }
        }
    }

    /// Kind of the host-facing link.
    fn kind(&self) -> LinkKind {
        match self {
            Endpoint::Veth { .. } => LinkKind::Veth,
            Endpoint::Vlan { .. } => LinkKind::Vlan,
        }
    }

    /// Names inside the LAN namespace a previous run may have left behind.
    fn stale_names<'a>(&'a self, spoke: &'a str) -> Vec<&'a str> {
        match self {
            Endpoint::Veth { peer } => vec![peer.as_str(), spoke],
            Endpoint::Vlan { .. } => vec![spoke],
        }
    }

    fn create<L: LinkOps>(&self, links: &mut L, plan: &SpokePlan) -> FabricResult<()> {
        match self {
            Endpoint::Veth { peer } => {
                links.add_link(&NewLink::Veth {
                    name: plan.spoke.to_string(),
                    peer: peer.clone(),
                    mtu: plan.mtu,
                })?;
                let peer = links.require(peer)?;
                links.set_master(peer.index, plan.bridge)?;
                links.set_group_fwd_mask(peer.index, BRIDGE_PORT_GROUP_FWD_MASK)?;
                links.set_up(peer.index)?;
            }
            Endpoint::Vlan { vlan_id } => {
                links.add_link(&NewLink::Vlan {
                    name: plan.spoke.to_string(),
                    parent: plan.bridge,
                    vlan_id: *vlan_id,
                    mtu: plan.mtu.saturating_sub(VLAN_OVERHEAD),
                })?;
            }
        }
        Ok(())
    }
}

/// Builds spoke endpoints and hands their host-facing end to the host.
pub struct SpokeProvisioner<'k, K> {
    kernel: &'k K,
    ns: &'k NetNs,
    settle: SettlePolicy,
}

impl<'k, K: Kernel> SpokeProvisioner<'k, K> {
    pub fn new(kernel: &'k K, ns: &'k NetNs, settle: SettlePolicy) -> Self {
        Self { kernel, ns, settle }
    }

    /// Recreates the endpoint for one spoke.
    ///
    /// Stale links from a previous run are deleted first and their names
    /// polled until the kernel releases them. On success the host-facing end
    /// exists, still down, in the host namespace.
    #[instrument(skip(self, plan), fields(namespace = %self.ns.name(), spoke = %plan.spoke, topology = %plan.topology))]
    pub fn provision(&self, plan: &SpokePlan) -> FabricResult<()> {
        let endpoint = Endpoint::for_plan(plan)?;
        let spoke = plan.spoke.as_str();

        {
            let mut host = self.kernel.links()?;
            self.clear_host_end(&mut host, &endpoint, plan)?;
        }

        let settle = self.settle;
        let host_ns = self.kernel.host().clone();
        self.kernel.run_in(self.ns, |links| {
            let stale = endpoint.stale_names(spoke);
            for name in &stale {
                if links.delete_by_name(name)? {
                    info!(link = name, "Deleted stale spoke link");
                }
            }
            for name in &stale {
                wait_until_absent(links, name, &settle)?;
            }

            endpoint.create(links, plan)?;
            let host_end = links.require(spoke)?;
            links.move_to_namespace(host_end.index, &host_ns)
        })?;

        info!(mtu = plan.mtu, "Spoke endpoint created");
        Ok(())
    }

    /// Removes a leftover host-facing link so the new one can take its name.
    fn clear_host_end<L: LinkOps>(
        &self,
        host: &mut L,
        endpoint: &Endpoint,
        plan: &SpokePlan,
    ) -> FabricResult<()> {
        let spoke = plan.spoke.as_str();
        let Some(existing) = host.link_by_name(spoke)? else {
            return Ok(());
        };

        let expected = endpoint.kind();
        if !existing.is(&expected) {
            if !plan.force {
                return Err(FabricError::KindMismatch {
                    name: spoke.to_string(),
                    expected,
                    found: existing.kind,
                });
            }
            warn!(link = spoke, found = %existing.kind, "Host link is not a spoke endpoint, replacing");
        }

        match host.delete_link(existing.index) {
            Ok(()) => info!(link = spoke, "Deleted stale host spoke link"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        wait_until_absent(host, spoke, &self.settle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn plan(topology: Topology, ordinal: usize) -> SpokePlan {
        SpokePlan {
            spoke: IfName::new("s1").unwrap(),
            ordinal,
            bridge: 10,
            mtu: 1426,
            topology,
            force: false,
        }
    }

    #[test]
    fn test_peer_name() {
        let spoke = IfName::new("abcdefghijklm").unwrap();
        assert_eq!(peer_name(&spoke).unwrap(), "abcdefghijklmp");
    }

    #[test]
    fn test_veth_endpoint() {
        let endpoint = Endpoint::for_plan(&plan(Topology::Veth, 0)).unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Veth {
                peer: "s1p".to_string()
            }
        );
        assert_eq!(endpoint.kind(), LinkKind::Veth);
        assert_eq!(endpoint.stale_names("s1"), vec!["s1p", "s1"]);
    }

    #[test]
    fn test_vlan_ids_follow_ordinal() {
        let endpoint = Endpoint::for_plan(&plan(Topology::Vlan, 0)).unwrap();
        assert_eq!(endpoint, Endpoint::Vlan { vlan_id: 1 });

        let endpoint = Endpoint::for_plan(&plan(Topology::Vlan, 4093)).unwrap();
        assert_eq!(endpoint, Endpoint::Vlan { vlan_id: 4094 });
    }

    #[test]
    fn test_vlan_id_4095_rejected() {
        let err = Endpoint::for_plan(&plan(Topology::Vlan, 4094)).unwrap_err();
        assert!(matches!(err, FabricError::InvalidTopology { .. }));
    }
}
