//! Bridge and VXLAN convergence inside a LAN namespace.

use crate::error::{FabricError, FabricResult};
use crate::inspector::{vxlan_drift, Drift};
use crate::kernel::{Kernel, Link, LinkKind, LinkOps, NetNs, NewLink, VxlanAttrs};
use crate::settle::{wait_until_absent, SettlePolicy};
use k8slan_types::Lan;
use std::net::IpAddr;
use tracing::{debug, info, instrument, warn};

/// Worst-case VXLAN encapsulation overhead: IPv6 underlay with an 802.1Q tag.
pub const VXLAN_OVERHEAD: u32 = 74;

/// Bridge-port group forward mask letting link-local multicast cross the bridge.
///
/// Every bit is set except bit 1 (01:80:C2:00:00:01, pause frames), which the
/// kernel refuses to forward.
pub const BRIDGE_PORT_GROUP_FWD_MASK: u16 = 65533;

/// Smallest MTU an IPv4 link may have.
const MIN_MTU: u32 = 68;

/// MTU for the bridge and VXLAN derived from the uplink.
pub fn fabric_mtu(uplink: &Link) -> FabricResult<u32> {
    uplink
        .mtu
        .checked_sub(VXLAN_OVERHEAD)
        .filter(|mtu| *mtu >= MIN_MTU)
        .ok_or_else(|| FabricError::InvalidMtu {
            uplink: uplink.name.clone(),
            mtu: uplink.mtu,
        })
}

/// Desired bridge and VXLAN for one LAN on one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayPlan {
    pub bridge: String,
    pub vxlan: String,
    pub mtu: u32,
    pub vni: u32,
    pub group: IpAddr,
    /// Uplink index in the host namespace.
    pub uplink: u32,
    pub port: u16,
    pub force: bool,
}

impl OverlayPlan {
    pub fn new(lan: &Lan, uplink: &Link, mtu: u32) -> Self {
        Self {
            bridge: lan.bridge.to_string(),
            vxlan: lan.vxlan.to_string(),
            mtu,
            vni: lan.vni.as_u32(),
            group: lan.group.addr(),
            uplink: uplink.index,
            port: lan.port,
            force: lan.force,
        }
    }

    /// VXLAN attributes a converged link must carry.
    pub fn vxlan_attrs(&self) -> VxlanAttrs {
        VxlanAttrs {
            vni: self.vni,
            group: Some(self.group),
            uplink: Some(self.uplink),
            port: self.port,
        }
    }

    fn vxlan_link(&self, ns: &NetNs) -> NewLink {
        NewLink::Vxlan {
            name: self.vxlan.clone(),
            mtu: self.mtu,
            vni: self.vni,
            group: self.group,
            uplink: self.uplink,
            port: self.port,
            namespace: Some(ns.clone()),
        }
    }
}

/// Result of one overlay pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub bridge: u32,
    pub vxlan: u32,
    /// True if any kernel object was created, deleted or repaired.
    pub changed: bool,
    /// Mismatches that were resolved by a forced rebuild.
    pub rebuilt: Vec<Drift>,
}

/// What the in-namespace inspection decided about the VXLAN link.
enum VxlanState {
    Present,
    Missing,
    Rebuild(Vec<Drift>),
}

/// Converges the bridge and VXLAN link of a LAN namespace.
pub struct OverlayBuilder<'k, K> {
    kernel: &'k K,
    ns: &'k NetNs,
    settle: SettlePolicy,
}

impl<'k, K: Kernel> OverlayBuilder<'k, K> {
    pub fn new(kernel: &'k K, ns: &'k NetNs, settle: SettlePolicy) -> Self {
        Self { kernel, ns, settle }
    }

    /// Brings the bridge and VXLAN link in line with `plan`.
    ///
    /// A converged overlay is left untouched. Drift on an existing VXLAN link
    /// fails unless `plan.force` is set, in which case the link is rebuilt.
    #[instrument(skip(self, plan), fields(namespace = %self.ns.name(), bridge = %plan.bridge, vxlan = %plan.vxlan))]
    pub fn converge(&self, plan: &OverlayPlan) -> FabricResult<Overlay> {
        let settle = self.settle;
        let (bridge, bridge_changed, state) = self.kernel.run_in(self.ns, |links| {
            let (bridge, bridge_changed) = ensure_bridge(links, plan, &settle)?;
            let state = inspect_vxlan(links, plan, &settle)?;
            Ok((bridge, bridge_changed, state))
        })?;

        let mut changed = bridge_changed;
        let mut rebuilt = Vec::new();
        match state {
            VxlanState::Present => {}
            VxlanState::Missing => {
                self.create_vxlan(plan)?;
                changed = true;
            }
            VxlanState::Rebuild(drifts) => {
                self.create_vxlan(plan)?;
                changed = true;
                rebuilt = drifts;
            }
        }

        let (vxlan, attach_changed) = self
            .kernel
            .run_in(self.ns, |links| attach_vxlan(links, plan, bridge))?;
        changed |= attach_changed;

        if !changed {
            debug!("Overlay already converged");
        }

        Ok(Overlay {
            bridge,
            vxlan,
            changed,
            rebuilt,
        })
    }

    /// Creates the VXLAN link from the host namespace so that the uplink
    /// index resolves against host devices, placing it in the LAN namespace.
    fn create_vxlan(&self, plan: &OverlayPlan) -> FabricResult<()> {
        let mut host = self.kernel.links()?;
        host.add_link(&plan.vxlan_link(self.ns))?;
        info!(
            vxlan = %plan.vxlan,
            vni = plan.vni,
            group = %plan.group,
            uplink = plan.uplink,
            port = plan.port,
            mtu = plan.mtu,
            "Created vxlan interface"
        );
        Ok(())
    }
}

fn ensure_bridge<L: LinkOps>(
    links: &mut L,
    plan: &OverlayPlan,
    settle: &SettlePolicy,
) -> FabricResult<(u32, bool)> {
    match links.link_by_name(&plan.bridge)? {
        Some(link) if link.is(&LinkKind::Bridge) => {
            if link.up {
                return Ok((link.index, false));
            }
            links.set_up(link.index)?;
            info!(bridge = %plan.bridge, "Bridge brought up");
            Ok((link.index, true))
        }
        Some(link) => {
            if !plan.force {
                return Err(FabricError::KindMismatch {
                    name: plan.bridge.clone(),
                    expected: LinkKind::Bridge,
                    found: link.kind,
                });
            }
            warn!(bridge = %plan.bridge, found = %link.kind, "Interface is not a bridge, recreating");
            links.delete_link(link.index)?;
            wait_until_absent(links, &plan.bridge, settle)?;
            Ok((create_bridge(links, plan)?, true))
        }
        None => Ok((create_bridge(links, plan)?, true)),
    }
}

fn create_bridge<L: LinkOps>(links: &mut L, plan: &OverlayPlan) -> FabricResult<u32> {
    links.add_link(&NewLink::Bridge {
        name: plan.bridge.clone(),
        mtu: plan.mtu,
    })?;
    let bridge = links.require(&plan.bridge)?;
    links.set_up(bridge.index)?;
    info!(bridge = %plan.bridge, mtu = plan.mtu, "Created bridge");
    Ok(bridge.index)
}

fn inspect_vxlan<L: LinkOps>(
    links: &mut L,
    plan: &OverlayPlan,
    settle: &SettlePolicy,
) -> FabricResult<VxlanState> {
    let Some(link) = links.link_by_name(&plan.vxlan)? else {
        return Ok(VxlanState::Missing);
    };

    if !link.is(&LinkKind::Vxlan) {
        if !plan.force {
            return Err(FabricError::KindMismatch {
                name: plan.vxlan.clone(),
                expected: LinkKind::Vxlan,
                found: link.kind,
            });
        }
        warn!(vxlan = %plan.vxlan, found = %link.kind, "Interface is not a vxlan, recreating");
        links.delete_link(link.index)?;
        wait_until_absent(links, &plan.vxlan, settle)?;
        return Ok(VxlanState::Rebuild(Vec::new()));
    }

    let drifts = vxlan_drift(&link.vxlan.unwrap_or_default(), &plan.vxlan_attrs());
    if drifts.is_empty() {
        return Ok(VxlanState::Present);
    }

    if !plan.force {
        return Err(FabricError::Drift {
            link: plan.vxlan.clone(),
            drift: drifts[0],
        });
    }

    for drift in &drifts {
        warn!(vxlan = %plan.vxlan, %drift, "Vxlan interface drifted, rebuilding");
    }
    links.delete_link(link.index)?;
    wait_until_absent(links, &plan.vxlan, settle)?;
    Ok(VxlanState::Rebuild(drifts))
}

/// Enslaves the VXLAN link to the bridge and brings it up, if not already.
fn attach_vxlan<L: LinkOps>(
    links: &mut L,
    plan: &OverlayPlan,
    bridge: u32,
) -> FabricResult<(u32, bool)> {
    let vxlan = links.require(&plan.vxlan)?;
    let mut changed = false;

    if vxlan.master != Some(bridge) {
        links.set_master(vxlan.index, bridge)?;
        links.set_group_fwd_mask(vxlan.index, BRIDGE_PORT_GROUP_FWD_MASK)?;
        debug!(vxlan = %plan.vxlan, bridge = %plan.bridge, "Attached vxlan to bridge");
        changed = true;
    }
    if !vxlan.up {
        links.set_up(vxlan.index)?;
        changed = true;
    }

    Ok((vxlan.index, changed))
}
