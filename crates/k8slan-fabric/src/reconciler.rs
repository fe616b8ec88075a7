//! Ensure and Remove entry points for one LAN on one host.
//!
//! The engine keeps no state between calls. Every pass re-reads the kernel
//! and converges from whatever it finds. Callers serialize calls for the
//! same LAN; calls for different LANs may run in parallel.

use crate::device::{parse_device_id, DeviceAllocation};
use crate::error::{FabricError, FabricResult};
use crate::inspector::{self, vxlan_drift, Drift};
use crate::kernel::{Kernel, LinkKind, LinkOps, NetNs};
use crate::namespace::NamespaceManager;
use crate::overlay::{fabric_mtu, Overlay, OverlayBuilder, OverlayPlan};
use crate::settle::SettlePolicy;
use crate::spoke::{peer_name, SpokePlan, SpokeProvisioner};
use crate::tap::recreate_tap;
use k8slan_types::{IfName, Lan, LanSpec, MacvtapMode, Topology, ValidationError};
use std::fmt;
use tracing::{debug, info, instrument, warn};

/// A request for one spoke's macvtap device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapRequest {
    pub spoke: String,
    pub tap: String,
    pub mode: MacvtapMode,
}

impl TapRequest {
    pub fn new(spoke: impl Into<String>, tap: impl Into<String>, mode: MacvtapMode) -> Self {
        Self {
            spoke: spoke.into(),
            tap: tap.into(),
            mode,
        }
    }
}

/// Observed state of a LAN on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LanState {
    /// Neither the bridge nor the VXLAN link exists.
    Absent,
    /// Some of the overlay exists but it is not complete.
    Provisioning,
    Converged,
    /// The VXLAN link exists with mismatched attributes.
    Drifted(Vec<Drift>),
    /// A link carries a LAN name but is of the wrong kind.
    Conflict { link: String, found: LinkKind },
}

impl fmt::Display for LanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LanState::Absent => f.write_str("absent"),
            LanState::Provisioning => f.write_str("provisioning"),
            LanState::Converged => f.write_str("converged"),
            LanState::Drifted(drifts) => {
                f.write_str("drifted")?;
                for drift in drifts {
                    write!(f, "; {drift}")?;
                }
                Ok(())
            }
            LanState::Conflict { link, found } => {
                write!(f, "conflict: {link} is a {found} interface")
            }
        }
    }
}

/// Outcome of a best-effort teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub removed: Vec<String>,
    pub absent: Vec<String>,
    /// Links that could not be removed, with the error.
    pub failed: Vec<(String, String)>,
}

impl TeardownReport {
    fn record(&mut self, name: &str, result: FabricResult<bool>) {
        match result {
            Ok(true) => self.removed.push(name.to_string()),
            Ok(false) => self.absent.push(name.to_string()),
            Err(e) if e.is_not_found() => self.absent.push(name.to_string()),
            Err(e) => {
                warn!(link = name, error = %e, "Failed to delete link");
                self.failed.push((name.to_string(), e.to_string()));
            }
        }
    }

    fn merge(&mut self, other: TeardownReport) {
        self.removed.extend(other.removed);
        self.absent.extend(other.absent);
        self.failed.extend(other.failed);
    }

    /// True if nothing failed to delete.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Overlay pass result shared by [`LanFabric::ensure`] and [`LanFabric::ensure_overlay`].
struct Converged {
    lan: Lan,
    ns: NetNs,
    overlay: Overlay,
    mtu: u32,
}

/// The reconciliation engine for LANs on one host.
pub struct LanFabric<K> {
    kernel: K,
    settle: SettlePolicy,
}

impl<K: Kernel> LanFabric<K> {
    pub fn new(kernel: K) -> Self {
        Self {
            kernel,
            settle: SettlePolicy::default(),
        }
    }

    /// Overrides how long to wait for the kernel to release link names.
    pub fn with_settle_policy(mut self, settle: SettlePolicy) -> Self {
        self.settle = settle;
        self
    }

    /// Converges the LAN's namespace, bridge and VXLAN link on this host.
    #[instrument(skip(self, spec), fields(namespace = %spec.ns))]
    pub fn ensure_overlay(&self, spec: &LanSpec, hostname: &str) -> FabricResult<Overlay> {
        let lan = spec.validate()?;
        Ok(self.converge_overlay(lan, hostname)?.overlay)
    }

    /// Converges the overlay and one spoke, then recreates its macvtap.
    ///
    /// Returns the macvtap link index.
    #[instrument(skip(self, spec), fields(namespace = %spec.ns))]
    pub fn ensure(&self, spec: &LanSpec, hostname: &str, request: &TapRequest) -> FabricResult<u32> {
        let lan = spec.validate()?;
        let (ordinal, spoke) = lan
            .spoke(&request.spoke)
            .map(|(ordinal, spoke)| (ordinal, spoke.clone()))
            .ok_or_else(|| FabricError::UnknownSpoke {
                spoke: request.spoke.clone(),
                namespace: lan.namespace.clone(),
            })?;
        IfName::kernel(request.tap.as_str())
            .map_err(|e| ValidationError::from_parse("tap", e))?;
        let tap = request.tap.as_str();
        if lan.spoke(tap).is_some() || lan.bridge.as_str() == tap || lan.vxlan.as_str() == tap {
            return Err(FabricError::TapConflict {
                tap: tap.to_string(),
                reason: format!("it names a link of LAN {}", lan.namespace),
            });
        }

        let converged = self.converge_overlay(lan, hostname)?;

        let plan = SpokePlan {
            spoke: spoke.clone(),
            ordinal,
            bridge: converged.overlay.bridge,
            mtu: converged.mtu,
            topology: converged.lan.topology,
            force: converged.lan.force,
        };
        SpokeProvisioner::new(&self.kernel, &converged.ns, self.settle).provision(&plan)?;

        let mut host = self.kernel.links()?;
        let host_end = host.require(spoke.as_str())?;
        host.set_up(host_end.index)?;

        let index = recreate_tap(&mut host, &request.tap, spoke.as_str(), request.mode)?;
        info!(spoke = %spoke, tap = %request.tap, index, state = "converged", "LAN spoke ready");
        Ok(index)
    }

    /// Ensures the spoke behind a device-plugin device ID and returns the
    /// device to expose. The device ID is used as the macvtap name.
    pub fn allocate(
        &self,
        spec: &LanSpec,
        hostname: &str,
        device_id: &str,
        mode: MacvtapMode,
    ) -> FabricResult<DeviceAllocation> {
        let (spoke, _) = parse_device_id(device_id).ok_or_else(|| {
            ValidationError::new("deviceId", format!("malformed device id {device_id}"))
        })?;
        let index = self.ensure(spec, hostname, &TapRequest::new(spoke, device_id, mode))?;
        Ok(DeviceAllocation::for_tap(index))
    }

    fn converge_overlay(&self, lan: Lan, hostname: &str) -> FabricResult<Converged> {
        let ns = NamespaceManager::new(&self.kernel).ensure_namespace(&lan.namespace)?;

        let uplink = {
            let mut host = self.kernel.links()?;
            inspector::resolve_uplink(&mut host, &lan, hostname)?
        };
        let mtu = fabric_mtu(&uplink)?;
        let plan = OverlayPlan::new(&lan, &uplink, mtu);

        let overlay = OverlayBuilder::new(&self.kernel, &ns, self.settle).converge(&plan)?;
        if !overlay.rebuilt.is_empty() {
            info!(drifts = overlay.rebuilt.len(), state = "drifted", "Rebuilt drifted vxlan interface");
        }
        if overlay.changed {
            info!(uplink = %uplink.name, mtu, state = "provisioning", "Overlay converged");
        } else {
            debug!(state = "converged", "Overlay unchanged");
        }

        Ok(Converged {
            lan,
            ns,
            overlay,
            mtu,
        })
    }

    /// Tears the LAN down, best effort.
    ///
    /// Host-facing spoke ends go first (deleting one end of a veth removes
    /// both), then whatever is left in the namespace: spoke peers, the VXLAN
    /// link, the bridge. Links that are already gone count as removed. The
    /// namespace itself is kept.
    #[instrument(skip(self, spec), fields(namespace = %spec.ns))]
    pub fn remove(&self, spec: &LanSpec) -> FabricResult<TeardownReport> {
        let lan = spec.validate()?;
        let mut report = TeardownReport::default();

        let spoke_kind = match lan.topology {
            Topology::Veth => LinkKind::Veth,
            Topology::Vlan => LinkKind::Vlan,
        };
        match self.kernel.links() {
            Ok(mut host) => {
                for spoke in &lan.spokes {
                    let result = match host.link_by_name(spoke.as_str()) {
                        Ok(Some(link)) if !link.is(&spoke_kind) => {
                            warn!(link = %spoke, found = %link.kind, "Host link is not a spoke endpoint, leaving it");
                            Ok(false)
                        }
                        Ok(Some(link)) => host.delete_link(link.index).map(|()| true),
                        Ok(None) => Ok(false),
                        Err(e) => Err(e),
                    };
                    report.record(spoke.as_str(), result);
                }
            }
            Err(e) => report.record("host", Err(e)),
        }

        let ns = match self.kernel.open_namespace(&lan.namespace) {
            Ok(Some(ns)) => ns,
            Ok(None) => {
                debug!("Namespace absent, nothing left to remove");
                return Ok(report);
            }
            Err(e) => {
                report.record(&lan.namespace, Err(e));
                return Ok(report);
            }
        };

        let mut names = Vec::with_capacity(lan.spokes.len() * 2 + 2);
        for spoke in &lan.spokes {
            if lan.topology == Topology::Veth {
                names.push(peer_name(spoke)?);
            }
            names.push(spoke.to_string());
        }
        names.push(lan.vxlan.to_string());
        names.push(lan.bridge.to_string());

        match self.kernel.run_in(&ns, |links| {
            let mut inner = TeardownReport::default();
            for name in &names {
                inner.record(name, links.delete_by_name(name));
            }
            Ok(inner)
        }) {
            Ok(inner) => report.merge(inner),
            Err(e) => report.record(&lan.namespace, Err(e)),
        }

        info!(
            removed = report.removed.len(),
            failed = report.failed.len(),
            state = "removed",
            "LAN teardown finished"
        );
        Ok(report)
    }

    /// Reads the LAN's current state without changing anything.
    #[instrument(skip(self, spec), fields(namespace = %spec.ns))]
    pub fn observe(&self, spec: &LanSpec, hostname: &str) -> FabricResult<LanState> {
        let lan = spec.validate()?;
        let Some(ns) = self.kernel.open_namespace(&lan.namespace)? else {
            return Ok(LanState::Absent);
        };

        let uplink = {
            let mut host = self.kernel.links()?;
            inspector::resolve_uplink(&mut host, &lan, hostname)?
        };
        let mtu = fabric_mtu(&uplink)?;
        let plan = OverlayPlan::new(&lan, &uplink, mtu);

        self.kernel.run_in(&ns, |links| {
            let bridge = inspector::get_link(links, &plan.bridge)?;
            let vxlan = inspector::get_link(links, &plan.vxlan)?;

            let state = match (bridge, vxlan) {
                (None, None) => LanState::Absent,
                (Some(bridge), _) if !bridge.is(&LinkKind::Bridge) => LanState::Conflict {
                    link: bridge.name,
                    found: bridge.kind,
                },
                (_, Some(vxlan)) if !vxlan.is(&LinkKind::Vxlan) => LanState::Conflict {
                    link: vxlan.name,
                    found: vxlan.kind,
                },
                (bridge, Some(vxlan)) => {
                    let drifts =
                        vxlan_drift(&vxlan.vxlan.unwrap_or_default(), &plan.vxlan_attrs());
                    match bridge {
                        _ if !drifts.is_empty() => LanState::Drifted(drifts),
                        Some(bridge)
                            if bridge.up && vxlan.up && vxlan.master == Some(bridge.index) =>
                        {
                            LanState::Converged
                        }
                        _ => LanState::Provisioning,
                    }
                }
                (Some(_), None) => LanState::Provisioning,
            };
            Ok(state)
        })
    }
}
