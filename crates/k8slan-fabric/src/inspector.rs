//! Read-only queries against live link state.

use crate::error::{FabricError, FabricResult};
use crate::kernel::{Link, LinkOps, VxlanAttrs};
use k8slan_types::{Lan, UplinkSelector};
use std::fmt;
use std::net::IpAddr;
use tracing::debug;

/// One attribute of a live VXLAN link that differs from the desired state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drift {
    Group {
        expected: IpAddr,
        actual: Option<IpAddr>,
    },
    Vni {
        expected: u32,
        actual: u32,
    },
    Uplink {
        expected: u32,
        actual: Option<u32>,
    },
    Port {
        expected: u16,
        actual: u16,
    },
}

struct Found<T>(Option<T>);

impl<T: fmt::Display> fmt::Display for Found<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(v) => v.fmt(f),
            None => f.write_str("none"),
        }
    }
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Drift::Group { expected, actual } => write!(
                f,
                "different group address: expected {expected}, found {}",
                Found(*actual)
            ),
            Drift::Vni { expected, actual } => {
                write!(f, "different vni: expected {expected}, found {actual}")
            }
            Drift::Uplink { expected, actual } => write!(
                f,
                "different uplink index: expected {expected}, found {}",
                Found(*actual)
            ),
            Drift::Port { expected, actual } => {
                write!(f, "different port: expected {expected}, found {actual}")
            }
        }
    }
}

/// Compares live VXLAN attributes against the desired ones.
///
/// Returns every mismatch, in group, VNI, uplink, port order.
pub fn vxlan_drift(live: &VxlanAttrs, desired: &VxlanAttrs) -> Vec<Drift> {
    let mut drifts = Vec::new();

    if live.group != desired.group {
        if let Some(expected) = desired.group {
            drifts.push(Drift::Group {
                expected,
                actual: live.group,
            });
        }
    }
    if live.vni != desired.vni {
        drifts.push(Drift::Vni {
            expected: desired.vni,
            actual: live.vni,
        });
    }
    if live.uplink != desired.uplink {
        if let Some(expected) = desired.uplink {
            drifts.push(Drift::Uplink {
                expected,
                actual: live.uplink,
            });
        }
    }
    if live.port != desired.port {
        drifts.push(Drift::Port {
            expected: desired.port,
            actual: live.port,
        });
    }

    drifts
}

/// Resolves a link by name.
pub fn get_link<L: LinkOps>(links: &mut L, name: &str) -> FabricResult<Option<Link>> {
    links.link_by_name(name)
}

/// Selects the VXLAN underlay device for `hostname` from the host link table.
///
/// A per-host override wins over the LAN default. `auto` follows the
/// default route's egress interface.
pub fn resolve_uplink<L: LinkOps>(links: &mut L, lan: &Lan, hostname: &str) -> FabricResult<Link> {
    let selector = lan.uplink_for(hostname);
    let not_found = || FabricError::UplinkNotFound {
        selector: selector.to_string(),
    };

    let link = match selector {
        UplinkSelector::Named(name) => links.link_by_name(name)?,
        UplinkSelector::Auto => match links.default_route_link()? {
            Some(index) => links.link_by_index(index)?,
            None => None,
        },
    }
    .ok_or_else(not_found)?;

    debug!(hostname, %selector, uplink = %link.name, index = link.index, "Resolved uplink");
    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::Ipv6Addr;

    fn attrs(vni: u32) -> VxlanAttrs {
        VxlanAttrs {
            vni,
            group: Some(IpAddr::V6(Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x14))),
            uplink: Some(2),
            port: 4789,
        }
    }

    #[test]
    fn test_no_drift() {
        assert!(vxlan_drift(&attrs(100), &attrs(100)).is_empty());
    }

    #[test]
    fn test_single_drift() {
        assert_eq!(
            vxlan_drift(&attrs(100), &attrs(200)),
            vec![Drift::Vni {
                expected: 200,
                actual: 100
            }]
        );
    }

    #[test]
    fn test_all_drifts_in_order() {
        let live = VxlanAttrs {
            vni: 100,
            group: None,
            uplink: Some(7),
            port: 8472,
        };
        let drifts = vxlan_drift(&live, &attrs(200));
        assert_eq!(drifts.len(), 4);
        assert!(matches!(drifts[0], Drift::Group { actual: None, .. }));
        assert!(matches!(drifts[1], Drift::Vni { .. }));
        assert!(matches!(
            drifts[2],
            Drift::Uplink {
                expected: 2,
                actual: Some(7)
            }
        ));
        assert!(matches!(
            drifts[3],
            Drift::Port {
                expected: 4789,
                actual: 8472
            }
        ));
    }

    #[test]
    fn test_drift_display() {
        let drift = Drift::Group {
            expected: "ff02::14".parse().unwrap(),
            actual: None,
        };
        assert_eq!(
            drift.to_string(),
            "different group address: expected ff02::14, found none"
        );
    }
}
