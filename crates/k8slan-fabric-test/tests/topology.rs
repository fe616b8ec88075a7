//! VLAN topology tests
//!
//! Spokes built as VLAN sub-interfaces of the LAN bridge

use k8slan_fabric::{FabricError, LinkKind, TapRequest};
use k8slan_fabric_test::{host_with_uplink, LanSpecBuilder, TopologyVerifier, HOSTNAME, UPLINK};
use k8slan_types::{MacvtapMode, Topology};
use pretty_assertions::assert_eq;

fn vlan_lan(spokes: usize) -> k8slan_types::LanSpec {
    LanSpecBuilder::new("lan1")
        .numbered_spokes(spokes)
        .topology(Topology::Vlan)
        .build()
}

#[test]
fn test_vlan_spoke_follows_ordinal() {
    let (kernel, fabric) = host_with_uplink();
    let verifier = TopologyVerifier::new(&kernel);

    fabric
        .ensure(
            &vlan_lan(3),
            HOSTNAME,
            &TapRequest::new("s2", "s2Mvp0", MacvtapMode::Vepa),
        )
        .unwrap();

    let spoke = verifier.assert_link("host", "s2", LinkKind::Vlan).unwrap();
    assert_eq!(spoke.vlan_id, Some(3));
    assert_eq!(spoke.parent, Some(kernel.link("lan1", "br0").unwrap().index));
    verifier.assert_mtu("host", "s2", 1422).unwrap();
    verifier.assert_up("host", "s2").unwrap();

    // No veth peer in the VLAN topology
    verifier.assert_absent("lan1", "s2p").unwrap();
    verifier
        .assert_link("host", "s2Mvp0", LinkKind::Macvtap)
        .unwrap();
}

#[test]
fn test_vlan_remove() {
    let (kernel, fabric) = host_with_uplink();
    let spec = vlan_lan(2);
    fabric
        .ensure(
            &spec,
            HOSTNAME,
            &TapRequest::new("s0", "s0Mvp0", MacvtapMode::Bridge),
        )
        .unwrap();

    let report = fabric.remove(&spec).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.removed, vec!["s0", "vx0", "br0"]);
    assert_eq!(kernel.link_names("host"), vec![UPLINK, "lo"]);
}

#[test]
fn test_veth_spoke_blocks_vlan_topology() {
    let (kernel, fabric) = host_with_uplink();
    kernel.insert_link("host", "s0", LinkKind::Veth);

    let err = fabric
        .ensure(
            &vlan_lan(1),
            HOSTNAME,
            &TapRequest::new("s0", "s0Mvp0", MacvtapMode::Bridge),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        FabricError::KindMismatch {
            expected: LinkKind::Vlan,
            found: LinkKind::Veth,
            ..
        }
    ));
}

#[test]
fn test_vlan_id_limit() {
    let (kernel, fabric) = host_with_uplink();
    let spec = vlan_lan(4095);

    fabric
        .ensure(
            &spec,
            HOSTNAME,
            &TapRequest::new("s4093", "s4093Mvp0", MacvtapMode::Bridge),
        )
        .unwrap();
    assert_eq!(kernel.link("host", "s4093").unwrap().vlan_id, Some(4094));

    let err = fabric
        .ensure(
            &spec,
            HOSTNAME,
            &TapRequest::new("s4094", "s4094Mvp0", MacvtapMode::Bridge),
        )
        .unwrap_err();
    assert!(matches!(err, FabricError::InvalidTopology { .. }));
    assert_eq!(kernel.link("host", "s4094"), None);
}
