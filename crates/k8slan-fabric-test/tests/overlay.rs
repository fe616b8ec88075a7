//! Overlay convergence tests
//!
//! Bridge and VXLAN creation, idempotence, drift handling and uplink
//! selection against the in-memory kernel

use k8slan_fabric::{Drift, FabricError, Kernel, LinkKind, VxlanAttrs};
use k8slan_fabric_test::{
    basic_lan, host_with_uplink, LanSpecBuilder, TopologyVerifier, HOSTNAME, UPLINK,
};
use pretty_assertions::assert_eq;

#[test]
fn test_ensure_overlay_creates_namespace_bridge_and_vxlan() {
    let (kernel, fabric) = host_with_uplink();
    let verifier = TopologyVerifier::new(&kernel);

    let overlay = fabric.ensure_overlay(&basic_lan(), HOSTNAME).unwrap();
    assert!(overlay.changed);
    assert!(overlay.rebuilt.is_empty());

    assert!(kernel.has_namespace("lan1"));
    verifier.assert_up("lan1", "lo").unwrap();
    verifier.assert_overlay("lan1", "br0", "vx0", 1426).unwrap();

    let uplink = kernel.link("host", UPLINK).unwrap();
    let vxlan = kernel.link("lan1", "vx0").unwrap();
    assert_eq!(
        vxlan.vxlan,
        Some(VxlanAttrs {
            vni: 100,
            group: Some("ff02::14".parse().unwrap()),
            uplink: Some(uplink.index),
            port: 4789,
        })
    );
    assert_eq!(vxlan.tx_queue_len, 1024);
    assert_eq!(overlay.vxlan, vxlan.index);
}

#[test]
fn test_second_pass_makes_no_changes() {
    let (kernel, fabric) = host_with_uplink();
    let spec = basic_lan();

    fabric.ensure_overlay(&spec, HOSTNAME).unwrap();
    let before = kernel.mutations();

    let overlay = fabric.ensure_overlay(&spec, HOSTNAME).unwrap();
    assert!(!overlay.changed);
    assert_eq!(kernel.mutations(), before);
}

#[test]
fn test_namespace_created_by_another_agent_is_adopted() {
    let (kernel, fabric) = host_with_uplink();
    kernel.create_namespace("lan1").unwrap();
    // The lookup misses, so the create loses the race and must reopen.
    kernel.hide_namespace_once("lan1");

    let overlay = fabric.ensure_overlay(&basic_lan(), HOSTNAME).unwrap();
    assert!(overlay.changed);
    TopologyVerifier::new(&kernel)
        .assert_overlay("lan1", "br0", "vx0", 1426)
        .unwrap();
}

#[test]
fn test_existing_down_bridge_is_reused() {
    let (kernel, fabric) = host_with_uplink();
    kernel.create_namespace("lan1").unwrap();
    let bridge = kernel.insert_link("lan1", "br0", LinkKind::Bridge);

    let overlay = fabric.ensure_overlay(&basic_lan(), HOSTNAME).unwrap();
    assert!(overlay.changed);
    assert_eq!(overlay.bridge, bridge);

    let verifier = TopologyVerifier::new(&kernel);
    verifier.assert_up("lan1", "br0").unwrap();
    verifier.assert_bridge_port("lan1", "vx0", "br0").unwrap();
}

#[test]
fn test_unforced_drift_is_rejected_and_left_alone() {
    let (kernel, fabric) = host_with_uplink();
    fabric.ensure_overlay(&basic_lan(), HOSTNAME).unwrap();
    let before = kernel.mutations();

    let changed = LanSpecBuilder::new("lan1").spoke("s1").vni(200).build();
    let err = fabric.ensure_overlay(&changed, HOSTNAME).unwrap_err();
    assert_eq!(
        err.to_string(),
        "existing vxlan interface vx0 has different vni: expected 200, found 100"
    );

    assert_eq!(kernel.link("lan1", "vx0").unwrap().vxlan.unwrap().vni, 100);
    assert_eq!(kernel.mutations(), before);
}

#[test]
fn test_forced_drift_rebuilds_vxlan() {
    let (kernel, fabric) = host_with_uplink();
    fabric.ensure_overlay(&basic_lan(), HOSTNAME).unwrap();
    let old = kernel.link("lan1", "vx0").unwrap();

    let changed = LanSpecBuilder::new("lan1")
        .spoke("s1")
        .vni(200)
        .force(true)
        .build();
    let overlay = fabric.ensure_overlay(&changed, HOSTNAME).unwrap();

    assert_eq!(
        overlay.rebuilt,
        vec![Drift::Vni {
            expected: 200,
            actual: 100
        }]
    );
    let vxlan = kernel.link("lan1", "vx0").unwrap();
    assert_ne!(vxlan.index, old.index);
    assert_eq!(vxlan.vxlan.unwrap().vni, 200);
    TopologyVerifier::new(&kernel)
        .assert_overlay("lan1", "br0", "vx0", 1426)
        .unwrap();
}

#[test]
fn test_forced_rebuild_reports_every_drift() {
    let (kernel, fabric) = host_with_uplink();
    fabric.ensure_overlay(&basic_lan(), HOSTNAME).unwrap();
    kernel.set_vxlan_attrs(
        "lan1",
        "vx0",
        VxlanAttrs {
            vni: 7,
            group: None,
            uplink: None,
            port: 8472,
        },
    );

    let forced = LanSpecBuilder::new("lan1").spoke("s1").force(true).build();
    let overlay = fabric.ensure_overlay(&forced, HOSTNAME).unwrap();
    assert_eq!(overlay.rebuilt.len(), 4);
    assert_eq!(kernel.link("lan1", "vx0").unwrap().vxlan.unwrap().port, 4789);
}

#[test]
fn test_wrong_kind_is_a_conflict_unless_forced() {
    let (kernel, fabric) = host_with_uplink();
    kernel.create_namespace("lan1").unwrap();
    kernel.insert_link("lan1", "vx0", LinkKind::Veth);

    let err = fabric.ensure_overlay(&basic_lan(), HOSTNAME).unwrap_err();
    assert!(matches!(
        err,
        FabricError::KindMismatch {
            expected: LinkKind::Vxlan,
            found: LinkKind::Veth,
            ..
        }
    ));
    assert!(kernel.link("lan1", "vx0").unwrap().is(&LinkKind::Veth));

    let forced = LanSpecBuilder::new("lan1").spoke("s1").force(true).build();
    fabric.ensure_overlay(&forced, HOSTNAME).unwrap();
    TopologyVerifier::new(&kernel)
        .assert_overlay("lan1", "br0", "vx0", 1426)
        .unwrap();
}

#[test]
fn test_uplink_override_for_this_host() {
    let (kernel, fabric) = host_with_uplink();
    let jumbo = kernel.add_uplink("eth1", 9000);

    let spec = LanSpecBuilder::new("lan1")
        .spoke("s1")
        .uplink_for(HOSTNAME, "eth1")
        .uplink_for("node2", "eth7")
        .build();
    fabric.ensure_overlay(&spec, HOSTNAME).unwrap();

    let vxlan = kernel.link("lan1", "vx0").unwrap();
    assert_eq!(vxlan.mtu, 8926);
    assert_eq!(vxlan.vxlan.unwrap().uplink, Some(jumbo));
}

#[test]
fn test_named_default_uplink() {
    let (kernel, fabric) = host_with_uplink();
    let other = kernel.add_uplink("bond0", 1600);

    let spec = LanSpecBuilder::new("lan1").spoke("s1").uplink("bond0").build();
    fabric.ensure_overlay(&spec, HOSTNAME).unwrap();
    assert_eq!(
        kernel.link("lan1", "vx0").unwrap().vxlan.unwrap().uplink,
        Some(other)
    );
}

#[test]
fn test_missing_uplink() {
    let (kernel, fabric) = host_with_uplink();
    let spec = LanSpecBuilder::new("lan1").spoke("s1").uplink("eth9").build();

    let err = fabric.ensure_overlay(&spec, HOSTNAME).unwrap_err();
    assert_eq!(err.to_string(), "uplink device not found: eth9");
    assert_eq!(kernel.link("lan1", "br0"), None);
}

#[test]
fn test_auto_uplink_without_default_route() {
    let kernel = k8slan_fabric_test::FakeKernel::new();
    kernel.add_uplink(UPLINK, 1500);
    let fabric = k8slan_fabric::LanFabric::new(kernel.clone());

    let err = fabric.ensure_overlay(&basic_lan(), HOSTNAME).unwrap_err();
    assert!(matches!(err, FabricError::UplinkNotFound { .. }));
}

#[test]
fn test_uplink_mtu_too_small() {
    let kernel = k8slan_fabric_test::FakeKernel::new();
    let tiny = kernel.add_uplink("tiny0", 100);
    kernel.set_default_route(tiny);
    let fabric = k8slan_fabric::LanFabric::new(kernel.clone());

    let err = fabric.ensure_overlay(&basic_lan(), HOSTNAME).unwrap_err();
    assert!(matches!(err, FabricError::InvalidMtu { mtu: 100, .. }));
}

#[test]
fn test_ipv4_group_and_custom_port() {
    let (kernel, fabric) = host_with_uplink();
    let spec = LanSpecBuilder::new("lan1")
        .spoke("s1")
        .group("239.1.1.1")
        .port(8472)
        .build();
    fabric.ensure_overlay(&spec, HOSTNAME).unwrap();

    let attrs = kernel.link("lan1", "vx0").unwrap().vxlan.unwrap();
    assert_eq!(attrs.group, Some("239.1.1.1".parse().unwrap()));
    assert_eq!(attrs.port, 8472);
}
