//! Test fixtures for common LAN layouts
//!
//! Provides spec builders and a ready-made host with an uplink

use crate::fake::FakeKernel;
use k8slan_fabric::{LanFabric, SettlePolicy};
use k8slan_types::{LanSpec, Topology};
use std::time::Duration;

/// Hostname the engine is run as in tests
pub const HOSTNAME: &str = "node1";

/// Name of the default uplink device
pub const UPLINK: &str = "eth0";

/// MTU of the default uplink device
pub const UPLINK_MTU: u32 = 1500;

/// Builder for a [`LanSpec`]
#[derive(Debug, Clone)]
pub struct LanSpecBuilder {
    spec: LanSpec,
}

impl LanSpecBuilder {
    /// A spec for namespace `ns` with bridge `br0`, vxlan `vx0` and VNI 100
    pub fn new(ns: impl Into<String>) -> Self {
        Self {
            spec: LanSpec {
                ns: ns.into(),
                bridge: "br0".to_string(),
                vxlan: "vx0".to_string(),
                vni: 100,
                spokes: Vec::new(),
                ..Default::default()
            },
        }
    }

    pub fn bridge(mut self, bridge: impl Into<String>) -> Self {
        self.spec.bridge = bridge.into();
        self
    }

    pub fn vxlan(mut self, vxlan: impl Into<String>) -> Self {
        self.spec.vxlan = vxlan.into();
        self
    }

    pub fn vni(mut self, vni: i64) -> Self {
        self.spec.vni = vni;
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.spec.vxlan_grp = group.into();
        self
    }

    pub fn port(mut self, port: i64) -> Self {
        self.spec.vxlan_port = port;
        self
    }

    /// Add one spoke
    pub fn spoke(mut self, spoke: impl Into<String>) -> Self {
        self.spec.spokes.push(spoke.into());
        self
    }

    /// Add `count` spokes named `s0`, `s1`, ...
    pub fn numbered_spokes(mut self, count: usize) -> Self {
        self.spec
            .spokes
            .extend((0..count).map(|i| format!("s{i}")));
        self
    }

    pub fn uplink(mut self, device: impl Into<String>) -> Self {
        self.spec.default_vxlan_dev = device.into();
        self
    }

    /// Per-host uplink override
    pub fn uplink_for(mut self, host: impl Into<String>, device: impl Into<String>) -> Self {
        self.spec.vxlan_dev_map.insert(host.into(), device.into());
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.spec.force = force;
        self
    }

    pub fn topology(mut self, topology: Topology) -> Self {
        self.spec.topology = topology;
        self
    }

    pub fn build(self) -> LanSpec {
        self.spec
    }
}

/// A basic LAN `lan1` with two spokes `s1` and `s2`
pub fn basic_lan() -> LanSpec {
    LanSpecBuilder::new("lan1").spoke("s1").spoke("s2").build()
}

/// Settle policy short enough for tests that expect a timeout
pub fn quick_settle() -> SettlePolicy {
    SettlePolicy {
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(5),
        max_elapsed: Duration::from_millis(50),
    }
}

/// A host with `eth0` (MTU 1500) as its default route, and an engine on it
pub fn host_with_uplink() -> (FakeKernel, LanFabric<FakeKernel>) {
    let kernel = FakeKernel::new();
    let uplink = kernel.add_uplink(UPLINK, UPLINK_MTU);
    kernel.set_default_route(uplink);
    let fabric = LanFabric::new(kernel.clone()).with_settle_policy(quick_settle());
    (kernel, fabric)
}
