//! Per-host reconciliation engine for k8slan overlay LANs.
//!
//! A LAN is a bridge and a VXLAN link inside a dedicated network namespace,
//! plus one endpoint per spoke reaching into the host namespace. Each host
//! runs the engine independently; the VXLAN multicast group ties the hosts'
//! bridges into one L2 segment.
//!
//! - [`NamespaceManager`]: creates LAN namespaces and runs work inside them
//! - [`inspector`]: reads live links and computes VXLAN drift
//! - [`OverlayBuilder`]: converges the bridge and VXLAN link
//! - [`SpokeProvisioner`]: builds spoke endpoints (veth or VLAN)
//! - [`tap`]: macvtap devices on top of spoke host ends
//! - [`LanFabric`]: the Ensure/Remove entry points
//!
//! All kernel access goes through the [`Kernel`] and [`LinkOps`] traits.
//! On Linux, [`SystemKernel`] implements them with rtnetlink and setns.

pub mod device;
pub mod error;
pub mod inspector;
pub mod kernel;
pub mod namespace;
pub mod overlay;
pub mod reconciler;
pub mod settle;
pub mod spoke;
pub mod tap;

#[cfg(target_os = "linux")]
pub mod system;

pub use device::DeviceAllocation;
pub use error::{FabricError, FabricResult};
pub use inspector::Drift;
pub use kernel::{Kernel, Link, LinkKind, LinkOps, NetNs, NewLink, VxlanAttrs};
pub use namespace::NamespaceManager;
pub use overlay::{Overlay, OverlayBuilder, OverlayPlan};
pub use reconciler::{LanFabric, LanState, TapRequest, TeardownReport};
pub use settle::SettlePolicy;
pub use spoke::{SpokePlan, SpokeProvisioner};

#[cfg(target_os = "linux")]
pub use system::SystemKernel;
