//! Verification helpers for testing the fabric engine
//!
//! Provides assertion helpers to verify the link topology left in a
//! [`FakeKernel`]

use crate::fake::FakeKernel;
use k8slan_fabric::{Link, LinkKind};
use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected link '{name}' not found in namespace '{ns}'")]
    LinkNotFound { ns: String, name: String },

    #[error("Link '{name}' unexpectedly present in namespace '{ns}'")]
    UnexpectedLink { ns: String, name: String },

    #[error("Value mismatch for {ns}/{name} {field}: expected '{expected}', got '{actual}'")]
    ValueMismatch {
        ns: String,
        name: String,
        field: String,
        expected: String,
        actual: String,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Topology verification helper
pub struct TopologyVerifier<'a> {
    kernel: &'a FakeKernel,
}

impl<'a> TopologyVerifier<'a> {
    /// Create a new topology verifier
    pub fn new(kernel: &'a FakeKernel) -> Self {
        Self { kernel }
    }

    fn mismatch(
        ns: &str,
        name: &str,
        field: &str,
        expected: impl ToString,
        actual: impl ToString,
    ) -> VerificationError {
        VerificationError::ValueMismatch {
            ns: ns.to_string(),
            name: name.to_string(),
            field: field.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Verify that a link of the given kind exists and return it
    pub fn assert_link(&self, ns: &str, name: &str, kind: LinkKind) -> VerifyResult<Link> {
        let link = self
            .kernel
            .link(ns, name)
            .ok_or_else(|| VerificationError::LinkNotFound {
                ns: ns.to_string(),
                name: name.to_string(),
            })?;
        if !link.is(&kind) {
            return Err(Self::mismatch(ns, name, "kind", kind, &link.kind));
        }
        Ok(link)
    }

    /// Verify that no link with this name exists
    pub fn assert_absent(&self, ns: &str, name: &str) -> VerifyResult<()> {
        if self.kernel.link(ns, name).is_some() {
            return Err(VerificationError::UnexpectedLink {
                ns: ns.to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Verify that a link is administratively up
    pub fn assert_up(&self, ns: &str, name: &str) -> VerifyResult<()> {
        let link = self.find(ns, name)?;
        if !link.up {
            return Err(Self::mismatch(ns, name, "state", "up", "down"));
        }
        Ok(())
    }

    /// Verify a link's MTU
    pub fn assert_mtu(&self, ns: &str, name: &str, mtu: u32) -> VerifyResult<()> {
        let link = self.find(ns, name)?;
        if link.mtu != mtu {
            return Err(Self::mismatch(ns, name, "mtu", mtu, link.mtu));
        }
        Ok(())
    }

    /// Verify that `port` is enslaved to `bridge` with the LAN's group forward mask
    pub fn assert_bridge_port(&self, ns: &str, port: &str, bridge: &str) -> VerifyResult<()> {
        let bridge_link = self.find(ns, bridge)?;
        let port_link = self.find(ns, port)?;
        if port_link.master != Some(bridge_link.index) {
            return Err(Self::mismatch(
                ns,
                port,
                "master",
                bridge_link.index,
                format!("{:?}", port_link.master),
            ));
        }

        let mask = self.kernel.group_fwd_mask(ns, port);
        if mask != Some(k8slan_fabric::overlay::BRIDGE_PORT_GROUP_FWD_MASK) {
            return Err(Self::mismatch(
                ns,
                port,
                "group_fwd_mask",
                k8slan_fabric::overlay::BRIDGE_PORT_GROUP_FWD_MASK,
                format!("{mask:?}"),
            ));
        }
        Ok(())
    }

    /// Verify the full overlay of a LAN: bridge and VXLAN up, attached, at `mtu`
    pub fn assert_overlay(&self, ns: &str, bridge: &str, vxlan: &str, mtu: u32) -> VerifyResult<()> {
        self.assert_link(ns, bridge, LinkKind::Bridge)?;
        self.assert_link(ns, vxlan, LinkKind::Vxlan)?;
        self.assert_up(ns, bridge)?;
        self.assert_up(ns, vxlan)?;
        self.assert_mtu(ns, bridge, mtu)?;
        self.assert_mtu(ns, vxlan, mtu)?;
        self.assert_bridge_port(ns, vxlan, bridge)
    }

    fn find(&self, ns: &str, name: &str) -> VerifyResult<Link> {
        self.kernel
            .link(ns, name)
            .ok_or_else(|| VerificationError::LinkNotFound {
                ns: ns.to_string(),
                name: name.to_string(),
            })
    }
}
